use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::DocumentId;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn document_id(&self) -> DocumentId {
                DocumentId(self.0.clone())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<DocumentId> for $name {
            fn from(value: DocumentId) -> Self {
                Self(value.0)
            }
        }
    };
}

entity_id!(
    /// Identity of a student, issued by the identity provider.
    CandidateId
);
entity_id!(OrganizationId);
entity_id!(OpportunityId);
entity_id!(ApplicationId);

/// Name of the derived counter on opportunity documents.
pub const APPLICATION_COUNT_FIELD: &str = "application_count";

/// Highest completed education, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EducationLevel {
    HighSchool,
    Diploma,
    Bachelors,
    Masters,
    Phd,
}

impl EducationLevel {
    pub const fn label(self) -> &'static str {
        match self {
            EducationLevel::HighSchool => "high_school",
            EducationLevel::Diploma => "diploma",
            EducationLevel::Bachelors => "bachelors",
            EducationLevel::Masters => "masters",
            EducationLevel::Phd => "phd",
        }
    }
}

/// Student profile used for applications and matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub education_level: Option<EducationLevel>,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    #[serde(default)]
    pub certificate_count: u32,
    #[serde(default)]
    pub experience_years: u32,
    /// Percentage in `0..=100`; `None` until the student records results.
    #[serde(default)]
    pub academic_performance: Option<u8>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationKind {
    Institution,
    Company,
}

/// Admin review outcome for an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalState {
    pub const fn label(self) -> &'static str {
        match self {
            ApprovalState::Pending => "pending",
            ApprovalState::Approved => "approved",
            ApprovalState::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub kind: OrganizationKind,
    pub name: String,
    pub contact_email: String,
    #[serde(default)]
    pub contact_phone: Option<String>,
    pub approval: ApprovalState,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl Organization {
    /// Candidates only ever see opportunities of approved, active organizations.
    pub fn is_visible(&self) -> bool {
        self.approval == ApprovalState::Approved && self.active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Course,
    Job,
}

impl Track {
    pub const fn label(self) -> &'static str {
        match self {
            Track::Course => "course",
            Track::Job => "job",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    Active,
    Closed,
}

/// Track-specific terms of an opportunity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityTerms {
    Course {
        capacity: u32,
        #[serde(default)]
        prerequisites: Option<String>,
        intake_period: String,
    },
    Job {
        minimum_education: EducationLevel,
    },
}

/// A course seat pool or a job posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: OpportunityId,
    pub organization_id: OrganizationId,
    pub title: String,
    #[serde(default)]
    pub required_skills: BTreeSet<String>,
    pub terms: OpportunityTerms,
    /// Applications received so far; maintained by the lifecycle manager only.
    #[serde(default)]
    pub application_count: u32,
    pub status: OpportunityStatus,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn track(&self) -> Track {
        match self.terms {
            OpportunityTerms::Course { .. } => Track::Course,
            OpportunityTerms::Job { .. } => Track::Job,
        }
    }

    pub fn capacity(&self) -> Option<u32> {
        match self.terms {
            OpportunityTerms::Course { capacity, .. } => Some(capacity),
            OpportunityTerms::Job { .. } => None,
        }
    }

    pub fn intake_period(&self) -> Option<&str> {
        match &self.terms {
            OpportunityTerms::Course { intake_period, .. } => Some(intake_period),
            OpportunityTerms::Job { .. } => None,
        }
    }

    pub fn minimum_education(&self) -> Option<EducationLevel> {
        match self.terms {
            OpportunityTerms::Job { minimum_education } => Some(minimum_education),
            OpportunityTerms::Course { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    Pending,
    Admitted,
    Rejected,
    Withdrawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    New,
    Shortlisted,
    Interview,
    Rejected,
    Hired,
}

/// Status of an application; the variant fixes which vocabulary applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Course(CourseStatus),
    Job(JobStatus),
}

impl ApplicationStatus {
    pub const fn initial(track: Track) -> Self {
        match track {
            Track::Course => ApplicationStatus::Course(CourseStatus::Pending),
            Track::Job => ApplicationStatus::Job(JobStatus::New),
        }
    }

    pub const fn track(self) -> Track {
        match self {
            ApplicationStatus::Course(_) => Track::Course,
            ApplicationStatus::Job(_) => Track::Job,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Course(CourseStatus::Pending) => "pending",
            ApplicationStatus::Course(CourseStatus::Admitted) => "admitted",
            ApplicationStatus::Course(CourseStatus::Rejected) => "rejected",
            ApplicationStatus::Course(CourseStatus::Withdrawn) => "withdrawn",
            ApplicationStatus::Job(JobStatus::New) => "new",
            ApplicationStatus::Job(JobStatus::Shortlisted) => "shortlisted",
            ApplicationStatus::Job(JobStatus::Interview) => "interview",
            ApplicationStatus::Job(JobStatus::Rejected) => "rejected",
            ApplicationStatus::Job(JobStatus::Hired) => "hired",
        }
    }

    pub const fn is_rejected(self) -> bool {
        matches!(
            self,
            ApplicationStatus::Course(CourseStatus::Rejected)
                | ApplicationStatus::Job(JobStatus::Rejected)
        )
    }

    /// Counts toward duplicate and per-organization limits.
    pub const fn is_live(self) -> bool {
        !self.is_rejected() && !matches!(self, ApplicationStatus::Course(CourseStatus::Withdrawn))
    }

    /// Parses a track-specific label such as `"shortlisted"`.
    pub fn parse(track: Track, label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase();
        let status = match (track, normalized.as_str()) {
            (Track::Course, "pending") => ApplicationStatus::Course(CourseStatus::Pending),
            (Track::Course, "admitted") => ApplicationStatus::Course(CourseStatus::Admitted),
            (Track::Course, "rejected") => ApplicationStatus::Course(CourseStatus::Rejected),
            (Track::Course, "withdrawn") => ApplicationStatus::Course(CourseStatus::Withdrawn),
            (Track::Job, "new") => ApplicationStatus::Job(JobStatus::New),
            (Track::Job, "shortlisted") => ApplicationStatus::Job(JobStatus::Shortlisted),
            (Track::Job, "interview") => ApplicationStatus::Job(JobStatus::Interview),
            (Track::Job, "rejected") => ApplicationStatus::Job(JobStatus::Rejected),
            (Track::Job, "hired") => ApplicationStatus::Job(JobStatus::Hired),
            _ => return None,
        };
        Some(status)
    }
}

/// A candidate's claim on one opportunity.
///
/// Display fields are copied at submission time so history keeps the names that were current
/// when the candidate applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub candidate_id: CandidateId,
    pub opportunity_id: OpportunityId,
    pub organization_id: OrganizationId,
    pub status: ApplicationStatus,
    #[serde(default)]
    pub intake_period: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub candidate_name: String,
    pub candidate_email: String,
    pub opportunity_title: String,
    pub organization_name: String,
}

impl Application {
    pub fn track(&self) -> Track {
        self.status.track()
    }
}

/// Marker recorded once an organization finalizes admissions for an intake period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionPublication {
    pub id: String,
    pub organization_id: OrganizationId,
    pub period: String,
    pub published_at: DateTime<Utc>,
    pub published_by: String,
    pub admitted: u32,
    pub rejected: u32,
    /// Applications still pending review when the period was closed; they are left untouched.
    pub pending: u32,
}

impl AdmissionPublication {
    pub fn marker_id(organization_id: &OrganizationId, period: &str) -> DocumentId {
        DocumentId(format!("{organization_id}:{}", period.trim()))
    }
}

/// Whoever is asking for a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Candidate(CandidateId),
    Staff(OrganizationId),
    Admin,
}

impl Actor {
    pub fn describe(&self) -> String {
        match self {
            Actor::Candidate(id) => format!("candidate:{id}"),
            Actor::Staff(id) => format!("staff:{id}"),
            Actor::Admin => "admin".to_string(),
        }
    }

    /// Staff of the organization itself, or an admin.
    pub fn manages(&self, organization_id: &OrganizationId) -> bool {
        match self {
            Actor::Admin => true,
            Actor::Staff(id) => id == organization_id,
            Actor::Candidate(_) => false,
        }
    }
}
