use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_ORGANIZATION_APPLICATION_LIMIT;
use crate::workflows::domain::{Application, CandidateId, Opportunity, OpportunityStatus, Track};

/// Why a new application was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    OpportunityClosed,
    DeadlinePassed,
    AlreadyApplied,
    OrganizationLimitReached,
    OpportunityFull,
}

impl IneligibleReason {
    pub const fn code(self) -> &'static str {
        match self {
            IneligibleReason::OpportunityClosed => "opportunity_closed",
            IneligibleReason::DeadlinePassed => "deadline_passed",
            IneligibleReason::AlreadyApplied => "already_applied",
            IneligibleReason::OrganizationLimitReached => "organization_limit_reached",
            IneligibleReason::OpportunityFull => "opportunity_full",
        }
    }

    pub fn summary(self) -> &'static str {
        match self {
            IneligibleReason::OpportunityClosed => {
                "the opportunity is no longer accepting applications"
            }
            IneligibleReason::DeadlinePassed => "the application deadline has passed",
            IneligibleReason::AlreadyApplied => {
                "an application for this opportunity already exists"
            }
            IneligibleReason::OrganizationLimitReached => {
                "the application limit for this institution has been reached"
            }
            IneligibleReason::OpportunityFull => "all places for this course are taken",
        }
    }
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Result of an eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum EligibilityDecision {
    Allowed,
    Refused(IneligibleReason),
}

impl EligibilityDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, EligibilityDecision::Allowed)
    }

    pub fn reason(self) -> Option<IneligibleReason> {
        match self {
            EligibilityDecision::Allowed => None,
            EligibilityDecision::Refused(reason) => Some(reason),
        }
    }
}

/// Pure admission rules; touches no storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityPolicy {
    organization_application_limit: usize,
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ORGANIZATION_APPLICATION_LIMIT)
    }
}

impl EligibilityPolicy {
    pub fn new(organization_application_limit: usize) -> Self {
        Self {
            organization_application_limit: organization_application_limit.max(1),
        }
    }

    pub fn organization_application_limit(&self) -> usize {
        self.organization_application_limit
    }

    /// Decides whether `candidate_id` may apply to `opportunity`.
    ///
    /// `existing` holds the candidate's stored applications; entries belonging to other
    /// candidates are ignored. Checks run in a fixed order and the first failure wins:
    /// open status and deadline (`now` equal to the deadline still passes), duplicates,
    /// then for courses the per-organization limit and the seat capacity.
    pub fn evaluate(
        &self,
        candidate_id: &CandidateId,
        opportunity: &Opportunity,
        existing: &[Application],
        now: DateTime<Utc>,
    ) -> EligibilityDecision {
        if opportunity.status != OpportunityStatus::Active {
            return EligibilityDecision::Refused(IneligibleReason::OpportunityClosed);
        }
        if let Some(deadline) = opportunity.deadline {
            if now > deadline {
                return EligibilityDecision::Refused(IneligibleReason::DeadlinePassed);
            }
        }

        if live_applications(existing, candidate_id)
            .any(|application| application.opportunity_id == opportunity.id)
        {
            return EligibilityDecision::Refused(IneligibleReason::AlreadyApplied);
        }

        if let Some(capacity) = opportunity.capacity() {
            let with_organization = live_applications(existing, candidate_id)
                .filter(|application| application.track() == Track::Course)
                .filter(|application| application.organization_id == opportunity.organization_id)
                .count();
            if with_organization >= self.organization_application_limit {
                return EligibilityDecision::Refused(IneligibleReason::OrganizationLimitReached);
            }

            if opportunity.application_count >= capacity {
                return EligibilityDecision::Refused(IneligibleReason::OpportunityFull);
            }
        }

        EligibilityDecision::Allowed
    }
}

fn live_applications<'a>(
    existing: &'a [Application],
    candidate_id: &'a CandidateId,
) -> impl Iterator<Item = &'a Application> + 'a {
    existing
        .iter()
        .filter(move |application| &application.candidate_id == candidate_id)
        .filter(|application| application.status.is_live())
}

/// Convenience wrapper using the default per-organization limit.
pub fn can_apply(
    candidate_id: &CandidateId,
    opportunity: &Opportunity,
    existing: &[Application],
    now: DateTime<Utc>,
) -> EligibilityDecision {
    EligibilityPolicy::default().evaluate(candidate_id, opportunity, existing, now)
}
