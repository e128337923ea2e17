use crate::infra::InMemoryNotificationPublisher;
use careerlink::config::EngineConfig;
use careerlink::error::AppError;
use careerlink::workflows::catalog::NewOpportunity;
use careerlink::workflows::domain::{
    Actor, ApplicationStatus, CandidateId, CourseStatus, EducationLevel, Opportunity,
    OpportunityTerms, Organization, OrganizationKind,
};
use careerlink::workflows::onboarding::NewOrganization;
use careerlink::workflows::profiles::ProfileInput;
use careerlink::workflows::store::InMemoryStore;
use careerlink::workflows::{Platform, WorkflowError};
use chrono::SecondsFormat;
use clap::Args;
use std::collections::BTreeSet;
use std::sync::Arc;

type DemoPlatform = Platform<InMemoryStore, InMemoryNotificationPublisher>;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Intake period used for the demo courses and the admissions publication.
    #[arg(long, default_value = "2025-fall")]
    pub(crate) period: String,
    /// Per-institution application limit (defaults to the engine configuration).
    #[arg(long)]
    pub(crate) organization_limit: Option<usize>,
    /// Skip the matching and ranking portion of the demo.
    #[arg(long)]
    pub(crate) skip_matching: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        period,
        organization_limit,
        skip_matching,
    } = args;

    let mut config = EngineConfig::default();
    if let Some(limit) = organization_limit {
        config.organization_application_limit = limit;
    }
    let notifier = Arc::new(InMemoryNotificationPublisher::default());
    let platform = Platform::new(Arc::new(InMemoryStore::new()), notifier.clone(), config);

    println!("CareerLink engine demo");
    let college = approved(&platform, OrganizationKind::Institution, "Northfield College")?;
    let studio = approved(&platform, OrganizationKind::Company, "Harbor Labs")?;
    let ada = candidate(&platform, "uid-ada", &["React"], Some(80))?;
    let grace = candidate(&platform, "uid-grace", &["React", "Node.js", "SQL"], Some(92))?;

    println!("\nCapacity");
    let seminar = course(&platform, &college, "Robotics seminar", 1, &period)?;
    let seat = platform.applications.submit_application(&ada, &seminar.id)?;
    println!("- {} took the only seat in {}", ada, seminar.title);
    report_refusal(
        "grace",
        platform
            .applications
            .submit_application(&grace, &seminar.id),
    );

    println!("\nPer-institution limit");
    let limit = platform.config().organization_application_limit;
    let mut extra = Vec::new();
    for index in 0..=limit {
        let title = format!("Elective {}", index + 1);
        extra.push(course(&platform, &college, &title, 30, &period)?);
    }
    for elective in &extra {
        match platform
            .applications
            .submit_application(&ada, &elective.id)
        {
            Ok(_) => println!("- applied to {}", elective.title),
            Err(err) => println!("- {} refused: {}", elective.title, err),
        }
    }
    platform.applications.withdraw(&seat.id, &ada)?;
    println!("- withdrew from {}", seminar.title);
    if let Some(last) = extra.last() {
        report_refusal(
            "retry after withdrawal",
            platform.applications.submit_application(&ada, &last.id),
        );
    }

    println!("\nAdmissions");
    let staff = Actor::Staff(college.id.clone());
    for application in platform.applications.applications_for_candidate(&ada)? {
        if application.status == ApplicationStatus::Course(CourseStatus::Pending)
            && application.organization_id == college.id
        {
            platform.applications.transition_status(
                &application.id,
                ApplicationStatus::Course(CourseStatus::Admitted),
                &staff,
            )?;
        }
    }
    let publication = platform
        .applications
        .publish_admissions(&college.id, &period, &staff)?;
    println!(
        "- {} published at {}: {} admitted | {} rejected | {} pending",
        publication.period,
        publication
            .published_at
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        publication.admitted,
        publication.rejected,
        publication.pending
    );
    println!("- {} notification(s) queued", notifier.events().len());

    if skip_matching {
        return Ok(());
    }

    println!("\nMatching");
    let posting = job(&platform, &studio, "Junior full-stack developer", &["React", "Node.js"])?;
    for id in [&ada, &grace] {
        let score = platform.score_match(id, &posting.id)?;
        println!("- {}: {}/100", id, score.total);
        for component in &score.components {
            println!(
                "    {:?}: {:.1} ({})",
                component.factor, component.points, component.notes
            );
        }
        platform.applications.submit_application(id, &posting.id)?;
    }
    let ranked = platform
        .ranking
        .rank_applicants(&posting.id, &Actor::Staff(studio.id.clone()))?;
    println!("Ranking for {}:", posting.title);
    for (position, entry) in ranked.iter().enumerate() {
        println!(
            "  {}. {} ({})",
            position + 1,
            entry.application.candidate_id,
            entry.score.total
        );
    }

    Ok(())
}

fn report_refusal<T>(label: &str, outcome: Result<T, WorkflowError>) {
    match outcome {
        Ok(_) => println!("- {label}: accepted"),
        Err(err) => println!("- {label}: refused ({})", err.code()),
    }
}

fn approved(
    platform: &DemoPlatform,
    kind: OrganizationKind,
    name: &str,
) -> Result<Organization, AppError> {
    let registered = platform.organizations.register(NewOrganization {
        kind,
        name: name.to_string(),
        contact_email: format!("admissions@{}.example", name.to_lowercase().replace(' ', "-")),
        contact_phone: None,
    })?;
    Ok(platform
        .organizations
        .approve(&registered.id, &Actor::Admin)?)
}

fn course(
    platform: &DemoPlatform,
    institution: &Organization,
    title: &str,
    capacity: u32,
    period: &str,
) -> Result<Opportunity, AppError> {
    Ok(platform.catalog.publish_opportunity(
        &Actor::Staff(institution.id.clone()),
        NewOpportunity {
            organization_id: institution.id.clone(),
            title: title.to_string(),
            required_skills: BTreeSet::new(),
            terms: OpportunityTerms::Course {
                capacity,
                prerequisites: None,
                intake_period: period.to_string(),
            },
            deadline: None,
        },
    )?)
}

fn job(
    platform: &DemoPlatform,
    company: &Organization,
    title: &str,
    skills: &[&str],
) -> Result<Opportunity, AppError> {
    Ok(platform.catalog.publish_opportunity(
        &Actor::Staff(company.id.clone()),
        NewOpportunity {
            organization_id: company.id.clone(),
            title: title.to_string(),
            required_skills: skills.iter().map(|skill| skill.to_string()).collect(),
            terms: OpportunityTerms::Job {
                minimum_education: EducationLevel::Diploma,
            },
            deadline: None,
        },
    )?)
}

fn candidate(
    platform: &DemoPlatform,
    uid: &str,
    skills: &[&str],
    academic: Option<u8>,
) -> Result<CandidateId, AppError> {
    let id = CandidateId::from(uid);
    platform.candidates.save_profile(
        &id,
        ProfileInput {
            email: format!("{uid}@student.example"),
            display_name: uid.trim_start_matches("uid-").to_string(),
            education_level: Some(EducationLevel::Bachelors),
            skills: skills.iter().map(|skill| skill.to_string()).collect(),
            certificate_count: 1,
            experience_years: 0,
            academic_performance: academic,
        },
        &Actor::Candidate(id.clone()),
    )?;
    Ok(id)
}
