use std::collections::BTreeSet;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration as StdDuration;

use chrono::Duration;

use super::common::*;
use crate::config::EngineConfig;
use crate::workflows::applications::IneligibleReason;
use crate::workflows::catalog::NewOpportunity;
use crate::workflows::domain::{
    Actor, ApplicationId, ApplicationStatus, CandidateId, CourseStatus, JobStatus, OpportunityId,
    OpportunityTerms, APPLICATION_COUNT_FIELD,
};
use crate::workflows::error::WorkflowError;
use crate::workflows::store::records::patch;
use crate::workflows::store::{Collection, EntityStore};
use serde_json::json;

fn course_status(status: CourseStatus) -> ApplicationStatus {
    ApplicationStatus::Course(status)
}

fn job_status(status: JobStatus) -> ApplicationStatus {
    ApplicationStatus::Job(status)
}

#[test]
fn course_submission_records_pending_application_and_counts_it() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let course = fx.course(&institution, "Applied Statistics", 3);
    let candidate = fx.candidate("uid-amara", &[], Some(70));

    let application = fx
        .platform
        .applications
        .submit_application(&candidate, &course.id)
        .expect("submits");

    assert_eq!(application.status, course_status(CourseStatus::Pending));
    assert_eq!(application.intake_period.as_deref(), Some("2025-fall"));
    assert_eq!(application.organization_name, "Northfield College");
    assert_eq!(application.opportunity_title, "Applied Statistics");
    assert_eq!(application.submitted_at, start());
    assert_eq!(fx.stored_count(&course), 1);

    let stored = fx
        .platform
        .applications
        .application(&application.id)
        .expect("stored");
    assert_eq!(stored, application);
}

#[test]
fn full_course_refuses_without_touching_the_counter() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let course = fx.course(&institution, "Seminar", 1);
    let first = fx.candidate("uid-c", &[], None);
    let second = fx.candidate("uid-d", &[], None);

    fx.platform
        .applications
        .submit_application(&first, &course.id)
        .expect("first seat");
    match fx.platform.applications.submit_application(&second, &course.id) {
        Err(WorkflowError::Ineligible(IneligibleReason::OpportunityFull)) => {}
        other => panic!("expected opportunity_full, got {other:?}"),
    }
    assert_eq!(fx.stored_count(&course), 1);
    assert!(fx
        .platform
        .applications
        .applications_for_candidate(&second)
        .expect("lists")
        .is_empty());
}

#[test]
fn missing_entities_are_not_found() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let course = fx.course(&institution, "Seminar", 4);
    let candidate = fx.candidate("uid-c", &[], None);

    assert!(matches!(
        fx.platform
            .applications
            .submit_application(&CandidateId::from("uid-ghost"), &course.id),
        Err(WorkflowError::NotFound { entity: "candidate", .. })
    ));
    assert!(matches!(
        fx.platform
            .applications
            .submit_application(&candidate, &OpportunityId::from("opp-missing")),
        Err(WorkflowError::NotFound { entity: "opportunity", .. })
    ));
}

#[test]
fn suspended_organizations_hide_their_opportunities_from_submission() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let course = fx.course(&institution, "Seminar", 4);
    let candidate = fx.candidate("uid-c", &[], None);
    fx.platform
        .organizations
        .set_active(&institution.id, false, &Actor::Admin)
        .expect("suspends");

    assert!(matches!(
        fx.platform
            .applications
            .submit_application(&candidate, &course.id),
        Err(WorkflowError::NotFound { entity: "opportunity", .. })
    ));
    assert_eq!(fx.stored_count(&course), 0);
}

#[test]
fn deadline_uses_the_clock_at_submission() {
    let fx = fixture();
    let company = fx.company("Harbor Labs");
    let posting = fx.job(&company, "Analyst", &["SQL"]);
    fx.store
        .update(
            Collection::Opportunities,
            &posting.id.document_id(),
            patch([("deadline", json!(start().to_rfc3339()))]),
        )
        .expect("sets deadline");
    let candidate = fx.candidate("uid-c", &["SQL"], None);

    fx.clock.advance(Duration::seconds(1));
    match fx
        .platform
        .applications
        .submit_application(&candidate, &posting.id)
    {
        Err(WorkflowError::Ineligible(IneligibleReason::DeadlinePassed)) => {}
        other => panic!("expected deadline_passed, got {other:?}"),
    }
}

#[test]
fn job_review_follows_the_pipeline() {
    let fx = fixture();
    let company = fx.company("Harbor Labs");
    let posting = fx.job(&company, "Backend engineer", &["Rust"]);
    let candidate = fx.candidate("uid-c", &["Rust"], Some(90));
    let staff = Actor::Staff(company.id.clone());

    let application = fx
        .platform
        .applications
        .submit_application(&candidate, &posting.id)
        .expect("submits");
    assert_eq!(application.status, job_status(JobStatus::New));
    assert_eq!(fx.stored_count(&posting), 1);

    fx.clock.advance(Duration::hours(1));
    let shortlisted = fx
        .platform
        .applications
        .transition_status(&application.id, job_status(JobStatus::Shortlisted), &staff)
        .expect("shortlists");
    assert_eq!(shortlisted.updated_at, start() + Duration::hours(1));

    match fx
        .platform
        .applications
        .transition_status(&application.id, job_status(JobStatus::Hired), &staff)
    {
        Err(WorkflowError::InvalidTransition { from, to, .. }) => {
            assert_eq!((from, to), ("shortlisted", "hired"));
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
    let stored = fx
        .platform
        .applications
        .application(&application.id)
        .expect("stored");
    assert_eq!(stored.status, job_status(JobStatus::Shortlisted));

    for next in [JobStatus::Interview, JobStatus::Hired] {
        fx.platform
            .applications
            .transition_status(&application.id, job_status(next), &Actor::Admin)
            .expect("advances");
    }
}

#[test]
fn rejected_course_applications_stay_rejected() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let course = fx.course(&institution, "Seminar", 4);
    let candidate = fx.candidate("uid-c", &[], None);
    let staff = Actor::Staff(institution.id.clone());
    let application = fx
        .platform
        .applications
        .submit_application(&candidate, &course.id)
        .expect("submits");

    fx.platform
        .applications
        .transition_status(&application.id, course_status(CourseStatus::Rejected), &staff)
        .expect("rejects");
    assert!(matches!(
        fx.platform.applications.transition_status(
            &application.id,
            course_status(CourseStatus::Admitted),
            &staff
        ),
        Err(WorkflowError::InvalidTransition { .. })
    ));
    assert!(matches!(
        fx.platform.applications.transition_status(
            &application.id,
            job_status(JobStatus::Shortlisted),
            &staff
        ),
        Err(WorkflowError::InvalidTransition { .. })
    ));
}

#[test]
fn only_the_owning_organization_reviews() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let rival = fx.institution("Southgate Institute");
    let course = fx.course(&institution, "Seminar", 4);
    let candidate = fx.candidate("uid-c", &[], None);
    let application = fx
        .platform
        .applications
        .submit_application(&candidate, &course.id)
        .expect("submits");

    assert!(matches!(
        fx.platform.applications.transition_status(
            &application.id,
            course_status(CourseStatus::Admitted),
            &Actor::Staff(rival.id.clone())
        ),
        Err(WorkflowError::Forbidden(_))
    ));
    assert!(matches!(
        fx.platform.applications.transition_status(
            &application.id,
            course_status(CourseStatus::Admitted),
            &Actor::Candidate(candidate.clone())
        ),
        Err(WorkflowError::Forbidden(_))
    ));
    assert!(matches!(
        fx.platform.applications.transition_status(
            &application.id,
            course_status(CourseStatus::Withdrawn),
            &Actor::Staff(institution.id.clone())
        ),
        Err(WorkflowError::Forbidden(_))
    ));
}

#[test]
fn candidate_withdrawal_through_transition_releases_the_seat() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let course = fx.course(&institution, "Seminar", 1);
    let candidate = fx.candidate("uid-c", &[], None);
    let application = fx
        .platform
        .applications
        .submit_application(&candidate, &course.id)
        .expect("submits");

    let withdrawn = fx
        .platform
        .applications
        .transition_status(
            &application.id,
            course_status(CourseStatus::Withdrawn),
            &Actor::Candidate(candidate.clone()),
        )
        .expect("withdraws");
    assert_eq!(withdrawn.status, course_status(CourseStatus::Withdrawn));
    assert_eq!(fx.stored_count(&course), 0);
    assert!(matches!(
        fx.platform.applications.application(&application.id),
        Err(WorkflowError::NotFound { .. })
    ));
}

#[test]
fn withdrawal_is_limited_to_pending_course_applications_of_the_owner() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let company = fx.company("Harbor Labs");
    let course = fx.course(&institution, "Seminar", 4);
    let posting = fx.job(&company, "Analyst", &[]);
    let candidate = fx.candidate("uid-c", &[], None);
    let other = fx.candidate("uid-d", &[], None);

    let course_application = fx
        .platform
        .applications
        .submit_application(&candidate, &course.id)
        .expect("submits course");
    let job_application = fx
        .platform
        .applications
        .submit_application(&candidate, &posting.id)
        .expect("submits job");

    assert!(matches!(
        fx.platform.applications.withdraw(&course_application.id, &other),
        Err(WorkflowError::Forbidden(_))
    ));
    assert!(matches!(
        fx.platform.applications.withdraw(&job_application.id, &candidate),
        Err(WorkflowError::Forbidden(_))
    ));

    fx.platform
        .applications
        .transition_status(
            &course_application.id,
            course_status(CourseStatus::Admitted),
            &Actor::Staff(institution.id.clone()),
        )
        .expect("admits");
    assert!(matches!(
        fx.platform.applications.withdraw(&course_application.id, &candidate),
        Err(WorkflowError::Forbidden(_))
    ));
    assert_eq!(fx.stored_count(&course), 1);
    assert!(matches!(
        fx.platform
            .applications
            .withdraw(&ApplicationId::from("app-missing"), &candidate),
        Err(WorkflowError::NotFound { .. })
    ));
}

#[test]
fn publishing_admissions_notifies_once_and_freezes_revisits() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let course = fx.course(&institution, "Seminar", 5);
    let staff = Actor::Staff(institution.id.clone());
    let mut applications = Vec::new();
    for uid in ["uid-a", "uid-b", "uid-c"] {
        let candidate = fx.candidate(uid, &[], None);
        applications.push(
            fx.platform
                .applications
                .submit_application(&candidate, &course.id)
                .expect("submits"),
        );
    }

    for target in [CourseStatus::Admitted, CourseStatus::Pending, CourseStatus::Admitted] {
        fx.platform
            .applications
            .transition_status(&applications[0].id, course_status(target), &staff)
            .expect("revisits before publication");
    }
    fx.platform
        .applications
        .transition_status(
            &applications[1].id,
            course_status(CourseStatus::Rejected),
            &staff,
        )
        .expect("rejects");

    let publication = fx
        .platform
        .applications
        .publish_admissions(&institution.id, "2025-fall", &staff)
        .expect("publishes");
    assert_eq!(
        (publication.admitted, publication.rejected, publication.pending),
        (1, 1, 1)
    );
    assert!(fx
        .platform
        .applications
        .is_published(&institution.id, "2025-fall")
        .expect("reads"));

    let sent = fx.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template, "admissions_published");
    assert_eq!(sent[0].details.get("admitted").map(String::as_str), Some("1"));

    assert!(matches!(
        fx.platform
            .applications
            .publish_admissions(&institution.id, "2025-fall", &staff),
        Err(WorkflowError::Conflict(_))
    ));
    assert!(matches!(
        fx.platform.applications.transition_status(
            &applications[0].id,
            course_status(CourseStatus::Rejected),
            &staff
        ),
        Err(WorkflowError::InvalidTransition { .. })
    ));
    fx.platform
        .applications
        .transition_status(
            &applications[2].id,
            course_status(CourseStatus::Admitted),
            &staff,
        )
        .expect("pending applications can still be reviewed");
}

#[test]
fn failed_notification_leaves_publication_retryable() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let staff = Actor::Staff(institution.id.clone());
    fx.notifier.set_offline(true);

    assert!(matches!(
        fx.platform
            .applications
            .publish_admissions(&institution.id, "2025-fall", &staff),
        Err(WorkflowError::Notification(_))
    ));
    assert!(!fx
        .platform
        .applications
        .is_published(&institution.id, "2025-fall")
        .expect("reads"));

    fx.notifier.set_offline(false);
    fx.platform
        .applications
        .publish_admissions(&institution.id, "2025-fall", &staff)
        .expect("retry succeeds");
}

#[test]
fn outsiders_cannot_publish_admissions() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let candidate = fx.candidate("uid-c", &[], None);
    assert!(matches!(
        fx.platform.applications.publish_admissions(
            &institution.id,
            "2025-fall",
            &Actor::Candidate(candidate)
        ),
        Err(WorkflowError::Forbidden(_))
    ));
    assert!(fx.notifier.sent().is_empty());
}

#[test]
fn failed_application_write_releases_the_reserved_seat() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let course = fx.course(&institution, "Seminar", 1);
    let candidate = fx.candidate("uid-c", &[], None);

    fx.store.fail_application_writes(true);
    assert!(matches!(
        fx.platform
            .applications
            .submit_application(&candidate, &course.id),
        Err(WorkflowError::TransientStore(_))
    ));
    assert_eq!(fx.stored_count(&course), 0);

    fx.store.fail_application_writes(false);
    fx.platform
        .applications
        .submit_application(&candidate, &course.id)
        .expect("seat still available");
}

#[test]
fn failed_counter_write_rolls_back_the_job_application() {
    let fx = fixture();
    let company = fx.company("Harbor Labs");
    let posting = fx.job(&company, "Analyst", &[]);
    let candidate = fx.candidate("uid-c", &[], None);

    fx.store.fail_counter_writes(true);
    assert!(matches!(
        fx.platform
            .applications
            .submit_application(&candidate, &posting.id),
        Err(WorkflowError::TransientStore(_))
    ));
    fx.store.fail_counter_writes(false);

    assert!(fx
        .platform
        .applications
        .applications_for_candidate(&candidate)
        .expect("lists")
        .is_empty());
    assert_eq!(fx.stored_count(&posting), 0);
}

#[test]
fn reconcile_rewrites_a_drifted_counter() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let course = fx.course(&institution, "Seminar", 10);
    for uid in ["uid-a", "uid-b"] {
        let candidate = fx.candidate(uid, &[], None);
        fx.platform
            .applications
            .submit_application(&candidate, &course.id)
            .expect("submits");
    }
    fx.store
        .update(
            Collection::Opportunities,
            &course.id.document_id(),
            patch([(APPLICATION_COUNT_FIELD, json!(7))]),
        )
        .expect("drifts");

    let writes_before = fx.store.counter_writes();
    assert_eq!(
        fx.platform
            .applications
            .reconcile_counter(&course.id)
            .expect("reconciles"),
        2
    );
    assert_eq!(fx.stored_count(&course), 2);
    assert_eq!(fx.store.counter_writes(), writes_before + 1);
}

#[test]
fn per_organization_limit_follows_configuration() {
    let fx = fixture_with(EngineConfig {
        organization_application_limit: 1,
        ..EngineConfig::default()
    });
    let institution = fx.institution("Northfield College");
    let first = fx.course(&institution, "Seminar A", 5);
    let second = fx.course(&institution, "Seminar B", 5);
    let candidate = fx.candidate("uid-c", &[], None);

    fx.platform
        .applications
        .submit_application(&candidate, &first.id)
        .expect("first");
    assert!(matches!(
        fx.platform
            .applications
            .submit_application(&candidate, &second.id),
        Err(WorkflowError::Ineligible(
            IneligibleReason::OrganizationLimitReached
        ))
    ));
}

#[test]
fn rejected_course_application_cannot_be_withdrawn() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let course = fx.course(&institution, "Seminar", 4);
    let candidate = fx.candidate("uid-c", &[], None);
    let application = fx
        .platform
        .applications
        .submit_application(&candidate, &course.id)
        .expect("submits");
    fx.platform
        .applications
        .transition_status(
            &application.id,
            course_status(CourseStatus::Rejected),
            &Actor::Staff(institution.id.clone()),
        )
        .expect("rejects");

    assert!(matches!(
        fx.platform.applications.withdraw(&application.id, &candidate),
        Err(WorkflowError::Forbidden(_))
    ));
    assert!(matches!(
        fx.platform.applications.transition_status(
            &application.id,
            course_status(CourseStatus::Withdrawn),
            &Actor::Candidate(candidate.clone())
        ),
        Err(WorkflowError::Forbidden(_))
    ));
    assert_eq!(fx.stored_count(&course), 1);
    assert_eq!(
        fx.platform
            .applications
            .application(&application.id)
            .expect("still stored")
            .status,
        course_status(CourseStatus::Rejected)
    );
}

#[test]
fn illegal_targets_are_invalid_whoever_asks() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let rival = fx.institution("Southgate Institute");
    let course = fx.course(&institution, "Seminar", 4);
    let candidate = fx.candidate("uid-c", &[], None);
    let application = fx
        .platform
        .applications
        .submit_application(&candidate, &course.id)
        .expect("submits");
    fx.platform
        .applications
        .transition_status(
            &application.id,
            course_status(CourseStatus::Rejected),
            &Actor::Staff(institution.id.clone()),
        )
        .expect("rejects");

    for actor in [
        Actor::Candidate(candidate.clone()),
        Actor::Staff(rival.id.clone()),
        Actor::Staff(institution.id.clone()),
        Actor::Admin,
    ] {
        assert!(matches!(
            fx.platform.applications.transition_status(
                &application.id,
                course_status(CourseStatus::Admitted),
                &actor
            ),
            Err(WorkflowError::InvalidTransition { .. })
        ));
    }
    assert_eq!(
        fx.platform
            .applications
            .application(&application.id)
            .expect("still stored")
            .status,
        course_status(CourseStatus::Rejected)
    );
}

#[test]
fn withdrawal_stands_when_the_counter_cannot_be_released() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let course = fx.course(&institution, "Seminar", 2);
    let candidate = fx.candidate("uid-c", &[], None);
    let application = fx
        .platform
        .applications
        .submit_application(&candidate, &course.id)
        .expect("submits");

    fx.store.fail_counter_writes(true);
    let withdrawn = fx
        .platform
        .applications
        .withdraw(&application.id, &candidate)
        .expect("withdrawal reported as done");
    assert_eq!(withdrawn.status, course_status(CourseStatus::Withdrawn));
    assert!(matches!(
        fx.platform.applications.application(&application.id),
        Err(WorkflowError::NotFound { .. })
    ));
    assert_eq!(fx.stored_count(&course), 1);

    fx.store.fail_counter_writes(false);
    assert_eq!(
        fx.platform
            .applications
            .reconcile_counter(&course.id)
            .expect("reconciles"),
        0
    );
}

#[test]
fn reconciling_during_a_submission_keeps_the_reserved_seat() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let course = fx.course(&institution, "Seminar", 1);
    let first = fx.candidate("uid-c", &[], None);
    let second = fx.candidate("uid-d", &[], None);

    let recount: Arc<Mutex<Option<thread::JoinHandle<Result<u32, WorkflowError>>>>> =
        Arc::default();
    {
        let platform = fx.platform.clone();
        let course_id = course.id.clone();
        let recount = recount.clone();
        fx.store.before_next_application_write(move || {
            let (finished_tx, finished_rx) = mpsc::channel();
            let handle = thread::spawn(move || {
                let outcome = platform.applications.reconcile_counter(&course_id);
                let _ = finished_tx.send(());
                outcome
            });
            // A recount that is not serialized with the seat reservation lands here.
            let _ = finished_rx.recv_timeout(StdDuration::from_millis(200));
            *recount.lock().expect("recount mutex poisoned") = Some(handle);
        });
    }

    fx.platform
        .applications
        .submit_application(&first, &course.id)
        .expect("first takes the seat");
    let handle = recount
        .lock()
        .expect("recount mutex poisoned")
        .take()
        .expect("recount started");
    assert_eq!(handle.join().expect("recount thread"), Ok(1));
    assert_eq!(fx.stored_count(&course), 1);

    assert!(matches!(
        fx.platform
            .applications
            .submit_application(&second, &course.id),
        Err(WorkflowError::Ineligible(IneligibleReason::OpportunityFull))
    ));
    assert_eq!(fx.stored_count(&course), 1);
}

#[test]
fn padded_intake_period_is_tallied_on_publication() {
    let fx = fixture();
    let institution = fx.institution("Northfield College");
    let staff = Actor::Staff(institution.id.clone());
    let course = fx
        .platform
        .catalog
        .publish_opportunity(
            &staff,
            NewOpportunity {
                organization_id: institution.id.clone(),
                title: "Seminar".to_string(),
                required_skills: BTreeSet::new(),
                terms: OpportunityTerms::Course {
                    capacity: 3,
                    prerequisites: None,
                    intake_period: "2025-fall ".to_string(),
                },
                deadline: None,
            },
        )
        .expect("publishes course");
    assert_eq!(course.intake_period(), Some("2025-fall"));

    let candidate = fx.candidate("uid-c", &[], None);
    let application = fx
        .platform
        .applications
        .submit_application(&candidate, &course.id)
        .expect("submits");
    assert_eq!(application.intake_period.as_deref(), Some("2025-fall"));
    fx.platform
        .applications
        .transition_status(
            &application.id,
            course_status(CourseStatus::Admitted),
            &staff,
        )
        .expect("admits");

    let publication = fx
        .platform
        .applications
        .publish_admissions(&institution.id, "2025-fall ", &staff)
        .expect("publishes");
    assert_eq!(publication.period, "2025-fall");
    assert_eq!(publication.admitted, 1);
    assert_eq!(publication.pending, 0);
}
