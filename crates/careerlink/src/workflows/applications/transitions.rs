use crate::workflows::domain::{ApplicationStatus, CourseStatus, JobStatus};

/// What kind of move a legal transition is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Regular review decision by the organization.
    Review,
    /// Organization reconsidering an admission; refused once the intake period is published.
    Revisit,
    /// Applicant pulling out; only reachable through `withdraw`.
    Withdrawal,
}

const COURSE_TRANSITIONS: &[(CourseStatus, CourseStatus, TransitionKind)] = &[
    (CourseStatus::Pending, CourseStatus::Admitted, TransitionKind::Review),
    (CourseStatus::Pending, CourseStatus::Rejected, TransitionKind::Review),
    (CourseStatus::Pending, CourseStatus::Withdrawn, TransitionKind::Withdrawal),
    (CourseStatus::Admitted, CourseStatus::Rejected, TransitionKind::Revisit),
    (CourseStatus::Admitted, CourseStatus::Pending, TransitionKind::Revisit),
];

const JOB_TRANSITIONS: &[(JobStatus, JobStatus, TransitionKind)] = &[
    (JobStatus::New, JobStatus::Shortlisted, TransitionKind::Review),
    (JobStatus::New, JobStatus::Rejected, TransitionKind::Review),
    (JobStatus::Shortlisted, JobStatus::Interview, TransitionKind::Review),
    (JobStatus::Shortlisted, JobStatus::Rejected, TransitionKind::Review),
    (JobStatus::Interview, JobStatus::Hired, TransitionKind::Review),
    (JobStatus::Interview, JobStatus::Rejected, TransitionKind::Review),
];

/// Looks the move up in the per-track table; `None` means illegal.
pub fn classify(from: ApplicationStatus, to: ApplicationStatus) -> Option<TransitionKind> {
    match (from, to) {
        (ApplicationStatus::Course(from), ApplicationStatus::Course(to)) => COURSE_TRANSITIONS
            .iter()
            .find(|(source, target, _)| *source == from && *target == to)
            .map(|(_, _, kind)| *kind),
        (ApplicationStatus::Job(from), ApplicationStatus::Job(to)) => JOB_TRANSITIONS
            .iter()
            .find(|(source, target, _)| *source == from && *target == to)
            .map(|(_, _, kind)| *kind),
        _ => None,
    }
}

/// Statuses reachable from `from` in one step.
pub fn successors(from: ApplicationStatus) -> Vec<ApplicationStatus> {
    match from {
        ApplicationStatus::Course(from) => COURSE_TRANSITIONS
            .iter()
            .filter(|(source, _, _)| *source == from)
            .map(|(_, target, _)| ApplicationStatus::Course(*target))
            .collect(),
        ApplicationStatus::Job(from) => JOB_TRANSITIONS
            .iter()
            .filter(|(source, _, _)| *source == from)
            .map(|(_, target, _)| ApplicationStatus::Job(*target))
            .collect(),
    }
}
