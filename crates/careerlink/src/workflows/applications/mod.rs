//! Application intake, eligibility and the per-track status machines.

pub mod eligibility;
pub mod service;
pub mod transitions;

#[cfg(test)]
mod tests;

pub use eligibility::{can_apply, EligibilityDecision, EligibilityPolicy, IneligibleReason};
pub use service::ApplicationLifecycleManager;
pub use transitions::{classify, successors, TransitionKind};
