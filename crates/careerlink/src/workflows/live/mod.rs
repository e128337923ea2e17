//! Dashboard-facing live queries with the no-flicker policy.

mod synchronizer;
mod view;

pub use synchronizer::{ListenerPolicy, LiveViewSynchronizer, ViewKey};
pub use view::{QueryView, ViewChange, ViewState};
