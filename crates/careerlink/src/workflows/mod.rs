pub mod applications;
pub mod catalog;
pub mod clock;
pub mod domain;
pub mod error;
pub mod live;
mod lookup;
pub mod matching;
pub mod notify;
pub mod onboarding;
pub mod platform;
pub mod profiles;
pub mod router;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::WorkflowError;
pub use platform::Platform;
pub use router::platform_router;
