use super::applications::eligibility::IneligibleReason;
use super::notify::NotificationError;
use super::store::StoreError;

/// Outcome kinds surfaced to the presentation layer.
///
/// Business refusals (`Ineligible`, `InvalidTransition`, `Forbidden`) are ordinary values the
/// caller renders; `TransientStore` means the write may or may not have happened and was not
/// retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("application refused: {0}")]
    Ineligible(IneligibleReason),
    #[error("cannot move {track} application from {from} to {to}")]
    InvalidTransition {
        track: &'static str,
        from: &'static str,
        to: &'static str,
    },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    TransientStore(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Notification(#[from] NotificationError),
}

impl WorkflowError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code for API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::NotFound { .. } => "not_found",
            WorkflowError::Ineligible(reason) => reason.code(),
            WorkflowError::InvalidTransition { .. } => "invalid_transition",
            WorkflowError::Forbidden(_) => "forbidden",
            WorkflowError::Conflict(_) => "conflict",
            WorkflowError::TransientStore(_) => "store_unavailable",
            WorkflowError::InvalidInput(_) => "invalid_input",
            WorkflowError::Notification(_) => "notification_failed",
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound => Self::NotFound {
                entity: "document",
                id: String::new(),
            },
            StoreError::Conflict => Self::Conflict("document already exists".to_string()),
            StoreError::Unavailable(detail) => Self::TransientStore(detail),
            StoreError::Malformed(detail) => {
                Self::TransientStore(format!("unreadable document ({detail})"))
            }
        }
    }
}
