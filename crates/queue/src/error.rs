//! Queue errors.

use fedi_common::AppError;

/// Error type for enqueueing and dispatching deliveries.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Invalid inbox URL: {0}")]
    InvalidInbox(String),

    #[error("Broker error: {0}")]
    Broker(String),
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::InvalidInbox(_) => Self::BadRequest(err.to_string()),
            QueueError::Broker(_) => Self::Queue(err.to_string()),
        }
    }
}
