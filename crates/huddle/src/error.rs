//! Error types for queue admission and batch execution.

use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the queue, either at admission or through a waiter.
///
/// The type is `Clone` because one executor failure is delivered to every
/// waiter of the affected batch. The executor error itself is shared, not
/// copied, and can be recovered with [`QueueError::execution_error`].
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// `add()` was called without any action.
    #[error("at least one action is required")]
    EmptyActions,

    /// Queue settings failed validation.
    #[error("invalid queue settings: {reason}")]
    InvalidSettings { reason: String },

    /// The executor failed the batch this waiter belonged to.
    #[error("execution failed: {0}")]
    Execution(Arc<anyhow::Error>),

    /// The task owning this waiter's batch was cancelled before it resolved.
    #[error("queued execution was cancelled")]
    Cancelled,
}

impl QueueError {
    pub(crate) fn invalid_settings(reason: impl Into<String>) -> Self {
        QueueError::InvalidSettings {
            reason: reason.into(),
        }
    }

    /// The error raised by the executor, if this is an execution failure.
    ///
    /// Downcast it to get the executor's concrete error type back.
    pub fn execution_error(&self) -> Option<&anyhow::Error> {
        match self {
            QueueError::Execution(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueueError::Cancelled)
    }
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        QueueError::Execution(Arc::new(err))
    }
}
