//! Error types for the approval gate

use thiserror::Error;
use updraft_types::MessageId;

/// Failures reported by an [`ApprovalChannel`](crate::ApprovalChannel)
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// Transport could not be reached
    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    /// The message does not exist (deleted or never posted)
    #[error("Unknown message: {0}")]
    UnknownMessage(MessageId),
}

/// Approval gate error type
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// Chat transport failure
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The handle has no outstanding request (already resolved or never registered)
    #[error("No pending decision for message {0}")]
    NotPending(MessageId),
}

/// Result type for approval operations
pub type Result<T> = std::result::Result<T, ApprovalError>;
