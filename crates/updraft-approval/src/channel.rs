//! Chat transport abstraction

use crate::error::ChannelError;
use crate::prompt::{Prompt, Signal};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use updraft_types::MessageId;

/// A signal attached to a prompt by someone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub signal: Signal,
    pub actor: String,
}

impl SignalEvent {
    pub fn new(signal: Signal, actor: impl Into<String>) -> Self {
        Self {
            signal,
            actor: actor.into(),
        }
    }
}

/// Where prompts are rendered and reactions come from
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    /// Post a prompt and return the identity of the posted message
    async fn post(&self, prompt: &Prompt) -> Result<MessageId, ChannelError>;

    /// Wait for the next reaction on `message`.
    ///
    /// Returns `None` when `timeout` elapses first. Implementations may return
    /// signals outside `allowed`; the gate discards them.
    async fn await_reaction(
        &self,
        message: &MessageId,
        allowed: &[Signal],
        timeout: Duration,
    ) -> Result<Option<SignalEvent>, ChannelError>;

    /// Replace the rendering of a posted message
    async fn edit(&self, message: &MessageId, prompt: &Prompt) -> Result<(), ChannelError>;

    /// Remove all reactions from a posted message
    async fn clear_signals(&self, message: &MessageId) -> Result<(), ChannelError>;
}
