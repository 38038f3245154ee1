//! In-process prompt board
//!
//! The daemon's built-in [`ApprovalChannel`]: prompts are kept in memory,
//! listed over the REST API, and answered by posting a signal for a prompt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use updraft_approval::{ApprovalChannel, ChannelError, Prompt, Signal, SignalEvent};
use updraft_types::MessageId;

/// Closed prompts beyond this count are dropped, oldest first
const MAX_CLOSED_PROMPTS: usize = 200;

struct BoardEntry {
    prompt: Prompt,
    posted_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    signals_tx: mpsc::UnboundedSender<SignalEvent>,
    signals_rx: Arc<Mutex<mpsc::UnboundedReceiver<SignalEvent>>>,
}

/// A prompt as shown by the API
#[derive(Debug, Clone, Serialize)]
pub struct PromptView {
    pub id: MessageId,
    pub prompt: Prompt,
    /// Whether the prompt still offers signals
    pub open: bool,
    pub posted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory approval channel
#[derive(Default)]
pub struct PromptBoard {
    entries: DashMap<MessageId, BoardEntry>,
}

impl PromptBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// All prompts, newest first
    pub fn list(&self) -> Vec<PromptView> {
        let mut views: Vec<PromptView> = self
            .entries
            .iter()
            .map(|entry| Self::view(entry.key(), entry.value()))
            .collect();
        views.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
        views
    }

    pub fn get(&self, id: &MessageId) -> Option<PromptView> {
        self.entries.get(id).map(|entry| Self::view(id, &entry))
    }

    /// Attach `signal` from `actor` to an open prompt
    pub fn signal(
        &self,
        id: &MessageId,
        signal: Signal,
        actor: impl Into<String>,
    ) -> Result<(), ChannelError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| ChannelError::UnknownMessage(id.clone()))?;
        if entry.prompt.signals.is_empty() {
            return Err(ChannelError::Unavailable(format!("prompt {} is closed", id)));
        }
        entry
            .signals_tx
            .send(SignalEvent::new(signal, actor))
            .map_err(|_| ChannelError::Unavailable(format!("prompt {} is closed", id)))
    }

    fn view(id: &MessageId, entry: &BoardEntry) -> PromptView {
        PromptView {
            id: id.clone(),
            prompt: entry.prompt.clone(),
            open: !entry.prompt.signals.is_empty(),
            posted_at: entry.posted_at,
            updated_at: entry.updated_at,
        }
    }

    fn prune_closed(&self) {
        let mut closed: Vec<(DateTime<Utc>, MessageId)> = self
            .entries
            .iter()
            .filter(|e| e.prompt.signals.is_empty())
            .map(|e| (e.posted_at, e.key().clone()))
            .collect();
        if closed.len() <= MAX_CLOSED_PROMPTS {
            return;
        }
        closed.sort();
        let excess = closed.len() - MAX_CLOSED_PROMPTS;
        for (_, id) in closed.into_iter().take(excess) {
            self.entries.remove(&id);
        }
    }

    fn update<F>(&self, id: &MessageId, apply: F) -> Result<(), ChannelError>
    where
        F: FnOnce(&mut BoardEntry),
    {
        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| ChannelError::UnknownMessage(id.clone()))?;
        apply(entry.value_mut());
        entry.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ApprovalChannel for PromptBoard {
    async fn post(&self, prompt: &Prompt) -> Result<MessageId, ChannelError> {
        self.prune_closed();

        let id = MessageId::new(uuid::Uuid::new_v4().to_string());
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let now = Utc::now();
        self.entries.insert(
            id.clone(),
            BoardEntry {
                prompt: prompt.clone(),
                posted_at: now,
                updated_at: now,
                signals_tx,
                signals_rx: Arc::new(Mutex::new(signals_rx)),
            },
        );
        Ok(id)
    }

    async fn await_reaction(
        &self,
        message: &MessageId,
        _allowed: &[Signal],
        timeout: Duration,
    ) -> Result<Option<SignalEvent>, ChannelError> {
        let inbox = self
            .entries
            .get(message)
            .map(|entry| entry.signals_rx.clone())
            .ok_or_else(|| ChannelError::UnknownMessage(message.clone()))?;

        let mut rx = inbox.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => Err(ChannelError::Unavailable(format!(
                "prompt {} was removed",
                message
            ))),
            Err(_) => Ok(None),
        }
    }

    async fn edit(&self, message: &MessageId, prompt: &Prompt) -> Result<(), ChannelError> {
        self.update(message, |entry| entry.prompt = prompt.clone())
    }

    async fn clear_signals(&self, message: &MessageId) -> Result<(), ChannelError> {
        self.update(message, |entry| entry.prompt.signals.clear())
    }
}
