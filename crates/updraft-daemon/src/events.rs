//! Bounded log of recent lifecycle events

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use updraft_types::{EventSeverity, UpdaterEventEnvelope};

/// Keeps the newest `capacity` events published on the event channel
pub struct EventLog {
    capacity: usize,
    entries: RwLock<VecDeque<UpdaterEventEnvelope>>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub async fn push(&self, envelope: UpdaterEventEnvelope) {
        let mut entries = self.entries.write().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(envelope);
    }

    /// Up to `limit` events, newest first, optionally at or above `min_severity`
    pub async fn recent(
        &self,
        limit: usize,
        min_severity: Option<EventSeverity>,
    ) -> Vec<UpdaterEventEnvelope> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .rev()
            .filter(|e| min_severity.map_or(true, |min| rank(e.severity) >= rank(min)))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Record everything published on `rx` until the channel closes
    pub fn spawn_recorder(
        self: &Arc<Self>,
        mut rx: broadcast::Receiver<UpdaterEventEnvelope>,
    ) -> JoinHandle<()> {
        let log = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => log.push(envelope).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Event log lagged behind the event channel");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Event recorder stopped");
        })
    }
}

fn rank(severity: EventSeverity) -> u8 {
    match severity {
        EventSeverity::Info => 0,
        EventSeverity::Warning => 1,
        EventSeverity::Error => 2,
        EventSeverity::Critical => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use updraft_types::{EventSource, UpdaterEvent};

    fn cycle(name: &str) -> UpdaterEventEnvelope {
        UpdaterEventEnvelope::new(
            UpdaterEvent::CycleCompleted {
                cycle: name.to_string(),
                succeeded: 0,
                failed: 0,
                skipped: 0,
            },
            EventSource::Scheduler,
        )
    }

    #[tokio::test]
    async fn test_log_is_bounded_and_newest_first() {
        let log = EventLog::new(2);
        log.push(cycle("detect")).await;
        log.push(cycle("fetch")).await;
        log.push(cycle("deploy")).await;

        let recent = log.recent(10, None).await;
        assert_eq!(recent.len(), 2);
        assert!(matches!(
            &recent[0].event,
            UpdaterEvent::CycleCompleted { cycle, .. } if cycle == "deploy"
        ));
    }

    #[tokio::test]
    async fn test_severity_filter() {
        let log = EventLog::new(8);
        log.push(cycle("detect")).await;
        log.push(UpdaterEventEnvelope::new(
            UpdaterEvent::CycleOverrun {
                cycle: "detect".into(),
            },
            EventSource::Scheduler,
        ))
        .await;

        let warnings = log.recent(10, Some(EventSeverity::Warning)).await;
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, EventSeverity::Warning);
    }

    #[tokio::test]
    async fn test_recorder_follows_channel() {
        let log = Arc::new(EventLog::new(8));
        let (tx, rx) = broadcast::channel(8);
        let recorder = log.spawn_recorder(rx);

        tx.send(cycle("fetch")).unwrap();
        drop(tx);
        recorder.await.unwrap();

        assert_eq!(log.recent(10, None).await.len(), 1);
    }
}
