//! Cycle kinds and per-run reports

use crate::error::SchedulerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

/// The three reconciliation cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleKind {
    Detect,
    Fetch,
    Deploy,
}

impl CycleKind {
    /// Manual runs go through the cycles in this order
    pub const ALL: [CycleKind; 3] = [CycleKind::Detect, CycleKind::Fetch, CycleKind::Deploy];

    pub fn as_str(&self) -> &'static str {
        match self {
            CycleKind::Detect => "detect",
            CycleKind::Fetch => "fetch",
            CycleKind::Deploy => "deploy",
        }
    }
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CycleKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detect" => Ok(CycleKind::Detect),
            "fetch" => Ok(CycleKind::Fetch),
            "deploy" => Ok(CycleKind::Deploy),
            other => Err(SchedulerError::UnknownCycle(other.to_string())),
        }
    }
}

/// Outcome of one cycle run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub kind: CycleKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: usize,
    pub failed: usize,
    /// Items left alone: missing configuration, declined deploys, lost races
    pub skipped: usize,
    /// The run was refused because the previous one was still active
    pub overrun: bool,
}

impl CycleReport {
    pub(crate) fn begin(kind: CycleKind) -> Self {
        let now = Utc::now();
        Self {
            kind,
            started_at: now,
            finished_at: now,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            overrun: false,
        }
    }

    pub(crate) fn overrun(kind: CycleKind) -> Self {
        Self {
            overrun: true,
            ..Self::begin(kind)
        }
    }

    pub(crate) fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Succeeded => self.succeeded += 1,
            ItemOutcome::Failed => self.failed += 1,
            ItemOutcome::Skipped => self.skipped += 1,
        }
    }

    pub(crate) fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    /// Items the cycle acted on
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Result of one item within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemOutcome {
    Succeeded,
    Failed,
    Skipped,
}

/// Holds the in-flight flag of a cycle; clears it on drop
pub(crate) struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    /// `None` if the flag was already set
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_kind_parse() {
        assert_eq!("fetch".parse::<CycleKind>().unwrap(), CycleKind::Fetch);
        assert!(matches!(
            "reboot".parse::<CycleKind>(),
            Err(SchedulerError::UnknownCycle(_))
        ));
    }

    #[test]
    fn test_running_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = RunningGuard::acquire(&flag);
        assert!(guard.is_some());
        assert!(RunningGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(RunningGuard::acquire(&flag).is_some());
    }

    #[test]
    fn test_report_counts() {
        let mut report = CycleReport::begin(CycleKind::Detect);
        report.record(ItemOutcome::Succeeded);
        report.record(ItemOutcome::Failed);
        report.record(ItemOutcome::Skipped);
        let report = report.finish();
        assert_eq!((report.succeeded, report.failed, report.skipped), (1, 1, 1));
        assert_eq!(report.total(), 3);
        assert!(!CycleReport::begin(CycleKind::Fetch).overrun);
        assert!(CycleReport::overrun(CycleKind::Fetch).overrun);
    }
}
