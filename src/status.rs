//! Per-routine status flags.
//!
//! Every routine owns the write side of one watch channel through a
//! [`StatusReporter`]; everything else only reads snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::scheduler::Routine;

/// Outcome of the most recent tick of one routine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickStatus {
    pub last_tick: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    /// `None` until the routine has completed a tick.
    pub success: Option<bool>,
    pub detail: Option<String>,
}

/// Status of all four routines at one point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub poll: TickStatus,
    pub sample: TickStatus,
    pub probe: TickStatus,
    pub sync: TickStatus,
}

struct Channels {
    poll: watch::Sender<TickStatus>,
    sample: watch::Sender<TickStatus>,
    probe: watch::Sender<TickStatus>,
    sync: watch::Sender<TickStatus>,
}

impl Channels {
    fn get(&self, routine: Routine) -> &watch::Sender<TickStatus> {
        match routine {
            Routine::Poll => &self.poll,
            Routine::Sample => &self.sample,
            Routine::Probe => &self.probe,
            Routine::Sync => &self.sync,
        }
    }
}

/// Read side of the routine status channels.
#[derive(Clone)]
pub struct StatusBoard {
    channels: Arc<Channels>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let channel = || watch::channel(TickStatus::default()).0;
        Self {
            channels: Arc::new(Channels {
                poll: channel(),
                sample: channel(),
                probe: channel(),
                sync: channel(),
            }),
        }
    }

    /// Write handle for `routine`. Only that routine's task should hold it.
    pub fn reporter(&self, routine: Routine) -> StatusReporter {
        StatusReporter {
            channels: self.channels.clone(),
            routine,
        }
    }

    pub fn get(&self, routine: Routine) -> TickStatus {
        self.channels.get(routine).borrow().clone()
    }

    pub fn subscribe(&self, routine: Routine) -> watch::Receiver<TickStatus> {
        self.channels.get(routine).subscribe()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            poll: self.get(Routine::Poll),
            sample: self.get(Routine::Sample),
            probe: self.get(Routine::Probe),
            sync: self.get(Routine::Sync),
        }
    }
}

/// Write side for a single routine.
pub struct StatusReporter {
    channels: Arc<Channels>,
    routine: Routine,
}

impl StatusReporter {
    pub fn routine(&self) -> Routine {
        self.routine
    }

    pub fn succeeded(&self, detail: Option<String>) {
        self.report(true, detail);
    }

    pub fn failed(&self, detail: impl Into<String>) {
        self.report(false, Some(detail.into()));
    }

    fn report(&self, success: bool, detail: Option<String>) {
        let now = Utc::now();
        self.channels.get(self.routine).send_modify(|status| {
            status.last_tick = Some(now);
            status.success = Some(success);
            status.detail = detail;
            if success {
                status.last_success = Some(now);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_are_per_routine() {
        let board = StatusBoard::new();
        let sync = board.reporter(Routine::Sync);

        sync.failed("no session");
        let status = board.get(Routine::Sync);
        assert_eq!(status.success, Some(false));
        assert_eq!(status.detail.as_deref(), Some("no session"));
        assert!(status.last_tick.is_some());
        assert!(status.last_success.is_none());

        assert_eq!(board.get(Routine::Poll), TickStatus::default());
    }

    #[test]
    fn test_success_keeps_last_success_time() {
        let board = StatusBoard::new();
        let probe = board.reporter(Routine::Probe);

        probe.succeeded(None);
        let first = board.get(Routine::Probe).last_success;
        probe.failed("boom");

        let status = board.snapshot().probe;
        assert_eq!(status.success, Some(false));
        assert_eq!(status.last_success, first);
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe(Routine::Sample);

        board.reporter(Routine::Sample).succeeded(Some("stored".to_string()));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().detail.as_deref(), Some("stored"));
    }
}
