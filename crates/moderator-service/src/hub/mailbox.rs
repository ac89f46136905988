//! Hub mailbox backlog tracking.
//!
//! Handles count a message when their send succeeds; the hub loop counts it
//! again once handled. The difference is the backlog. Crossing
//! [`BACKLOG_ELEVATED`] logs once at debug; every send above
//! [`BACKLOG_CRITICAL`] logs a warning.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

pub const BACKLOG_ELEVATED: usize = 256;
pub const BACKLOG_CRITICAL: usize = 768;

#[derive(Debug, Default)]
pub struct MailboxGauge {
    backlog: AtomicUsize,
    high_water: AtomicUsize,
    handled: AtomicU64,
}

impl MailboxGauge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_send(&self) {
        let backlog = self.backlog.fetch_add(1, Ordering::Relaxed) + 1;
        self.high_water.fetch_max(backlog, Ordering::Relaxed);

        if backlog > BACKLOG_CRITICAL {
            warn!(target: "moderator.hub", backlog, "Hub mailbox backlog critical");
        } else if backlog == BACKLOG_ELEVATED {
            debug!(target: "moderator.hub", backlog, "Hub mailbox backlog elevated");
        }
    }

    pub fn on_handled(&self) {
        // The loop can handle a message before its sender records the send.
        let _ = self
            .backlog
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
        self.handled.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backlog_and_high_water() {
        let gauge = MailboxGauge::new();
        for _ in 0..4 {
            gauge.on_send();
        }
        gauge.on_handled();
        gauge.on_handled();

        assert_eq!(gauge.backlog(), 2);
        assert_eq!(gauge.high_water(), 4);
        assert_eq!(gauge.handled(), 2);
    }

    #[test]
    fn test_handled_before_send_saturates() {
        let gauge = MailboxGauge::new();
        gauge.on_handled();
        gauge.on_send();

        assert_eq!(gauge.backlog(), 1);
        assert_eq!(gauge.handled(), 1);
    }
}
