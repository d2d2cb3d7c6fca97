//! Rapid-connection detection.
//!
//! Scanners and credential sprayers reconnect in bursts. Each accept is
//! recorded per source; when three or more land inside the window the rule
//! fires, with its own cooldown so a sustained burst reports periodically.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Fired when a source reconnects too quickly.
#[derive(Debug, Clone)]
pub struct RapidConnectionReport {
    /// Connections inside the window, including the triggering one.
    pub connections: u32,
}

struct Entry {
    connect_times: Vec<Instant>,
    last_report: Option<Instant>,
}

/// Tracks connection times per source address.
pub struct RapidConnectionTracker {
    entries: Mutex<HashMap<IpAddr, Entry>>,
    /// Window connections must fall into.
    window: Duration,
    /// Connections inside the window required to fire.
    threshold: usize,
    /// Minimum gap between reports for the same source.
    report_cooldown: Duration,
}

impl RapidConnectionTracker {
    pub fn new() -> Self {
        Self::with_policy(Duration::from_secs(60), 3, Duration::from_secs(120))
    }

    pub fn with_policy(window: Duration, threshold: usize, report_cooldown: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window,
            threshold,
            report_cooldown,
        }
    }

    /// Record an accepted connection; the list is pruned to the window on
    /// every call.
    pub fn record_connection(&self, addr: IpAddr) -> Option<RapidConnectionReport> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("rapid tracker lock");
        let entry = entries.entry(addr).or_insert_with(|| Entry {
            connect_times: Vec::new(),
            last_report: None,
        });

        entry
            .connect_times
            .retain(|t| now.duration_since(*t) < self.window);
        entry.connect_times.push(now);

        if entry.connect_times.len() < self.threshold {
            return None;
        }
        let cooled_down = entry
            .last_report
            .is_none_or(|last| now.duration_since(last) >= self.report_cooldown);
        if !cooled_down {
            return None;
        }

        entry.last_report = Some(now);
        debug!(%addr, connections = entry.connect_times.len(), "rapid connections detected");
        Some(RapidConnectionReport {
            connections: entry.connect_times.len() as u32,
        })
    }

    /// Drop sources whose every recorded connection has left the window.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("rapid tracker lock");
        let before = entries.len();
        entries.retain(|_, entry| {
            entry
                .connect_times
                .iter()
                .any(|t| now.duration_since(*t) < self.window)
        });
        before - entries.len()
    }

    pub fn tracked_sources(&self) -> usize {
        self.entries.lock().expect("rapid tracker lock").len()
    }
}

impl Default for RapidConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> IpAddr {
        IpAddr::from([192, 0, 2, last])
    }

    #[test]
    fn fires_on_third_connection() {
        let tracker = RapidConnectionTracker::new();
        assert!(tracker.record_connection(addr(1)).is_none());
        assert!(tracker.record_connection(addr(1)).is_none());

        let report = tracker.record_connection(addr(1)).unwrap();
        assert_eq!(report.connections, 3);
    }

    #[test]
    fn cooldown_suppresses_follow_ups() {
        let tracker = RapidConnectionTracker::new();
        for _ in 0..3 {
            tracker.record_connection(addr(2));
        }
        assert!(tracker.record_connection(addr(2)).is_none());
    }

    #[test]
    fn connections_outside_window_do_not_count() {
        let tracker =
            RapidConnectionTracker::with_policy(Duration::from_millis(0), 3, Duration::ZERO);
        // Zero window: each call prunes everything before it.
        assert!(tracker.record_connection(addr(3)).is_none());
        assert!(tracker.record_connection(addr(3)).is_none());
        assert!(tracker.record_connection(addr(3)).is_none());
    }

    #[test]
    fn sweep_drops_expired_sources() {
        let tracker =
            RapidConnectionTracker::with_policy(Duration::from_millis(0), 3, Duration::ZERO);
        tracker.record_connection(addr(4));
        assert_eq!(tracker.tracked_sources(), 1);
        assert_eq!(tracker.sweep(), 1);
    }

    #[test]
    fn sources_are_independent() {
        let tracker = RapidConnectionTracker::new();
        for _ in 0..3 {
            tracker.record_connection(addr(5));
        }
        assert!(tracker.record_connection(addr(6)).is_none());
    }
}
