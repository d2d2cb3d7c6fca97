//! Request-rate detection.
//!
//! A source hammering the HTTP listener past the per-minute threshold is
//! flooding, not browsing. Same shape as the rapid-connection tracker but
//! at request granularity and with a longer report cooldown.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

struct Entry {
    request_times: Vec<Instant>,
    last_report: Option<Instant>,
}

/// Tracks request times per source address.
pub struct RequestRateTracker {
    entries: Mutex<HashMap<IpAddr, Entry>>,
    window: Duration,
    threshold: usize,
    report_cooldown: Duration,
}

impl RequestRateTracker {
    pub fn new() -> Self {
        Self::with_policy(Duration::from_secs(60), 120, Duration::from_secs(300))
    }

    pub fn with_policy(window: Duration, threshold: usize, report_cooldown: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window,
            threshold,
            report_cooldown,
        }
    }

    /// Record a request; returns the in-window count when the flood
    /// threshold is crossed outside the cooldown.
    pub fn record_request(&self, addr: IpAddr) -> Option<u32> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("rate tracker lock");
        let entry = entries.entry(addr).or_insert_with(|| Entry {
            request_times: Vec::new(),
            last_report: None,
        });

        entry
            .request_times
            .retain(|t| now.duration_since(*t) < self.window);
        entry.request_times.push(now);

        if entry.request_times.len() < self.threshold {
            return None;
        }
        let cooled_down = entry
            .last_report
            .is_none_or(|last| now.duration_since(last) >= self.report_cooldown);
        if !cooled_down {
            return None;
        }

        entry.last_report = Some(now);
        debug!(%addr, requests = entry.request_times.len(), "request flood detected");
        Some(entry.request_times.len() as u32)
    }

    /// Drop sources with no requests left in the window.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("rate tracker lock");
        let before = entries.len();
        entries.retain(|_, entry| {
            entry
                .request_times
                .iter()
                .any(|t| now.duration_since(*t) < self.window)
        });
        before - entries.len()
    }
}

impl Default for RequestRateTracker {
    fn default() -> Self {
        Self::new()
    }
}
