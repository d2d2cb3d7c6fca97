//! Per-source authentication attempt tracking.
//!
//! Every failed login on any protocol feeds one shared tracker per
//! listener. The rule fires once per cooldown window so a password sprayer
//! produces a steady trickle of reports instead of one per attempt.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Fired when a source crosses the attempt threshold outside the report
/// cooldown.
#[derive(Debug, Clone)]
pub struct BruteforceReport {
    pub attempts: u32,
    pub usernames: Vec<String>,
}

struct Entry {
    attempts: u32,
    usernames: HashSet<String>,
    last_attempt: Instant,
    last_report: Option<Instant>,
}

/// Tracks authentication attempts per source address.
pub struct BruteforceTracker {
    entries: Mutex<HashMap<IpAddr, Entry>>,
    /// Attempts required before the rule can fire.
    threshold: u32,
    /// Minimum gap between reports for the same source.
    report_cooldown: Duration,
    /// Entries idle this long are dropped by `sweep`.
    idle_ttl: Duration,
}

impl BruteforceTracker {
    pub fn new() -> Self {
        Self::with_policy(3, Duration::from_secs(60), Duration::from_secs(3600))
    }

    pub fn with_policy(threshold: u32, report_cooldown: Duration, idle_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            threshold,
            report_cooldown,
            idle_ttl,
        }
    }

    /// Record a failed authentication attempt.
    ///
    /// Returns a report when `attempts ≥ threshold` and the last report for
    /// this source is at least one cooldown in the past.
    pub fn record_attempt(&self, addr: IpAddr, username: Option<&str>) -> Option<BruteforceReport> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("bruteforce tracker lock");
        let entry = entries.entry(addr).or_insert_with(|| Entry {
            attempts: 0,
            usernames: HashSet::new(),
            last_attempt: now,
            last_report: None,
        });

        entry.attempts += 1;
        entry.last_attempt = now;
        if let Some(name) = username {
            entry.usernames.insert(name.to_string());
        }

        if entry.attempts < self.threshold {
            return None;
        }
        let cooled_down = entry
            .last_report
            .is_none_or(|last| now.duration_since(last) >= self.report_cooldown);
        if !cooled_down {
            return None;
        }

        entry.last_report = Some(now);
        let mut usernames: Vec<String> = entry.usernames.iter().cloned().collect();
        usernames.sort();
        debug!(%addr, attempts = entry.attempts, "bruteforce threshold crossed");
        Some(BruteforceReport {
            attempts: entry.attempts,
            usernames,
        })
    }

    /// Drop entries idle longer than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("bruteforce tracker lock");
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.last_attempt) < self.idle_ttl);
        before - entries.len()
    }

    pub fn tracked_sources(&self) -> usize {
        self.entries.lock().expect("bruteforce tracker lock").len()
    }
}

impl Default for BruteforceTracker {
    fn default() -> Self {
        Self::new()
    }
}
