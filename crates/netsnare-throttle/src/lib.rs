//! netsnare-throttle — report admission control.
//!
//! A single noisy source must not flood the backend, but the first
//! occurrence of each new canonical kind is always worth reporting. The
//! cache keeps one TTL-bounded entry per source address; a janitor sweep
//! removes expired entries so the map stays proportional to recent
//! attacker count.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use netsnare_classify::AttackType;

/// Admission decision for one enriched event. Suppression is a normal
/// outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Suppress(SuppressReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    /// The per-window report cap was reached.
    ReportCapReached,
    /// Unique-types-only mode and this kind was already reported.
    DuplicateKind,
}

/// Throttle policy knobs, resolved from configuration.
#[derive(Debug, Clone, Copy)]
pub struct ThrottlePolicy {
    pub ttl: Duration,
    pub max_reports_per_ip: u32,
    pub unique_types_only: bool,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_reports_per_ip: 5,
            unique_types_only: false,
        }
    }
}

struct Entry {
    first_seen: Instant,
    kinds: HashSet<AttackType>,
    reported_count: u32,
    last_activity: Instant,
}

/// Counters surfaced by `/api-diagnostics`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ThrottleStats {
    pub tracked_sources: usize,
    pub admitted: u64,
    pub suppressed: u64,
}

/// Per-source admission cache.
pub struct ThrottleCache {
    entries: Mutex<HashMap<IpAddr, Entry>>,
    policy: ThrottlePolicy,
    counters: Mutex<(u64, u64)>,
}

impl ThrottleCache {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
            counters: Mutex::new((0, 0)),
        }
    }

    /// Decide whether an event for `(addr, kind)` is reportable now.
    ///
    /// An absent or expired entry always admits and resets the window. A
    /// kind not yet reported in this window always admits. A repeated kind
    /// admits until the per-window cap, unless unique-types-only mode
    /// suppresses all repeats.
    pub fn admit(&self, addr: IpAddr, kind: AttackType) -> Admission {
        let now = Instant::now();
        let decision = {
            let mut entries = self.entries.lock().expect("throttle cache lock");
            let expired = entries
                .get(&addr)
                .is_some_and(|e| now.duration_since(e.first_seen) > self.policy.ttl);

            if expired || !entries.contains_key(&addr) {
                entries.insert(
                    addr,
                    Entry {
                        first_seen: now,
                        kinds: HashSet::from([kind]),
                        reported_count: 1,
                        last_activity: now,
                    },
                );
                Admission::Admit
            } else {
                let entry = entries.get_mut(&addr).expect("entry present");
                entry.last_activity = now;

                if !entry.kinds.contains(&kind) {
                    // A new canonical kind is always novel.
                    entry.kinds.insert(kind);
                    entry.reported_count += 1;
                    Admission::Admit
                } else if self.policy.unique_types_only {
                    Admission::Suppress(SuppressReason::DuplicateKind)
                } else if entry.reported_count >= self.policy.max_reports_per_ip {
                    Admission::Suppress(SuppressReason::ReportCapReached)
                } else {
                    entry.reported_count += 1;
                    Admission::Admit
                }
            }
        };

        let mut counters = self.counters.lock().expect("throttle counters lock");
        match decision {
            Admission::Admit => counters.0 += 1,
            Admission::Suppress(reason) => {
                counters.1 += 1;
                debug!(%addr, kind = %kind, ?reason, "report suppressed");
            }
        }
        decision
    }

    /// Remove entries older than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("throttle cache lock");
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.first_seen) <= self.policy.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "throttle janitor removed expired entries");
        }
        removed
    }

    pub fn stats(&self) -> ThrottleStats {
        let entries = self.entries.lock().expect("throttle cache lock");
        let counters = self.counters.lock().expect("throttle counters lock");
        ThrottleStats {
            tracked_sources: entries.len(),
            admitted: counters.0,
            suppressed: counters.1,
        }
    }
}
