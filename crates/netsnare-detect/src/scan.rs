//! Close-time port-scan rule.
//!
//! A connection that lives for less than the configured duration and never
//! does anything meaningful was a scanner probing the port.

use std::time::Duration;

/// Evaluated when a session closes.
#[derive(Debug, Clone, Copy)]
pub struct ScanRule {
    /// Sessions shorter than this are scan candidates.
    max_duration: Duration,
}

impl ScanRule {
    pub fn new(max_duration: Duration) -> Self {
        Self { max_duration }
    }

    /// True when the closed session counts as a port scan: shorter than the
    /// threshold with at most one meaningful command.
    pub fn is_scan(&self, duration: Duration, meaningful_commands: u32) -> bool {
        duration < self.max_duration && meaningful_commands <= 1
    }
}

impl Default for ScanRule {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}
