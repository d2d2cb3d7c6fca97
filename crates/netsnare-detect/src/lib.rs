//! netsnare-detect — protocol-independent detection policies.
//!
//! Listeners own their wire handling; the rules that decide when a byte
//! sequence becomes an observation live here so every protocol applies the
//! same thresholds. Trackers are process-wide maps behind a coarse lock
//! with TTL-based purging, shared across listener tasks via `Arc`.

pub mod bruteforce;
pub mod mail;
pub mod patterns;
pub mod rapid;
pub mod rate;
pub mod scan;

pub use bruteforce::{BruteforceReport, BruteforceTracker};
pub use mail::{MailFinding, SmtpSessionStats};
pub use patterns::{HttpInspector, RequestLabel};
pub use rapid::{RapidConnectionReport, RapidConnectionTracker};
pub use rate::RequestRateTracker;
pub use scan::ScanRule;
