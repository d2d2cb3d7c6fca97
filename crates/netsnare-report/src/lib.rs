//! netsnare-report — delivery path to the scoring backend.
//!
//! The client sends heartbeats and admitted reports, probes the backend
//! when heartbeats keep failing, and spools anything it could not deliver
//! to `logs/offline_attacks.json` for periodic replay. A send failure is
//! never fatal: records land in the spool and the daemon keeps running.

pub mod client;
pub mod diagnostics;
pub mod error;
pub mod scheduler;
pub mod spool;

pub use client::{normalize_evidence, PingResult, ReplayStats, ReportClient};
pub use diagnostics::{DiagnosticsHandle, HeartbeatDiagnostics};
pub use error::{ReportError, SpoolError};
pub use spool::{Spool, SpoolEntry};
