//! snare-core — shared foundation for the netsnare honeypot.
//!
//! Holds the environment-driven configuration, the observation event model
//! that listeners emit into the detection pipeline, and the module status
//! registry surfaced by the diagnostics endpoints.

pub mod config;
pub mod event;
pub mod module;

pub use config::Config;
pub use event::{EventSink, ObservationEvent, Protocol};
pub use module::{ModuleRegistry, ModuleState, ModuleStatus};

/// Crate version reported in heartbeats and `/monitor`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
