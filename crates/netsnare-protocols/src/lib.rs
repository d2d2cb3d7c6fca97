//! netsnare-protocols — the attacker-facing listeners.
//!
//! One module per protocol, sharing the accept-loop plumbing and the
//! detection helpers in [`serve`]. Listeners speak just enough of their
//! protocol to elicit behavior: every authentication fails after a delay,
//! uploads are capped, and nothing an attacker does reaches past the
//! session task. The only output is the observation [`EventSink`].
//!
//! [`EventSink`]: snare_core::EventSink

pub mod ftp;
pub mod http;
pub mod imap;
pub mod mysql;
pub mod pop3;
pub mod serve;
pub mod smtp;
pub mod ssh;
pub mod tls;

pub use serve::{ListenerContext, ListenerError, Trackers};
