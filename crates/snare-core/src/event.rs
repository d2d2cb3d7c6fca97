//! Observation events — raw detection output from the listeners.
//!
//! A listener never talks to the backend directly: when one of its
//! detection rules fires it builds an [`ObservationEvent`] and hands it to
//! the [`EventSink`]. The daemon's pipeline task classifies, throttles, and
//! reports events in session order.

use std::net::IpAddr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Protocol a listener speaks, used to tag events and build internal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Http,
    Https,
    Ssh,
    Ftp,
    Smtp,
    Pop3,
    Imap,
    Mysql,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Ssh => "ssh",
            Protocol::Ftp => "ftp",
            Protocol::Smtp => "smtp",
            Protocol::Pop3 => "pop3",
            Protocol::Imap => "imap",
            Protocol::Mysql => "mysql",
        }
    }

    /// Internal kind for this protocol's close-time scan rule.
    pub fn scan_kind(&self) -> String {
        format!("{}_scan", self.as_str())
    }

    /// Internal kind for this protocol's bruteforce rule.
    pub fn bruteforce_kind(&self) -> String {
        format!("{}_bruteforce", self.as_str())
    }

    /// Internal kind for this protocol's rapid-connection rule.
    pub fn bruteforce_scan_kind(&self) -> String {
        format!("{}_bruteforce_scan", self.as_str())
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw detection output from a listener, before classification.
///
/// `kind` is free-form listener vocabulary (`ssh_scan`, `sql_injection`,
/// `smtp_relay_attempt`, ...); `evidence` entries are opaque strings,
/// usually JSON encodings of structured facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationEvent {
    pub source_addr: IpAddr,
    pub source_port: u16,
    pub protocol: Protocol,
    pub kind: String,
    pub description: String,
    pub evidence: Vec<String>,
    pub observed_at: SystemTime,
}

impl ObservationEvent {
    pub fn new(
        source_addr: IpAddr,
        source_port: u16,
        protocol: Protocol,
        kind: impl Into<String>,
        description: impl Into<String>,
        evidence: Vec<String>,
    ) -> Self {
        Self {
            source_addr,
            source_port,
            protocol,
            kind: kind.into(),
            description: description.into(),
            evidence,
            observed_at: SystemTime::now(),
        }
    }

    /// Push a structured fact onto the evidence list as its JSON encoding.
    pub fn push_fact<T: Serialize>(&mut self, fact: &T) {
        match serde_json::to_string(fact) {
            Ok(json) => self.evidence.push(json),
            Err(e) => warn!(error = %e, "failed to encode evidence fact"),
        }
    }
}

/// The listeners' sole output channel.
///
/// Cloned into every session task. `emit` never blocks an accept loop: if
/// the pipeline falls behind and the channel fills, the event is dropped
/// with a warning rather than stalling attacker-facing sockets.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ObservationEvent>,
}

impl EventSink {
    /// Create a sink and the receiving end for the pipeline task.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ObservationEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ObservationEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!(error = %e, "observation channel full, dropping event");
        }
    }
}
