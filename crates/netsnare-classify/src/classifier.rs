//! Observation → canonical attack record mapping.
//!
//! The mapping is table-driven over the lowercased internal kind, with an
//! evidence-aware refinement pass for generic suspicious-query labels and a
//! severity derivation from the canonical kind. Unknown labels classify as
//! `honeypot` rather than erroring.

use std::net::IpAddr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::debug;

use snare_core::ObservationEvent;

use crate::taxonomy::{AttackCategory, AttackType};

/// A classified, scored event ready to report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackRecord {
    pub ip_address: IpAddr,
    pub attack_type: AttackType,
    pub category: AttackCategory,
    /// 1–5.
    pub severity: u8,
    /// Base score of the canonical kind, 2–45.
    pub score: u16,
    pub description: String,
    pub evidence: Vec<String>,
    pub metadata: EnhancementMetadata,
}

/// Provenance kept alongside the canonical record. The original listener
/// label is never the reported kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancementMetadata {
    pub original_type: String,
    pub base_score: u16,
    pub enhanced_at: SystemTime,
}

/// Classify a raw observation into a canonical attack record.
///
/// Kind, category, and score are a pure function of the internal kind and
/// evidence; only `metadata.enhanced_at` carries a wall-clock stamp.
pub fn classify(event: &ObservationEvent) -> AttackRecord {
    let internal = event.kind.to_lowercase();
    let mapped = map_internal_kind(&internal).unwrap_or_else(|| {
        debug!(kind = %internal, "unknown internal kind, classifying as honeypot");
        AttackType::Honeypot
    });
    let attack_type = refine(mapped, &event.evidence);

    AttackRecord {
        ip_address: event.source_addr,
        attack_type,
        category: attack_type.category(),
        severity: severity_for(attack_type, &event.evidence),
        score: attack_type.base_score(),
        description: event.description.clone(),
        evidence: event.evidence.clone(),
        metadata: EnhancementMetadata {
            original_type: event.kind.clone(),
            base_score: attack_type.base_score(),
            enhanced_at: SystemTime::now(),
        },
    }
}

/// Table-driven internal-kind → canonical-kind mapping.
fn map_internal_kind(kind: &str) -> Option<AttackType> {
    // Canonical names pass straight through.
    if let Ok(canonical) = serde_json::from_str::<AttackType>(&format!("\"{kind}\"")) {
        return Some(canonical);
    }

    let mapped = match kind {
        // Scan rules. The SSH timer emits the canonical name directly;
        // close-time rules emit per-protocol labels.
        "http_scan" | "https_scan" | "ssh_scan" | "ftp_scan" | "smtp_scan" | "pop3_scan"
        | "imap_scan" | "mysql_scan" => AttackType::PortScan,

        // Bruteforce rules. SSH keeps its dedicated canonical kind; the
        // rest collapse to credential stuffing.
        "ssh_bruteforce_scan" => AttackType::SshBruteforce,
        "ftp_bruteforce" | "smtp_bruteforce" | "pop3_bruteforce" | "imap_bruteforce"
        | "mysql_bruteforce" | "http_bruteforce" => AttackType::CredentialStuffing,
        "ftp_bruteforce_scan" | "smtp_bruteforce_scan" | "pop3_bruteforce_scan"
        | "imap_bruteforce_scan" | "mysql_bruteforce_scan" | "http_bruteforce_scan" => {
            AttackType::CredentialStuffing
        }
        "login_attempt" | "credential_harvest" => AttackType::CredentialStuffing,

        // HTTP content rules.
        "sql_injection" | "mysql_sqli" => AttackType::SqliAttempt,
        "xss" => AttackType::XssAttempt,
        "traversal" => AttackType::PathTraversal,
        "suspicious_request" | "suspicious_endpoint" => AttackType::SuspiciousQuery,
        "scanner_user_agent" => AttackType::SuspiciousUserAgent,

        // Mail close rules.
        "email_harvesting" => AttackType::DataExfiltration,
        "smtp_relay_attempt" | "smtp_spam_attempt" => AttackType::MailSpam,

        // FTP uploads are malware staging.
        "ftp_upload" => AttackType::BotnetActivity,

        _ => return None,
    };
    Some(mapped)
}

/// Refine generic suspicious-query labels using the joined evidence.
///
/// Only applies to the generic label; specific kinds are left untouched.
fn refine(kind: AttackType, evidence: &[String]) -> AttackType {
    if kind != AttackType::SuspiciousQuery {
        return kind;
    }
    let joined = evidence.join(" ").to_lowercase();
    if joined.contains("union select") || joined.contains("information_schema") {
        AttackType::SqliAttempt
    } else if joined.contains("script") && (joined.contains("alert") || joined.contains("cookie")) {
        AttackType::XssAttempt
    } else if joined.contains("../") || joined.contains("..%2f") {
        AttackType::PathTraversal
    } else {
        kind
    }
}

/// Derive a 1–5 severity from the canonical kind, bumped by one (capped)
/// when the evidence is unusually rich or a frequency hint exceeds 10.
fn severity_for(kind: AttackType, evidence: &[String]) -> u8 {
    let base: u8 = match kind.category() {
        AttackCategory::Injection => match kind.base_score() {
            s if s >= 20 => 5,
            s if s >= 16 => 4,
            _ => 3,
        },
        AttackCategory::Dos => {
            if kind == AttackType::Ddos {
                5
            } else {
                4
            }
        }
        AttackCategory::Authentication => 4,
        AttackCategory::Malware => {
            if kind == AttackType::Ransomware {
                5
            } else {
                4
            }
        }
        AttackCategory::Intrusion => {
            if kind == AttackType::TargetedAttack {
                5
            } else {
                4
            }
        }
        AttackCategory::Abuse => 3,
        AttackCategory::Reconnaissance | AttackCategory::General | AttackCategory::Anonymity => 2,
    };

    let boosted = evidence.len() > 3 || frequency_hint(evidence).is_some_and(|f| f > 10);
    if boosted { (base + 1).min(5) } else { base }
}

/// Look for a `{"frequency": n}` fact among the JSON-encoded evidence.
fn frequency_hint(evidence: &[String]) -> Option<u64> {
    evidence
        .iter()
        .filter_map(|entry| serde_json::from_str::<serde_json::Value>(entry).ok())
        .filter_map(|value| value.get("frequency")?.as_u64())
        .max()
}
