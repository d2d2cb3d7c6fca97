//! SMTP close-time heuristics.
//!
//! The SMTP listener accumulates per-session counters and hands them here
//! when the peer disconnects. Rules run in order: harvesting, relay, spam.
//! A single session can produce several findings.

use std::collections::HashSet;

use serde::Serialize;

/// Counters a SMTP session accumulates before close.
#[derive(Debug, Default)]
pub struct SmtpSessionStats {
    pub rcpt_count: u32,
    pub rcpt_domains: HashSet<String>,
    pub vrfy_expn_count: u32,
    /// Body received via DATA, if any.
    pub data_body: Option<String>,
}

impl SmtpSessionStats {
    /// Record a RCPT TO address.
    pub fn record_rcpt(&mut self, address: &str) {
        self.rcpt_count += 1;
        if let Some(domain) = address.rsplit_once('@').map(|(_, d)| d) {
            self.rcpt_domains
                .insert(domain.trim_end_matches('>').to_lowercase());
        }
    }
}

/// One close-time finding with its structured facts.
#[derive(Debug, Clone)]
pub struct MailFinding {
    pub kind: &'static str,
    pub description: String,
    pub facts: serde_json::Value,
}

#[derive(Serialize)]
struct HarvestFacts {
    rcpt_count: u32,
    vrfy_expn_count: u32,
}

/// Evaluate the close-time rules over a finished session.
pub fn evaluate_close(stats: &SmtpSessionStats) -> Vec<MailFinding> {
    let mut findings = Vec::new();

    if stats.rcpt_count > 10 || stats.vrfy_expn_count > 5 {
        findings.push(MailFinding {
            kind: "email_harvesting",
            description: format!(
                "address harvesting: {} RCPT, {} VRFY/EXPN",
                stats.rcpt_count, stats.vrfy_expn_count
            ),
            facts: serde_json::to_value(HarvestFacts {
                rcpt_count: stats.rcpt_count,
                vrfy_expn_count: stats.vrfy_expn_count,
            })
            .unwrap_or_default(),
        });
    }

    if stats.rcpt_count > 5 && stats.rcpt_domains.len() > 3 {
        let mut domains: Vec<&String> = stats.rcpt_domains.iter().collect();
        domains.sort();
        findings.push(MailFinding {
            kind: "smtp_relay_attempt",
            description: format!(
                "open relay probe: {} recipients across {} domains",
                stats.rcpt_count,
                stats.rcpt_domains.len()
            ),
            facts: serde_json::json!({
                "rcpt_count": stats.rcpt_count,
                "domains": domains,
            }),
        });
    }

    if let Some(body) = &stats.data_body {
        if let Some(reason) = spam_reason(body) {
            findings.push(MailFinding {
                kind: "smtp_spam_attempt",
                description: format!("spam content in DATA body ({reason})"),
                facts: serde_json::json!({
                    "reason": reason,
                    "body_bytes": body.len(),
                }),
            });
        }
    }

    findings
}

/// Phrases that mark a body as spam regardless of structure.
const SPAM_PHRASES: &[&str] = &[
    "viagra",
    "cialis",
    "you have won",
    "lottery winner",
    "claim your prize",
    "click here now",
    "free money",
    "wire transfer",
    "nigerian prince",
    "act now",
    "limited time offer",
    "crypto investment",
];

const HIDDEN_CONTENT_CSS: &[&str] = &["display:none", "visibility:hidden", "font-size:0"];

/// Classify a DATA body as spam: link-stuffed, visually hidden content, or
/// a known spam phrase. Returns the matched reason for evidence.
pub fn spam_reason(body: &str) -> Option<&'static str> {
    let lowered = body.to_lowercase();
    let url_count = lowered.matches("http://").count() + lowered.matches("https://").count();
    if url_count > 10 {
        return Some("excessive links");
    }
    let collapsed: String = lowered.chars().filter(|c| !c.is_whitespace()).collect();
    if HIDDEN_CONTENT_CSS.iter().any(|c| collapsed.contains(c)) {
        return Some("hidden content styling");
    }
    if SPAM_PHRASES.iter().any(|p| lowered.contains(p)) {
        return Some("spam phrase");
    }
    None
}
