//! The canonical attack taxonomy.
//!
//! A closed set of attack kinds, each with a fixed category and base score.
//! The reported `attack_type` is always drawn from this set; the listener's
//! original label only survives in enhancement metadata.

use serde::{Deserialize, Serialize};

/// Canonical attack kind, ordered roughly by base score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackType {
    SuspiciousUserAgent,
    DirectoryListing,
    #[serde(rename = "excessive_404")]
    Excessive404,
    SuspiciousQuery,
    FakeCrawler,
    RateLimitBreach,
    ApiAbuse,
    PortScan,
    CommentSpam,
    Honeypot,
    CredentialStuffing,
    XssAttempt,
    CsrfAttempt,
    PathTraversal,
    AuthBreach,
    SqliAttempt,
    SshBruteforce,
    HttpFlood,
    MailSpam,
    CommandInjection,
    HttpInjection,
    DataExfiltration,
    BotnetActivity,
    Ransomware,
    Ddos,
    TargetedAttack,
    Manual,
    TorExit,
    ProxyAbuse,
    VpnAbuse,
}

/// Attack category reported alongside the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackCategory {
    Reconnaissance,
    Abuse,
    Authentication,
    Injection,
    Dos,
    Intrusion,
    Malware,
    Anonymity,
    General,
}

impl AttackType {
    /// Every canonical kind, for closed-set checks.
    pub const ALL: [AttackType; 30] = [
        AttackType::SuspiciousUserAgent,
        AttackType::DirectoryListing,
        AttackType::Excessive404,
        AttackType::SuspiciousQuery,
        AttackType::FakeCrawler,
        AttackType::RateLimitBreach,
        AttackType::ApiAbuse,
        AttackType::PortScan,
        AttackType::CommentSpam,
        AttackType::Honeypot,
        AttackType::CredentialStuffing,
        AttackType::XssAttempt,
        AttackType::CsrfAttempt,
        AttackType::PathTraversal,
        AttackType::AuthBreach,
        AttackType::SqliAttempt,
        AttackType::SshBruteforce,
        AttackType::HttpFlood,
        AttackType::MailSpam,
        AttackType::CommandInjection,
        AttackType::HttpInjection,
        AttackType::DataExfiltration,
        AttackType::BotnetActivity,
        AttackType::Ransomware,
        AttackType::Ddos,
        AttackType::TargetedAttack,
        AttackType::Manual,
        AttackType::TorExit,
        AttackType::ProxyAbuse,
        AttackType::VpnAbuse,
    ];

    /// The snake_case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackType::SuspiciousUserAgent => "suspicious_user_agent",
            AttackType::DirectoryListing => "directory_listing",
            AttackType::Excessive404 => "excessive_404",
            AttackType::SuspiciousQuery => "suspicious_query",
            AttackType::FakeCrawler => "fake_crawler",
            AttackType::RateLimitBreach => "rate_limit_breach",
            AttackType::ApiAbuse => "api_abuse",
            AttackType::PortScan => "port_scan",
            AttackType::CommentSpam => "comment_spam",
            AttackType::Honeypot => "honeypot",
            AttackType::CredentialStuffing => "credential_stuffing",
            AttackType::XssAttempt => "xss_attempt",
            AttackType::CsrfAttempt => "csrf_attempt",
            AttackType::PathTraversal => "path_traversal",
            AttackType::AuthBreach => "auth_breach",
            AttackType::SqliAttempt => "sqli_attempt",
            AttackType::SshBruteforce => "ssh_bruteforce",
            AttackType::HttpFlood => "http_flood",
            AttackType::MailSpam => "mail_spam",
            AttackType::CommandInjection => "command_injection",
            AttackType::HttpInjection => "http_injection",
            AttackType::DataExfiltration => "data_exfiltration",
            AttackType::BotnetActivity => "botnet_activity",
            AttackType::Ransomware => "ransomware",
            AttackType::Ddos => "ddos",
            AttackType::TargetedAttack => "targeted_attack",
            AttackType::Manual => "manual",
            AttackType::TorExit => "tor_exit",
            AttackType::ProxyAbuse => "proxy_abuse",
            AttackType::VpnAbuse => "vpn_abuse",
        }
    }

    /// Fixed base score, 2–45.
    pub fn base_score(&self) -> u16 {
        match self {
            AttackType::SuspiciousUserAgent => 2,
            AttackType::DirectoryListing => 3,
            AttackType::Excessive404 => 3,
            AttackType::SuspiciousQuery => 4,
            AttackType::FakeCrawler => 4,
            AttackType::RateLimitBreach => 6,
            AttackType::ApiAbuse => 7,
            AttackType::PortScan => 8,
            AttackType::CommentSpam => 8,
            AttackType::Honeypot => 9,
            AttackType::CredentialStuffing => 11,
            AttackType::XssAttempt => 12,
            AttackType::CsrfAttempt => 12,
            AttackType::PathTraversal => 13,
            AttackType::AuthBreach => 15,
            AttackType::SqliAttempt => 16,
            AttackType::SshBruteforce => 18,
            AttackType::HttpFlood => 18,
            AttackType::MailSpam => 19,
            AttackType::CommandInjection => 20,
            AttackType::HttpInjection => 22,
            AttackType::DataExfiltration => 25,
            AttackType::BotnetActivity => 28,
            AttackType::Ransomware => 35,
            AttackType::Ddos => 40,
            AttackType::TargetedAttack => 45,
            AttackType::Manual => 15,
            AttackType::TorExit => 10,
            AttackType::ProxyAbuse => 8,
            AttackType::VpnAbuse => 7,
        }
    }

    /// Fixed category.
    pub fn category(&self) -> AttackCategory {
        match self {
            AttackType::SuspiciousUserAgent
            | AttackType::DirectoryListing
            | AttackType::Excessive404
            | AttackType::SuspiciousQuery
            | AttackType::FakeCrawler
            | AttackType::PortScan => AttackCategory::Reconnaissance,
            AttackType::RateLimitBreach
            | AttackType::ApiAbuse
            | AttackType::CommentSpam
            | AttackType::MailSpam => AttackCategory::Abuse,
            AttackType::CredentialStuffing
            | AttackType::CsrfAttempt
            | AttackType::AuthBreach
            | AttackType::SshBruteforce => AttackCategory::Authentication,
            AttackType::XssAttempt
            | AttackType::PathTraversal
            | AttackType::SqliAttempt
            | AttackType::CommandInjection
            | AttackType::HttpInjection => AttackCategory::Injection,
            AttackType::HttpFlood | AttackType::Ddos => AttackCategory::Dos,
            AttackType::DataExfiltration | AttackType::TargetedAttack => AttackCategory::Intrusion,
            AttackType::BotnetActivity | AttackType::Ransomware => AttackCategory::Malware,
            AttackType::TorExit | AttackType::ProxyAbuse | AttackType::VpnAbuse => {
                AttackCategory::Anonymity
            }
            AttackType::Honeypot | AttackType::Manual => AttackCategory::General,
        }
    }
}

impl AttackCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackCategory::Reconnaissance => "reconnaissance",
            AttackCategory::Abuse => "abuse",
            AttackCategory::Authentication => "authentication",
            AttackCategory::Injection => "injection",
            AttackCategory::Dos => "dos",
            AttackCategory::Intrusion => "intrusion",
            AttackCategory::Malware => "malware",
            AttackCategory::Anonymity => "anonymity",
            AttackCategory::General => "general",
        }
    }
}

impl std::fmt::Display for AttackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for AttackCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_stay_in_documented_range() {
        for kind in AttackType::ALL {
            let score = kind.base_score();
            assert!((2..=45).contains(&score), "{kind}: {score}");
        }
    }

    #[test]
    fn wire_names_are_snake_case_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for kind in AttackType::ALL {
            let name = kind.as_str();
            assert!(!name.contains(char::is_uppercase), "{name}");
            assert!(seen.insert(name), "duplicate wire name {name}");
        }
    }

    #[test]
    fn serde_matches_as_str() {
        for kind in AttackType::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let back: AttackType = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn spot_check_table_rows() {
        assert_eq!(AttackType::PortScan.base_score(), 8);
        assert_eq!(AttackType::PortScan.category(), AttackCategory::Reconnaissance);
        assert_eq!(AttackType::SqliAttempt.base_score(), 16);
        assert_eq!(AttackType::SqliAttempt.category(), AttackCategory::Injection);
        assert_eq!(AttackType::SshBruteforce.base_score(), 18);
        assert_eq!(AttackType::TargetedAttack.base_score(), 45);
        assert_eq!(AttackType::Honeypot.base_score(), 9);
        assert_eq!(AttackType::Honeypot.category(), AttackCategory::General);
        assert_eq!(AttackType::TorExit.category(), AttackCategory::Anonymity);
    }
}
