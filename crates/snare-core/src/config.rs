//! Environment-driven configuration.
//!
//! The daemon is configured entirely through environment variables with
//! documented defaults. `Config::from_env` reads the process environment;
//! `Config::from_lookup` takes a key→value closure so tests can resolve
//! configuration without touching process state.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Resolved daemon configuration.
///
/// Durations are stored resolved; the corresponding environment variables
/// are expressed in milliseconds (`HEARTBEAT_INTERVAL`, `IP_CACHE_TTL`,
/// `SCAN_DURATION_MS`, ...).
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Identifier sent in heartbeats and reports (`HONEYPOT_ID`).
    pub honeypot_id: String,
    /// Query-string credential for the backend (`API_KEY`).
    pub api_key: String,
    /// Backend base URL (`API_ENDPOINT`).
    pub api_endpoint: String,

    #[serde(with = "millis")]
    pub heartbeat_interval: Duration,
    pub heartbeat_retry_count: u32,
    #[serde(with = "millis")]
    pub heartbeat_retry_delay: Duration,

    pub http_port: u16,
    pub https_port: u16,
    pub ssh_port: u16,
    pub ftp_port: u16,
    pub smtp_port: u16,
    pub smtp_submission_port: u16,
    pub pop3_port: u16,
    pub imap_port: u16,
    pub mysql_port: u16,

    pub enable_http: bool,
    pub enable_https: bool,
    pub enable_ssh: bool,
    pub enable_ftp: bool,
    pub enable_mail: bool,
    pub enable_mysql: bool,

    /// Skip heartbeats and spool every admitted report (`OFFLINE_MODE`).
    pub offline_mode: bool,
    /// Enables diagnostics endpoints and heartbeat retries (`DEBUG_MODE`).
    pub debug_mode: bool,

    pub max_reports_per_ip: u32,
    #[serde(with = "millis")]
    pub ip_cache_ttl: Duration,
    pub store_throttled_attacks: bool,
    pub report_unique_types_only: bool,

    /// Sessions shorter than this with ≤1 meaningful command count as scans.
    #[serde(with = "millis")]
    pub scan_duration: Duration,
    /// Retain spooled attacks across restarts (`KEEP_OFFLINE_SPOOL`).
    pub keep_offline_spool: bool,

    /// Directory for the general log and the offline spool.
    pub log_dir: PathBuf,
    /// Directory for persistent TLS key material.
    pub keys_dir: PathBuf,
}

impl Config {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };
        let port = |key: &str, default: u16| -> u16 {
            lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let number = |key: &str, default: u32| -> u32 {
            lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let millis = |key: &str, default: u64| -> Duration {
            Duration::from_millis(lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default))
        };
        let flag = |key: &str, default: bool| -> bool {
            lookup(key)
                .map(|v| matches!(v.trim(), "true" | "TRUE" | "True" | "1" | "yes"))
                .unwrap_or(default)
        };

        Self {
            honeypot_id: string("HONEYPOT_ID", "test"),
            api_key: string("API_KEY", ""),
            api_endpoint: string("API_ENDPOINT", "http://localhost:3000/api"),

            heartbeat_interval: millis("HEARTBEAT_INTERVAL", 60_000),
            heartbeat_retry_count: number("HEARTBEAT_RETRY_COUNT", 3),
            heartbeat_retry_delay: millis("HEARTBEAT_RETRY_DELAY", 5_000),

            http_port: port("HTTP_PORT", 8080),
            https_port: port("HTTPS_PORT", 8443),
            ssh_port: port("SSH_PORT", 2222),
            ftp_port: port("FTP_PORT", 21),
            smtp_port: port("SMTP_PORT", 25),
            smtp_submission_port: port("SMTP_SUBMISSION_PORT", 587),
            pop3_port: port("POP3_PORT", 110),
            imap_port: port("IMAP_PORT", 143),
            mysql_port: port("MYSQL_PORT", 3306),

            enable_http: flag("ENABLE_HTTP", true),
            enable_https: flag("ENABLE_HTTPS", false),
            enable_ssh: flag("ENABLE_SSH", true),
            enable_ftp: flag("ENABLE_FTP", true),
            enable_mail: flag("ENABLE_MAIL", true),
            enable_mysql: flag("ENABLE_MYSQL", true),

            offline_mode: flag("OFFLINE_MODE", false),
            debug_mode: flag("DEBUG_MODE", false),

            max_reports_per_ip: number("MAX_REPORTS_PER_IP", 5),
            ip_cache_ttl: millis("IP_CACHE_TTL", 3_600_000),
            store_throttled_attacks: flag("STORE_THROTTLED_ATTACKS", false),
            report_unique_types_only: flag("REPORT_UNIQUE_TYPES_ONLY", false),

            scan_duration: millis("SCAN_DURATION_MS", 500),
            keep_offline_spool: flag("KEEP_OFFLINE_SPOOL", false),

            log_dir: PathBuf::from(string("LOG_DIR", "logs")),
            keys_dir: PathBuf::from(string("KEYS_DIR", "keys")),
        }
    }

    /// Path of the offline attack spool file.
    pub fn spool_path(&self) -> PathBuf {
        self.log_dir.join("offline_attacks.json")
    }

    /// API key with all but the first four characters masked, for
    /// diagnostics output.
    pub fn redacted_api_key(&self) -> String {
        redact_key(&self.api_key)
    }
}

/// Mask a credential for log/diagnostic output.
pub fn redact_key(key: &str) -> String {
    if key.is_empty() {
        return "(unset)".to_string();
    }
    if key.len() <= 4 {
        return "****".to_string();
    }
    format!("{}****", &key[..4])
}

/// Serialize a `Duration` as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |key| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn defaults_when_environment_empty() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.honeypot_id, "test");
        assert_eq!(config.api_endpoint, "http://localhost:3000/api");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.mysql_port, 3306);
        assert_eq!(config.max_reports_per_ip, 5);
        assert_eq!(config.ip_cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.scan_duration, Duration::from_millis(500));
        assert!(config.enable_http);
        assert!(!config.enable_https);
        assert!(!config.offline_mode);
        assert!(!config.store_throttled_attacks);
    }

    #[test]
    fn overrides_apply() {
        let pairs = [
            ("HONEYPOT_ID", "hp-eu-1"),
            ("API_KEY", "sk-abcdef123456"),
            ("HTTP_PORT", "8888"),
            ("HEARTBEAT_INTERVAL", "30000"),
            ("OFFLINE_MODE", "true"),
            ("ENABLE_MYSQL", "false"),
            ("MAX_REPORTS_PER_IP", "2"),
        ];
        let config = Config::from_lookup(lookup_from(&pairs));
        assert_eq!(config.honeypot_id, "hp-eu-1");
        assert_eq!(config.http_port, 8888);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(config.offline_mode);
        assert!(!config.enable_mysql);
        assert_eq!(config.max_reports_per_ip, 2);
    }

    #[test]
    fn malformed_numbers_fall_back_to_defaults() {
        let pairs = [("HTTP_PORT", "not-a-port"), ("HEARTBEAT_INTERVAL", "soon")];
        let config = Config::from_lookup(lookup_from(&pairs));
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
    }

    #[test]
    fn flag_parsing_accepts_common_forms() {
        for value in ["true", "1", "yes", "TRUE"] {
            let pairs = [("OFFLINE_MODE", value)];
            assert!(Config::from_lookup(lookup_from(&pairs)).offline_mode, "{value}");
        }
        let pairs = [("OFFLINE_MODE", "off")];
        assert!(!Config::from_lookup(lookup_from(&pairs)).offline_mode);
    }

    #[test]
    fn spool_path_under_log_dir() {
        let pairs = [("LOG_DIR", "/var/lib/netsnare/logs")];
        let config = Config::from_lookup(lookup_from(&pairs));
        assert_eq!(
            config.spool_path(),
            PathBuf::from("/var/lib/netsnare/logs/offline_attacks.json")
        );
    }

    #[test]
    fn api_key_redaction() {
        assert_eq!(redact_key(""), "(unset)");
        assert_eq!(redact_key("abc"), "****");
        assert_eq!(redact_key("sk-abcdef"), "sk-a****");
    }
}
