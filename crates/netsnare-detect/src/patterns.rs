//! HTTP content rules and shared injection token sets.
//!
//! Requests are labeled in a fixed order: suspicious endpoint, SQL
//! injection, command injection, XSS, path traversal, scanner user-agent.
//! The first match wins. System paths (the diagnostics surface) are
//! excluded before any rule runs.

use regex::Regex;

/// Paths served by the diagnostics surface; never inspected, never 404'd.
pub const SYSTEM_PATHS: &[&str] = &[
    "/monitor",
    "/api-diagnostics",
    "/test-heartbeat",
    "/debug",
    "/offline-attacks",
    "/upload-offline-attacks",
];

/// Endpoints nobody requests by accident.
const SUSPICIOUS_ENDPOINTS: &[&str] = &[
    "/admin",
    "/wp-admin",
    "/wp-login.php",
    "/.git",
    "/.env",
    "/.aws",
    "/phpmyadmin",
    "/config.php",
    "/backup",
    "/shell",
    "/cgi-bin",
    "/xmlrpc.php",
    "/actuator",
];

/// SQL injection tokens, shared with the MySQL listener's query scanner.
const SQLI_TOKENS: &[&str] = &[
    "union select",
    "or 1=1",
    "' or '",
    "information_schema",
    "sleep(",
    "benchmark(",
    "into outfile",
    "load_file",
    "drop table",
    "; --",
];

const COMMAND_TOKENS: &[&str] = &[
    ";cat ",
    "; cat ",
    "|cat ",
    "| cat ",
    "$(",
    "`id`",
    "&&cat",
    "&& cat",
    ";wget ",
    "; wget ",
    ";curl ",
    "; curl ",
    "|nc ",
    "| nc ",
    "/bin/sh",
    "/bin/bash",
    "rm -rf",
    "chmod 777",
];

const XSS_TOKENS: &[&str] = &[
    "<script",
    "javascript:",
    "onerror=",
    "onload=",
    "alert(",
    "document.cookie",
];

const TRAVERSAL_TOKENS: &[&str] = &["../", "..%2f", "..\\", "%2e%2e%2f", "%2e%2e/"];

/// User-agent substrings of well-known scanners.
const SCANNER_AGENTS: &[&str] = &[
    "sqlmap", "nikto", "nmap", "masscan", "zgrab", "gobuster", "dirbuster",
];

/// Search-engine crawler names. Real crawlers do not index honeypots, so
/// a crawler user-agent here is an impersonation.
const CRAWLER_AGENTS: &[&str] = &["googlebot", "bingbot", "baiduspider", "yandexbot", "duckduckbot"];

/// Label a content rule attaches to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestLabel {
    SuspiciousEndpoint,
    SqlInjection,
    CommandInjection,
    Xss,
    Traversal,
    ScannerUserAgent,
    FakeCrawler,
}

impl RequestLabel {
    /// Internal kind emitted for this label.
    pub fn internal_kind(&self) -> &'static str {
        match self {
            RequestLabel::SuspiciousEndpoint => "suspicious_request",
            RequestLabel::SqlInjection => "sql_injection",
            RequestLabel::CommandInjection => "command_injection",
            RequestLabel::Xss => "xss",
            RequestLabel::Traversal => "traversal",
            RequestLabel::ScannerUserAgent => "scanner_user_agent",
            RequestLabel::FakeCrawler => "fake_crawler",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RequestLabel::SuspiciousEndpoint => "request for a suspicious endpoint",
            RequestLabel::SqlInjection => "SQL injection tokens in request",
            RequestLabel::CommandInjection => "command injection tokens in request",
            RequestLabel::Xss => "cross-site scripting tokens in request",
            RequestLabel::Traversal => "path traversal tokens in request",
            RequestLabel::ScannerUserAgent => "known scanner user-agent",
            RequestLabel::FakeCrawler => "search-engine crawler impersonation",
        }
    }
}

/// Stateless request inspector applying the content rules.
#[derive(Debug, Default)]
pub struct HttpInspector {
    _private: (),
}

impl HttpInspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for diagnostics-surface paths.
    pub fn is_system_path(&self, path: &str) -> bool {
        SYSTEM_PATHS
            .iter()
            .any(|p| path == *p || path.starts_with(&format!("{p}/")))
    }

    /// Label a request, or `None` when nothing matched.
    ///
    /// `target` is the path plus query string; `user_agent` and `body` may
    /// be empty. Matching order is fixed.
    pub fn inspect(&self, target: &str, user_agent: &str, body: &str) -> Option<RequestLabel> {
        let decoded = percent_decode_lossy(target).to_lowercase();
        let body = body.to_lowercase();
        let haystack = format!("{decoded} {body}");

        if SUSPICIOUS_ENDPOINTS
            .iter()
            .any(|e| decoded.starts_with(*e))
        {
            return Some(RequestLabel::SuspiciousEndpoint);
        }
        if contains_sqli(&haystack) {
            return Some(RequestLabel::SqlInjection);
        }
        if COMMAND_TOKENS.iter().any(|t| haystack.contains(t)) {
            return Some(RequestLabel::CommandInjection);
        }
        if XSS_TOKENS.iter().any(|t| haystack.contains(t)) {
            return Some(RequestLabel::Xss);
        }
        // Traversal checks the raw target too: the decode above collapses
        // the encoded variants this rule is looking for.
        let raw = target.to_lowercase();
        if TRAVERSAL_TOKENS
            .iter()
            .any(|t| raw.contains(t) || decoded.contains(t))
        {
            return Some(RequestLabel::Traversal);
        }
        let agent = user_agent.to_lowercase();
        if SCANNER_AGENTS.iter().any(|a| agent.contains(a)) {
            return Some(RequestLabel::ScannerUserAgent);
        }
        if CRAWLER_AGENTS.iter().any(|a| agent.contains(a)) {
            return Some(RequestLabel::FakeCrawler);
        }
        None
    }
}

/// SQL injection token scan, shared with the MySQL listener.
pub fn contains_sqli(text: &str) -> bool {
    let lowered = text.to_lowercase();
    SQLI_TOKENS.iter().any(|t| lowered.contains(t))
}

/// Decode `%xx` escapes, passing malformed escapes through unchanged.
pub fn percent_decode_lossy(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Lazily-built matcher for repeated 404 paths that look like wordlist
/// scans (sequential numeric or extension-bruteforcing names).
pub fn wordlist_path_pattern() -> Regex {
    Regex::new(r"(?i)\.(bak|old|orig|swp|sql|tar\.gz|zip)$|/(test|dev|staging|tmp)\d*$")
        .expect("wordlist pattern compiles")
}
