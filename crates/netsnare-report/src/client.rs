//! The backend API client.
//!
//! Heartbeats, report delivery, the ping probe, and spool replay. Every
//! send carries a hard timeout; every failure is recorded in the
//! diagnostics record and, for reports, lands the record in the spool.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use netsnare_classify::AttackRecord;
use snare_core::Config;

use crate::diagnostics::DiagnosticsHandle;
use crate::error::{ReportError, SpoolError};
use crate::spool::Spool;

const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);
const REPORT_TIMEOUT: Duration = Duration::from_secs(5);
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Structured ping outcome for diagnostics; never propagates as an error.
#[derive(Debug, Clone, Serialize)]
pub struct PingResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub message: String,
}

/// Outcome of one spool replay pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReplayStats {
    pub attempted: usize,
    pub uploaded: usize,
    pub remaining: usize,
}

/// Wire body for `POST /honeypot/report-ip`.
#[derive(Debug, Serialize)]
struct ReportBody {
    ip_address: String,
    attack_type: netsnare_classify::AttackType,
    description: String,
    evidence: Vec<String>,
    severity: u8,
    category: netsnare_classify::AttackCategory,
    source: &'static str,
}

impl ReportBody {
    fn from_record(record: &AttackRecord) -> Self {
        Self {
            ip_address: record.ip_address.to_string(),
            attack_type: record.attack_type,
            description: record.description.clone(),
            evidence: normalize_evidence(Value::from(record.evidence.clone())),
            severity: record.severity,
            category: record.category,
            source: "honeypot",
        }
    }
}

/// Normalize arbitrary evidence into the ordered string sequence the
/// backend requires: strings pass through, other scalars and objects are
/// JSON-serialized, a lone scalar becomes a singleton.
pub fn normalize_evidence(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        Value::String(s) => vec![s],
        Value::Null => Vec::new(),
        other => vec![other.to_string()],
    }
}

/// Client for the scoring backend.
pub struct ReportClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    redacted_key: String,
    honeypot_id: String,
    debug_mode: bool,
    offline_mode: bool,
    retry_count: u32,
    retry_delay: Duration,
    diagnostics: DiagnosticsHandle,
    spool: Arc<Spool>,
    report_failures: AtomicU32,
}

impl ReportClient {
    pub fn new(config: &Config, spool: Arc<Spool>) -> Result<Self, ReportError> {
        let http = reqwest::Client::builder()
            .user_agent(format!("netsnare/{}", snare_core::VERSION))
            .build()
            .map_err(|e| ReportError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: config.api_endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            redacted_key: config.redacted_api_key(),
            honeypot_id: config.honeypot_id.clone(),
            debug_mode: config.debug_mode,
            offline_mode: config.offline_mode,
            retry_count: config.heartbeat_retry_count,
            retry_delay: config.heartbeat_retry_delay,
            diagnostics: DiagnosticsHandle::new(),
            spool,
            report_failures: AtomicU32::new(0),
        })
    }

    pub fn diagnostics(&self) -> &DiagnosticsHandle {
        &self.diagnostics
    }

    pub fn spool(&self) -> &Spool {
        &self.spool
    }

    pub fn offline_mode(&self) -> bool {
        self.offline_mode
    }

    /// Consecutive failed report sends since the last success.
    pub fn report_failures(&self) -> u32 {
        self.report_failures.load(Ordering::Relaxed)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    // ── Heartbeat ──────────────────────────────────────────────────

    /// One heartbeat exchange. In debug mode a failure gets one delayed
    /// retry while the failure streak is still short; the third consecutive
    /// failure additionally triggers the ping probe.
    pub async fn heartbeat_cycle(self: &Arc<Self>) {
        if self.send_heartbeat().await.is_ok() {
            return;
        }
        self.maybe_probe();

        let failures = self.diagnostics.consecutive_failures();
        if self.debug_mode && failures <= self.retry_count {
            tokio::time::sleep(self.retry_delay).await;
            if self.send_heartbeat().await.is_err() {
                self.maybe_probe();
            }
        }
    }

    /// Fire-and-forget ping probe, run exactly when the failure streak
    /// reaches three, to tell "backend down" from "credentials wrong".
    fn maybe_probe(self: &Arc<Self>) {
        if self.diagnostics.consecutive_failures() != 3 {
            return;
        }
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let result = client.ping().await;
            info!(
                success = result.success,
                message = %result.message,
                "ping probe after repeated heartbeat failures"
            );
        });
    }

    /// Send a single heartbeat. Success resets the failure counter.
    pub async fn send_heartbeat(&self) -> Result<(), ReportError> {
        let url = self.url("/honeypot/heartbeat");
        let body = serde_json::json!({ "honeypot_id": self.honeypot_id });
        self.diagnostics
            .record_request(&url, "POST", &body.to_string(), &self.redacted_key);

        let result = self
            .http
            .post(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .json(&body)
            .timeout(HEARTBEAT_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                if (200..300).contains(&status) {
                    self.diagnostics.record_success(status, &text);
                    debug!(status, "heartbeat acknowledged");
                    Ok(())
                } else {
                    let failures = self.diagnostics.record_failure(
                        &format!("heartbeat returned {status}"),
                        Some(status),
                        Some(&text),
                    );
                    warn!(status, failures, "heartbeat rejected");
                    Err(ReportError::Status { status, body: text })
                }
            }
            Err(e) => {
                let failures = self.diagnostics.record_failure(&e.to_string(), None, None);
                warn!(error = %e, failures, "heartbeat transport failure");
                Err(ReportError::Transport(e.to_string()))
            }
        }
    }

    // ── Reports ────────────────────────────────────────────────────

    /// Deliver an admitted record, spooling it on any failure. In offline
    /// mode the record goes straight to the spool.
    pub async fn submit(&self, record: &AttackRecord) -> Result<(), ReportError> {
        if self.offline_mode {
            self.spool.append(record, false)?;
            debug!(ip = %record.ip_address, "offline mode, report spooled");
            return Ok(());
        }

        match self.send_report(record).await {
            Ok(()) => {
                self.report_failures.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.report_failures.fetch_add(1, Ordering::Relaxed);
                if e.status() == Some(403) {
                    warn!(
                        ip = %record.ip_address,
                        "backend rejected report with 403 — check API key permissions"
                    );
                }
                self.spool.append(record, false)?;
                Err(e)
            }
        }
    }

    /// Store a throttled record without transmitting it.
    pub fn store_throttled(&self, record: &AttackRecord) -> Result<(), SpoolError> {
        self.spool.append(record, true)
    }

    async fn send_report(&self, record: &AttackRecord) -> Result<(), ReportError> {
        let url = self.url("/honeypot/report-ip");
        let body = ReportBody::from_record(record);

        let response = self
            .http
            .post(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .json(&body)
            .timeout(REPORT_TIMEOUT)
            .send()
            .await
            .map_err(|e| ReportError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            info!(
                ip = %record.ip_address,
                attack = %record.attack_type,
                severity = record.severity,
                "attack reported"
            );
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(ReportError::Status { status, body: text })
        }
    }

    // ── Probes ─────────────────────────────────────────────────────

    /// Reachability probe. Returns a structured result, never an error.
    pub async fn ping(&self) -> PingResult {
        let url = self.url("/ping");
        let result = self
            .http
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .timeout(PING_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                PingResult {
                    success: (200..300).contains(&status),
                    status: Some(status),
                    message: format!("backend answered {status}"),
                }
            }
            Err(e) => PingResult {
                success: false,
                status: None,
                message: e.to_string(),
            },
        }
    }

    /// External reputation lookup, used by diagnostics only.
    pub async fn lookup_ip(&self, ip: &str) -> Result<Value, ReportError> {
        let url = self.url("/get");
        let response = self
            .http
            .get(&url)
            .query(&[("api_key", self.api_key.as_str()), ("ip", ip)])
            .timeout(REPORT_TIMEOUT)
            .send()
            .await
            .map_err(|e| ReportError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        if (200..300).contains(&status) {
            Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
        } else {
            Err(ReportError::Status { status, body: text })
        }
    }

    // ── Spool replay ───────────────────────────────────────────────

    /// Try to deliver every pending spool entry, then rewrite the file
    /// keeping only what is still pending (throttled evidence is retained).
    pub async fn replay_spool(&self) -> Result<ReplayStats, ReportError> {
        let entries = self.spool.entries()?;
        let mut stats = ReplayStats::default();
        let mut kept = Vec::new();

        for entry in entries {
            if !entry.pending_upload {
                if entry.throttled {
                    kept.push(entry);
                }
                continue;
            }
            stats.attempted += 1;
            match self.send_report(&entry.record).await {
                Ok(()) => stats.uploaded += 1,
                Err(e) => {
                    debug!(error = %e, "spool entry still undeliverable");
                    kept.push(entry);
                }
            }
        }

        stats.remaining = kept.iter().filter(|e| e.pending_upload).count();
        self.spool.write_entries(&kept)?;

        if stats.attempted > 0 && stats.remaining == 0 {
            self.report_failures.store(0, Ordering::Relaxed);
        }
        if stats.attempted > 0 {
            info!(
                attempted = stats.attempted,
                uploaded = stats.uploaded,
                remaining = stats.remaining,
                "spool replay pass finished"
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicU16;
    use std::sync::Mutex;

    use axum::extract::State;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    use netsnare_classify::classify;
    use snare_core::{ObservationEvent, Protocol};

    #[derive(Clone)]
    struct Backend {
        /// Bodies received at /honeypot/report-ip.
        reports: Arc<Mutex<Vec<Value>>>,
        /// Status returned for reports.
        report_status: Arc<AtomicU16>,
        /// Heartbeats fail while this is > 0, decrementing each time.
        heartbeat_failures_left: Arc<AtomicU32>,
    }

    async fn spawn_backend(report_status: u16, heartbeat_failures: u32) -> (String, Backend) {
        let backend = Backend {
            reports: Arc::new(Mutex::new(Vec::new())),
            report_status: Arc::new(AtomicU16::new(report_status)),
            heartbeat_failures_left: Arc::new(AtomicU32::new(heartbeat_failures)),
        };

        let app = Router::new()
            .route(
                "/api/honeypot/heartbeat",
                post(|State(b): State<Backend>, Json(_): Json<Value>| async move {
                    let left = b.heartbeat_failures_left.load(Ordering::SeqCst);
                    if left > 0 {
                        b.heartbeat_failures_left.store(left - 1, Ordering::SeqCst);
                        (axum::http::StatusCode::BAD_GATEWAY, "down")
                    } else {
                        (axum::http::StatusCode::OK, "ok")
                    }
                }),
            )
            .route(
                "/api/honeypot/report-ip",
                post(|State(b): State<Backend>, Json(body): Json<Value>| async move {
                    b.reports.lock().unwrap().push(body);
                    let status = b.report_status.load(Ordering::SeqCst);
                    (
                        axum::http::StatusCode::from_u16(status).unwrap(),
                        "recorded",
                    )
                }),
            )
            .route("/api/ping", get(|| async { "pong" }))
            .route(
                "/api/get",
                get(|| async { Json(serde_json::json!({"score": 12, "listed": true})) }),
            )
            .with_state(backend.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/api"), backend)
    }

    fn test_client(endpoint: &str, offline: bool) -> (Arc<ReportClient>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let spool = Arc::new(Spool::open(&dir.path().join("offline_attacks.json"), false).unwrap());
        let endpoint = endpoint.to_string();
        let offline_value = offline.to_string();
        let config = Config::from_lookup(|key| match key {
            "API_ENDPOINT" => Some(endpoint.clone()),
            "API_KEY" => Some("sk-test-key".to_string()),
            "OFFLINE_MODE" => Some(offline_value.clone()),
            _ => None,
        });
        (Arc::new(ReportClient::new(&config, spool).unwrap()), dir)
    }

    fn make_record(kind: &str) -> AttackRecord {
        classify(&ObservationEvent::new(
            "203.0.113.50".parse().unwrap(),
            50000,
            Protocol::Http,
            kind,
            "client test",
            vec!["evidence-a".to_string()],
        ))
    }

    #[test]
    fn normalize_passes_string_arrays_through() {
        let out = normalize_evidence(serde_json::json!(["a", "b"]));
        assert_eq!(out, vec!["a", "b"]);
    }

    #[test]
    fn normalize_wraps_scalar_string() {
        assert_eq!(normalize_evidence(Value::String("x".into())), vec!["x"]);
    }

    #[test]
    fn normalize_serializes_non_strings() {
        let out = normalize_evidence(serde_json::json!({"count": 3}));
        assert_eq!(out, vec![r#"{"count":3}"#]);

        let out = normalize_evidence(serde_json::json!([1, "two", {"k": true}]));
        assert_eq!(out, vec!["1", "two", r#"{"k":true}"#]);
    }

    #[test]
    fn normalize_null_is_empty() {
        assert!(normalize_evidence(Value::Null).is_empty());
    }

    #[tokio::test]
    async fn heartbeat_success_resets_failures() {
        let (endpoint, _backend) = spawn_backend(200, 2).await;
        let (client, _dir) = test_client(&endpoint, false);

        assert!(client.send_heartbeat().await.is_err());
        assert!(client.send_heartbeat().await.is_err());
        assert_eq!(client.diagnostics().consecutive_failures(), 2);

        client.send_heartbeat().await.unwrap();
        assert_eq!(client.diagnostics().consecutive_failures(), 0);
        assert!(client.diagnostics().last_success().is_some());
    }

    #[tokio::test]
    async fn heartbeat_transport_failure_counts() {
        // Nothing listens on this port.
        let (client, _dir) = test_client("http://127.0.0.1:1/api", false);
        assert!(client.send_heartbeat().await.is_err());
        assert_eq!(client.diagnostics().consecutive_failures(), 1);
        let snap = client.diagnostics().snapshot();
        assert!(snap.last_error.is_some());
        assert!(snap.last_request.unwrap().api_key.contains("****"));
    }

    #[tokio::test]
    async fn successful_report_reaches_backend() {
        let (endpoint, backend) = spawn_backend(200, 0).await;
        let (client, _dir) = test_client(&endpoint, false);

        client.submit(&make_record("sql_injection")).await.unwrap();

        let reports = backend.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["attack_type"], "sqli_attempt");
        assert_eq!(reports[0]["category"], "injection");
        assert_eq!(reports[0]["source"], "honeypot");
        assert!(reports[0]["evidence"].is_array());
        assert!(client.spool().entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_report_is_spooled() {
        let (endpoint, _backend) = spawn_backend(403, 0).await;
        let (client, _dir) = test_client(&endpoint, false);

        let err = client.submit(&make_record("ssh_scan")).await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(client.report_failures(), 1);

        let entries = client.spool().entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].pending_upload);
    }

    #[tokio::test]
    async fn offline_mode_spools_without_network() {
        let (client, _dir) = test_client("http://127.0.0.1:1/api", true);
        client.submit(&make_record("ssh_scan")).await.unwrap();
        client.submit(&make_record("sql_injection")).await.unwrap();
        assert_eq!(client.spool().entries().unwrap().len(), 2);
        assert_eq!(client.report_failures(), 0);
    }

    #[tokio::test]
    async fn replay_uploads_pending_and_rewrites() {
        let (endpoint, backend) = spawn_backend(403, 0).await;
        let (client, _dir) = test_client(&endpoint, false);

        let _ = client.submit(&make_record("ssh_scan")).await;
        let _ = client.submit(&make_record("sql_injection")).await;
        assert_eq!(client.spool().pending().unwrap().len(), 2);

        // Backend recovers.
        backend.report_status.store(200, Ordering::SeqCst);
        let stats = client.replay_spool().await.unwrap();
        assert_eq!(stats.attempted, 2);
        assert_eq!(stats.uploaded, 2);
        assert_eq!(stats.remaining, 0);
        assert!(client.spool().entries().unwrap().is_empty());
        assert_eq!(client.report_failures(), 0);
    }

    #[tokio::test]
    async fn replay_keeps_undeliverable_and_throttled_entries() {
        let (endpoint, _backend) = spawn_backend(500, 0).await;
        let (client, _dir) = test_client(&endpoint, false);

        let _ = client.submit(&make_record("ssh_scan")).await;
        client.store_throttled(&make_record("ssh_scan")).unwrap();

        let stats = client.replay_spool().await.unwrap();
        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.uploaded, 0);
        assert_eq!(stats.remaining, 1);

        let entries = client.spool().entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.throttled));
    }

    #[tokio::test]
    async fn lookup_returns_backend_json() {
        let (endpoint, _backend) = spawn_backend(200, 0).await;
        let (client, _dir) = test_client(&endpoint, false);
        let value = client.lookup_ip("203.0.113.50").await.unwrap();
        assert_eq!(value["score"], 12);
    }

    #[tokio::test]
    async fn ping_reports_success_and_failure() {
        let (endpoint, _backend) = spawn_backend(200, 0).await;
        let (client, _dir) = test_client(&endpoint, false);
        let result = client.ping().await;
        assert!(result.success);
        assert_eq!(result.status, Some(200));

        let (client, _dir) = test_client("http://127.0.0.1:1/api", false);
        let result = client.ping().await;
        assert!(!result.success);
        assert!(result.status.is_none());
    }
}
