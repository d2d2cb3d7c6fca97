//! End-to-end scenarios: listener → classification → throttle → delivery,
//! against a stub backend.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;

use netsnare_classify::classify;
use netsnare_protocols::http as honeypot_http;
use netsnare_protocols::serve::Trackers;
use netsnare_protocols::{ListenerContext, smtp, ssh};
use netsnare_report::{ReportClient, Spool};
use netsnare_throttle::{Admission, ThrottleCache, ThrottlePolicy};
use snare_core::{Config, EventSink, ObservationEvent, Protocol};

// ── Stub backend ───────────────────────────────────────────────

#[derive(Clone)]
struct Backend {
    reports: Arc<Mutex<Vec<Value>>>,
    report_status: Arc<AtomicU16>,
    heartbeat_status: Arc<AtomicU16>,
    ping_hits: Arc<AtomicU32>,
    heartbeat_hits: Arc<AtomicU32>,
}

impl Backend {
    fn report_types(&self) -> Vec<String> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|r| r["attack_type"].as_str().unwrap_or("").to_string())
            .collect()
    }
}

async fn spawn_backend() -> (String, Backend) {
    let backend = Backend {
        reports: Arc::new(Mutex::new(Vec::new())),
        report_status: Arc::new(AtomicU16::new(200)),
        heartbeat_status: Arc::new(AtomicU16::new(200)),
        ping_hits: Arc::new(AtomicU32::new(0)),
        heartbeat_hits: Arc::new(AtomicU32::new(0)),
    };

    let app = Router::new()
        .route(
            "/api/honeypot/heartbeat",
            post(|State(b): State<Backend>, Json(_): Json<Value>| async move {
                b.heartbeat_hits.fetch_add(1, Ordering::SeqCst);
                let status = b.heartbeat_status.load(Ordering::SeqCst);
                (axum::http::StatusCode::from_u16(status).unwrap(), "hb")
            }),
        )
        .route(
            "/api/honeypot/report-ip",
            post(|State(b): State<Backend>, Json(body): Json<Value>| async move {
                b.reports.lock().unwrap().push(body);
                let status = b.report_status.load(Ordering::SeqCst);
                (axum::http::StatusCode::from_u16(status).unwrap(), "rep")
            }),
        )
        .route(
            "/api/ping",
            get(|State(b): State<Backend>| async move {
                b.ping_hits.fetch_add(1, Ordering::SeqCst);
                "pong"
            }),
        )
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/api"), backend)
}

// ── Harness helpers ────────────────────────────────────────────

struct Harness {
    sink: EventSink,
    events: tokio::sync::mpsc::Receiver<ObservationEvent>,
    ctx: ListenerContext,
    client: Arc<ReportClient>,
    throttle: Arc<ThrottleCache>,
    _shutdown: watch::Sender<bool>,
    _dir: tempfile::TempDir,
}

fn harness(endpoint: &str, pairs: &[(&str, &str)]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = endpoint.to_string();
    let owned: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let config = Config::from_lookup(move |key| {
        if key == "API_ENDPOINT" {
            return Some(endpoint.clone());
        }
        owned
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    });

    let spool = Arc::new(Spool::open(&dir.path().join("offline_attacks.json"), false).unwrap());
    let client = Arc::new(ReportClient::new(&config, spool).unwrap());
    let throttle = Arc::new(ThrottleCache::new(ThrottlePolicy {
        ttl: config.ip_cache_ttl,
        max_reports_per_ip: config.max_reports_per_ip,
        unique_types_only: config.report_unique_types_only,
    }));

    let (sink, events) = EventSink::channel(128);
    let (tx, shutdown) = watch::channel(false);
    let ctx = ListenerContext {
        config: Arc::new(config),
        sink: sink.clone(),
        trackers: Arc::new(Trackers::new(Duration::from_millis(500))),
        shutdown,
    };

    Harness {
        sink,
        events,
        ctx,
        client,
        throttle,
        _shutdown: tx,
        _dir: dir,
    }
}

impl Harness {
    /// Drain queued observations through classify → throttle → submit.
    async fn deliver_pending(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            let record = classify(&event);
            match self.throttle.admit(record.ip_address, record.attack_type) {
                Admission::Admit => {
                    let _ = self.client.submit(&record).await;
                }
                Admission::Suppress(_) => {
                    if self.ctx.config.store_throttled_attacks {
                        let _ = self.client.store_throttled(&record);
                    }
                }
            }
        }
    }
}

fn http_request(target: &str, peer: SocketAddr) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method("GET")
        .uri(target)
        .extension(honeypot_http::ConnMeta::new(peer))
        .body(axum::body::Body::empty())
        .unwrap()
}

// ── Scenarios ──────────────────────────────────────────────────

/// S1: a single SQL injection request is admitted; the identical repeat is
/// suppressed under unique-types-only.
#[tokio::test]
async fn http_sqli_single_shot_then_suppressed() {
    let (endpoint, backend) = spawn_backend().await;
    let mut h = harness(&endpoint, &[("REPORT_UNIQUE_TYPES_ONLY", "true")]);
    let app = honeypot_http::build_router(h.ctx.clone(), Protocol::Http, Router::new());

    let peer: SocketAddr = "1.2.3.4:55000".parse().unwrap();
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(http_request("/search?q=%27%20OR%201=1--", peer))
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }
    h.deliver_pending().await;

    let reports = backend.reports.lock().unwrap().clone();
    assert_eq!(reports.len(), 1, "duplicate kind must be suppressed");
    assert_eq!(reports[0]["attack_type"], "sqli_attempt");
    assert_eq!(reports[0]["category"], "injection");
    assert!(reports[0]["severity"].as_u64().unwrap() >= 4);
    assert_eq!(reports[0]["ip_address"], "1.2.3.4");
    assert_eq!(reports[0]["source"], "honeypot");
}

/// S2: three rapid SSH connects produce one scan observation each plus a
/// bruteforce admission from the rapid-connection rule.
#[tokio::test]
async fn ssh_rapid_connection_scan() {
    let (endpoint, backend) = spawn_backend().await;
    let mut h = harness(&endpoint, &[]);

    let peer: SocketAddr = "5.6.7.8:44000".parse().unwrap();
    for _ in 0..3 {
        let (client_io, server_io) = tokio::io::duplex(4096);
        drop(client_io);
        ssh::handle_session(h.ctx.clone(), server_io, peer).await;
    }
    h.deliver_pending().await;

    let types = backend.report_types();
    assert_eq!(types.iter().filter(|t| *t == "port_scan").count(), 3);
    assert_eq!(types.iter().filter(|t| *t == "ssh_bruteforce").count(), 1);
}

/// S3: an SMTP session fanning out recipients across domains reports as
/// mail_spam via the smtp_relay_attempt label.
#[tokio::test]
async fn smtp_relay_attempt_reports_mail_spam() {
    let (endpoint, backend) = spawn_backend().await;
    let mut h = harness(&endpoint, &[]);

    let peer: SocketAddr = "9.9.9.9:42000".parse().unwrap();
    let (mut client_io, server_io) = tokio::io::duplex(8192);
    let session = tokio::spawn(smtp::handle_session(h.ctx.clone(), server_io, peer));

    use tokio::io::AsyncWriteExt;
    let mut script = String::from("EHLO bulk.example\r\nMAIL FROM:<bulk@bulk.example>\r\n");
    for (i, domain) in ["a.com", "b.com", "c.com", "d.com", "a.com", "b.com"]
        .iter()
        .enumerate()
    {
        script.push_str(&format!("RCPT TO:<u{i}@{domain}>\r\n"));
    }
    script.push_str("QUIT\r\n");
    client_io.write_all(script.as_bytes()).await.unwrap();
    session.await.unwrap();
    drop(client_io);

    h.deliver_pending().await;

    let types = backend.report_types();
    assert!(types.contains(&"mail_spam".to_string()), "{types:?}");
}

/// S4: offline mode spools everything; a restart clears the spool.
#[tokio::test]
async fn offline_spool_cleared_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let spool_path = dir.path().join("offline_attacks.json");
    let config = Config::from_lookup(|key| match key {
        "OFFLINE_MODE" => Some("true".to_string()),
        _ => None,
    });

    {
        let spool = Arc::new(Spool::open(&spool_path, false).unwrap());
        let client = ReportClient::new(&config, spool).unwrap();
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            let record = classify(&ObservationEvent::new(
                ip.parse::<IpAddr>().unwrap(),
                1,
                Protocol::Http,
                "sql_injection",
                "offline test",
                vec![],
            ));
            client.submit(&record).await.unwrap();
        }
        assert_eq!(client.spool().entries().unwrap().len(), 3);
    }

    // Restart without offline mode: the spool is cleared by design.
    let spool = Spool::open(&spool_path, false).unwrap();
    assert!(spool.entries().unwrap().is_empty());
}

/// S5: a backend answering 403 to everything: every admitted record lands
/// pending in the spool, heartbeat failures accumulate, and the third
/// consecutive failure triggers one ping probe.
#[tokio::test]
async fn backend_403_loop_spools_and_probes() {
    let (endpoint, backend) = spawn_backend().await;
    backend.report_status.store(403, Ordering::SeqCst);
    backend.heartbeat_status.store(403, Ordering::SeqCst);

    let mut h = harness(&endpoint, &[]);

    for ip in ["10.2.0.1", "10.2.0.2"] {
        h.sink.emit(ObservationEvent::new(
            ip.parse::<IpAddr>().unwrap(),
            2,
            Protocol::Http,
            "sql_injection",
            "403 loop test",
            vec![],
        ));
    }
    h.deliver_pending().await;

    let entries = h.client.spool().entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.pending_upload));

    for _ in 0..3 {
        h.client.heartbeat_cycle().await;
    }
    assert_eq!(h.client.diagnostics().consecutive_failures(), 3);

    // The probe is fire-and-forget; give it a moment.
    for _ in 0..50 {
        if backend.ping_hits.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(backend.ping_hits.load(Ordering::SeqCst), 1);
}

/// S6: an unknown internal kind reports as the honeypot fallback.
#[tokio::test]
async fn unknown_kind_reports_as_honeypot() {
    let (endpoint, backend) = spawn_backend().await;
    let mut h = harness(&endpoint, &[]);

    h.sink.emit(ObservationEvent::new(
        "10.3.0.1".parse::<IpAddr>().unwrap(),
        3,
        Protocol::Ftp,
        "totally_unknown",
        "fallback test",
        vec![],
    ));
    h.deliver_pending().await;

    let reports = backend.reports.lock().unwrap().clone();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["attack_type"], "honeypot");
    assert_eq!(reports[0]["category"], "general");
    assert_eq!(reports[0]["severity"], 2);
}

/// Spool recovery after the backend comes back (continuation of S5).
#[tokio::test]
async fn spool_replays_after_recovery() {
    let (endpoint, backend) = spawn_backend().await;
    backend.report_status.store(500, Ordering::SeqCst);

    let mut h = harness(&endpoint, &[]);
    h.sink.emit(ObservationEvent::new(
        "10.4.0.1".parse::<IpAddr>().unwrap(),
        4,
        Protocol::Ssh,
        "ssh_scan",
        "replay test",
        vec![],
    ));
    h.deliver_pending().await;
    assert_eq!(h.client.spool().pending().unwrap().len(), 1);

    backend.report_status.store(200, Ordering::SeqCst);
    let stats = h.client.replay_spool().await.unwrap();
    assert_eq!(stats.uploaded, 1);
    assert!(h.client.spool().entries().unwrap().is_empty());

    let types = backend.report_types();
    assert_eq!(types.iter().filter(|t| *t == "port_scan").count(), 2);
}
