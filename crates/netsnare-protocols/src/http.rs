//! HTTP and HTTPS listeners.
//!
//! An axum app of lure pages and fake logins behind a detection layer.
//! Every request outside the diagnostics surface runs through the content
//! rules; unmatched paths land in a 404 handler that tracks wordlist
//! scans. The same router serves both plain TCP and the TLS acceptor, so
//! each connection is handled by a manual hyper loop that stamps the peer
//! address into request extensions.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Form, Router};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use netsnare_detect::RequestRateTracker;
use netsnare_detect::patterns::{HttpInspector, wordlist_path_pattern};
use snare_core::{ObservationEvent, Protocol};

use crate::serve::{
    self, AUTH_FAILURE_DELAY, ListenerContext, ListenerError, SessionMeter,
};
use crate::tls::TlsMaterial;

/// 404s from one source before the excessive-404 rule fires.
const NOTFOUND_THRESHOLD: u32 = 12;
const NOTFOUND_WINDOW: Duration = Duration::from_secs(600);

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Acme Corp — Intranet Portal</title></head>
<body>
<h1>Acme Corp Intranet</h1>
<p>Welcome to the internal portal. Please <a href="/login">sign in</a> to continue.</p>
<p><small>For IT support contact helpdesk@acme.example</small></p>
</body></html>
"#;

const LOGIN_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Sign in</title></head>
<body>
<h2>Sign in</h2>
<form method="post">
<label>Username <input name="username"></label><br>
<label>Password <input name="password" type="password"></label><br>
<button type="submit">Sign in</button>
</form>
</body></html>
"#;

const LOGIN_FAILED_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Sign in</title></head>
<body><h2>Sign in</h2><p>Invalid username or password.</p></body></html>
"#;

const NOT_FOUND_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>404 Not Found</title></head>
<body><h1>Not Found</h1><p>The requested URL was not found on this server.</p></body></html>
"#;

const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /admin\nDisallow: /backup\nDisallow: /wp-admin\n";

/// Per-connection metadata stamped into every request on that connection.
#[derive(Clone)]
pub struct ConnMeta {
    pub peer: SocketAddr,
    requests: Arc<AtomicU32>,
}

impl ConnMeta {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            requests: Arc::new(AtomicU32::new(0)),
        }
    }

    fn count_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn requests(&self) -> u32 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Shared state for the honeypot app.
#[derive(Clone)]
pub struct HttpState {
    ctx: ListenerContext,
    protocol: Protocol,
    inspector: Arc<HttpInspector>,
    notfound: Arc<NotFoundTracker>,
    rate: Arc<RequestRateTracker>,
}

/// Build the honeypot router; `extra` carries the diagnostics surface and
/// bypasses the detection layer entirely.
pub fn build_router(ctx: ListenerContext, protocol: Protocol, extra: Router) -> Router {
    let state = HttpState {
        ctx,
        protocol,
        inspector: Arc::new(HttpInspector::new()),
        notfound: Arc::new(NotFoundTracker::new(NOTFOUND_THRESHOLD, NOTFOUND_WINDOW)),
        rate: Arc::new(RequestRateTracker::new()),
    };

    Router::new()
        .route("/", get(index))
        .route("/robots.txt", get(robots))
        .route("/admin", get(login_page).post(login_submit))
        .route("/login", get(login_page).post(login_submit))
        .route("/wp-login.php", get(login_page).post(login_submit))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), detect_requests))
        .with_state(state)
        .merge(extra)
}

/// Bind and serve plain HTTP.
pub async fn start(
    ctx: ListenerContext,
    port: u16,
    extra: Router,
) -> Result<JoinHandle<()>, ListenerError> {
    let listener = serve::bind(port).await?;
    let app = build_router(ctx.clone(), Protocol::Http, extra);
    Ok(spawn_serve_loop("http", listener, app, None, ctx, Protocol::Http))
}

/// Bind and serve HTTPS with the persisted certificate.
pub async fn start_tls(
    ctx: ListenerContext,
    port: u16,
    extra: Router,
    material: TlsMaterial,
) -> Result<JoinHandle<()>, ListenerError> {
    let listener = serve::bind(port).await?;
    let app = build_router(ctx.clone(), Protocol::Https, extra);
    Ok(spawn_serve_loop(
        "https",
        listener,
        app,
        Some(material.acceptor),
        ctx,
        Protocol::Https,
    ))
}

/// Manual accept loop: per connection, stamp [`ConnMeta`], optionally wrap
/// in TLS, and drive the router over hyper.
fn spawn_serve_loop(
    name: &'static str,
    listener: tokio::net::TcpListener,
    app: Router,
    tls: Option<TlsAcceptor>,
    ctx: ListenerContext,
    protocol: Protocol,
) -> JoinHandle<()> {
    let shutdown = ctx.shutdown.clone();
    serve::spawn_accept_loop(name, listener, shutdown, move |stream: TcpStream, peer| {
        let app = app.clone();
        let tls = tls.clone();
        let ctx = ctx.clone();
        async move {
            ctx.on_accept(protocol, peer);
            let mut meter = SessionMeter::start();
            let meta = ConnMeta::new(peer);
            let svc = TowerToHyperService::new(app.layer(Extension(meta.clone())));

            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(tls_stream), svc)
                            .await
                        {
                            debug!(%peer, error = %e, "https connection ended with error");
                        }
                    }
                    Err(e) => {
                        debug!(%peer, error = %e, "tls handshake failed");
                    }
                },
                None => {
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await
                    {
                        debug!(%peer, error = %e, "http connection ended with error");
                    }
                }
            }

            meter.add_meaningful(meta.requests());
            ctx.on_close(protocol, peer, &meter);
        }
    })
}

// ── Detection layer ────────────────────────────────────────────

/// Inspect every non-system request against the content rules.
async fn detect_requests(
    State(state): State<HttpState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let meta = request.extensions().get::<ConnMeta>().cloned();

    if let Some(meta) = &meta {
        if !state.inspector.is_system_path(&path) {
            meta.count_request();

            if let Some(requests) = state.rate.record_request(meta.peer.ip()) {
                let mut event = ObservationEvent::new(
                    meta.peer.ip(),
                    meta.peer.port(),
                    state.protocol,
                    "http_flood",
                    format!("{requests} requests inside one minute"),
                    vec![],
                );
                event.push_fact(&serde_json::json!({ "frequency": requests }));
                state.ctx.sink.emit(event);
            }

            let target = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or(path.clone());
            let user_agent = request
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            if let Some(label) = state.inspector.inspect(&target, &user_agent, "") {
                let mut event = ObservationEvent::new(
                    meta.peer.ip(),
                    meta.peer.port(),
                    state.protocol,
                    label.internal_kind(),
                    label.description(),
                    vec![],
                );
                event.push_fact(&serde_json::json!({
                    "method": request.method().as_str(),
                    "target": target,
                    "user_agent": user_agent,
                }));
                state.ctx.sink.emit(event);
            }
        }
    }

    next.run(request).await
}

// ── Handlers ───────────────────────────────────────────────────

async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

async fn robots() -> &'static str {
    ROBOTS_TXT
}

async fn login_page() -> Html<&'static str> {
    Html(LOGIN_PAGE)
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// Harvest the credentials, fail after the delay, feed the bruteforce
/// tracker. Every submission is an observation; the throttle decides how
/// many get reported.
async fn login_submit(
    State(state): State<HttpState>,
    meta: Option<Extension<ConnMeta>>,
    Form(form): Form<LoginForm>,
) -> Response {
    tokio::time::sleep(AUTH_FAILURE_DELAY).await;

    if let Some(Extension(meta)) = meta {
        let mut event = ObservationEvent::new(
            meta.peer.ip(),
            meta.peer.port(),
            state.protocol,
            "login_attempt",
            "credentials submitted to fake login",
            vec![],
        );
        event.push_fact(&serde_json::json!({
            "username": form.username,
            "password": form.password,
        }));
        state.ctx.sink.emit(event);

        state
            .ctx
            .on_auth_failure(state.protocol, meta.peer, Some(&form.username));
    }

    (StatusCode::UNAUTHORIZED, Html(LOGIN_FAILED_PAGE)).into_response()
}

/// 404 fallback with excessive-404 tracking. System paths are excluded.
async fn not_found(
    State(state): State<HttpState>,
    meta: Option<Extension<ConnMeta>>,
    request: Request,
) -> Response {
    let path = request.uri().path().to_string();

    if let Some(Extension(meta)) = meta {
        if !state.inspector.is_system_path(&path) {
            if let Some(count) = state.notfound.record(meta.peer.ip()) {
                let mut event = ObservationEvent::new(
                    meta.peer.ip(),
                    meta.peer.port(),
                    state.protocol,
                    "excessive_404",
                    format!("{count} missing paths requested in the window"),
                    vec![],
                );
                event.push_fact(&serde_json::json!({
                    "count": count,
                    "last_path": path,
                    "wordlist_style": wordlist_path_pattern().is_match(&path),
                }));
                state.ctx.sink.emit(event);
            }
        }
    }

    (StatusCode::NOT_FOUND, Html(NOT_FOUND_PAGE)).into_response()
}

// ── Excessive-404 tracking ─────────────────────────────────────

struct NotFoundEntry {
    count: u32,
    window_start: Instant,
    reported: bool,
}

/// Counts missing-path requests per source inside a rolling window.
pub struct NotFoundTracker {
    entries: Mutex<HashMap<IpAddr, NotFoundEntry>>,
    threshold: u32,
    window: Duration,
}

impl NotFoundTracker {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            threshold,
            window,
        }
    }

    /// Record a 404. Returns the count when the threshold is first crossed
    /// within the current window.
    pub fn record(&self, addr: IpAddr) -> Option<u32> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("notfound tracker lock");
        let entry = entries.entry(addr).or_insert(NotFoundEntry {
            count: 0,
            window_start: now,
            reported: false,
        });

        if now.duration_since(entry.window_start) > self.window {
            entry.count = 0;
            entry.window_start = now;
            entry.reported = false;
        }
        entry.count += 1;

        if entry.count >= self.threshold && !entry.reported {
            entry.reported = true;
            Some(entry.count)
        } else {
            None
        }
    }
}
