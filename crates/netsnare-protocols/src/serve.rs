//! Shared listener plumbing.
//!
//! Binding, the accept loop, per-connection task spawning, and the
//! protocol-independent detection hooks every listener calls: rapid
//! connection tracking on accept, bruteforce tracking on failed auth, and
//! the close-time scan rule.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use netsnare_detect::{BruteforceTracker, RapidConnectionTracker, ScanRule};
use snare_core::{Config, EventSink, ObservationEvent, Protocol};

/// Every failed authentication answers after this delay, making
/// enumeration expensive.
pub const AUTH_FAILURE_DELAY: Duration = Duration::from_secs(1);

static CONNECTION_IDS: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection id for log correlation.
pub fn next_connection_id() -> u64 {
    CONNECTION_IDS.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// The per-protocol trackers a listener consults.
pub struct Trackers {
    pub auth: BruteforceTracker,
    pub rapid: RapidConnectionTracker,
    pub scan: ScanRule,
}

impl Trackers {
    pub fn new(scan_duration: Duration) -> Self {
        Self {
            auth: BruteforceTracker::new(),
            rapid: RapidConnectionTracker::new(),
            scan: ScanRule::new(scan_duration),
        }
    }
}

/// Everything a listener needs besides its socket.
#[derive(Clone)]
pub struct ListenerContext {
    pub config: Arc<Config>,
    pub sink: EventSink,
    pub trackers: Arc<Trackers>,
    pub shutdown: watch::Receiver<bool>,
}

impl ListenerContext {
    /// Accept-time hook: feeds the rapid-connection tracker and emits the
    /// `{proto}_bruteforce_scan` observation when it fires.
    pub fn on_accept(&self, protocol: Protocol, peer: SocketAddr) {
        if let Some(report) = self.trackers.rapid.record_connection(peer.ip()) {
            let mut event = ObservationEvent::new(
                peer.ip(),
                peer.port(),
                protocol,
                protocol.bruteforce_scan_kind(),
                format!("{} rapid connections from one source", report.connections),
                vec![],
            );
            event.push_fact(&serde_json::json!({
                "connections": report.connections,
                "window_seconds": 60,
            }));
            self.sink.emit(event);
        }
    }

    /// Failed-auth hook: feeds the bruteforce tracker and emits the
    /// `{proto}_bruteforce` observation when the threshold rule fires.
    pub fn on_auth_failure(&self, protocol: Protocol, peer: SocketAddr, username: Option<&str>) {
        if let Some(report) = self.trackers.auth.record_attempt(peer.ip(), username) {
            let mut event = ObservationEvent::new(
                peer.ip(),
                peer.port(),
                protocol,
                protocol.bruteforce_kind(),
                format!("{} failed authentication attempts", report.attempts),
                vec![],
            );
            event.push_fact(&serde_json::json!({
                "attempts": report.attempts,
                "usernames": report.usernames,
            }));
            self.sink.emit(event);
        }
    }

    /// Close-time hook: applies the scan rule and emits `{proto}_scan`.
    pub fn on_close(&self, protocol: Protocol, peer: SocketAddr, meter: &SessionMeter) {
        let duration = meter.elapsed();
        if self.trackers.scan.is_scan(duration, meter.meaningful_commands()) {
            let mut event = ObservationEvent::new(
                peer.ip(),
                peer.port(),
                protocol,
                protocol.scan_kind(),
                format!(
                    "connection closed after {} ms with no meaningful activity",
                    duration.as_millis()
                ),
                vec![],
            );
            event.push_fact(&serde_json::json!({
                "duration_ms": duration.as_millis() as u64,
                "commands": meter.meaningful_commands(),
            }));
            self.sink.emit(event);
        }
    }
}

/// Minimal per-session bookkeeping shared by all listeners.
#[derive(Debug)]
pub struct SessionMeter {
    pub connection_id: u64,
    started: Instant,
    meaningful: u32,
}

impl SessionMeter {
    pub fn start() -> Self {
        Self {
            connection_id: next_connection_id(),
            started: Instant::now(),
            meaningful: 0,
        }
    }

    /// Count a command that a scanner would not send.
    pub fn mark_meaningful(&mut self) {
        self.meaningful += 1;
    }

    /// Bulk-add meaningful activity counted elsewhere (HTTP requests).
    pub fn add_meaningful(&mut self, count: u32) {
        self.meaningful += count;
    }

    pub fn meaningful_commands(&self) -> u32 {
        self.meaningful
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Bind a listener port, mapping failures for module status reporting.
pub async fn bind(port: u16) -> Result<TcpListener, ListenerError> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|source| ListenerError::Bind { port, source })
}

/// Run an accept loop until shutdown, spawning one task per connection.
///
/// The handler owns its session state exclusively; a panic or error in one
/// session never touches another.
pub fn spawn_accept_loop<F, Fut>(
    name: &'static str,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    handler: F,
) -> JoinHandle<()>
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(listener = name, "accept loop started");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(listener = name, %peer, "connection accepted");
                            let session = handler(stream, peer);
                            tokio::spawn(async move {
                                session.await;
                            });
                        }
                        Err(e) => {
                            warn!(listener = name, error = %e, "accept failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!(listener = name, "accept loop shutting down");
                    break;
                }
            }
        }
    })
}

/// Read one CRLF/LF-terminated line with a hard length cap, for the
/// line-based protocols. Returns `None` on EOF, read error, or when the
/// peer floods the buffer without a newline.
pub async fn read_line_capped<R>(reader: &mut R, cap: usize) -> Option<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    use tokio::io::AsyncBufReadExt;

    let mut buf: Vec<u8> = Vec::new();
    loop {
        let available = match reader.fill_buf().await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "line read failed");
                return None;
            }
        };
        if available.is_empty() {
            // EOF. A partial trailing line still counts.
            if buf.is_empty() {
                return None;
            }
            return Some(finish_line(buf));
        }

        if let Some(newline) = available.iter().position(|&b| b == b'\n') {
            buf.extend_from_slice(&available[..newline]);
            reader.consume(newline + 1);
            if buf.len() > cap {
                debug!(bytes = buf.len(), "oversized line dropped");
                return None;
            }
            return Some(finish_line(buf));
        }

        buf.extend_from_slice(available);
        let consumed = available.len();
        reader.consume(consumed);
        if buf.len() > cap {
            debug!(bytes = buf.len(), "oversized line dropped");
            return None;
        }
    }
}

fn finish_line(buf: Vec<u8>) -> String {
    String::from_utf8_lossy(&buf)
        .trim_end_matches('\r')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use snare_core::EventSink;
    use std::net::IpAddr;

    fn test_context() -> (
        ListenerContext,
        tokio::sync::mpsc::Receiver<ObservationEvent>,
        watch::Sender<bool>,
    ) {
        let (sink, rx) = EventSink::channel(32);
        let (tx, shutdown) = watch::channel(false);
        let config = Arc::new(Config::from_lookup(|_| None));
        let ctx = ListenerContext {
            config,
            sink,
            trackers: Arc::new(Trackers::new(Duration::from_millis(500))),
            shutdown,
        };
        (ctx, rx, tx)
    }

    fn peer(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::from([203, 0, 113, last]), 50000)
    }

    #[tokio::test]
    async fn third_accept_emits_bruteforce_scan() {
        let (ctx, mut rx, _shutdown) = test_context();
        for _ in 0..3 {
            ctx.on_accept(Protocol::Ssh, peer(1));
        }
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, "ssh_bruteforce_scan");
        assert_eq!(event.source_addr, peer(1).ip());
    }

    #[tokio::test]
    async fn third_auth_failure_emits_bruteforce() {
        let (ctx, mut rx, _shutdown) = test_context();
        ctx.on_auth_failure(Protocol::Ftp, peer(2), Some("root"));
        ctx.on_auth_failure(Protocol::Ftp, peer(2), Some("admin"));
        ctx.on_auth_failure(Protocol::Ftp, peer(2), Some("root"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, "ftp_bruteforce");
        assert!(event.evidence[0].contains("admin"));
    }

    #[tokio::test]
    async fn fast_idle_close_emits_scan() {
        let (ctx, mut rx, _shutdown) = test_context();
        let meter = SessionMeter::start();
        ctx.on_close(Protocol::Pop3, peer(3), &meter);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, "pop3_scan");
    }

    #[tokio::test]
    async fn busy_session_close_is_silent() {
        let (ctx, mut rx, _shutdown) = test_context();
        let mut meter = SessionMeter::start();
        meter.mark_meaningful();
        meter.mark_meaningful();
        ctx.on_close(Protocol::Pop3, peer(4), &meter);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bind_reports_port_in_error() {
        // Bind twice on the same port: the second must fail.
        let first = bind(0).await.unwrap();
        let port = first.local_addr().unwrap().port();
        let err = bind(port).await.unwrap_err();
        assert!(err.to_string().contains(&port.to_string()));
    }

    #[tokio::test]
    async fn read_line_capped_strips_terminators() {
        let data: &[u8] = b"USER admin\r\nQUIT\r\n";
        let mut reader = tokio::io::BufReader::new(data);
        assert_eq!(read_line_capped(&mut reader, 512).await.unwrap(), "USER admin");
        assert_eq!(read_line_capped(&mut reader, 512).await.unwrap(), "QUIT");
        assert!(read_line_capped(&mut reader, 512).await.is_none());
    }

    #[tokio::test]
    async fn read_line_capped_rejects_floods() {
        let long = vec![b'a'; 2048];
        let mut reader = tokio::io::BufReader::new(long.as_slice());
        assert!(read_line_capped(&mut reader, 512).await.is_none());
    }

    #[tokio::test]
    async fn connection_ids_are_unique() {
        let a = next_connection_id();
        let b = next_connection_id();
        assert_ne!(a, b);
    }
}
