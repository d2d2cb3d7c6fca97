//! IMAP listener.
//!
//! Tagged command loop with CAPABILITY, LOGIN, and AUTHENTICATE PLAIN.
//! Every login fails after the delay; mailbox commands answer NO until a
//! login that never succeeds.

use std::net::SocketAddr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;

use snare_core::Protocol;

use crate::serve::{
    self, AUTH_FAILURE_DELAY, ListenerContext, ListenerError, SessionMeter, read_line_capped,
};

const GREETING: &str = "* OK IMAP4rev1 Service Ready\r\n";
const LINE_CAP: usize = 1024;

pub async fn start(ctx: ListenerContext, port: u16) -> Result<JoinHandle<()>, ListenerError> {
    let listener = serve::bind(port).await?;
    let shutdown = ctx.shutdown.clone();
    Ok(serve::spawn_accept_loop(
        "imap",
        listener,
        shutdown,
        move |stream: TcpStream, peer| {
            let ctx = ctx.clone();
            async move {
                handle_session(ctx, stream, peer).await;
            }
        },
    ))
}

pub async fn handle_session<S>(ctx: ListenerContext, stream: S, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ctx.on_accept(Protocol::Imap, peer);
    let mut meter = SessionMeter::start();

    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    if writer.write_all(GREETING.as_bytes()).await.is_ok() {
        while let Some(line) = read_line_capped(&mut reader, LINE_CAP).await {
            let Some((tag, command, rest)) = split_tagged(&line) else {
                if writer.write_all(b"* BAD Missing tag\r\n").await.is_err() {
                    break;
                }
                continue;
            };

            let reply: String = match command.as_str() {
                "CAPABILITY" => format!(
                    "* CAPABILITY IMAP4rev1 AUTH=PLAIN AUTH=LOGIN\r\n{tag} OK CAPABILITY completed\r\n"
                ),
                "LOGIN" => {
                    meter.mark_meaningful();
                    let username = rest.split_whitespace().next().map(unquote);
                    tokio::time::sleep(AUTH_FAILURE_DELAY).await;
                    ctx.on_auth_failure(Protocol::Imap, peer, username.as_deref());
                    format!("{tag} NO [AUTHENTICATIONFAILED] Authentication failed\r\n")
                }
                "AUTHENTICATE" => {
                    meter.mark_meaningful();
                    let mechanism = rest.split_whitespace().next().unwrap_or("").to_uppercase();
                    if mechanism != "PLAIN" {
                        format!("{tag} NO Unsupported authentication mechanism\r\n")
                    } else {
                        if writer.write_all(b"+ \r\n").await.is_err() {
                            break;
                        }
                        let payload = read_line_capped(&mut reader, LINE_CAP)
                            .await
                            .unwrap_or_default();
                        let username = decode_plain_username(&payload);
                        tokio::time::sleep(AUTH_FAILURE_DELAY).await;
                        ctx.on_auth_failure(Protocol::Imap, peer, username.as_deref());
                        format!("{tag} NO [AUTHENTICATIONFAILED] Authentication failed\r\n")
                    }
                }
                "NOOP" => format!("{tag} OK NOOP completed\r\n"),
                "LIST" | "SELECT" | "EXAMINE" | "FETCH" | "STATUS" => {
                    format!("{tag} NO Not authenticated\r\n")
                }
                "LOGOUT" => {
                    let _ = writer
                        .write_all(
                            format!("* BYE Logging out\r\n{tag} OK LOGOUT completed\r\n")
                                .as_bytes(),
                        )
                        .await;
                    break;
                }
                _ => format!("{tag} BAD Unknown command\r\n"),
            };
            if writer.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    }

    debug!(connection = meter.connection_id, %peer, "imap session closed");
    ctx.on_close(Protocol::Imap, peer, &meter);
}

/// Split `tag COMMAND rest`. IMAP requires the tag on every command.
fn split_tagged(line: &str) -> Option<(String, String, String)> {
    let mut parts = line.splitn(3, ' ');
    let tag = parts.next().filter(|t| !t.is_empty())?.to_string();
    let command = parts.next()?.to_uppercase();
    let rest = parts.next().unwrap_or("").trim().to_string();
    Some((tag, command, rest))
}

fn unquote(value: &str) -> String {
    value.trim_matches('"').to_string()
}

/// Extract the username from a SASL PLAIN payload (`\0user\0pass`).
fn decode_plain_username(payload: &str) -> Option<String> {
    let decoded = BASE64.decode(payload.trim()).ok()?;
    let text = String::from_utf8_lossy(&decoded);
    let mut parts = text.split('\0');
    parts.next(); // authorization identity
    parts.next().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::sync::watch;

    use snare_core::{Config, EventSink, ObservationEvent};

    use crate::serve::Trackers;

    fn test_context() -> (
        ListenerContext,
        tokio::sync::mpsc::Receiver<ObservationEvent>,
        watch::Sender<bool>,
    ) {
        let (sink, rx) = EventSink::channel(32);
        let (tx, shutdown) = watch::channel(false);
        let ctx = ListenerContext {
            config: Arc::new(Config::from_lookup(|_| None)),
            sink,
            trackers: Arc::new(Trackers::new(Duration::from_millis(500))),
            shutdown,
        };
        (ctx, rx, tx)
    }

    fn peer(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::from([203, 0, 113, last]), 40100)
    }

    async fn read_available(client: &mut tokio::io::DuplexStream) -> String {
        let mut buf = vec![0u8; 4096];
        let n = client.read(&mut buf).await.unwrap_or(0);
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[test]
    fn tagged_split_parses_forms() {
        assert_eq!(
            split_tagged("a1 LOGIN user pass"),
            Some(("a1".into(), "LOGIN".into(), "user pass".into()))
        );
        assert_eq!(
            split_tagged("a2 NOOP"),
            Some(("a2".into(), "NOOP".into(), "".into()))
        );
        assert!(split_tagged("").is_none());
    }

    #[test]
    fn plain_payload_username() {
        let payload = BASE64.encode(b"\0admin\0secret");
        assert_eq!(decode_plain_username(&payload).as_deref(), Some("admin"));
        assert!(decode_plain_username("not-base64!").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn login_fails_with_tagged_no() {
        let (ctx, _rx, _shutdown) = test_context();
        let (mut client, server) = tokio::io::duplex(4096);
        let session = tokio::spawn(handle_session(ctx, server, peer(1)));

        assert!(read_available(&mut client).await.starts_with("* OK"));
        client
            .write_all(b"a1 LOGIN \"admin\" \"secret\"\r\n")
            .await
            .unwrap();
        let reply = read_available(&mut client).await;
        assert!(reply.starts_with("a1 NO [AUTHENTICATIONFAILED]"), "{reply}");

        client.write_all(b"a2 LOGOUT\r\n").await.unwrap();
        let reply = read_available(&mut client).await;
        assert!(reply.contains("* BYE"));
        drop(client);
        session.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_logins_emit_bruteforce() {
        let (ctx, mut rx, _shutdown) = test_context();
        let (mut client, server) = tokio::io::duplex(4096);
        let session = tokio::spawn(handle_session(ctx, server, peer(2)));

        client
            .write_all(b"a1 LOGIN root x\r\na2 LOGIN admin x\r\na3 LOGIN backup x\r\n")
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("bruteforce event emitted")
            .unwrap();
        assert_eq!(event.kind, "imap_bruteforce");
        assert!(event.evidence[0].contains("backup"));

        drop(client);
        session.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn capability_lists_auth_mechanisms() {
        let (ctx, _rx, _shutdown) = test_context();
        let (mut client, server) = tokio::io::duplex(4096);
        let session = tokio::spawn(handle_session(ctx, server, peer(3)));

        read_available(&mut client).await;
        client.write_all(b"c1 CAPABILITY\r\n").await.unwrap();
        let reply = read_available(&mut client).await;
        assert!(reply.contains("AUTH=PLAIN"));
        assert!(reply.contains("c1 OK"));
        drop(client);
        session.await.unwrap();
    }

    #[tokio::test]
    async fn instant_disconnect_emits_scan() {
        let (ctx, mut rx, _shutdown) = test_context();
        let (client, server) = tokio::io::duplex(4096);
        drop(client);
        handle_session(ctx, server, peer(4)).await;
        assert_eq!(rx.recv().await.unwrap().kind, "imap_scan");
    }
}
