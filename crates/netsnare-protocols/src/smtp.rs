//! SMTP listener, shared by port 25 and the submission port.
//!
//! Accepts the full envelope dance so harvesting, relay, and spam behavior
//! has room to show itself; the close-time rules in `netsnare-detect` then
//! decide what the session amounted to. AUTH always fails after the delay.

use std::net::SocketAddr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;

use netsnare_detect::mail::{SmtpSessionStats, evaluate_close};
use snare_core::{ObservationEvent, Protocol};

use crate::serve::{
    self, AUTH_FAILURE_DELAY, ListenerContext, ListenerError, SessionMeter, read_line_capped,
};

const GREETING: &str = "220 mx1.corp.example ESMTP Postfix\r\n";
const LINE_CAP: usize = 1024;

/// DATA bodies are kept up to this many bytes for the spam heuristics.
const DATA_CAP: usize = 64 * 1024;

pub async fn start(
    ctx: ListenerContext,
    port: u16,
    name: &'static str,
) -> Result<JoinHandle<()>, ListenerError> {
    let listener = serve::bind(port).await?;
    let shutdown = ctx.shutdown.clone();
    Ok(serve::spawn_accept_loop(
        name,
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
    ctx.on_accept(Protocol::Smtp, peer);
    let mut meter = SessionMeter::start();
    let mut stats = SmtpSessionStats::default();

    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    if writer.write_all(GREETING.as_bytes()).await.is_ok() {
        let mut mail_from: Option<String> = None;

        while let Some(line) = read_line_capped(&mut reader, LINE_CAP).await {
            let (command, argument) = split_command(&line);
            let reply: String = match command.as_str() {
                "EHLO" => {
                    meter.mark_meaningful();
                    "250-mx1.corp.example\r\n250-SIZE 10240000\r\n250-VRFY\r\n250-AUTH LOGIN PLAIN\r\n250 8BITMIME\r\n".into()
                }
                "HELO" => {
                    meter.mark_meaningful();
                    "250 mx1.corp.example\r\n".into()
                }
                "MAIL" => {
                    meter.mark_meaningful();
                    mail_from = Some(extract_address(argument));
                    "250 2.1.0 Ok\r\n".into()
                }
                "RCPT" => {
                    meter.mark_meaningful();
                    stats.record_rcpt(&extract_address(argument));
                    "250 2.1.5 Ok\r\n".into()
                }
                "VRFY" | "EXPN" => {
                    stats.vrfy_expn_count += 1;
                    "252 2.0.0 Cannot VRFY user, but will accept message\r\n".into()
                }
                "DATA" => {
                    if stats.rcpt_count == 0 {
                        "503 5.5.1 Error: need RCPT command\r\n".into()
                    } else {
                        if writer
                            .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                            .await
                            .is_err()
                        {
                            break;
                        }
                        stats.data_body = Some(read_data_body(&mut reader).await);
                        "250 2.0.0 Ok: queued\r\n".into()
                    }
                }
                "AUTH" => {
                    meter.mark_meaningful();
                    match handle_auth(&ctx, &mut reader, &mut writer, peer, argument).await {
                        Some(reply) => reply,
                        None => break,
                    }
                }
                "RSET" => {
                    mail_from = None;
                    "250 2.0.0 Ok\r\n".into()
                }
                "NOOP" => "250 2.0.0 Ok\r\n".into(),
                "QUIT" => {
                    let _ = writer.write_all(b"221 2.0.0 Bye\r\n").await;
                    break;
                }
                _ => "500 5.5.2 Error: command not recognized\r\n".into(),
            };
            if writer.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }

        let _ = mail_from; // Envelope sender only matters within the session.
    }

    for finding in evaluate_close(&stats) {
        let mut event = ObservationEvent::new(
            peer.ip(),
            peer.port(),
            Protocol::Smtp,
            finding.kind,
            finding.description,
            vec![],
        );
        event.push_fact(&finding.facts);
        ctx.sink.emit(event);
    }

    debug!(connection = meter.connection_id, %peer, "smtp session closed");
    ctx.on_close(Protocol::Smtp, peer, &meter);
}

/// AUTH LOGIN and AUTH PLAIN, both delayed and both failing.
///
/// Returns `None` when the control connection died mid-exchange.
async fn handle_auth<R, W>(
    ctx: &ListenerContext,
    reader: &mut R,
    writer: &mut W,
    peer: SocketAddr,
    argument: &str,
) -> Option<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut parts = argument.split_whitespace();
    let mechanism = parts.next().unwrap_or("").to_uppercase();
    let initial = parts.next();

    let username = match mechanism.as_str() {
        "LOGIN" => {
            if writer.write_all(b"334 VXNlcm5hbWU6\r\n").await.is_err() {
                return None;
            }
            let user_b64 = read_line_capped(reader, LINE_CAP).await?;
            if writer.write_all(b"334 UGFzc3dvcmQ6\r\n").await.is_err() {
                return None;
            }
            let _password = read_line_capped(reader, LINE_CAP).await?;
            decode_base64(&user_b64)
        }
        "PLAIN" => {
            let payload = match initial {
                Some(p) => p.to_string(),
                None => {
                    if writer.write_all(b"334 \r\n").await.is_err() {
                        return None;
                    }
                    read_line_capped(reader, LINE_CAP).await?
                }
            };
            decode_plain_username(&payload)
        }
        _ => return Some("504 5.7.4 Unrecognized authentication type\r\n".into()),
    };

    tokio::time::sleep(AUTH_FAILURE_DELAY).await;
    ctx.on_auth_failure(Protocol::Smtp, peer, username.as_deref());
    Some("535 5.7.8 Error: authentication failed\r\n".into())
}

/// Read the DATA body until the dot terminator, keeping at most
/// [`DATA_CAP`] bytes.
async fn read_data_body<R>(reader: &mut R) -> String
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut body = String::new();
    while let Some(line) = read_line_capped(reader, LINE_CAP).await {
        if line == "." {
            break;
        }
        if body.len() < DATA_CAP {
            // Transparency: a leading dot is doubled on the wire.
            let line = line.strip_prefix('.').unwrap_or(&line);
            body.push_str(line);
            body.push('\n');
        }
    }
    body
}

/// Pull the address out of `FROM:<a@b>` / `TO:<a@b>` arguments.
fn extract_address(argument: &str) -> String {
    let after_colon = argument.split_once(':').map(|(_, a)| a).unwrap_or(argument);
    after_colon
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

fn decode_base64(payload: &str) -> Option<String> {
    let decoded = BASE64.decode(payload.trim()).ok()?;
    Some(String::from_utf8_lossy(&decoded).into_owned())
}

/// Username from a SASL PLAIN payload (`authzid\0user\0pass`).
fn decode_plain_username(payload: &str) -> Option<String> {
    let decoded = BASE64.decode(payload.trim()).ok()?;
    let text = String::from_utf8_lossy(&decoded).into_owned();
    let mut parts = text.split('\0');
    parts.next();
    parts.next().map(str::to_string)
}

fn split_command(line: &str) -> (String, &str) {
    match line.split_once(' ') {
        Some((cmd, rest)) => (cmd.to_uppercase(), rest.trim()),
        None => (line.to_uppercase(), ""),
    }
}
