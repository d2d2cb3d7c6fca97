//! SSH listener.
//!
//! Speaks the cleartext prefix of the SSH transport: version exchange and
//! KEXINIT. Key exchange is never completed, so no channel can ever
//! authenticate; the client banner and the decision to start kex are the
//! signals. A 5-second timer catches banner-grab scanners: it fires a
//! `port_scan` observation unless the client engages first or the
//! connection closes, and cancellation cannot race the session because the
//! timer lives inside the session's own select loop.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;

use snare_core::{ObservationEvent, Protocol};

use crate::serve::{self, ListenerContext, ListenerError, SessionMeter};

const BANNER: &str = "SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.10\r\n";

/// Scanners that never start kex get reported after this long.
const SCAN_TIMER: Duration = Duration::from_secs(5);

/// RFC 4253 maximum packet size we accept pre-kex.
const MAX_PACKET: usize = 35_000;

/// Total bytes a client may send before we give up on it.
const SESSION_READ_CAP: usize = 64 * 1024;

const MSG_KEXINIT: u8 = 20;

pub async fn start(ctx: ListenerContext, port: u16) -> Result<JoinHandle<()>, ListenerError> {
    let listener = serve::bind(port).await?;
    let shutdown = ctx.shutdown.clone();
    Ok(serve::spawn_accept_loop(
        "ssh",
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

pub async fn handle_session<S>(ctx: ListenerContext, mut stream: S, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ctx.on_accept(Protocol::Ssh, peer);
    let mut meter = SessionMeter::start();

    if stream.write_all(BANNER.as_bytes()).await.is_err() {
        ctx.on_close(Protocol::Ssh, peer, &meter);
        return;
    }

    let scan_timer = tokio::time::sleep(SCAN_TIMER);
    tokio::pin!(scan_timer);
    let mut timer_armed = true;

    let mut acc: Vec<u8> = Vec::new();
    let mut buf = [0u8; 2048];
    let mut client_banner: Option<String> = None;
    let mut engaged = false;
    let mut total_read = 0usize;

    'session: loop {
        tokio::select! {
            _ = &mut scan_timer, if timer_armed => {
                timer_armed = false;
                let mut event = ObservationEvent::new(
                    peer.ip(),
                    peer.port(),
                    Protocol::Ssh,
                    "port_scan",
                    "no authentication activity within 5s of connect",
                    vec![],
                );
                event.push_fact(&serde_json::json!({
                    "client_banner": client_banner,
                    "bytes_received": total_read,
                }));
                ctx.sink.emit(event);
            }
            read = stream.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => break 'session,
                    Ok(n) => n,
                };
                total_read += n;
                if total_read > SESSION_READ_CAP {
                    debug!(%peer, total_read, "ssh session flooding, dropping");
                    break 'session;
                }
                acc.extend_from_slice(&buf[..n]);

                if client_banner.is_none() {
                    match take_banner_line(&mut acc) {
                        Some(line) => {
                            meter.mark_meaningful();
                            client_banner = Some(line);
                        }
                        None if acc.len() > 255 => break 'session,
                        None => continue,
                    }
                }

                while let Some(payload) = take_packet(&mut acc) {
                    if payload.first() == Some(&MSG_KEXINIT) && !engaged {
                        engaged = true;
                        // First auth activity: cancel the scan timer and
                        // count the attempt.
                        timer_armed = false;
                        meter.mark_meaningful();
                        ctx.on_auth_failure(Protocol::Ssh, peer, None);

                        let reply = wrap_packet(&build_kexinit_payload());
                        if stream.write_all(&reply).await.is_err() {
                            break 'session;
                        }
                    }
                }
            }
        }
    }

    debug!(
        connection = meter.connection_id,
        %peer,
        banner = client_banner.as_deref().unwrap_or(""),
        engaged,
        "ssh session closed"
    );
    ctx.on_close(Protocol::Ssh, peer, &meter);
}

/// Take the client's identification line off the front of the buffer.
fn take_banner_line(acc: &mut Vec<u8>) -> Option<String> {
    let newline = acc.iter().position(|&b| b == b'\n')?;
    let line = String::from_utf8_lossy(&acc[..newline])
        .trim_end_matches('\r')
        .to_string();
    acc.drain(..=newline);
    Some(line)
}

/// Take one framed binary packet and return its payload, or `None` while
/// the packet is still incomplete. Malformed framing empties the buffer.
fn take_packet(acc: &mut Vec<u8>) -> Option<Vec<u8>> {
    if acc.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes([acc[0], acc[1], acc[2], acc[3]]) as usize;
    if len == 0 || len > MAX_PACKET {
        acc.clear();
        return None;
    }
    if acc.len() < 4 + len {
        return None;
    }
    let body: Vec<u8> = acc[4..4 + len].to_vec();
    acc.drain(..4 + len);

    let padding = *body.first()? as usize;
    if body.len() < 1 + padding {
        return None;
    }
    Some(body[1..body.len() - padding].to_vec())
}

/// Serialize a plausible server KEXINIT payload.
fn build_kexinit_payload() -> Vec<u8> {
    let mut payload = vec![MSG_KEXINIT];
    payload.extend(std::iter::repeat_with(rand::random::<u8>).take(16));
    for list in [
        // kex, host key, ciphers, macs, compression, languages.
        "curve25519-sha256,curve25519-sha256@libssh.org,diffie-hellman-group14-sha256",
        "ssh-ed25519,rsa-sha2-512,rsa-sha2-256",
        "chacha20-poly1305@openssh.com,aes128-ctr,aes256-ctr",
        "chacha20-poly1305@openssh.com,aes128-ctr,aes256-ctr",
        "umac-64-etm@openssh.com,hmac-sha2-256",
        "umac-64-etm@openssh.com,hmac-sha2-256",
        "none,zlib@openssh.com",
        "none,zlib@openssh.com",
        "",
        "",
    ] {
        put_name_list(&mut payload, list);
    }
    payload.push(0); // first_kex_packet_follows
    payload.extend_from_slice(&0u32.to_be_bytes()); // reserved
    payload
}

fn put_name_list(buf: &mut Vec<u8>, names: &str) {
    buf.extend_from_slice(&(names.len() as u32).to_be_bytes());
    buf.extend_from_slice(names.as_bytes());
}

/// Frame a payload as an unencrypted binary packet (RFC 4253 §6).
fn wrap_packet(payload: &[u8]) -> Vec<u8> {
    let mut padding = 8 - ((4 + 1 + payload.len()) % 8);
    if padding < 4 {
        padding += 8;
    }
    let length = 1 + payload.len() + padding;
    let mut out = Vec::with_capacity(4 + length);
    out.extend_from_slice(&(length as u32).to_be_bytes());
    out.push(padding as u8);
    out.extend_from_slice(payload);
    out.extend(std::iter::repeat_n(0u8, padding));
    out
}
