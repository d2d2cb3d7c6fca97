//! MySQL listener.
//!
//! Emits a protocol-v10 handshake with a random 20-byte salt, reads the
//! client's login request for its username, and rejects it with error 1045
//! after the delay. The connection never reaches an authenticated state;
//! if the client pushes on with COM_QUERY anyway, the query text is
//! scanned for injection tokens on a best-effort basis.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;

use netsnare_detect::patterns::contains_sqli;
use snare_core::{ObservationEvent, Protocol};

use crate::serve::{self, AUTH_FAILURE_DELAY, ListenerContext, ListenerError, SessionMeter};

const SERVER_VERSION: &str = "8.0.36";
const PROTOCOL_VERSION: u8 = 0x0a;
const AUTH_PLUGIN: &str = "mysql_native_password";

/// Capability flags advertised in the handshake (protocol 4.1, secure
/// connection, plugin auth).
const CAPABILITIES_LOWER: u16 = 0xf7ff;
const CAPABILITIES_UPPER: u16 = 0xcfff;

const CHARSET_UTF8MB4: u8 = 0xff;
const STATUS_AUTOCOMMIT: u16 = 0x0002;

const ERR_ACCESS_DENIED: u16 = 1045;
const ERR_PARSE: u16 = 1064;

const COM_QUERY: u8 = 0x03;

/// Payloads past this size are dropped; nothing legitimate is that large
/// before authentication.
const PAYLOAD_CAP: usize = 64 * 1024;

pub async fn start(ctx: ListenerContext, port: u16) -> Result<JoinHandle<()>, ListenerError> {
    let listener = serve::bind(port).await?;
    let shutdown = ctx.shutdown.clone();
    Ok(serve::spawn_accept_loop(
        "mysql",
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
    ctx.on_accept(Protocol::Mysql, peer);
    let mut meter = SessionMeter::start();

    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let connection_id: u32 = rand::random();
    let salt: [u8; 20] = std::array::from_fn(|_| rand::random::<u8>().max(1));

    let handshake = build_handshake(connection_id, &salt);
    if write_packet(&mut writer, 0, &handshake).await.is_ok() {
        // Login request.
        if let Some((sequence, payload)) = read_packet(&mut reader).await {
            let username = parse_login_username(&payload).unwrap_or_default();
            meter.mark_meaningful();

            tokio::time::sleep(AUTH_FAILURE_DELAY).await;
            ctx.on_auth_failure(Protocol::Mysql, peer, Some(&username));

            let message =
                format!("Access denied for user '{username}'@'{}' (using password: YES)", peer.ip());
            let err = build_err(ERR_ACCESS_DENIED, "28000", &message);
            if write_packet(&mut writer, sequence.wrapping_add(1), &err).await.is_ok() {
                // Best-effort: a client that keeps talking was never
                // authenticated, but its queries are still worth reading.
                while let Some((sequence, payload)) = read_packet(&mut reader).await {
                    if payload.first() == Some(&COM_QUERY) {
                        let query = String::from_utf8_lossy(&payload[1..]).into_owned();
                        meter.mark_meaningful();
                        if contains_sqli(&query) {
                            let mut event = ObservationEvent::new(
                                peer.ip(),
                                peer.port(),
                                Protocol::Mysql,
                                "mysql_sqli",
                                "SQL injection tokens in query",
                                vec![],
                            );
                            event.push_fact(&serde_json::json!({
                                "query": query,
                                "username": username,
                            }));
                            ctx.sink.emit(event);
                        }
                        let err = build_err(
                            ERR_PARSE,
                            "42000",
                            "You have an error in your SQL syntax",
                        );
                        if write_packet(&mut writer, sequence.wrapping_add(1), &err)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    } else {
                        break;
                    }
                }
            }
        }
    }

    debug!(connection = meter.connection_id, %peer, "mysql session closed");
    ctx.on_close(Protocol::Mysql, peer, &meter);
}

/// Serialize the protocol-v10 handshake payload.
pub fn build_handshake(connection_id: u32, salt: &[u8; 20]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(128);
    payload.push(PROTOCOL_VERSION);
    payload.extend_from_slice(SERVER_VERSION.as_bytes());
    payload.push(0);
    payload.extend_from_slice(&connection_id.to_le_bytes());
    payload.extend_from_slice(&salt[..8]);
    payload.push(0);
    payload.extend_from_slice(&CAPABILITIES_LOWER.to_le_bytes());
    payload.push(CHARSET_UTF8MB4);
    payload.extend_from_slice(&STATUS_AUTOCOMMIT.to_le_bytes());
    payload.extend_from_slice(&CAPABILITIES_UPPER.to_le_bytes());
    payload.push(21); // auth plugin data length
    payload.extend_from_slice(&[0u8; 10]);
    payload.extend_from_slice(&salt[8..]);
    payload.push(0);
    payload.extend_from_slice(AUTH_PLUGIN.as_bytes());
    payload.push(0);
    payload
}

/// Serialize an ERR packet: marker, code, `#`, SQL state, message.
pub fn build_err(code: u16, sql_state: &str, message: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(9 + message.len());
    payload.push(0xff);
    payload.extend_from_slice(&code.to_le_bytes());
    payload.push(b'#');
    payload.extend_from_slice(sql_state.as_bytes());
    payload.extend_from_slice(message.as_bytes());
    payload
}

/// Pull the null-terminated username out of a handshake response.
pub fn parse_login_username(payload: &[u8]) -> Option<String> {
    // 4 capability bytes, 4 max-packet bytes, 1 charset, 23 reserved.
    let rest = payload.get(32..)?;
    let end = rest.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
}

async fn read_packet<R>(reader: &mut R) -> Option<(u8, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await.ok()?;
    let length = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    if length == 0 || length > PAYLOAD_CAP {
        return None;
    }
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await.ok()?;
    Some((header[3], payload))
}

async fn write_packet<W>(writer: &mut W, sequence: u8, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let length = payload.len() as u32;
    let mut header = [0u8; 4];
    header[..3].copy_from_slice(&length.to_le_bytes()[..3]);
    header[3] = sequence;
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}
