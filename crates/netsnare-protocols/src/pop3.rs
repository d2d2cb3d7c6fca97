//! POP3 listener.
//!
//! Greets, accepts USER, and rejects every PASS after the standard delay.
//! Nothing is ever retrievable; the value of the session is the credential
//! stream it produces.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;

use snare_core::Protocol;

use crate::serve::{
    self, AUTH_FAILURE_DELAY, ListenerContext, ListenerError, SessionMeter, read_line_capped,
};

const GREETING: &str = "+OK POP3 server ready\r\n";
const LINE_CAP: usize = 512;

/// Bind the POP3 port and start accepting sessions.
pub async fn start(ctx: ListenerContext, port: u16) -> Result<JoinHandle<()>, ListenerError> {
    let listener = serve::bind(port).await?;
    let shutdown = ctx.shutdown.clone();
    Ok(serve::spawn_accept_loop(
        "pop3",
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

/// Drive one POP3 session to completion.
pub async fn handle_session<S>(ctx: ListenerContext, stream: S, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ctx.on_accept(Protocol::Pop3, peer);
    let mut meter = SessionMeter::start();

    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    if writer.write_all(GREETING.as_bytes()).await.is_ok() {
        let mut username: Option<String> = None;
        while let Some(line) = read_line_capped(&mut reader, LINE_CAP).await {
            let (command, argument) = split_command(&line);
            let reply: String = match command.as_str() {
                "USER" => {
                    meter.mark_meaningful();
                    username = Some(argument.to_string());
                    "+OK\r\n".into()
                }
                "PASS" => {
                    meter.mark_meaningful();
                    tokio::time::sleep(AUTH_FAILURE_DELAY).await;
                    ctx.on_auth_failure(Protocol::Pop3, peer, username.as_deref());
                    "-ERR [AUTH] Authentication failed\r\n".into()
                }
                "CAPA" => "+OK Capability list follows\r\nUSER\r\nUIDL\r\nTOP\r\n.\r\n".into(),
                "NOOP" => "+OK\r\n".into(),
                "STAT" | "LIST" | "RETR" | "DELE" | "UIDL" | "TOP" => {
                    "-ERR Authentication required\r\n".into()
                }
                "QUIT" => {
                    let _ = writer.write_all(b"+OK Bye\r\n").await;
                    break;
                }
                _ => "-ERR Unknown command\r\n".into(),
            };
            if writer.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    }

    debug!(connection = meter.connection_id, %peer, "pop3 session closed");
    ctx.on_close(Protocol::Pop3, peer, &meter);
}

fn split_command(line: &str) -> (String, &str) {
    match line.split_once(' ') {
        Some((cmd, rest)) => (cmd.to_uppercase(), rest.trim()),
        None => (line.to_uppercase(), ""),
    }
}
