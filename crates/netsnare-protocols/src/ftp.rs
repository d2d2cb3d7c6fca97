//! FTP listener.
//!
//! Control-channel command loop with a working PASV data channel. Logins
//! always fail, but the server deliberately lets LIST and STOR through
//! anyway: dropper bots that ignore the 530 still reveal their payloads.
//! Uploads are slurped to a 1 KiB cap and discarded.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

use snare_core::{ObservationEvent, Protocol};

use crate::serve::{
    self, AUTH_FAILURE_DELAY, ListenerContext, ListenerError, SessionMeter, read_line_capped,
};

const GREETING: &str = "220 FTP server ready.\r\n";
const LINE_CAP: usize = 512;

/// Upload slurp cap, preventing storage abuse.
const UPLOAD_CAP: u64 = 1024;

/// How long a PASV data connection may take to arrive.
const DATA_ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

const FAKE_LISTING: &str = "\
-rw-r--r--   1 ftp      ftp          4096 Mar 11 09:14 backup.tar.gz\r\n\
-rw-r--r--   1 ftp      ftp           218 Mar 11 09:14 readme.txt\r\n\
drwxr-xr-x   2 ftp      ftp          4096 Mar 11 09:14 upload\r\n";

pub async fn start(ctx: ListenerContext, port: u16) -> Result<JoinHandle<()>, ListenerError> {
    let listener = serve::bind(port).await?;
    let shutdown = ctx.shutdown.clone();
    Ok(serve::spawn_accept_loop(
        "ftp",
        listener,
        shutdown,
        move |stream: TcpStream, peer| {
            let ctx = ctx.clone();
            let local_ip = stream
                .local_addr()
                .map(|a| a.ip())
                .unwrap_or(IpAddr::from([127, 0, 0, 1]));
            async move {
                handle_session(ctx, stream, peer, local_ip).await;
            }
        },
    ))
}

pub async fn handle_session<S>(ctx: ListenerContext, stream: S, peer: SocketAddr, local_ip: IpAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ctx.on_accept(Protocol::Ftp, peer);
    let mut meter = SessionMeter::start();

    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    if writer.write_all(GREETING.as_bytes()).await.is_ok() {
        let mut username: Option<String> = None;
        let mut pasv: Option<TcpListener> = None;

        while let Some(line) = read_line_capped(&mut reader, LINE_CAP).await {
            let (command, argument) = split_command(&line);
            let reply: String = match command.as_str() {
                "USER" => {
                    meter.mark_meaningful();
                    username = Some(argument.to_string());
                    format!("331 Password required for {argument}.\r\n")
                }
                "PASS" => {
                    meter.mark_meaningful();
                    tokio::time::sleep(AUTH_FAILURE_DELAY).await;
                    ctx.on_auth_failure(Protocol::Ftp, peer, username.as_deref());
                    "530 Login incorrect.\r\n".into()
                }
                "SYST" => "215 UNIX Type: L8\r\n".into(),
                "FEAT" => "211-Features:\r\n PASV\r\n SIZE\r\n211 End\r\n".into(),
                "TYPE" => "200 Type set.\r\n".into(),
                "PWD" => "257 \"/\" is the current directory\r\n".into(),
                "CWD" => "250 CWD command successful.\r\n".into(),
                "NOOP" => "200 NOOP command successful.\r\n".into(),
                "PASV" => match open_passive(local_ip).await {
                    Some((listener, response)) => {
                        pasv = Some(listener);
                        response
                    }
                    None => "425 Can't open data connection.\r\n".into(),
                },
                "LIST" => match pasv.take() {
                    Some(listener) => {
                        meter.mark_meaningful();
                        if writer
                            .write_all(b"150 Opening data connection for file list.\r\n")
                            .await
                            .is_err()
                        {
                            break;
                        }
                        send_listing(listener).await;
                        "226 Transfer complete.\r\n".into()
                    }
                    None => "425 Use PASV first.\r\n".into(),
                },
                "RETR" => format!("550 {argument}: No such file or directory.\r\n"),
                "STOR" => match pasv.take() {
                    Some(listener) => {
                        meter.mark_meaningful();
                        if writer
                            .write_all(b"150 Ok to send data.\r\n")
                            .await
                            .is_err()
                        {
                            break;
                        }
                        let received = receive_upload(listener).await;
                        emit_upload(&ctx, peer, argument, received);
                        "226 Transfer complete.\r\n".into()
                    }
                    None => "425 Use PASV first.\r\n".into(),
                },
                "QUIT" => {
                    let _ = writer.write_all(b"221 Goodbye.\r\n").await;
                    break;
                }
                _ => "500 Unknown command.\r\n".into(),
            };
            if writer.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    }

    debug!(connection = meter.connection_id, %peer, "ftp session closed");
    ctx.on_close(Protocol::Ftp, peer, &meter);
}

/// Bind an ephemeral data port and build the 227 response.
async fn open_passive(local_ip: IpAddr) -> Option<(TcpListener, String)> {
    let IpAddr::V4(v4) = local_ip else {
        return None;
    };
    let listener = TcpListener::bind(("0.0.0.0", 0)).await.ok()?;
    let port = listener.local_addr().ok()?.port();
    let [a, b, c, d] = v4.octets();
    let response = format!(
        "227 Entering Passive Mode ({a},{b},{c},{d},{},{}).\r\n",
        port >> 8,
        port & 0xff
    );
    Some((listener, response))
}

async fn send_listing(listener: TcpListener) {
    let accepted = tokio::time::timeout(DATA_ACCEPT_TIMEOUT, listener.accept()).await;
    if let Ok(Ok((mut data, _))) = accepted {
        let _ = data.write_all(FAKE_LISTING.as_bytes()).await;
        let _ = data.shutdown().await;
    }
}

/// Accept the data connection and slurp at most [`UPLOAD_CAP`] bytes.
async fn receive_upload(listener: TcpListener) -> Option<Vec<u8>> {
    let accepted = tokio::time::timeout(DATA_ACCEPT_TIMEOUT, listener.accept()).await;
    let Ok(Ok((data, _))) = accepted else {
        return None;
    };
    let mut content = Vec::new();
    let mut capped = data.take(UPLOAD_CAP);
    match capped.read_to_end(&mut content).await {
        Ok(_) => Some(content),
        Err(_) => None,
    }
}

fn emit_upload(ctx: &ListenerContext, peer: SocketAddr, filename: &str, content: Option<Vec<u8>>) {
    let bytes = content.as_ref().map(Vec::len).unwrap_or(0);
    let mut event = ObservationEvent::new(
        peer.ip(),
        peer.port(),
        Protocol::Ftp,
        "ftp_upload",
        format!("file upload attempt: {filename}"),
        vec![],
    );
    event.push_fact(&serde_json::json!({
        "filename": filename,
        "bytes": bytes,
        "truncated": bytes as u64 >= UPLOAD_CAP,
    }));
    ctx.sink.emit(event);
}

fn split_command(line: &str) -> (String, &str) {
    match line.split_once(' ') {
        Some((cmd, rest)) => (cmd.to_uppercase(), rest.trim()),
        None => (line.to_uppercase(), ""),
    }
}
