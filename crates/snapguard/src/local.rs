//! Local channel: trusted commands over a Unix stream socket.
//!
//! One request per connection, `<command> <node_id> <round>`, answered
//! with `OK served`, `OK routed` or `ERROR <reason>`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{CommandRequest, MAX_REQUEST_BYTES};
use crate::error::GuardError;
use crate::router::CommandRouter;

/// How long a client may take to send its request.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Bind the socket, replacing a stale file left by a previous run.
pub fn bind(path: &Path) -> Result<UnixListener> {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to remove stale socket {}", path.display()))
        }
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    UnixListener::bind(path).with_context(|| format!("Failed to bind {}", path.display()))
}

/// Accept connections until `cancel` fires, then remove the socket file.
pub async fn serve(
    listener: UnixListener,
    socket_path: PathBuf,
    router: Arc<CommandRouter>,
    cancel: CancellationToken,
) -> Result<()> {
    info!(path = %socket_path.display(), "local channel listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let router = Arc::clone(&router);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &router).await {
                            debug!("local connection error: {}", e);
                        }
                    });
                }
                Err(e) => warn!("local accept failed: {}", e),
            }
        }
    }

    drop(listener);
    if let Err(e) = std::fs::remove_file(&socket_path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %socket_path.display(), "failed to remove socket: {}", e);
        }
    }
    info!("local channel stopped");
    Ok(())
}

async fn handle_connection(mut stream: UnixStream, router: &CommandRouter) -> io::Result<()> {
    let reply = match tokio::time::timeout(READ_TIMEOUT, read_request(&mut stream)).await {
        Ok(Ok(request)) => respond(router, &request).await,
        Ok(Err(e)) => format_error(&e),
        Err(_) => format_error(&GuardError::MalformedRequest("read timed out".to_string())),
    };

    stream.write_all(reply.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.shutdown().await
}

/// Read one request. It ends at a newline, at end of stream, or as soon as
/// three whitespace-separated tokens have arrived; more than the size limit
/// is rejected.
async fn read_request(stream: &mut UnixStream) -> Result<String, GuardError> {
    let mut buf = vec![0u8; MAX_REQUEST_BYTES];
    let mut len = 0;

    loop {
        let n = stream
            .read(&mut buf[len..])
            .await
            .map_err(|e| GuardError::MalformedRequest(format!("read failed: {}", e)))?;
        if n == 0 {
            break;
        }
        len += n;
        if request_complete(&buf[..len]) {
            break;
        }
        if len == MAX_REQUEST_BYTES {
            return Err(GuardError::MalformedRequest(format!(
                "request exceeds {} bytes",
                MAX_REQUEST_BYTES
            )));
        }
    }

    let line = match buf[..len].iter().position(|&b| b == b'\n') {
        Some(end) => &buf[..end],
        None => &buf[..len],
    };
    String::from_utf8(line.to_vec())
        .map_err(|_| GuardError::MalformedRequest("request is not valid UTF-8".to_string()))
}

fn request_complete(buf: &[u8]) -> bool {
    if buf.contains(&b'\n') {
        return true;
    }
    // Unterminated requests are complete once all three fields arrived
    match std::str::from_utf8(buf) {
        Ok(text) => text.split_whitespace().count() >= 3,
        Err(_) => false,
    }
}

/// Parse and dispatch one request line, producing the reply text.
pub async fn respond(router: &CommandRouter, line: &str) -> String {
    let request = match CommandRequest::parse_line(line) {
        Ok(request) => request,
        Err(e) => {
            warn!(request = line.trim(), "rejected local request: {}", e);
            return format_error(&e);
        }
    };

    match router
        .dispatch(request.command, request.node_id, request.round)
        .await
    {
        Ok(ack) => format!("OK {}", ack.reply()),
        Err(e) => format_error(&e),
    }
}

fn format_error(e: &GuardError) -> String {
    format!("ERROR {}", e)
}
