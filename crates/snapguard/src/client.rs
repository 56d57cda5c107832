//! Local channel client, used by `snapguard send` and the tests.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::command::CommandRequest;

/// Send one request and return the guard's reply line.
pub async fn send(socket_path: &Path, request: &CommandRequest, timeout: Duration) -> Result<String> {
    let exchange = async {
        let mut stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;

        stream
            .write_all(format!("{}\n", request.to_line()).as_bytes())
            .await
            .context("Failed to send request")?;

        let mut reply = String::new();
        stream
            .read_to_string(&mut reply)
            .await
            .context("Failed to read reply")?;
        Ok::<_, anyhow::Error>(reply.trim_end().to_string())
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .context("Timed out waiting for reply")?
}
