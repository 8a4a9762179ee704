use anyhow::{Context, Result};
use annotator_common::protocol::Message;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::bus::Uplink;

/// Bridge the host's stdin/stdout onto one bus port.
pub async fn serve_stdio(
    uplink: Uplink,
    downlink: mpsc::Receiver<Message>,
    shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    serve_port(io::stdin(), io::stdout(), uplink, downlink, shutdown).await
}

/// Serve one port over a byte stream pair.
///
/// Framing is newline-delimited `{type, payload}` JSON in both directions.
/// Inbound lines go up the uplink; downlink messages are written out as they
/// arrive. Returns when the reader hits EOF, the downlink closes, or shutdown
/// is signalled. The port is unregistered on the way out.
pub async fn serve_port<R, W>(
    reader: R,
    mut writer: W,
    uplink: Uplink,
    mut downlink: mpsc::Receiver<Message>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    let result = loop {
        tokio::select! {
            read = reader.read_until(b'\n', &mut line) => {
                let bytes_read = match read.context("failed to read inbound message") {
                    Ok(bytes_read) => bytes_read,
                    Err(error) => break Err(error),
                };
                if bytes_read == 0 {
                    debug!(port = %uplink.port(), "port reader reached EOF");
                    break Ok(());
                }
                trim_line_endings(&mut line);
                if !line.iter().all(|byte| byte.is_ascii_whitespace()) {
                    forward(&uplink, &line).await;
                }
                line.clear();
            }
            message = downlink.recv() => {
                let Some(message) = message else {
                    break Ok(());
                };
                if let Err(error) = write_message(&mut writer, &message).await {
                    break Err(error);
                }
            }
            _ = shutdown.recv() => break Ok(()),
        }
    };

    uplink.unregister().await;
    info!(port = %uplink.port(), "port transport closed");
    result
}

async fn forward(uplink: &Uplink, raw: &[u8]) {
    match Message::decode(raw) {
        Ok(message) => uplink.send_or_drop(message).await,
        Err(error) if error.is_ignorable() => {
            debug!(port = %uplink.port(), %error, "ignoring inbound message");
        }
        Err(error) => {
            warn!(port = %uplink.port(), %error, "dropping malformed inbound message");
        }
    }
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    let mut encoded = message.encode().context("failed to serialize outbound message")?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await.context("failed to write outbound message")?;
    writer.flush().await.context("failed to flush outbound message")
}

fn trim_line_endings(line: &mut Vec<u8>) {
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
}
