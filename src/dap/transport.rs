//! Content-Length framed DAP messages over any async byte stream

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::LinkError;

/// Upper bound on a single message body
const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Read a single DAP message. Returns `Ok(None)` on a clean EOF between messages.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Value>, LinkError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;
    loop {
        let mut line = String::new();
        let read_n = reader.read_line(&mut line).await?;
        if read_n == 0 {
            if saw_header {
                return Err(LinkError::ConnectionLost(
                    "stream closed inside message header".into(),
                ));
            }
            return Ok(None);
        }
        saw_header = true;
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }
        if let Some(v) = line.strip_prefix("Content-Length:") {
            let len = v
                .trim()
                .parse()
                .map_err(|_| LinkError::Malformed(format!("bad Content-Length: {v:?}")))?;
            content_length = Some(len);
        }
    }

    let len = content_length.ok_or_else(|| LinkError::Malformed("missing Content-Length".into()))?;
    if len > MAX_MESSAGE_BYTES {
        return Err(LinkError::Malformed(format!("message of {len} bytes is too large")));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    let msg: Value =
        serde_json::from_slice(&buf).map_err(|e| LinkError::Malformed(e.to_string()))?;
    Ok(Some(msg))
}

/// Write a single DAP message with its Content-Length header
pub async fn write_message<W>(writer: &mut W, message: &Value) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(message).map_err(|e| LinkError::Malformed(e.to_string()))?;
    let header = format!("Content-Length: {}\r\n\r\n", payload.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}
