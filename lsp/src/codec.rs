//! `Content-Length` framing for JSON-RPC over stdio.
//!
//! Every message is `Content-Length: N\r\n\r\n` followed by N bytes of JSON.
//! Other headers (e.g. `Content-Type`) are accepted and ignored.

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single message body (4 MiB).
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream ended inside message headers")]
    TruncatedHeaders,
    #[error("message has no Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value '{0}'")]
    InvalidContentLength(String),
    #[error("Content-Length {len} exceeds maximum {max}")]
    TooLarge { len: usize, max: usize },
    #[error("message body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reads framed JSON messages from a server's stdout.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Next message, or `Ok(None)` when the stream closes between messages.
    pub async fn read_frame(&mut self) -> Result<Option<Value>, CodecError> {
        let Some(len) = self.read_content_length().await? else {
            return Ok(None);
        };
        if len > MAX_FRAME_BYTES {
            return Err(CodecError::TooLarge {
                len,
                max: MAX_FRAME_BYTES,
            });
        }
        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body).await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn read_content_length(&mut self) -> Result<Option<usize>, CodecError> {
        let mut content_length = None;
        let mut started = false;

        loop {
            self.line.clear();
            if self.inner.read_line(&mut self.line).await? == 0 {
                return if started {
                    Err(CodecError::TruncatedHeaders)
                } else {
                    Ok(None)
                };
            }
            started = true;

            let header = self.line.trim();
            if header.is_empty() {
                return content_length
                    .map(Some)
                    .ok_or(CodecError::MissingContentLength);
            }
            let Some((name, value)) = header.split_once(':') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let value = value.trim();
                let len = value
                    .parse()
                    .map_err(|_| CodecError::InvalidContentLength(value.to_string()))?;
                content_length = Some(len);
            }
        }
    }
}

/// Writes framed JSON messages to a server's stdin.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    pub async fn write_frame(&mut self, msg: &Value) -> Result<(), CodecError> {
        let body = serde_json::to_vec(msg)?;
        let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());
        self.inner.write_all(header.as_bytes()).await?;
        self.inner.write_all(&body).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Flush and close the underlying stream so the server sees EOF.
    pub async fn close(&mut self) -> Result<(), CodecError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
