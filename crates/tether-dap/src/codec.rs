use std::io;

use serde::Serialize;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

use crate::types::ProtocolMessage;
use crate::{DapError, Result};

/// Maximum allowed DAP message payload size (in bytes).
///
/// This caps the value of the incoming `Content-Length` header so a
/// misbehaving adapter cannot make the client allocate an arbitrarily large
/// buffer before the body is read.
pub const MAX_DAP_MESSAGE_BYTES: usize = 16 * 1024 * 1024; // 16 MiB

/// Maximum allowed size of a single DAP header line (in bytes).
pub const MAX_DAP_HEADER_LINE_BYTES: usize = 8 * 1024; // 8 KiB

pub(crate) fn sanitize_json_error_message(message: &str) -> String {
    // `serde_json::Error` display strings can include scalar values from the payload
    // (`invalid type: string "..."`). Evaluated expressions and launch environments
    // may contain secrets, so never echo them.
    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(start) = rest.find('"') {
        out.push_str(&rest[..start + 1]);
        rest = &rest[start + 1..];

        let Some(end) = rest.find('"') else {
            out.push_str(rest);
            return out;
        };
        out.push_str("<redacted>\"");
        rest = &rest[end + 1..];
    }
    out.push_str(rest);

    // `unknown field `secret`, expected ...`: redact the first backticked segment only
    // so the expected-value list stays actionable.
    if let Some(start) = out.find('`') {
        if let Some(end_rel) = out[start + 1..].find('`') {
            let end = start + 1 + end_rel;
            out.replace_range(start + 1..end, "<redacted>");
        }
    }

    out
}

fn json_error(err: serde_json::Error) -> DapError {
    DapError::Protocol(sanitize_json_error_message(&err.to_string()))
}

/// Reads `Content-Length` framed DAP messages:
///
/// ```text
/// Content-Length: 123\r\n
/// \r\n
/// { ...json... }
/// ```
pub struct DapReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> DapReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    async fn read_header_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let limit = MAX_DAP_HEADER_LINE_BYTES as u64 + 1;
        let n = (&mut self.reader).take(limit).read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if buf.len() > MAX_DAP_HEADER_LINE_BYTES {
            return Err(DapError::Protocol(format!(
                "DAP header line exceeds maximum size ({MAX_DAP_HEADER_LINE_BYTES} bytes)"
            )));
        }
        let line = String::from_utf8(buf)
            .map_err(|_| DapError::Protocol("DAP header line is not UTF-8".to_string()))?;
        Ok(Some(line))
    }

    /// Read the raw JSON body of the next message. Returns `Ok(None)` on a clean
    /// EOF between messages.
    pub async fn read_raw(&mut self) -> Result<Option<Vec<u8>>> {
        let mut content_length: Option<usize> = None;
        let mut saw_header_line = false;

        loop {
            let Some(line) = self.read_header_line().await? else {
                if !saw_header_line {
                    return Ok(None);
                }
                return Err(DapError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF while reading DAP headers",
                )));
            };
            saw_header_line = true;

            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }

            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("Content-Length") {
                    let value = value.trim();
                    content_length = Some(value.parse::<usize>().map_err(|err| {
                        DapError::Protocol(format!("invalid Content-Length {value:?}: {err}"))
                    })?);
                }
            }
        }

        let Some(len) = content_length else {
            return Err(DapError::Protocol(
                "DAP message missing Content-Length header".to_string(),
            ));
        };

        if len > MAX_DAP_MESSAGE_BYTES {
            return Err(DapError::Protocol(format!(
                "DAP message Content-Length {len} exceeds maximum allowed size {MAX_DAP_MESSAGE_BYTES}"
            )));
        }

        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).await?;
        Ok(Some(buf))
    }

    pub async fn read_message(&mut self) -> Result<Option<ProtocolMessage>> {
        let Some(bytes) = self.read_raw().await? else {
            return Ok(None);
        };
        let message = serde_json::from_slice(&bytes).map_err(json_error)?;
        Ok(Some(message))
    }
}

pub struct DapWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> DapWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_raw(&mut self, json_bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(format!("Content-Length: {}\r\n\r\n", json_bytes.len()).as_bytes())
            .await?;
        self.writer.write_all(json_bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn write_json<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let bytes = serde_json::to_vec(message).map_err(json_error)?;
        self.write_raw(&bytes).await
    }

    pub async fn write_message(&mut self, message: &ProtocolMessage) -> Result<()> {
        self.write_json(message).await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
