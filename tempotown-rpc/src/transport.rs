//! JSONL framing over async byte streams.
//!
//! Each frame is one complete JSON document terminated by a newline. The
//! reader tolerates blank lines; anything else that fails to parse poisons
//! the stream offset, so the connection must be torn down.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::protocol::Incoming;

/// Errors surfaced by the framing layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer closed the stream (EOF) or the socket went away.
    #[error("transport closed")]
    Closed,
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A frame was not valid JSON; the stream is no longer decodable.
    #[error("malformed frame: {0}")]
    Frame(#[from] serde_json::Error),
}

/// Writes frames to the peer. Callers must serialize concurrent writers.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one value as a single JSONL frame and flush it.
    ///
    /// Any I/O failure (including a partial write) means the stream state is
    /// unknown and the caller must escalate to a connection tear-down.
    pub async fn write_frame<T: serde::Serialize>(
        &mut self,
        frame: &T,
    ) -> Result<(), TransportError> {
        let json = serde_json::to_string(frame)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Reads inbound frames from the peer. One reader per transport.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame, skipping blank lines.
    ///
    /// Returns [`TransportError::Closed`] on EOF and
    /// [`TransportError::Frame`] when a line is not valid JSON.
    pub async fn read_frame(&mut self) -> Result<Incoming, TransportError> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                return Err(TransportError::Closed);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let incoming: Incoming = serde_json::from_str(trimmed)?;
            return Ok(incoming);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::protocol::Request;

    fn reader_over(input: &str) -> FrameReader<std::io::Cursor<Vec<u8>>> {
        FrameReader::new(std::io::Cursor::new(input.as_bytes().to_vec()))
    }

    #[tokio::test]
    async fn read_single_response_frame() {
        let mut reader = reader_over("{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":\"ok\"}\n");
        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.id, Some(1));
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let input = format!(
            "\n\n{}\n\n{}\n",
            r#"{"jsonrpc":"2.0","id":1,"result":null}"#,
            r#"{"jsonrpc":"2.0","id":2,"result":null}"#,
        );
        let mut reader = reader_over(&input);
        assert_eq!(reader.read_frame().await.unwrap().id, Some(1));
        assert_eq!(reader.read_frame().await.unwrap().id, Some(2));
    }

    #[tokio::test]
    async fn eof_is_closed() {
        let mut reader = reader_over("");
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn garbage_is_malformed_frame() {
        let mut reader = reader_over("not json at all\n");
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, TransportError::Frame(_)));
    }

    #[tokio::test]
    async fn written_frames_are_newline_terminated_json() {
        let mut sink = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut sink);
            writer
                .write_frame(&Request::new(1, "initialize", None))
                .await
                .unwrap();
            writer
                .write_frame(&Request::notification("initialized", None))
                .await
                .unwrap();
        }

        let output = String::from_utf8(sink).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(output.ends_with('\n'));

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["id"], 1);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert!(second.get("id").is_none());
        assert_eq!(second["method"], "initialized");
    }
}
