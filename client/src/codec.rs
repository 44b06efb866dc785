//! Framing codec for the server socket.
//!
//! The analysis server speaks newline-terminated JSON text frames over a
//! persistent TCP connection. This module provides [`FrameReader`] and
//! [`FrameWriter`] for async reading and writing of framed messages, and
//! [`connect`] to establish the socket once the server's port is known.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::errors::WireError;

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Reads newline-terminated JSON frames from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on EOF at a frame boundary (clean shutdown).
    /// Returns `Err` on oversized frames, truncated frames, or malformed JSON.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, WireError> {
        let mut line = Vec::new();
        let mut limited = (&mut self.reader).take(MAX_FRAME_BYTES as u64 + 1);
        let bytes_read = limited
            .read_until(b'\n', &mut line)
            .await
            .map_err(WireError::Read)?;

        if bytes_read == 0 {
            return Ok(None);
        }
        if line.len() > MAX_FRAME_BYTES {
            return Err(WireError::Oversized(line.len()));
        }
        if line.last() != Some(&b'\n') {
            // EOF in the middle of a frame is not a clean shutdown.
            return Err(WireError::Disconnected);
        }

        let value = serde_json::from_slice(&line)?;
        Ok(Some(value))
    }
}

/// Writes newline-terminated JSON frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize `msg`, append the frame terminator and flush.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<(), std::io::Error> {
        let mut body = serde_json::to_vec(msg)?;
        body.push(b'\n');
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Dial the server's published port on the loopback interface and split the
/// stream into its framed halves.
pub async fn connect(
    port: u16,
) -> Result<(FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>), WireError> {
    let addr = format!("127.0.0.1:{port}");
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| WireError::Connect {
            addr: addr.clone(),
            source,
        })?;
    let (read_half, write_half) = stream.into_split();
    Ok((FrameReader::new(read_half), FrameWriter::new(write_half)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip() {
        let msg = serde_json::json!({
            "callId": 1,
            "req": { "typehint": "ConnectionInfoReq" }
        });

        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.write_frame(&msg).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        let result = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(result, msg);
    }

    #[tokio::test]
    async fn test_multiple_frames() {
        let msg1 = serde_json::json!({"callId": 1});
        let msg2 = serde_json::json!({"callId": 2});

        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.write_frame(&msg1).await.unwrap();
        writer.write_frame(&msg2).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), msg1);
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), msg2);
    }

    #[tokio::test]
    async fn test_eof_returns_none() {
        let buf: &[u8] = b"";
        let mut reader = FrameReader::new(buf);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_error() {
        let buf: &[u8] = br#"{"callId": 1"#;
        let mut reader = FrameReader::new(buf);
        assert!(matches!(
            reader.read_frame().await,
            Err(WireError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_invalid_json_frame() {
        let buf: &[u8] = b"not json at all\n";
        let mut reader = FrameReader::new(buf);
        assert!(matches!(reader.read_frame().await, Err(WireError::Decode(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut buf = vec![b'x'; MAX_FRAME_BYTES + 16];
        buf.push(b'\n');
        let mut reader = FrameReader::new(buf.as_slice());
        assert!(matches!(
            reader.read_frame().await,
            Err(WireError::Oversized(_))
        ));
    }

    #[tokio::test]
    async fn test_frame_with_multibyte_utf8() {
        let msg = serde_json::json!({"payload": {"typehint": "SendBackgroundMessageEvent", "detail": "é"}});
        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.write_frame(&msg).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        let result = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(result["payload"]["detail"], "é");
    }
}
