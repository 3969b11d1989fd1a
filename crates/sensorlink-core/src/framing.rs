//! Length-prefixed framing for classic sessions.
//!
//! Wire format:
//! ```text
//! ┌────────────┬─────────────────┐
//! │ Length (4B)│ Payload (N B)   │
//! │ LE u32     │ 0 ≤ N ≤ max     │
//! └────────────┴─────────────────┘
//! ```
//!
//! An oversized frame is skipped whole and reported as
//! [`Error::FrameTooLarge`]; the reader stays on a frame boundary, so the
//! caller may keep reading. Only I/O errors and a stream that ends inside a
//! frame leave the reader unusable.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Frame header size (4-byte little-endian length).
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

fn check_len(len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(Error::FrameTooLarge {
            limit: max,
            actual: len,
        });
    }
    Ok(())
}

/// Reads whole frames from a byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            max_frame_size,
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the peer closed the stream on a frame
    /// boundary. A stream that ends mid-frame is an error.
    /// [`Error::FrameTooLarge`] means the frame was discarded and the next
    /// call reads the frame after it.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        let mut header = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            let n = self.inner.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            filled += n;
        }

        let len = u32::from_le_bytes(header) as usize;
        if let Err(e) = check_len(len, self.max_frame_size) {
            self.skip(len).await?;
            return Err(e);
        }

        let mut payload = BytesMut::zeroed(len);
        self.inner.read_exact(&mut payload).await?;
        Ok(Some(payload.freeze()))
    }

    async fn skip(&mut self, len: usize) -> Result<()> {
        let mut rest = (&mut self.inner).take(len as u64);
        let skipped = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await?;
        if skipped < len as u64 {
            return Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        Ok(())
    }
}

/// Writes whole frames to a byte stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    max_frame_size: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, max_frame_size: usize) -> Self {
        Self {
            inner,
            max_frame_size,
        }
    }

    /// Write one frame and flush it.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        check_len(payload.len(), self.max_frame_size)?;
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(payload);
        self.inner.write_all(&buf).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write half.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_cross_a_duplex() {
        let (a, b) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(a, 1024);
        let mut reader = FrameReader::new(b, 1024);

        writer.write_frame(b"hello").await.unwrap();
        writer.write_frame(&[1, 2, 3]).await.unwrap();

        assert_eq!(reader.read_frame().await.unwrap().unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), Bytes::from_static(&[1, 2, 3]));
    }

    #[tokio::test]
    async fn test_clean_eof_returns_none() {
        let (a, b) = tokio::io::duplex(64);
        drop(a);
        let mut reader = FrameReader::new(b, 1024);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_header_is_error() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(&[5, 0]).await.unwrap();
        drop(a);
        let mut reader = FrameReader::new(b, 1024);
        assert!(matches!(reader.read_frame().await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_skipped() {
        let (a, b) = tokio::io::duplex(256);
        let mut writer = FrameWriter::new(a, 1024);
        let mut reader = FrameReader::new(b, 16);

        writer.write_frame(&[0xAA; 100]).await.unwrap();
        writer.write_frame(&[1, 2, 3]).await.unwrap();

        assert!(matches!(
            reader.read_frame().await,
            Err(Error::FrameTooLarge { limit: 16, actual: 100 })
        ));
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), Bytes::from_static(&[1, 2, 3]));
    }

    #[tokio::test]
    async fn test_oversized_frame_cut_short_is_io_error() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(&100u32.to_le_bytes()).await.unwrap();
        a.write_all(&[0; 10]).await.unwrap();
        drop(a);
        let mut reader = FrameReader::new(b, 16);
        assert!(matches!(reader.read_frame().await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_zero_length_frame_is_empty() {
        let (a, b) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(a, 16);
        let mut reader = FrameReader::new(b, 16);

        writer.write_frame(&[]).await.unwrap();
        writer.write_frame(&[5]).await.unwrap();
        assert!(writer.write_frame(&[0; 17]).await.is_err());

        assert_eq!(reader.read_frame().await.unwrap().unwrap(), Bytes::new());
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), Bytes::from_static(&[5]));
    }

    #[tokio::test]
    async fn test_split_writes_reassemble() {
        let (mut a, b) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(b, 1024);
        let task = tokio::spawn(async move { reader.read_frame().await });

        a.write_all(&[3, 0]).await.unwrap();
        tokio::task::yield_now().await;
        a.write_all(&[0, 0, 9]).await.unwrap();
        tokio::task::yield_now().await;
        a.write_all(&[8, 7]).await.unwrap();

        let frame = task.await.unwrap().unwrap().unwrap();
        assert_eq!(frame, Bytes::from_static(&[9, 8, 7]));
    }
}
