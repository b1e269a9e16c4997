//! Length-prefixed framing over a byte stream.
//!
//! Wire shape: a 4-byte little-endian payload length, then the
//! payload. Nothing inside a frame is escaped or checked here;
//! integrity belongs to the AEAD it carries. A hard ceiling bounds
//! what a length prefix can make us allocate.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame payload: room for a full file chunk while
/// keeping a hostile length prefix from driving allocation.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Framing-layer failures.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream ended or failed before a whole frame arrived.
    #[error("stream ended mid-frame: {0}")]
    ShortRead(#[source] std::io::Error),

    /// The payload length exceeds [`MAX_FRAME_LEN`].
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_LEN}-byte ceiling")]
    OversizeFrame { len: usize },

    /// Writing a frame to the stream failed.
    #[error("frame write failed: {0}")]
    WriteFailure(#[source] std::io::Error),
}

/// Read one frame. The ceiling is checked before any payload byte is
/// read, so an oversize announcement costs the peer nothing but the
/// connection.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .await
        .map_err(FrameError::ShortRead)?;

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::OversizeFrame { len });
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(FrameError::ShortRead)?;
    Ok(payload)
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::OversizeFrame { len: payload.len() });
    }

    writer
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await
        .map_err(FrameError::WriteFailure)?;
    writer
        .write_all(payload)
        .await
        .map_err(FrameError::WriteFailure)?;
    writer.flush().await.map_err(FrameError::WriteFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello frame").await.unwrap();

        let mut reader = buf.as_slice();
        let payload = read_frame(&mut reader).await.unwrap();
        assert_eq!(payload, b"hello frame");
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn empty_payload_roundtrips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"").await.unwrap();
        let payload = read_frame(&mut buf.as_slice()).await.unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn back_to_back_frames_stay_separate() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"one").await.unwrap();
        write_frame(&mut buf, b"two").await.unwrap();

        let mut reader = buf.as_slice();
        assert_eq!(read_frame(&mut reader).await.unwrap(), b"one");
        assert_eq!(read_frame(&mut reader).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn truncated_header_is_short_read() {
        let mut reader: &[u8] = &[0x05, 0x00];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(FrameError::ShortRead(_))
        ));
    }

    #[tokio::test]
    async fn truncated_payload_is_short_read() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"truncate me").await.unwrap();
        buf.truncate(buf.len() - 3);

        assert!(matches!(
            read_frame(&mut buf.as_slice()).await,
            Err(FrameError::ShortRead(_))
        ));
    }

    #[tokio::test]
    async fn oversize_announcement_is_rejected_without_reading() {
        // Length prefix advertises far more than the ceiling, with no
        // payload behind it. The ceiling must trip before the read.
        let huge = (MAX_FRAME_LEN as u32 + 1).to_le_bytes();
        let mut reader: &[u8] = &huge;
        match read_frame(&mut reader).await {
            Err(FrameError::OversizeFrame { len }) => {
                assert_eq!(len, MAX_FRAME_LEN + 1)
            }
            other => panic!("expected OversizeFrame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversize_payload_is_refused_on_write() {
        let payload = vec![0u8; MAX_FRAME_LEN + 1];
        let mut buf = Vec::new();
        assert!(matches!(
            write_frame(&mut buf, &payload).await,
            Err(FrameError::OversizeFrame { .. })
        ));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn ceiling_sized_payload_is_accepted() {
        // Exactly at the ceiling is legal on both sides.
        let payload = vec![0xA5u8; 1024];
        let mut buf = Vec::new();
        write_frame(&mut buf, &payload).await.unwrap();
        assert_eq!(read_frame(&mut buf.as_slice()).await.unwrap(), payload);
    }
}
