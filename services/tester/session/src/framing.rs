//! Length-prefixed framing.
//!
//! Each frame is a 4-byte little-endian length followed by that many payload
//! bytes. The length counts everything after itself.

use crate::error::LinkError;
use crate::stats::LinkStats;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload accepted by default (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Largest payload the length prefix can describe
pub const MAX_WIRE_PAYLOAD: usize = u32::MAX as usize;

/// Prefix a payload with its length.
///
/// The payload must not exceed [`MAX_WIRE_PAYLOAD`]; the link refuses such
/// payloads before they are queued.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    debug_assert!(payload.len() <= MAX_WIRE_PAYLOAD);
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Fill `buf` from the reader, stopping early only at end of stream.
///
/// Returns how many bytes were obtained.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, LinkError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read one complete frame payload.
///
/// End of stream before any prefix byte yields [`LinkError::PeerClosed`];
/// end of stream anywhere inside a frame yields [`LinkError::Framing`]. A zero
/// length yields an empty payload without touching the stream again.
pub async fn read_frame<R>(
    reader: &mut R,
    max_frame_size: usize,
    stats: &LinkStats,
) -> Result<Bytes, LinkError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let obtained = read_full(reader, &mut prefix).await?;
    if obtained == 0 {
        return Err(LinkError::PeerClosed);
    }
    stats.mark_input(obtained);
    if obtained < LENGTH_PREFIX_SIZE {
        return Err(LinkError::Framing {
            expected: LENGTH_PREFIX_SIZE,
            obtained,
        });
    }

    let len = u32::from_le_bytes(prefix) as usize;
    if len > max_frame_size {
        return Err(LinkError::Oversized {
            len,
            max: max_frame_size,
        });
    }
    if len == 0 {
        stats.mark_frame_in();
        return Ok(Bytes::new());
    }

    let mut payload = vec![0u8; len];
    let obtained = read_full(reader, &mut payload).await?;
    if obtained > 0 {
        stats.mark_input(obtained);
    }
    if obtained < len {
        return Err(LinkError::Framing {
            expected: len,
            obtained,
        });
    }

    stats.mark_frame_in();
    Ok(Bytes::from(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_prefixes_length() {
        let frame = encode_frame(&[100]);
        assert_eq!(&frame[..], &[1, 0, 0, 0, 100]);

        let frame = encode_frame(&[]);
        assert_eq!(&frame[..], &[0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_read_frames_back_to_back() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_frame(&[51, 1]));
        wire.extend_from_slice(&encode_frame(&[]));
        wire.extend_from_slice(&encode_frame(&[55]));
        let mut reader = &wire[..];
        let stats = LinkStats::default();

        let first = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE, &stats).await.unwrap();
        assert_eq!(&first[..], &[51, 1]);
        let second = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE, &stats).await.unwrap();
        assert!(second.is_empty());
        let third = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE, &stats).await.unwrap();
        assert_eq!(&third[..], &[55]);

        let end = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE, &stats).await.unwrap_err();
        assert!(matches!(end, LinkError::PeerClosed));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_received, 3);
        assert_eq!(snapshot.bytes_in, wire.len() as u64);
    }

    #[tokio::test]
    async fn test_short_prefix_is_a_framing_error() {
        let mut reader = &[7u8, 0][..];
        let stats = LinkStats::default();
        let err = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE, &stats).await.unwrap_err();
        assert!(matches!(err, LinkError::Framing { expected: 4, obtained: 2 }));
        assert!(stats.last_input_activity().is_some());
    }

    #[tokio::test]
    async fn test_short_payload_is_a_framing_error() {
        let mut reader = &[5u8, 0, 0, 0, 53, 1][..];
        let stats = LinkStats::default();
        let err = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE, &stats).await.unwrap_err();
        assert!(matches!(err, LinkError::Framing { expected: 5, obtained: 2 }));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected_before_payload() {
        let mut reader = &[0u8, 1, 0, 0][..];
        let stats = LinkStats::default();
        let err = read_frame(&mut reader, 16, &stats).await.unwrap_err();
        assert!(matches!(err, LinkError::Oversized { len: 256, max: 16 }));
    }
}
