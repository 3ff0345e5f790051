//! Wire frame codec.
//!
//! Frame layout, all integers big-endian:
//!
//! ```text
//! [frame_len: u32]                      length of everything below
//! [channel_id: u16]
//! [correlation_id: 16 bytes]            all-zero when unset
//! [header_len: u32][header: JSON bytes]
//! [body_len: u32][body: bytes]
//! ```
//!
//! Size caps bound what a peer can make us buffer; a frame exceeding
//! them is a decode error and the connection is torn down by the caller.

use crate::correlation::CorrelationId;
use crate::packet::Packet;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use stratus_types::Document;
use thiserror::Error;

/// Upper bound on the serialized header document.
pub const MAX_HEADER_BYTES: usize = 1024 * 1024;
/// Upper bound on the packet body.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
/// Upper bound on a whole frame (excluding the leading length word).
pub const MAX_FRAME_BYTES: usize = MAX_HEADER_BYTES + MAX_BODY_BYTES + FIXED_FIELD_BYTES;

/// channel id + correlation id + two length prefixes.
const FIXED_FIELD_BYTES: usize = 2 + 16 + 4 + 4;

/// Errors from frame encode/decode.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The peer announced a frame larger than [`MAX_FRAME_BYTES`].
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Announced frame length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },
    /// A length prefix points past the end of the frame.
    #[error("truncated frame: expected {expected} more bytes, found {found}")]
    Truncated {
        /// Bytes the prefix demanded.
        expected: usize,
        /// Bytes actually remaining.
        found: usize,
    },
    /// A field exceeded its own cap.
    #[error("{field} of {len} bytes exceeds limit of {max} bytes")]
    FieldTooLarge {
        /// Which field overflowed.
        field: &'static str,
        /// Announced field length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },
    /// The header bytes were not a valid JSON document.
    #[error("malformed header document: {0}")]
    MalformedHeader(#[from] serde_json::Error),
}

/// Encode a packet into a complete frame, leading length word included.
#[must_use]
pub fn encode_frame(packet: Packet) -> Bytes {
    let (channel_id, correlation_id, header, body) = packet.into_parts();
    let header_bytes = header.to_bytes();

    let frame_len = FIXED_FIELD_BYTES + header_bytes.len() + body.len();
    let mut buf = BytesMut::with_capacity(4 + frame_len);

    buf.put_u32(frame_len as u32);
    buf.put_u16(channel_id);
    buf.put_slice(correlation_id.unwrap_or_else(CorrelationId::nil).as_bytes());
    buf.put_u32(header_bytes.len() as u32);
    buf.put_slice(&header_bytes);
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);

    buf.freeze()
}

/// Validate an announced frame length before buffering it.
pub fn check_frame_len(len: usize) -> Result<(), CodecError> {
    if len < FIXED_FIELD_BYTES || len > MAX_FRAME_BYTES {
        return Err(CodecError::FrameTooLarge { len, max: MAX_FRAME_BYTES });
    }
    Ok(())
}

/// Decode one frame body (the bytes after the leading length word).
pub fn decode_frame(mut frame: Bytes) -> Result<Packet, CodecError> {
    if frame.remaining() < FIXED_FIELD_BYTES {
        return Err(CodecError::Truncated {
            expected: FIXED_FIELD_BYTES,
            found: frame.remaining(),
        });
    }

    let channel_id = frame.get_u16();

    let mut id_bytes = [0u8; 16];
    frame.copy_to_slice(&mut id_bytes);
    let correlation_id = {
        let id = CorrelationId::from_bytes(id_bytes);
        (!id.is_nil()).then_some(id)
    };

    let header_len = frame.get_u32() as usize;
    if header_len > MAX_HEADER_BYTES {
        return Err(CodecError::FieldTooLarge {
            field: "header",
            len: header_len,
            max: MAX_HEADER_BYTES,
        });
    }
    if frame.remaining() < header_len {
        return Err(CodecError::Truncated { expected: header_len, found: frame.remaining() });
    }
    let header_bytes = frame.split_to(header_len);
    let header = if header_bytes.is_empty() {
        Document::new()
    } else {
        Document::from_bytes(&header_bytes)?
    };

    if frame.remaining() < 4 {
        return Err(CodecError::Truncated { expected: 4, found: frame.remaining() });
    }
    let body_len = frame.get_u32() as usize;
    if body_len > MAX_BODY_BYTES {
        return Err(CodecError::FieldTooLarge {
            field: "body",
            len: body_len,
            max: MAX_BODY_BYTES,
        });
    }
    if frame.remaining() < body_len {
        return Err(CodecError::Truncated { expected: body_len, found: frame.remaining() });
    }
    let body = frame.split_to(body_len);

    Ok(Packet::from_parts(channel_id, correlation_id, header, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::channels;

    fn round_trip(packet: Packet) -> Packet {
        let mut frame = encode_frame(packet);
        let len = frame.get_u32() as usize;
        check_frame_len(len).unwrap();
        assert_eq!(frame.remaining(), len);
        decode_frame(frame).unwrap()
    }

    #[test]
    fn test_round_trip_plain() {
        let packet = Packet::new(
            channels::SERVICE_INFO_PUBLISH,
            Document::new().append("source", "Lobby-1"),
            vec![1u8, 2, 3, 4],
        );
        assert_eq!(round_trip(packet.clone()), packet);
    }

    #[test]
    fn test_round_trip_with_correlation() {
        let packet = Packet::new(channels::DRIVER_API, Document::new(), Bytes::new())
            .with_correlation_id(CorrelationId::new());
        assert_eq!(round_trip(packet.clone()), packet);
    }

    #[test]
    fn test_nil_correlation_decodes_to_none() {
        let packet = Packet::new(channels::CHANNEL_MESSAGING, Document::new(), Bytes::new());
        let decoded = round_trip(packet);
        assert!(decoded.correlation_id().is_none());
    }

    #[test]
    fn test_empty_frame_rejected() {
        assert!(check_frame_len(3).is_err());
        assert!(check_frame_len(MAX_FRAME_BYTES + 1).is_err());
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let mut frame = encode_frame(Packet::new(
            channels::DRIVER_API,
            Document::new().append("k", "v"),
            vec![0u8; 32],
        ));
        let _ = frame.get_u32();
        let cut = frame.slice(..frame.len() - 8);
        assert!(matches!(decode_frame(cut), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_oversized_body_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16(channels::DRIVER_API);
        buf.put_slice(&[0u8; 16]);
        buf.put_u32(0);
        buf.put_u32((MAX_BODY_BYTES + 1) as u32);
        assert!(matches!(
            decode_frame(buf.freeze()),
            Err(CodecError::FieldTooLarge { field: "body", .. })
        ));
    }

    #[test]
    fn test_malformed_header_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16(channels::DRIVER_API);
        buf.put_slice(&[0u8; 16]);
        buf.put_u32(4);
        buf.put_slice(b"not{");
        buf.put_u32(0);
        assert!(matches!(
            decode_frame(buf.freeze()),
            Err(CodecError::MalformedHeader(_))
        ));
    }
}
