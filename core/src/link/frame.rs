//! Frame codec for MTU-limited transfers.
//!
//! Wire format, bit-exact: `[packet_id: u8][total_fragments: u8]
//! [fragment_index: u8]` followed by up to `mtu - 3` payload bytes. The
//! final chunk's length is implicit from the frame length. There is no
//! checksum; integrity beyond what the radio provides is out of scope.

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Size of the fragment header in bytes.
pub const HEADER_SIZE: usize = 3;

/// Maximum fragments one message can span (header width is one byte).
pub const MAX_FRAGMENTS: usize = u8::MAX as usize;

/// Errors for fragmentation and frame decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// MTU leaves no room for payload after the header.
    #[error("Invalid MTU for fragmentation: {0}")]
    InvalidMtu(u16),
    /// Payload would need more than 255 fragments at this MTU.
    #[error("Payload of {len} bytes exceeds {max} fragments at MTU {mtu}")]
    PayloadTooLarge { len: usize, mtu: u16, max: usize },
    /// Frame shorter than the 3-byte header.
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),
}

/// Decoded fragment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Short-lived identifier grouping the fragments of one message.
    pub packet_id: u8,
    /// Total number of fragments in the message.
    pub total_fragments: u8,
    /// Index of this fragment (0-based).
    pub fragment_index: u8,
}

impl FrameHeader {
    /// Serialize to the 3-byte wire header.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        [self.packet_id, self.total_fragments, self.fragment_index]
    }

    /// Split a raw frame into its header and payload chunk.
    pub fn decode(frame: &[u8]) -> Result<(FrameHeader, &[u8]), FrameError> {
        if frame.len() < HEADER_SIZE {
            return Err(FrameError::FrameTooShort(frame.len()));
        }
        let header = FrameHeader {
            packet_id: frame[0],
            total_fragments: frame[1],
            fragment_index: frame[2],
        };
        Ok((header, &frame[HEADER_SIZE..]))
    }
}

/// Maximum payload bytes per fragment at the given MTU.
pub fn max_chunk(mtu: u16) -> Result<usize, FrameError> {
    let mtu = mtu as usize;
    if mtu <= HEADER_SIZE {
        return Err(FrameError::InvalidMtu(mtu as u16));
    }
    Ok(mtu - HEADER_SIZE)
}

/// Derive a packet id from the coarse wall clock, truncated to one byte.
///
/// Ids wrap every 256 ms and are only meaningful for the lifetime of one
/// in-flight message per peer; two messages from the same peer can collide
/// before the first completes. The reassembly buffer flags that case rather
/// than papering over it.
pub fn next_packet_id() -> u8 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_millis() & 0xFF) as u8)
        .unwrap_or(0)
}

/// Split a payload into MTU-sized frames, each prefixed with the 3-byte
/// header.
///
/// An empty payload yields exactly one frame carrying an empty chunk, so a
/// zero-length message still round-trips. Concatenating the chunks of the
/// returned frames in index order reproduces `payload` exactly.
pub fn fragment(payload: &[u8], mtu: u16) -> Result<Vec<Vec<u8>>, FrameError> {
    fragment_with_id(payload, mtu, next_packet_id())
}

/// [`fragment`] with a caller-chosen packet id (tests pin ids with this).
pub fn fragment_with_id(payload: &[u8], mtu: u16, packet_id: u8) -> Result<Vec<Vec<u8>>, FrameError> {
    let max_payload = max_chunk(mtu)?;

    let total = if payload.is_empty() {
        1
    } else {
        (payload.len() + max_payload - 1) / max_payload
    };
    if total > MAX_FRAGMENTS {
        return Err(FrameError::PayloadTooLarge {
            len: payload.len(),
            mtu,
            max: MAX_FRAGMENTS,
        });
    }

    let mut frames = Vec::with_capacity(total);
    for index in 0..total {
        let start = index * max_payload;
        let end = (start + max_payload).min(payload.len());
        let header = FrameHeader {
            packet_id,
            total_fragments: total as u8,
            fragment_index: index as u8,
        };
        let mut frame = Vec::with_capacity(HEADER_SIZE + (end - start));
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(&payload[start..end]);
        frames.push(frame);
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader {
            packet_id: 0xAB,
            total_fragments: 5,
            fragment_index: 2,
        };
        let mut frame = header.to_bytes().to_vec();
        frame.extend_from_slice(b"chunk");

        let (decoded, chunk) = FrameHeader::decode(&frame).expect("decode");
        assert_eq!(decoded, header);
        assert_eq!(chunk, b"chunk");
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(
            FrameHeader::decode(&[1, 2]),
            Err(FrameError::FrameTooShort(2))
        );
        assert_eq!(FrameHeader::decode(&[]), Err(FrameError::FrameTooShort(0)));
    }

    #[test]
    fn test_decode_header_only_frame() {
        let (header, chunk) = FrameHeader::decode(&[9, 1, 0]).expect("decode");
        assert_eq!(header.packet_id, 9);
        assert!(chunk.is_empty());
    }

    #[test]
    fn test_invalid_mtu_rejected() {
        for mtu in [0u16, 1, 2, 3] {
            assert_eq!(fragment(b"x", mtu), Err(FrameError::InvalidMtu(mtu)));
        }
    }

    #[test]
    fn test_minimum_viable_mtu() {
        // mtu = 4 leaves one payload byte per frame
        let frames = fragment(b"z", 4).expect("fragment");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 4);
    }

    #[test]
    fn test_default_mtu_chunking() {
        // mtu=23 -> 20-byte chunks; 100 bytes -> 5 frames
        let payload = vec![0u8; 100];
        let frames = fragment_with_id(&payload, 23, 0x42).expect("fragment");
        assert_eq!(frames.len(), 5);
        for (i, frame) in frames.iter().enumerate() {
            let (header, chunk) = FrameHeader::decode(frame).expect("decode");
            assert_eq!(header.packet_id, 0x42);
            assert_eq!(header.total_fragments, 5);
            assert_eq!(header.fragment_index, i as u8);
            assert_eq!(chunk.len(), 20);
            assert!(chunk.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_uneven_final_chunk() {
        let payload: Vec<u8> = (0..45).map(|i| i as u8).collect();
        let frames = fragment_with_id(&payload, 23, 1).expect("fragment");
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].len(), HEADER_SIZE + 5);

        let mut rebuilt = Vec::new();
        for frame in &frames {
            let (_, chunk) = FrameHeader::decode(frame).expect("decode");
            rebuilt.extend_from_slice(chunk);
        }
        assert_eq!(rebuilt, payload);
    }

    #[test]
    fn test_empty_payload_single_frame() {
        let frames = fragment_with_id(&[], 23, 7).expect("fragment");
        assert_eq!(frames.len(), 1);
        let (header, chunk) = FrameHeader::decode(&frames[0]).expect("decode");
        assert_eq!(header.total_fragments, 1);
        assert_eq!(header.fragment_index, 0);
        assert!(chunk.is_empty());
    }

    #[test]
    fn test_payload_at_fragment_cap() {
        let max = 255 * 20;
        let frames = fragment_with_id(&vec![1u8; max], 23, 0).expect("fragment");
        assert_eq!(frames.len(), 255);

        let result = fragment_with_id(&vec![1u8; max + 1], 23, 0);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }
}
