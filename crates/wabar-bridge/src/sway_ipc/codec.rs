//! i3-ipc frame encoding and decoding
//!
//! Every message on the socket is framed as:
//!
//! ```text
//! +----------+----------------+--------------+-----------------+
//! | "i3-ipc" | length (u32le) | type (u32le) | payload (bytes) |
//! +----------+----------------+--------------+-----------------+
//!    6 bytes      4 bytes         4 bytes       `length` bytes
//! ```
//!
//! `decode` works on whatever bytes have arrived so far; `FrameBuffer` keeps
//! the leftovers between socket reads.

use super::error::ProtocolError;
use super::types::EVENT_MASK;

/// Protocol magic that starts every frame
pub const MAGIC: &[u8; 6] = b"i3-ipc";

/// Magic plus length plus type
pub const HEADER_LEN: usize = MAGIC.len() + 4 + 4;

/// Default cap on a single payload (16 MiB)
pub const DEFAULT_MAX_PAYLOAD: u32 = 16 * 1024 * 1024;

/// One typed, length-prefixed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Events have the high bit of the type set; replies do not
    pub fn is_event(&self) -> bool {
        self.kind & EVENT_MASK != 0
    }

    /// Serialize this frame
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self.kind, &self.payload)
    }
}

/// Encode a frame: magic, little-endian length and type, then the payload
pub fn encode(kind: u32, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let length = u32::try_from(payload.len()).map_err(|_| ProtocolError::LengthOverflow {
        length: payload.len() as u64,
        max: u32::MAX,
    })?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&length.to_le_bytes());
    bytes.extend_from_slice(&kind.to_le_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Decode one frame from the front of `buf` with the default payload cap
pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    decode_with_limit(buf, DEFAULT_MAX_PAYLOAD)
}

/// Decode one frame from the front of `buf`
///
/// Returns `Ok(None)` until the whole frame is buffered, otherwise the frame
/// and the number of bytes it occupied. Errors never consume input. The magic
/// is checked as soon as its first bytes arrive and the length as soon as the
/// header is complete, so a corrupt peer is caught before its payload is
/// waited for or allocated.
pub fn decode_with_limit(
    buf: &[u8],
    max_payload: u32,
) -> Result<Option<(Frame, usize)>, ProtocolError> {
    let magic_seen = buf.len().min(MAGIC.len());
    if buf[..magic_seen] != MAGIC[..magic_seen] {
        return Err(ProtocolError::BadMagic {
            found: buf[..magic_seen].to_vec(),
        });
    }

    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let length = read_u32(&buf[6..10]);
    let kind = read_u32(&buf[10..14]);

    if length > max_payload {
        return Err(ProtocolError::LengthOverflow {
            length: u64::from(length),
            max: max_payload,
        });
    }

    let total = HEADER_LEN + length as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let frame = Frame::new(kind, &buf[HEADER_LEN..total]);
    Ok(Some((frame, total)))
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw)
}

/// Accumulates socket bytes and hands out complete frames
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    max_payload: u32,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(max_payload: u32) -> Self {
        Self {
            buf: Vec::new(),
            max_payload,
        }
    }

    /// Append freshly read bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        match decode_with_limit(&self.buf, self.max_payload)? {
            Some((frame, consumed)) => {
                self.buf.drain(..consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    /// Bytes of a partial frame still waiting for the rest
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frames() -> Vec<Frame> {
        vec![
            Frame::new(6, ""),
            Frame::new(6, r#"["bar-0"]"#),
            Frame::new(0x8000_0002, r#"{"change":"resize","pango_markup":false}"#),
            Frame::new(2, r#"{"success":true}"#),
        ]
    }

    fn concat(frames: &[Frame]) -> Vec<u8> {
        frames.iter().flat_map(|f| f.encode().unwrap()).collect()
    }

    #[test]
    fn test_encode_layout_is_little_endian() {
        let bytes = encode(0x8000_0004, b"{}").unwrap();

        assert_eq!(&bytes[..6], b"i3-ipc");
        assert_eq!(&bytes[6..10], &[2, 0, 0, 0]);
        assert_eq!(&bytes[10..14], &[0x04, 0, 0, 0x80]);
        assert_eq!(&bytes[14..], b"{}");
    }

    #[test]
    fn test_decode_needs_more_bytes() {
        let bytes = encode(6, b"bar-0").unwrap();

        for cut in 0..bytes.len() {
            assert_eq!(decode(&bytes[..cut]).unwrap(), None, "cut at {}", cut);
        }
        let (frame, consumed) = decode(&bytes).unwrap().unwrap();
        assert_eq!(frame, Frame::new(6, "bar-0"));
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let mut bytes = encode(1, b"[]").unwrap();
        let first_len = bytes.len();
        bytes.extend_from_slice(&encode(2, b"{}").unwrap()[..5]);

        let (frame, consumed) = decode(&bytes).unwrap().unwrap();
        assert_eq!(frame.kind, 1);
        assert_eq!(consumed, first_len);
    }

    #[test]
    fn test_bad_magic() {
        let err = decode(b"i3-xpc\x00\x00\x00\x00\x00\x00\x00\x00").unwrap_err();
        assert!(matches!(err, ProtocolError::BadMagic { .. }));
    }

    #[test]
    fn test_bad_magic_detected_on_partial_header() {
        let err = decode(b"GET").unwrap_err();
        match err {
            ProtocolError::BadMagic { found } => assert_eq!(found, b"GET"),
            other => panic!("Expected BadMagic, got: {:?}", other),
        }
    }

    #[test]
    fn test_length_overflow_consumes_nothing() {
        let mut header = MAGIC.to_vec();
        header.extend_from_slice(&(DEFAULT_MAX_PAYLOAD + 1).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());

        let err = decode(&header).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::LengthOverflow { max: DEFAULT_MAX_PAYLOAD, .. }
        ));

        let mut buffer = FrameBuffer::new();
        buffer.extend(&header);
        assert!(buffer.next_frame().is_err());
        assert_eq!(buffer.len(), HEADER_LEN, "no bytes may be consumed");
    }

    #[test]
    fn test_custom_limit() {
        let bytes = encode(0, b"0123456789").unwrap();

        assert!(decode_with_limit(&bytes, 10).unwrap().is_some());
        assert!(matches!(
            decode_with_limit(&bytes, 9),
            Err(ProtocolError::LengthOverflow { length: 10, max: 9 })
        ));
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        let frames = sample_frames();
        let stream = concat(&frames);

        for chunk_size in 1..=stream.len() {
            let mut buffer = FrameBuffer::new();
            let mut decoded = Vec::new();

            for chunk in stream.chunks(chunk_size) {
                buffer.extend(chunk);
                while let Some(frame) = buffer.next_frame().unwrap() {
                    decoded.push(frame);
                }
            }

            assert_eq!(decoded, frames, "chunk size {}", chunk_size);
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn test_is_event() {
        assert!(Frame::new(0x8000_0006, "{}").is_event());
        assert!(!Frame::new(6, "{}").is_event());
    }
}
