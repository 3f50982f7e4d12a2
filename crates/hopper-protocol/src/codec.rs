//! Tokio codec for newline-delimited JSON messages

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{Frame, MAX_FRAME_SIZE};

/// Codec that splits a byte stream on `\n` and encodes values as JSON lines
///
/// Decoding yields raw [`Frame`]s so that a malformed line can be reported
/// to the peer without tearing down the stream. Blank lines are skipped and
/// a trailing `\r` is stripped.
#[derive(Debug, Clone)]
pub struct JsonLinesCodec {
    /// Maximum inbound line length, terminator excluded
    max_length: usize,
    /// Offset already scanned for a newline in the current buffer
    next_index: usize,
}

impl JsonLinesCodec {
    /// Create a codec with the default frame limit
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_SIZE)
    }

    /// Create a codec with a custom frame limit
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }
}

impl Default for JsonLinesCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_terminator(line: &mut BytesMut) {
    if line.last() == Some(&b'\n') {
        line.truncate(line.len() - 1);
    }
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
}

impl Decoder for JsonLinesCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..].iter().position(|b| *b == b'\n');

            let Some(offset) = newline else {
                if src.len() > self.max_length {
                    return Err(ProtocolError::FrameTooLarge {
                        size: src.len(),
                        max: self.max_length,
                    });
                }
                // Remember how far we scanned so the next call resumes there
                self.next_index = src.len();
                return Ok(None);
            };

            let end = self.next_index + offset;
            self.next_index = 0;

            if end > self.max_length {
                return Err(ProtocolError::FrameTooLarge {
                    size: end,
                    max: self.max_length,
                });
            }

            let mut line = src.split_to(end + 1);
            strip_terminator(&mut line);

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Ok(Some(Frame::new(line.freeze())));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        // Peer closed without a final newline
        self.next_index = 0;
        if src.is_empty() {
            return Ok(None);
        }
        let mut line = src.split_to(src.len());
        strip_terminator(&mut line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(Frame::new(line.freeze())))
    }
}

impl<T: Serialize> Encoder<T> for JsonLinesCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;
        dst.reserve(payload.len() + 1);
        dst.put_slice(&payload);
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_decode_single_line() {
        let mut codec = JsonLinesCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"ping\"}\n"[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_bytes(), b"{\"type\":\"ping\"}");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_read() {
        let mut codec = JsonLinesCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":"[..]);

        // No newline yet
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\"ping\"}\r\n{\"type\"");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_bytes(), b"{\"type\":\"ping\"}");

        // Remainder stays buffered
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"{\"type\"");
    }

    #[test]
    fn test_decode_skips_blank_lines() {
        let mut codec = JsonLinesCodec::new();
        let mut buf = BytesMut::from(&b"\n  \r\n{}\n"[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_bytes(), b"{}");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_oversized_line() {
        let mut codec = JsonLinesCodec::with_max_length(8);
        let mut buf = BytesMut::from(&b"0123456789"[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { max: 8, .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_decode_eof_flushes_unterminated_line() {
        let mut codec = JsonLinesCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"ping\"}"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        let frame = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_bytes(), b"{\"type\":\"ping\"}");
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = JsonLinesCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(json!({"ok": true}), &mut buf).unwrap();
        codec.encode(json!({"ok": false}), &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let value: Value = first.parse().unwrap();
        assert_eq!(value["ok"], true);

        let second = codec.decode(&mut buf).unwrap().unwrap();
        let value: Value = second.parse().unwrap();
        assert_eq!(value["ok"], false);
    }
}
