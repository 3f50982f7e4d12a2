//! A single decoded line of the JSON-lines protocol

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::ProtocolError;

/// Default maximum length of one inbound line (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// One newline-delimited frame with the line terminator stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    /// Wrap a payload that has already been stripped of its terminator
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Raw payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Lossy text view, for logging
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Deserialize the payload as a JSON message
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Ping {
        #[serde(rename = "type")]
        kind: String,
    }

    #[test]
    fn test_parse_json_payload() {
        let frame = Frame::new(&b"{\"type\":\"ping\"}"[..]);
        let ping: Ping = frame.parse().unwrap();
        assert_eq!(ping.kind, "ping");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let frame = Frame::new(&b"not json"[..]);
        let err = frame.parse::<Ping>().unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_text_is_lossy() {
        let frame = Frame::new(vec![b'o', b'k', 0xff]);
        assert!(frame.text().starts_with("ok"));
        assert_eq!(frame.len(), 3);
    }
}
