//! Codec for encoding and decoding control frames.

use crate::frame::Frame;

/// Maximum accepted size of a single text frame (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame exceeds [`MAX_FRAME_SIZE`]
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Invalid frame format
    #[error("Invalid frame format: {0}")]
    InvalidFormat(String),
}

/// Encode a frame to its JSON text form.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized.
pub fn encode_frame(frame: &Frame) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::InvalidFormat(e.to_string()))
}

/// Decode a frame from its JSON text form.
///
/// # Errors
///
/// Returns an error if the text is oversized or not a valid frame.
pub fn decode_frame(text: &str) -> Result<Frame, CodecError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(text.len()));
    }

    serde_json::from_str(text).map_err(|e| CodecError::InvalidFormat(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::frame::{Notification, Request, Response};
    use serde_json::json;

    #[test]
    fn test_decode_wire_shapes() {
        let n = decode_frame(
            r#"{"type":"notification","method":"mediaNodeReady","data":{"load":0.1}}"#,
        )
        .unwrap();
        assert_eq!(
            n,
            Frame::Notification(Notification::new("mediaNodeReady", json!({ "load": 0.1 })))
        );

        let r = decode_frame(r#"{"type":"request","id":4,"method":"getRouter"}"#).unwrap();
        assert_eq!(r, Frame::Request(Request::new(4, "getRouter", json!({}))));

        let e = decode_frame(r#"{"type":"response","id":4,"error":"no capacity"}"#).unwrap();
        assert_eq!(e, Frame::Response(Response::error(4, "no capacity")));
    }

    #[test]
    fn test_encoded_response_omits_absent_fields() {
        let text = encode_frame(&Frame::Response(Response::ok(2, json!({ "id": "r" })))).unwrap();
        assert!(text.contains(r#""type":"response""#));
        assert!(!text.contains("error"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_frame("not json"),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(
            decode_frame(r#"{"type":"bogus"}"#),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let text = "x".repeat(MAX_FRAME_SIZE + 1);
        assert!(matches!(
            decode_frame(&text),
            Err(CodecError::FrameTooLarge(_))
        ));
    }
}
