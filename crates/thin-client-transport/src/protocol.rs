//! Wire framing for envelopes (JSON, opaque blobs as base64).

use bytes::Bytes;
use thin_client_core::Envelope;
use thiserror::Error;

/// Largest frame either side accepts.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Frame encoding or decoding error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Frame of {0} bytes exceeds the limit")]
    TooLarge(usize),
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

/// Encode one envelope as a frame.
///
/// # Errors
/// Returns error if the encoded frame is too large.
pub fn encode_frame(envelope: &Envelope) -> Result<Bytes, CodecError> {
    let frame = serde_json::to_vec(envelope).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if frame.len() > MAX_FRAME_BYTES {
        return Err(CodecError::TooLarge(frame.len()));
    }
    Ok(Bytes::from(frame))
}

/// Decode one frame into an envelope.
///
/// # Errors
/// Returns error if the frame is too large or not a valid envelope.
pub fn decode_frame(frame: &[u8]) -> Result<Envelope, CodecError> {
    if frame.len() > MAX_FRAME_BYTES {
        return Err(CodecError::TooLarge(frame.len()));
    }
    serde_json::from_slice(frame).map_err(|e| CodecError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use thin_client_core::{
        Payload,
        envelope::ProtocolControlMessage,
        features::render_surface::{LifecycleKind, LifecycleNotice},
    };

    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let env = Envelope::new(
            2,
            Payload::RenderSurfaceLifecycle(LifecycleNotice {
                surface_id: 9,
                kind: LifecycleKind::Initialized,
            }),
        );
        let frame = encode_frame(&env).unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), env);
    }

    #[test]
    fn test_frame_serialization() {
        let env = Envelope::protocol_control(ProtocolControlMessage::StartConnection {
            client_token: "token".into(),
            protocol_version: 1,
        });
        let frame = encode_frame(&env).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.contains("protocol_control"));
        assert!(text.contains("start_connection"));
    }

    #[test]
    fn test_malformed_frame() {
        let err = decode_frame(br#"{"target_tab_id":1,"payload":{"feature":"bogus"}}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_oversized_frame() {
        let frame = vec![b' '; MAX_FRAME_BYTES + 1];
        assert_eq!(
            decode_frame(&frame).unwrap_err(),
            CodecError::TooLarge(MAX_FRAME_BYTES + 1)
        );
    }
}
