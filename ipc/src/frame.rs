//! Byte framing for envelopes
//!
//! Frames are JSON documents carrying the protocol version next to the
//! envelope. Ports never appear in the bytes; they travel alongside them
//! in a [`crate::TransportMessage`].

use crate::message::{Envelope, SchemaVersion, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default upper bound on an inbound frame
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Errors when encoding or decoding frames
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame length {len} exceeds max {max}")]
    TooLarge { len: usize, max: usize },

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Schema mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        expected: SchemaVersion,
        actual: SchemaVersion,
    },
}

#[derive(Serialize)]
struct OutgoingFrame<'a> {
    version: SchemaVersion,
    envelope: &'a Envelope,
}

#[derive(Deserialize)]
struct IncomingFrame {
    version: SchemaVersion,
    envelope: Envelope,
}

/// Serializes an envelope into frame bytes
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>, FrameError> {
    let frame = OutgoingFrame {
        version: PROTOCOL_VERSION,
        envelope,
    };
    serde_json::to_vec(&frame).map_err(|err| FrameError::Malformed(err.to_string()))
}

/// Parses frame bytes, enforcing `max_len` and version compatibility
pub fn decode_frame(bytes: &[u8], max_len: usize) -> Result<Envelope, FrameError> {
    if bytes.len() > max_len {
        return Err(FrameError::TooLarge {
            len: bytes.len(),
            max: max_len,
        });
    }
    let frame: IncomingFrame =
        serde_json::from_slice(bytes).map_err(|err| FrameError::Malformed(err.to_string()))?;
    if !frame.version.is_compatible_with(&PROTOCOL_VERSION) {
        return Err(FrameError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual: frame.version,
        });
    }
    Ok(frame.envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelAddress, InvokeReply, Message, RequestKind};
    use core_types::CorrelationId;
    use structured_value::{
        encode_plain, CodecLimits, EncodeError, SerializedValue, Value, MAX_SUPPORTED_DEPTH,
    };

    fn nested(levels: usize, wrap: fn(Value) -> Value) -> Value {
        let mut value = Value::from("leaf");
        for _ in 0..levels {
            value = wrap(value);
        }
        value
    }

    fn in_object(value: Value) -> Value {
        Value::object([("k", value)])
    }

    fn in_array(value: Value) -> Value {
        Value::array(vec![value])
    }

    /// Deepest nesting of one shape the encoder accepts when only the wire limits it
    fn deepest(wrap: fn(Value) -> Value) -> SerializedValue {
        let limits = CodecLimits { max_depth: usize::MAX };
        let mut levels = 0;
        while encode_plain(&nested(levels + 1, wrap), &limits).is_ok() {
            levels += 1;
        }
        assert!(matches!(
            encode_plain(&nested(levels + 1, wrap), &limits),
            Err(EncodeError::TooDeep(_))
        ));
        encode_plain(&nested(levels, wrap), &limits).unwrap()
    }

    fn every_envelope(payload: SerializedValue) -> Vec<Envelope> {
        let message = Message::new(ChannelAddress::Host, false, "deep", payload.clone());
        vec![
            Envelope::Message(message.clone()),
            Envelope::Request {
                correlation_id: CorrelationId::from_raw(9),
                kind: RequestKind::Sync,
                message,
            },
            Envelope::Reply(InvokeReply::ok(CorrelationId::from_raw(9), payload)),
        ]
    }

    #[test]
    fn test_frame_roundtrip() {
        let envelope = Envelope::Message(Message::new(
            ChannelAddress::Broadcast,
            false,
            "news",
            SerializedValue::String("hello".to_string()),
        ));
        let bytes = encode_frame(&envelope).unwrap();
        assert_eq!(decode_frame(&bytes, DEFAULT_MAX_FRAME_LEN).unwrap(), envelope);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let envelope = Envelope::Reply(InvokeReply::ok(
            CorrelationId::from_raw(1),
            SerializedValue::String("x".repeat(64)),
        ));
        let bytes = encode_frame(&envelope).unwrap();
        let result = decode_frame(&bytes, 16);
        assert!(matches!(result, Err(FrameError::TooLarge { max: 16, .. })));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let result = decode_frame(&[0xFF, 0xFF, 0xFF], DEFAULT_MAX_FRAME_LEN);
        assert!(matches!(result, Err(FrameError::Malformed(_))));
    }

    #[test]
    fn test_incompatible_version_rejected() {
        let bytes = br#"{"version":{"major":2,"minor":0},"envelope":{"reply":{"correlation_id":1,"result":null,"error":null}}}"#;
        let result = decode_frame(bytes, DEFAULT_MAX_FRAME_LEN);
        assert_eq!(
            result,
            Err(FrameError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: SchemaVersion::new(2, 0),
            })
        );
    }

    #[test]
    fn test_newer_minor_version_accepted() {
        let bytes = br#"{"version":{"major":1,"minor":7},"envelope":{"reply":{"correlation_id":1,"result":null,"error":null}}}"#;
        let envelope = decode_frame(bytes, DEFAULT_MAX_FRAME_LEN).unwrap();
        assert_eq!(
            envelope,
            Envelope::Reply(InvokeReply {
                correlation_id: CorrelationId::from_raw(1),
                result: None,
                error: None,
            })
        );
    }

    #[test]
    fn test_deepest_encodable_values_survive_framing() {
        let payloads = [
            encode_plain(&nested(MAX_SUPPORTED_DEPTH, in_object), &CodecLimits::default()).unwrap(),
            encode_plain(&nested(MAX_SUPPORTED_DEPTH, in_array), &CodecLimits::default()).unwrap(),
            deepest(in_object),
            deepest(in_array),
        ];
        for payload in payloads {
            for envelope in every_envelope(payload.clone()) {
                let bytes = encode_frame(&envelope).unwrap();
                assert_eq!(decode_frame(&bytes, DEFAULT_MAX_FRAME_LEN).unwrap(), envelope);
            }
        }
    }
}
