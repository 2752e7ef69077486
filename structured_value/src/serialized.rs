//! Transport-safe form of a value graph

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a composite node within one serialized value
///
/// Assigned in pre-order during encoding. A [`SerializedValue::Ref`]
/// always points at a node emitted earlier in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// Tagged tree produced by the encoder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum SerializedValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(#[serde(with = "number")] f64),
    String(String),
    Array {
        id: NodeId,
        items: Vec<SerializedValue>,
    },
    Object {
        id: NodeId,
        entries: Vec<(String, SerializedValue)>,
    },
    /// Back-reference to a composite node that was already emitted
    Ref(NodeId),
    /// Index into the ports carried next to the message
    PortRef(u32),
    /// Placeholder for a node a peer could not represent
    Unsupported { kind: String },
}

impl SerializedValue {
    /// Returns true if the tree references any transferred port
    pub fn has_port_refs(&self) -> bool {
        match self {
            SerializedValue::PortRef(_) => true,
            SerializedValue::Array { items, .. } => items.iter().any(Self::has_port_refs),
            SerializedValue::Object { entries, .. } => {
                entries.iter().any(|(_, value)| value.has_port_refs())
            }
            _ => false,
        }
    }
}

// JSON has no literal for NaN or the infinities, so those travel as strings.
mod number {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("Infinity")
        } else {
            serializer.serialize_str("-Infinity")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Literal(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Literal(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid number literal {other:?}"))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape_is_tagged() {
        let value = SerializedValue::Array {
            id: NodeId::new(0),
            items: vec![SerializedValue::Bool(true), SerializedValue::Ref(NodeId::new(0))],
        };
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(
            json,
            r#"{"t":"array","v":{"id":0,"items":[{"t":"bool","v":true},{"t":"ref","v":0}]}}"#
        );
    }

    #[test]
    fn test_non_finite_numbers_survive_json() {
        for n in [f64::INFINITY, f64::NEG_INFINITY] {
            let json = serde_json::to_string(&SerializedValue::Number(n)).unwrap();
            let back: SerializedValue = serde_json::from_str(&json).unwrap();
            assert_eq!(back, SerializedValue::Number(n));
        }

        let json = serde_json::to_string(&SerializedValue::Number(f64::NAN)).unwrap();
        assert_eq!(json, r#"{"t":"number","v":"NaN"}"#);
        match serde_json::from_str::<SerializedValue>(&json).unwrap() {
            SerializedValue::Number(n) => assert!(n.is_nan()),
            other => panic!("Expected number, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_number_literal_is_rejected() {
        let result = serde_json::from_str::<SerializedValue>(r#"{"t":"number","v":"lots"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_has_port_refs() {
        let plain = SerializedValue::Object {
            id: NodeId::new(0),
            entries: vec![("a".to_string(), SerializedValue::Null)],
        };
        assert!(!plain.has_port_refs());

        let with_port = SerializedValue::Object {
            id: NodeId::new(0),
            entries: vec![("p".to_string(), SerializedValue::PortRef(0))],
        };
        assert!(with_port.has_port_refs());
    }
}
