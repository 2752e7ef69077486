//! Encoding value graphs into [`SerializedValue`] trees and back
//!
//! The encoder walks the graph once, keeping a table of composite nodes it
//! has already emitted (keyed by allocation identity). A node seen a second
//! time, whether shared or part of a cycle, becomes a [`SerializedValue::Ref`]
//! to its first occurrence. The table lives only for the duration of one
//! [`encode`] call.
//!
//! The decoder registers each composite node before decoding its children,
//! so back-references resolve to the very same `Rc` and the original
//! sharing topology is rebuilt.

use crate::serialized::{NodeId, SerializedValue};
use crate::value::Value;
use core_types::PortId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;
use tracing::trace;

/// JSON nesting available to one encoded value
///
/// serde_json refuses documents with more than 127 nested containers, and
/// the frame around a payload takes up to four of them.
pub const MAX_WIRE_DEPTH: usize = 123;

/// JSON levels an array adds above its items: the tagged wrapper, the node
/// body and the item list
const ARRAY_WIRE_COST: usize = 3;

/// JSON levels an object adds above its values: the tagged wrapper, the node
/// body, the entry list and the `[key, value]` pair
const OBJECT_WIRE_COST: usize = 4;

/// Every leaf is one tagged wrapper
const LEAF_WIRE_COST: usize = 1;

/// Deepest value nesting the wire can carry for any shape
///
/// The worst case is a chain of objects ending in a leaf.
pub const MAX_SUPPORTED_DEPTH: usize = (MAX_WIRE_DEPTH - LEAF_WIRE_COST) / OBJECT_WIRE_COST;

/// Default nesting limit
pub const DEFAULT_MAX_DEPTH: usize = MAX_SUPPORTED_DEPTH;

/// Errors raised while encoding a value graph
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The graph contains a node that cannot cross the process boundary
    #[error("Value of kind '{0}' cannot be serialized")]
    Unsupported(String),

    /// The graph references a port that is not in the transfer list
    #[error("{0} is referenced by the value but not listed for transfer")]
    PortNotTransferred(PortId),

    /// The graph is nested deeper than allowed
    #[error("Value nesting exceeds the limit of {0}")]
    TooDeep(usize),
}

/// Errors raised while decoding a serialized tree
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Back-reference to unknown {0}")]
    DanglingReference(NodeId),

    #[error("{0} appears more than once")]
    DuplicateNode(NodeId),

    #[error("Port reference {0} has no attached port")]
    MissingPort(u32),

    #[error("Peer sent an unsupported node of kind '{0}'")]
    Unsupported(String),
}

/// Limits applied while encoding
///
/// `max_depth` counts nested arrays and objects. Whatever it is set to, the
/// encoder also refuses values whose JSON form would exceed
/// [`MAX_WIRE_DEPTH`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecLimits {
    pub max_depth: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Maps ports listed for transfer to their slot in the outgoing message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferMap {
    slots: HashMap<PortId, u32>,
}

impl TransferMap {
    /// Builds a map from an ordered transfer list
    ///
    /// A port listed twice keeps its first slot.
    pub fn new(ports: &[PortId]) -> Self {
        let mut slots = HashMap::with_capacity(ports.len());
        for (slot, id) in ports.iter().enumerate() {
            slots.entry(*id).or_insert(slot as u32);
        }
        Self { slots }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn slot(&self, id: PortId) -> Option<u32> {
        self.slots.get(&id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Encodes `value`, resolving port references through `transfer`
///
/// The source graph is only borrowed immutably.
pub fn encode(
    value: &Value,
    transfer: &TransferMap,
    limits: &CodecLimits,
) -> Result<SerializedValue, EncodeError> {
    let mut encoder = Encoder {
        visited: HashMap::new(),
        next_id: 0,
        transfer,
        limits,
    };
    let encoded = encoder.encode_node(value, 0, 0)?;
    trace!(nodes = encoder.next_id, "encoded value graph");
    Ok(encoded)
}

/// Encodes a value that must not reference any port
pub fn encode_plain(value: &Value, limits: &CodecLimits) -> Result<SerializedValue, EncodeError> {
    encode(value, &TransferMap::empty(), limits)
}

/// Decodes `value`; `ports` holds the local ids of the attached ports, in
/// transfer order
pub fn decode(value: &SerializedValue, ports: &[PortId]) -> Result<Value, DecodeError> {
    let mut decoder = Decoder {
        nodes: HashMap::new(),
        ports,
    };
    decoder.decode_node(value)
}

/// Decodes a value that carries no ports
pub fn decode_plain(value: &SerializedValue) -> Result<Value, DecodeError> {
    decode(value, &[])
}

struct Encoder<'a> {
    visited: HashMap<*const (), NodeId>,
    next_id: u32,
    transfer: &'a TransferMap,
    limits: &'a CodecLimits,
}

impl Encoder<'_> {
    /// `wire` is the JSON nesting already used by the enclosing nodes
    fn encode_node(
        &mut self,
        value: &Value,
        depth: usize,
        wire: usize,
    ) -> Result<SerializedValue, EncodeError> {
        match value {
            Value::Undefined => Ok(SerializedValue::Undefined),
            Value::Null => Ok(SerializedValue::Null),
            Value::Bool(b) => Ok(SerializedValue::Bool(*b)),
            Value::Number(n) => Ok(SerializedValue::Number(*n)),
            Value::String(s) => Ok(SerializedValue::String(s.clone())),
            Value::Port(id) => self
                .transfer
                .slot(*id)
                .map(SerializedValue::PortRef)
                .ok_or(EncodeError::PortNotTransferred(*id)),
            Value::Function(_) => Err(EncodeError::Unsupported("function".to_string())),
            Value::Native(name) => Err(EncodeError::Unsupported(format!("native {name}"))),
            Value::Array(items) => {
                let inner = wire + ARRAY_WIRE_COST;
                let id = match self.enter(Rc::as_ptr(items) as *const (), depth, inner)? {
                    Entered::Seen(id) => return Ok(SerializedValue::Ref(id)),
                    Entered::New(id) => id,
                };
                let items = items
                    .borrow()
                    .iter()
                    .map(|item| self.encode_node(item, depth + 1, inner))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SerializedValue::Array { id, items })
            }
            Value::Object(entries) => {
                let inner = wire + OBJECT_WIRE_COST;
                let id = match self.enter(Rc::as_ptr(entries) as *const (), depth, inner)? {
                    Entered::Seen(id) => return Ok(SerializedValue::Ref(id)),
                    Entered::New(id) => id,
                };
                let entries = entries
                    .borrow()
                    .iter()
                    .map(|(key, item)| -> Result<_, EncodeError> {
                        Ok((key.clone(), self.encode_node(item, depth + 1, inner)?))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SerializedValue::Object { id, entries })
            }
        }
    }

    /// `inner` is the JSON nesting the node's children start at
    fn enter(
        &mut self,
        ptr: *const (),
        depth: usize,
        inner: usize,
    ) -> Result<Entered, EncodeError> {
        if let Some(id) = self.visited.get(&ptr) {
            return Ok(Entered::Seen(*id));
        }
        if depth >= self.limits.max_depth {
            return Err(EncodeError::TooDeep(self.limits.max_depth));
        }
        if inner + LEAF_WIRE_COST > MAX_WIRE_DEPTH {
            return Err(EncodeError::TooDeep(depth));
        }
        let id = NodeId::new(self.next_id);
        self.next_id += 1;
        self.visited.insert(ptr, id);
        Ok(Entered::New(id))
    }
}

enum Entered {
    New(NodeId),
    Seen(NodeId),
}

struct Decoder<'a> {
    nodes: HashMap<NodeId, Value>,
    ports: &'a [PortId],
}

impl Decoder<'_> {
    fn decode_node(&mut self, value: &SerializedValue) -> Result<Value, DecodeError> {
        match value {
            SerializedValue::Undefined => Ok(Value::Undefined),
            SerializedValue::Null => Ok(Value::Null),
            SerializedValue::Bool(b) => Ok(Value::Bool(*b)),
            SerializedValue::Number(n) => Ok(Value::Number(*n)),
            SerializedValue::String(s) => Ok(Value::String(s.clone())),
            SerializedValue::PortRef(slot) => self
                .ports
                .get(*slot as usize)
                .map(|id| Value::Port(*id))
                .ok_or(DecodeError::MissingPort(*slot)),
            SerializedValue::Ref(id) => self
                .nodes
                .get(id)
                .cloned()
                .ok_or(DecodeError::DanglingReference(*id)),
            SerializedValue::Unsupported { kind } => Err(DecodeError::Unsupported(kind.clone())),
            SerializedValue::Array { id, items } => {
                let node = Rc::new(RefCell::new(Vec::with_capacity(items.len())));
                self.register(*id, Value::Array(node.clone()))?;
                for item in items {
                    let decoded = self.decode_node(item)?;
                    node.borrow_mut().push(decoded);
                }
                Ok(Value::Array(node))
            }
            SerializedValue::Object { id, entries } => {
                let node = Rc::new(RefCell::new(Vec::with_capacity(entries.len())));
                self.register(*id, Value::Object(node.clone()))?;
                for (key, item) in entries {
                    let decoded = self.decode_node(item)?;
                    node.borrow_mut().push((key.clone(), decoded));
                }
                Ok(Value::Object(node))
            }
        }
    }

    fn register(&mut self, id: NodeId, node: Value) -> Result<(), DecodeError> {
        if self.nodes.insert(id, node).is_some() {
            return Err(DecodeError::DuplicateNode(id));
        }
        Ok(())
    }
}
