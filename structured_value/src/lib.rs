//! # Structured Values
//!
//! Conversion between the values a scripting context manipulates and the
//! tagged tree that crosses the process boundary.
//!
//! ## What can be serialized
//!
//! - primitives: undefined, null, booleans, numbers (including NaN and the
//!   infinities), strings
//! - arrays and string-keyed objects, nested and possibly shared or cyclic
//! - ports, but only when they are listed for transfer
//!
//! Functions and native handles are rejected with
//! [`EncodeError::Unsupported`]; nothing partial is ever produced.

pub mod codec;
pub mod serialized;
pub mod value;

pub use codec::{
    decode, decode_plain, encode, encode_plain, CodecLimits, DecodeError, EncodeError,
    TransferMap, DEFAULT_MAX_DEPTH, MAX_SUPPORTED_DEPTH, MAX_WIRE_DEPTH,
};
pub use serialized::{NodeId, SerializedValue};
pub use value::{ArrayRef, ObjectRef, Value};
