//! # Inter-Process Communication (IPC)
//!
//! Wire schema and transport seam shared by client contexts and the host.
//!
//! ## Architecture
//!
//! Every exchange is an [`Envelope`]:
//! - [`Envelope::Message`] for fire-and-forget traffic in either direction
//! - [`Envelope::Request`] for correlated calls from a client
//! - [`Envelope::Reply`] for the host's answer to a request
//!
//! Envelopes are framed into bytes with [`encode_frame`] and handed to a
//! [`Transport`] together with any ports being transferred.

pub mod channel;
pub mod frame;
pub mod message;
pub mod transport;

pub use channel::{ChannelAddress, ChannelKey};
pub use frame::{decode_frame, encode_frame, FrameError, DEFAULT_MAX_FRAME_LEN};
pub use message::{
    Envelope, InvokeReply, Message, RequestKind, SchemaVersion, PROTOCOL_VERSION,
};
pub use transport::{Transport, TransportError, TransportMessage};
