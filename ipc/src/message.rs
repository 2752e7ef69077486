//! Message types and envelope structure

use crate::channel::{ChannelAddress, ChannelKey};
use core_types::{CorrelationId, HostedContextId, PortKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use structured_value::SerializedValue;

/// Wire schema version
///
/// Peers with the same major version understand each other; minor bumps
/// only add optional fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Major version (breaking changes)
    pub major: u32,
    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl SchemaVersion {
    /// Creates a new schema version
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Checks if this version is compatible with another
    pub fn is_compatible_with(&self, other: &SchemaVersion) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

/// Version spoken by this crate
pub const PROTOCOL_VERSION: SchemaVersion = SchemaVersion::new(1, 0);

/// A message on a named channel
///
/// Immutable once handed to the transport. `transferred_ports` lists the
/// keys of the ports travelling next to the frame, in the order the payload's
/// port references index them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Routing target at the host
    pub destination: ChannelAddress,
    /// Framework-owned channel namespace
    pub internal: bool,
    /// Channel name
    pub channel: String,
    /// Encoded argument value
    pub payload: SerializedValue,
    #[serde(default)]
    pub transferred_ports: Vec<PortKey>,
    /// Originating hosted context, filled in by the host when relaying
    #[serde(default)]
    pub source: Option<HostedContextId>,
}

impl Message {
    /// Creates a message without ports
    pub fn new(
        destination: ChannelAddress,
        internal: bool,
        channel: impl Into<String>,
        payload: SerializedValue,
    ) -> Self {
        Self {
            destination,
            internal,
            channel: channel.into(),
            payload,
            transferred_ports: Vec::new(),
            source: None,
        }
    }

    /// Declares the ports carried with this message
    pub fn with_ports(mut self, ports: Vec<PortKey>) -> Self {
        self.transferred_ports = ports;
        self
    }

    /// Sets the originating hosted context
    pub fn with_source(mut self, source: HostedContextId) -> Self {
        self.source = Some(source);
        self
    }

    /// Routing key of this message
    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.internal, self.channel.clone())
    }
}

/// How the sender waits for a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Promise-style; the sender keeps running
    Invoke,
    /// The sender is suspended until the reply arrives
    Sync,
}

/// Reply to a correlated request
///
/// Exactly one of `result` and `error` is expected to be set; a reply with
/// neither resolves to `undefined`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeReply {
    pub correlation_id: CorrelationId,
    pub result: Option<SerializedValue>,
    pub error: Option<String>,
}

impl InvokeReply {
    pub fn ok(correlation_id: CorrelationId, result: SerializedValue) -> Self {
        Self {
            correlation_id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(correlation_id: CorrelationId, error: impl Into<String>) -> Self {
        Self {
            correlation_id,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Everything that crosses the client/host boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Envelope {
    /// Uncorrelated message, in either direction
    Message(Message),
    /// Client to host request expecting an [`InvokeReply`]
    Request {
        correlation_id: CorrelationId,
        kind: RequestKind,
        message: Message,
    },
    /// Host to client reply
    Reply(InvokeReply),
}

impl Envelope {
    /// Ports declared by the envelope
    pub fn declared_ports(&self) -> &[PortKey] {
        match self {
            Envelope::Message(message) | Envelope::Request { message, .. } => {
                &message.transferred_ports
            }
            Envelope::Reply(_) => &[],
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Message(_) => "message",
            Envelope::Request { .. } => "request",
            Envelope::Reply(_) => "reply",
        }
    }
}
