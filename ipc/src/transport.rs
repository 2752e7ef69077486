//! Transport seam consumed by the bus

use crate::channel::ChannelAddress;
use ports::Port;
use thiserror::Error;

/// Errors reported by a transport
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The destination is gone
    #[error("Connection to {0} lost")]
    ConnectionLost(ChannelAddress),

    /// The message could not be handed off
    #[error("Failed to send message: {0}")]
    SendFailed(String),
}

/// Frame bytes plus the ports travelling with them
///
/// Ports are moved into the message at send time; until the receiving
/// context attaches them they belong to no context at all.
#[derive(Debug, Default)]
pub struct TransportMessage {
    pub bytes: Vec<u8>,
    pub ports: Vec<Port>,
}

impl TransportMessage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            ports: Vec::new(),
        }
    }

    pub fn with_ports(bytes: Vec<u8>, ports: Vec<Port>) -> Self {
        Self { bytes, ports }
    }
}

/// Ordered delivery of messages to a destination
///
/// Implementations must preserve send order per destination. Inbound
/// traffic is not part of this trait; transports push it into the
/// receiving context's inbound sink.
pub trait Transport {
    fn send(
        &mut self,
        destination: &ChannelAddress,
        message: TransportMessage,
    ) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(
        &mut self,
        destination: &ChannelAddress,
        message: TransportMessage,
    ) -> Result<(), TransportError> {
        (**self).send(destination, message)
    }
}
