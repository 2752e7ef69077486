//! Addressing and channel naming

use core_types::HostedContextId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the host should route a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelAddress {
    /// The top-level host process
    Host,
    /// The immediate parent that embeds this context
    Embedder,
    /// One specific hosted context
    HostedContext(HostedContextId),
    /// Every currently live hosted context
    Broadcast,
}

impl ChannelAddress {
    /// Address for an addressed send, honoring the broadcast flag
    pub fn targeted(broadcast_to_all: bool, target: HostedContextId) -> Self {
        if broadcast_to_all {
            ChannelAddress::Broadcast
        } else {
            ChannelAddress::HostedContext(target)
        }
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelAddress::Host => write!(f, "host"),
            ChannelAddress::Embedder => write!(f, "embedder"),
            ChannelAddress::HostedContext(id) => write!(f, "{}", id),
            ChannelAddress::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// Routing key for inbound messages
///
/// Internal (framework-owned) channels share the string space with user
/// channels, so the flag is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub internal: bool,
    pub channel: String,
}

impl ChannelKey {
    pub fn new(internal: bool, channel: impl Into<String>) -> Self {
        Self {
            internal,
            channel: channel.into(),
        }
    }

    pub fn user(channel: impl Into<String>) -> Self {
        Self::new(false, channel)
    }

    pub fn internal(channel: impl Into<String>) -> Self {
        Self::new(true, channel)
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.internal {
            write!(f, "internal:{}", self.channel)
        } else {
            write!(f, "{}", self.channel)
        }
    }
}
