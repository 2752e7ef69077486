//! # Core Types
//!
//! Identifiers shared by every crate of the messaging bus.
//!
//! ## Key Types
//!
//! - [`ContextId`]: one client scripting context
//! - [`HostedContextId`]: host-assigned id used to address other contexts
//! - [`PortId`]: context-local handle to an owned port
//! - [`PortKey`]: global identity of a port endpoint
//! - [`CorrelationId`]: links a request to its reply

pub mod ids;

pub use ids::{ContextId, CorrelationId, HostedContextId, PortId, PortKey};
