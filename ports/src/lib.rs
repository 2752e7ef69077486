//! # Ports
//!
//! Transferable, exclusively owned communication endpoints.
//!
//! ## Ownership model
//!
//! - A [`Port`] is a move-only value; there is no way to copy one.
//! - Each context keeps its ports in a [`PortRegistry`] and refers to them
//!   by context-local [`core_types::PortId`]s.
//! - Transfer is `detach` on the sender (all listed ports or none) followed
//!   by `attach` on the receiver, which hands out fresh local ids.

pub mod port;
pub mod registry;

pub use port::{Port, PortError};
pub use registry::{PortRegistry, TransferError};
