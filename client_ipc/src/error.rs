//! Client-side error types

use ipc::FrameError;
use ports::{PortError, TransferError};
use structured_value::{DecodeError, EncodeError};
use thiserror::Error;

/// Why a correlated call did not produce a value
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The destination went away before the reply arrived
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The host answered with an error
    #[error("Remote error: {0}")]
    Remote(String),

    /// The reply payload could not be decoded
    #[error("Reply could not be decoded: {0}")]
    Decode(#[from] DecodeError),

    /// The reply broke the wire protocol
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The outcome was already handed out by this handle
    #[error("Call outcome was already taken")]
    Consumed,
}

impl CallError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, CallError::ConnectionLost(_))
    }
}

/// Errors surfaced by channel proxy operations
///
/// Every variant except [`IpcError::Call`] is raised before anything
/// reaches the transport.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Call(#[from] CallError),

    /// A synchronous call from this context is already waiting
    #[error("A synchronous call is already in flight on this context")]
    SyncCallInProgress,

    #[error("Too many pending calls (limit {0})")]
    TooManyPendingCalls(usize),
}
