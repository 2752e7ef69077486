//! Entangled message port endpoints

use core_types::PortKey;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use thiserror::Error;

/// Errors from using a port
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortError {
    /// The calling context does not own the port
    #[error("{0} is not owned by this context")]
    NotOwned(core_types::PortId),

    /// The other endpoint was dropped
    #[error("Peer endpoint is closed")]
    PeerClosed,
}

/// One end of a bidirectional byte channel
///
/// Ports are created in entangled pairs. A `Port` is deliberately not
/// `Clone`: handing it to another context means moving it, so an endpoint
/// can never be reachable from two owners. Dropping a port closes it and
/// the peer observes [`PortError::PeerClosed`].
pub struct Port {
    key: PortKey,
    outgoing: Sender<Vec<u8>>,
    incoming: Receiver<Vec<u8>>,
}

impl Port {
    /// Creates two endpoints wired to each other
    pub fn entangled_pair() -> (Port, Port) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        let a = Port {
            key: PortKey::new(),
            outgoing: a_tx,
            incoming: a_rx,
        };
        let b = Port {
            key: PortKey::new(),
            outgoing: b_tx,
            incoming: b_rx,
        };
        (a, b)
    }

    /// Global identity of this endpoint
    pub fn key(&self) -> PortKey {
        self.key
    }

    /// Queues `bytes` for the peer endpoint
    pub fn post(&self, bytes: Vec<u8>) -> Result<(), PortError> {
        self.outgoing.send(bytes).map_err(|_| PortError::PeerClosed)
    }

    /// Takes the next queued message, if any
    ///
    /// Messages queued before the peer closed are still delivered.
    pub fn try_recv(&self) -> Result<Option<Vec<u8>>, PortError> {
        match self.incoming.try_recv() {
            Ok(bytes) => Ok(Some(bytes)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(PortError::PeerClosed),
        }
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_bidirectional() {
        let (a, b) = Port::entangled_pair();
        a.post(b"ping".to_vec()).unwrap();
        b.post(b"pong".to_vec()).unwrap();

        assert_eq!(b.try_recv().unwrap(), Some(b"ping".to_vec()));
        assert_eq!(a.try_recv().unwrap(), Some(b"pong".to_vec()));
        assert_eq!(a.try_recv().unwrap(), None);
    }

    #[test]
    fn test_keys_are_distinct() {
        let (a, b) = Port::entangled_pair();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_dropping_peer_closes_port() {
        let (a, b) = Port::entangled_pair();
        b.post(b"last".to_vec()).unwrap();
        drop(b);

        assert_eq!(a.try_recv().unwrap(), Some(b"last".to_vec()));
        assert_eq!(a.try_recv(), Err(PortError::PeerClosed));
        assert_eq!(a.post(b"lost".to_vec()), Err(PortError::PeerClosed));
    }

    #[test]
    fn test_port_moves_across_threads() {
        let (a, b) = Port::entangled_pair();
        let handle = std::thread::spawn(move || {
            b.post(b"from thread".to_vec()).unwrap();
            b
        });
        let _b = handle.join().unwrap();
        assert_eq!(a.try_recv().unwrap(), Some(b"from thread".to_vec()));
    }
}
