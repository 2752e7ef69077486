//! Per-context port ownership

use crate::port::{Port, PortError};
use core_types::{PortId, PortKey};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

/// Errors related to port transfer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// A listed port is not owned by the calling context
    #[error("{0} is not owned by this context")]
    NotOwned(PortId),

    /// A port was listed more than once
    #[error("{0} is listed for transfer more than once")]
    Duplicate(PortId),

    /// A transfer list entry is not a port at all
    #[error("Invalid value for transfer: expected a port, got {0}")]
    InvalidTransferable(String),
}

/// The set of ports a context currently owns
///
/// Ports are held by value, so moving a port out of one registry and into
/// another is the only way ownership changes hands. Local ids come from a
/// monotonic counter and are never reused.
#[derive(Debug, Default)]
pub struct PortRegistry {
    owned: HashMap<PortId, Port>,
    next_id: u64,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an entangled pair and takes ownership of both ends
    pub fn create_channel(&mut self) -> (PortId, PortId) {
        let (a, b) = Port::entangled_pair();
        (self.insert(a), self.insert(b))
    }

    /// Removes every listed port, or none of them
    ///
    /// The returned ports are in the order requested. They are no longer
    /// reachable from this registry and must be sent or dropped by the caller.
    pub fn detach(&mut self, ids: &[PortId]) -> Result<Vec<Port>, TransferError> {
        let mut seen = HashSet::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(*id) {
                return Err(TransferError::Duplicate(*id));
            }
            if !self.owned.contains_key(id) {
                return Err(TransferError::NotOwned(*id));
            }
        }

        let ports: Vec<Port> = ids
            .iter()
            .filter_map(|id| self.owned.remove(id))
            .collect();
        debug!(count = ports.len(), "detached ports");
        Ok(ports)
    }

    /// Takes ownership of inbound ports, assigning fresh local ids in order
    pub fn attach(&mut self, ports: Vec<Port>) -> Vec<PortId> {
        let ids: Vec<PortId> = ports.into_iter().map(|port| self.insert(port)).collect();
        if !ids.is_empty() {
            debug!(count = ids.len(), "attached ports");
        }
        ids
    }

    /// Drops an owned port, closing it
    pub fn close(&mut self, id: PortId) -> Result<(), PortError> {
        self.owned
            .remove(&id)
            .map(drop)
            .ok_or(PortError::NotOwned(id))
    }

    /// Posts bytes through an owned port
    pub fn post(&self, id: PortId, bytes: Vec<u8>) -> Result<(), PortError> {
        self.get(id)?.post(bytes)
    }

    /// Receives the next message queued on an owned port
    pub fn try_recv(&self, id: PortId) -> Result<Option<Vec<u8>>, PortError> {
        self.get(id)?.try_recv()
    }

    pub fn owns(&self, id: PortId) -> bool {
        self.owned.contains_key(&id)
    }

    pub fn key_of(&self, id: PortId) -> Option<PortKey> {
        self.owned.get(&id).map(Port::key)
    }

    pub fn len(&self) -> usize {
        self.owned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty()
    }

    fn get(&self, id: PortId) -> Result<&Port, PortError> {
        self.owned.get(&id).ok_or(PortError::NotOwned(id))
    }

    fn insert(&mut self, port: Port) -> PortId {
        let id = PortId::from_raw(self.next_id);
        self.next_id += 1;
        self.owned.insert(id, port);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_channel_owns_both_ends() {
        let mut registry = PortRegistry::new();
        let (a, b) = registry.create_channel();
        assert_ne!(a, b);
        assert!(registry.owns(a));
        assert!(registry.owns(b));
        assert_eq!(registry.len(), 2);

        registry.post(a, b"hi".to_vec()).unwrap();
        assert_eq!(registry.try_recv(b).unwrap(), Some(b"hi".to_vec()));
    }

    #[test]
    fn test_detach_is_all_or_nothing() {
        let mut registry = PortRegistry::new();
        let (a, _b) = registry.create_channel();
        let missing = PortId::from_raw(999);

        let result = registry.detach(&[a, missing]);
        assert_eq!(result.unwrap_err(), TransferError::NotOwned(missing));
        assert!(registry.owns(a));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_detach_rejects_duplicates_without_side_effects() {
        let mut registry = PortRegistry::new();
        let (a, _b) = registry.create_channel();

        let result = registry.detach(&[a, a]);
        assert_eq!(result.unwrap_err(), TransferError::Duplicate(a));
        assert!(registry.owns(a));
    }

    #[test]
    fn test_detach_then_attach_moves_ownership() {
        let mut sender = PortRegistry::new();
        let mut receiver = PortRegistry::new();
        let (a, b) = sender.create_channel();
        let key = sender.key_of(a).unwrap();

        let moved = sender.detach(&[a]).unwrap();
        assert!(!sender.owns(a));
        assert_eq!(moved[0].key(), key);

        let ids = receiver.attach(moved);
        assert_eq!(ids.len(), 1);
        assert_eq!(receiver.key_of(ids[0]), Some(key));

        receiver.post(ids[0], b"across".to_vec()).unwrap();
        assert_eq!(sender.try_recv(b).unwrap(), Some(b"across".to_vec()));
    }

    #[test]
    fn test_attach_preserves_order_and_never_reuses_ids() {
        let mut registry = PortRegistry::new();
        let (first, _) = registry.create_channel();
        registry.close(first).unwrap();

        let (x, y) = Port::entangled_pair();
        let keys = [x.key(), y.key()];
        let ids = registry.attach(vec![x, y]);

        assert!(!ids.contains(&first));
        assert_eq!(registry.key_of(ids[0]), Some(keys[0]));
        assert_eq!(registry.key_of(ids[1]), Some(keys[1]));
    }

    #[test]
    fn test_close_unknown_port() {
        let mut registry = PortRegistry::new();
        let id = PortId::from_raw(5);
        assert_eq!(registry.close(id), Err(PortError::NotOwned(id)));
    }

    #[test]
    fn test_closed_port_is_seen_by_peer() {
        let mut registry = PortRegistry::new();
        let (a, b) = registry.create_channel();
        registry.close(a).unwrap();
        assert_eq!(registry.try_recv(b), Err(PortError::PeerClosed));
    }
}
