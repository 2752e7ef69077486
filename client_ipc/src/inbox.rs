//! Inbound event queue of a context
//!
//! Transports may run on any thread. They push into an [`InboundSink`];
//! the owning context drains the matching [`Inbox`] on its own thread, in
//! arrival order.

use ipc::{ChannelAddress, TransportMessage};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use tracing::trace;

/// Something the transport reported to a context
#[derive(Debug)]
pub enum InboundEvent {
    Frame(TransportMessage),
    DestinationLost(ChannelAddress),
}

/// Transport-facing half: the two inbound callbacks
#[derive(Debug, Clone)]
pub struct InboundSink {
    tx: Sender<InboundEvent>,
}

impl InboundSink {
    /// Delivers a frame (and its ports) to the context
    ///
    /// If the context is gone the message is dropped, closing its ports.
    pub fn on_message(&self, message: TransportMessage) {
        if self.tx.send(InboundEvent::Frame(message)).is_err() {
            trace!("inbound frame for a torn-down context dropped");
        }
    }

    /// Reports that `destination` is unreachable
    pub fn on_destination_lost(&self, destination: ChannelAddress) {
        if self
            .tx
            .send(InboundEvent::DestinationLost(destination))
            .is_err()
        {
            trace!(%destination, "loss notice for a torn-down context dropped");
        }
    }
}

/// Context-facing half
#[derive(Debug)]
pub struct Inbox {
    rx: Receiver<InboundEvent>,
}

impl Inbox {
    /// Next queued event, without waiting
    pub(crate) fn try_next(&self) -> Option<InboundEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Waits for the next event; `None` once every sink is gone
    pub(crate) fn next_blocking(&self) -> Option<InboundEvent> {
        self.rx.recv().ok()
    }
}

/// Creates a connected sink/inbox pair
pub fn inbound_channel() -> (InboundSink, Inbox) {
    let (tx, rx) = mpsc::channel();
    (InboundSink { tx }, Inbox { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (sink, inbox) = inbound_channel();
        sink.on_message(TransportMessage::new(b"1".to_vec()));
        sink.on_destination_lost(ChannelAddress::Host);

        assert!(matches!(inbox.try_next(), Some(InboundEvent::Frame(m)) if m.bytes == b"1"));
        assert!(matches!(
            inbox.try_next(),
            Some(InboundEvent::DestinationLost(ChannelAddress::Host))
        ));
        assert!(inbox.try_next().is_none());
    }

    #[test]
    fn test_blocking_wait_ends_when_sinks_dropped() {
        let (sink, inbox) = inbound_channel();
        drop(sink);
        assert!(inbox.next_blocking().is_none());
    }

    #[test]
    fn test_sink_survives_torn_down_context() {
        let (sink, inbox) = inbound_channel();
        drop(inbox);
        sink.on_message(TransportMessage::default());
        sink.on_destination_lost(ChannelAddress::Embedder);
    }
}
