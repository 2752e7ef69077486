//! Inbound routing for a client context
//!
//! Frames coming off the inbox are decoded and routed by envelope kind:
//! replies go to the correlator, messages go to the handler registered for
//! their `(internal, channel)` key. Handlers run on the context's thread
//! and may call back into the proxy, including sending new messages and
//! pumping the inbox again.

use crate::error::CallError;
use crate::inbox::InboundEvent;
use crate::proxy::ChannelProxy;
use core_types::{HostedContextId, PortId, PortKey};
use ipc::{decode_frame, ChannelAddress, ChannelKey, Envelope, InvokeReply, Message, Transport};
use ports::Port;
use std::collections::{HashMap, HashSet};
use structured_value::{decode, decode_plain, Value};
use tracing::{debug, trace, warn};

/// A message delivered to a channel handler
#[derive(Debug)]
pub struct IpcEvent {
    pub internal: bool,
    pub channel: String,
    /// Decoded argument value
    pub args: Value,
    /// Ports that arrived with the message, now owned by this context
    pub ports: Vec<PortId>,
    /// Hosted context that sent the message, when relayed by the host
    pub source: Option<HostedContextId>,
}

impl IpcEvent {
    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.internal, self.channel.clone())
    }
}

/// Callback registered for one channel key
pub type Handler<T> = Box<dyn FnMut(&ChannelProxy<T>, &IpcEvent)>;

enum Slot<T: Transport> {
    Ready(Handler<T>),
    Busy,
    Missing,
}

/// Handler table
///
/// A handler is taken out of the table while it runs. Messages for the
/// same key that arrive during that time (because the handler pumped the
/// inbox) are queued and delivered once it returns.
pub struct Dispatcher<T: Transport> {
    handlers: HashMap<ChannelKey, Handler<T>>,
    running: HashSet<ChannelKey>,
    removed_while_running: HashSet<ChannelKey>,
    deferred: Vec<(ChannelKey, IpcEvent)>,
}

impl<T: Transport> Default for Dispatcher<T> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            running: HashSet::new(),
            removed_while_running: HashSet::new(),
            deferred: Vec::new(),
        }
    }
}

impl<T: Transport> Dispatcher<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a handler, replacing any previous one for the key
    pub fn set_handler(&mut self, key: ChannelKey, handler: Handler<T>) {
        self.removed_while_running.remove(&key);
        self.handlers.insert(key, handler);
    }

    pub fn remove_handler(&mut self, key: &ChannelKey) -> bool {
        if self.handlers.remove(key).is_some() {
            return true;
        }
        if self.running.contains(key) {
            self.removed_while_running.insert(key.clone());
            return true;
        }
        false
    }

    pub fn has_handler(&self, key: &ChannelKey) -> bool {
        (self.handlers.contains_key(key) || self.running.contains(key))
            && !self.removed_while_running.contains(key)
    }

    fn take(&mut self, key: &ChannelKey) -> Slot<T> {
        if self.running.contains(key) {
            return Slot::Busy;
        }
        match self.handlers.remove(key) {
            Some(handler) => {
                self.running.insert(key.clone());
                Slot::Ready(handler)
            }
            None => Slot::Missing,
        }
    }

    /// Puts a handler back after it ran and hands out events queued for it
    fn restore(&mut self, key: &ChannelKey, handler: Handler<T>) -> Vec<IpcEvent> {
        self.running.remove(key);
        if !self.removed_while_running.remove(key) {
            // A handler installed while this one ran takes precedence.
            self.handlers.entry(key.clone()).or_insert(handler);
        }

        let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|(deferred_key, _)| deferred_key == key);
        self.deferred = rest;
        mine.into_iter().map(|(_, event)| event).collect()
    }

    /// Routes one inbound event
    pub fn dispatch(proxy: &ChannelProxy<T>, event: InboundEvent) {
        match event {
            InboundEvent::Frame(message) => {
                Self::dispatch_frame(proxy, message.bytes, message.ports)
            }
            InboundEvent::DestinationLost(destination) => {
                let mut correlator = proxy.correlator().borrow_mut();
                let reason = format!("{} is gone", destination);
                let dropped = match destination {
                    ChannelAddress::Host => correlator.drop_all(&reason),
                    other => correlator.drop_destination(other, &reason),
                };
                debug!(context = %proxy.context_id(), %destination, dropped, "destination lost");
            }
        }
    }

    fn dispatch_frame(proxy: &ChannelProxy<T>, bytes: Vec<u8>, ports: Vec<Port>) {
        let envelope = match decode_frame(&bytes, proxy.config().max_frame_len) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    context = %proxy.context_id(),
                    error = %err,
                    closed_ports = ports.len(),
                    "discarding inbound frame"
                );
                return;
            }
        };

        // Replies never carry ports, but the call they answer is known
        if let Envelope::Reply(reply) = &envelope {
            if !ports.is_empty() {
                warn!(
                    context = %proxy.context_id(),
                    call = %reply.correlation_id,
                    closed_ports = ports.len(),
                    "reply carried ports, rejecting call"
                );
                let error = CallError::Protocol(format!("reply carried {} ports", ports.len()));
                proxy
                    .correlator()
                    .borrow_mut()
                    .reject(reply.correlation_id, error);
                return;
            }
        }

        let carried: Vec<PortKey> = ports.iter().map(Port::key).collect();
        if envelope.declared_ports() != carried.as_slice() {
            warn!(
                context = %proxy.context_id(),
                kind = envelope.kind(),
                declared = envelope.declared_ports().len(),
                carried = carried.len(),
                "ports do not match declaration, discarding frame"
            );
            return;
        }

        match envelope {
            Envelope::Reply(reply) => Self::dispatch_reply(proxy, reply),
            Envelope::Message(message) => Self::dispatch_message(proxy, message, ports),
            Envelope::Request { correlation_id, .. } => {
                warn!(
                    context = %proxy.context_id(),
                    call = %correlation_id,
                    closed_ports = ports.len(),
                    "client contexts do not serve requests"
                );
            }
        }
    }

    fn dispatch_reply(proxy: &ChannelProxy<T>, reply: InvokeReply) {
        let id = reply.correlation_id;
        let outcome = match (reply.error, reply.result) {
            (Some(error), _) => Err(CallError::Remote(error)),
            (None, Some(result)) => decode_plain(&result).map_err(CallError::from),
            (None, None) => Ok(Value::Undefined),
        };

        let mut correlator = proxy.correlator().borrow_mut();
        let matched = match outcome {
            Ok(value) => correlator.resolve(id, value),
            Err(error) => correlator.reject(id, error),
        };
        trace!(context = %proxy.context_id(), call = %id, matched, "reply routed");
    }

    fn dispatch_message(proxy: &ChannelProxy<T>, message: Message, ports: Vec<Port>) {
        let ids = proxy.ports().borrow_mut().attach(ports);
        let args = match decode(&message.payload, &ids) {
            Ok(args) => args,
            Err(err) => {
                warn!(
                    context = %proxy.context_id(),
                    channel = %message.channel,
                    error = %err,
                    "undecodable message payload"
                );
                close_ports(proxy, &ids);
                return;
            }
        };

        let key = message.key();
        let event = IpcEvent {
            internal: message.internal,
            channel: message.channel,
            args,
            ports: ids,
            source: message.source,
        };
        Self::deliver(proxy, key, event);
    }

    fn deliver(proxy: &ChannelProxy<T>, key: ChannelKey, event: IpcEvent) {
        let slot = proxy.dispatcher().borrow_mut().take(&key);
        match slot {
            Slot::Ready(mut handler) => {
                trace!(context = %proxy.context_id(), channel = %key, "dispatching");
                handler(proxy, &event);
                let queued = proxy.dispatcher().borrow_mut().restore(&key, handler);
                for next in queued {
                    Self::deliver(proxy, key.clone(), next);
                }
            }
            Slot::Busy => {
                trace!(context = %proxy.context_id(), channel = %key, "handler running, queued");
                proxy.dispatcher().borrow_mut().deferred.push((key, event));
            }
            Slot::Missing => {
                debug!(
                    context = %proxy.context_id(),
                    channel = %key,
                    closed_ports = event.ports.len(),
                    "no listener for message"
                );
                close_ports(proxy, &event.ports);
            }
        }
    }
}

fn close_ports<T: Transport>(proxy: &ChannelProxy<T>, ids: &[PortId]) {
    let mut registry = proxy.ports().borrow_mut();
    for id in ids {
        // Ids come straight from attach, so they are still owned.
        let _ = registry.close(*id);
    }
}
