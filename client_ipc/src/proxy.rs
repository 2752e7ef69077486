//! Client-side channel proxy
//!
//! One proxy per hosted context. All operations run on the context's
//! thread; the transport reaches back in only through the context's
//! [`InboundSink`](crate::InboundSink).

use crate::config::BridgeConfig;
use crate::correlator::{CallMode, CallOutcome, CompletionHandle, Correlator};
use crate::dispatcher::{Dispatcher, IpcEvent};
use crate::error::{CallError, IpcError};
use crate::inbox::Inbox;
use core_types::{ContextId, CorrelationId, HostedContextId, PortId, PortKey};
use ipc::{
    encode_frame, ChannelAddress, ChannelKey, Envelope, Message, RequestKind, Transport,
    TransportError, TransportMessage,
};
use ports::{Port, PortRegistry, TransferError};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use structured_value::{encode, SerializedValue, TransferMap, Value};
use tracing::{debug, trace, warn};

/// The context-side endpoint of the bus
pub struct ChannelProxy<T: Transport> {
    context: ContextId,
    config: BridgeConfig,
    transport: RefCell<T>,
    ports: RefCell<PortRegistry>,
    correlator: RefCell<Correlator>,
    dispatcher: RefCell<Dispatcher<T>>,
    inbox: Inbox,
    sync_call: Cell<Option<CorrelationId>>,
}

impl<T: Transport> ChannelProxy<T> {
    /// Creates a proxy for a new context
    ///
    /// `inbox` must be the receiving half of the sink given to `transport`.
    pub fn new(config: BridgeConfig, transport: T, inbox: Inbox) -> Self {
        let context = ContextId::new();
        debug!(%context, "channel proxy created");
        Self {
            context,
            correlator: RefCell::new(Correlator::new(config.max_pending_calls)),
            config,
            transport: RefCell::new(transport),
            ports: RefCell::new(PortRegistry::new()),
            dispatcher: RefCell::new(Dispatcher::new()),
            inbox,
            sync_call: Cell::new(None),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Sends a fire-and-forget message to the host
    ///
    /// Encoding failures are returned; transport failures are logged and
    /// the message is dropped.
    pub fn send(&self, internal: bool, channel: &str, value: &Value) -> Result<(), IpcError> {
        let payload = self.encode_value(value, &TransferMap::empty())?;
        let message = Message::new(ChannelAddress::Host, internal, channel, payload);
        self.post_envelope(&Envelope::Message(message), ChannelAddress::Host, Vec::new())
    }

    /// Sends a message to another hosted context, or to all of them
    pub fn send_to(
        &self,
        internal: bool,
        broadcast_to_all: bool,
        target: HostedContextId,
        channel: &str,
        value: &Value,
    ) -> Result<(), IpcError> {
        let destination = ChannelAddress::targeted(broadcast_to_all, target);
        let payload = self.encode_value(value, &TransferMap::empty())?;
        let message = Message::new(destination, internal, channel, payload);
        self.post_envelope(&Envelope::Message(message), destination, Vec::new())
    }

    /// Sends a message to the context that embeds this one
    pub fn send_to_host(&self, channel: &str, value: &Value) -> Result<(), IpcError> {
        let payload = self.encode_value(value, &TransferMap::empty())?;
        let message = Message::new(ChannelAddress::Embedder, false, channel, payload);
        self.post_envelope(
            &Envelope::Message(message),
            ChannelAddress::Embedder,
            Vec::new(),
        )
    }

    /// Sends a request and blocks until its reply arrives
    ///
    /// Returns `Ok(None)` when the host goes away (or the transport refuses
    /// the request) before answering. While waiting, inbound messages for
    /// other channels are still dispatched on this thread.
    pub fn send_sync(
        &self,
        internal: bool,
        channel: &str,
        value: &Value,
    ) -> Result<Option<Value>, IpcError> {
        if let Some(active) = self.sync_call.get() {
            warn!(context = %self.context, %channel, waiting_on = %active, "nested synchronous call rejected");
            return Err(IpcError::SyncCallInProgress);
        }

        let mut handle = self.request(RequestKind::Sync, internal, channel, value)?;
        self.sync_call.set(Some(handle.id()));
        let outcome = self.wait_for(&mut handle);
        self.sync_call.set(None);

        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(CallError::ConnectionLost(reason)) => {
                debug!(context = %self.context, %channel, %reason, "synchronous call dropped");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Sends a request and returns a handle for its eventual reply
    ///
    /// The handle completes only while this context dispatches inbound
    /// events, through [`dispatch_pending`](Self::dispatch_pending) or a
    /// synchronous call.
    pub fn invoke(
        &self,
        internal: bool,
        channel: &str,
        value: &Value,
    ) -> Result<CompletionHandle, IpcError> {
        self.request(RequestKind::Invoke, internal, channel, value)
    }

    /// Posts a message, transferring ownership of the listed ports
    ///
    /// Validation happens in full before anything is detached: on error
    /// every port stays owned by this context and nothing is sent.
    pub fn post_message(
        &self,
        channel: &str,
        value: &Value,
        transfer: Option<&[Value]>,
    ) -> Result<(), IpcError> {
        let ids = transfer_ids(transfer.unwrap_or_default())?;
        let payload = self.encode_value(value, &TransferMap::new(&ids))?;
        let keys = self.owned_keys(&ids)?;

        let message =
            Message::new(ChannelAddress::Host, false, channel, payload).with_ports(keys);
        let bytes = encode_frame(&Envelope::Message(message))?;
        let ports = self.ports.borrow_mut().detach(&ids)?;

        trace!(context = %self.context, %channel, ports = ports.len(), "posting message");
        if let Err(err) = self.transmit(ChannelAddress::Host, bytes, ports) {
            warn!(context = %self.context, %channel, error = %err, "message dropped");
        }
        Ok(())
    }

    /// Registers the handler for a channel, replacing any previous one
    pub fn on<F>(&self, internal: bool, channel: &str, handler: F)
    where
        F: FnMut(&ChannelProxy<T>, &IpcEvent) + 'static,
    {
        self.dispatcher
            .borrow_mut()
            .set_handler(ChannelKey::new(internal, channel), Box::new(handler));
    }

    pub fn remove_listener(&self, internal: bool, channel: &str) -> bool {
        self.dispatcher
            .borrow_mut()
            .remove_handler(&ChannelKey::new(internal, channel))
    }

    pub fn has_listener(&self, internal: bool, channel: &str) -> bool {
        self.dispatcher
            .borrow()
            .has_handler(&ChannelKey::new(internal, channel))
    }

    /// Dispatches every inbound event queued so far; returns how many
    pub fn dispatch_pending(&self) -> usize {
        let mut count = 0;
        while let Some(event) = self.inbox.try_next() {
            Dispatcher::dispatch(self, event);
            count += 1;
        }
        count
    }

    /// Creates an entangled port pair owned by this context
    pub fn create_message_channel(&self) -> (PortId, PortId) {
        self.ports.borrow_mut().create_channel()
    }

    /// Runs `f` with this context's port registry
    pub fn with_ports<R>(&self, f: impl FnOnce(&mut PortRegistry) -> R) -> R {
        f(&mut self.ports.borrow_mut())
    }

    pub fn pending_calls(&self) -> usize {
        self.correlator.borrow().pending_count()
    }

    pub(crate) fn ports(&self) -> &RefCell<PortRegistry> {
        &self.ports
    }

    pub(crate) fn correlator(&self) -> &RefCell<Correlator> {
        &self.correlator
    }

    pub(crate) fn dispatcher(&self) -> &RefCell<Dispatcher<T>> {
        &self.dispatcher
    }

    fn request(
        &self,
        kind: RequestKind,
        internal: bool,
        channel: &str,
        value: &Value,
    ) -> Result<CompletionHandle, IpcError> {
        let payload = self.encode_value(value, &TransferMap::empty())?;
        let mode = match kind {
            RequestKind::Invoke => CallMode::Async,
            RequestKind::Sync => CallMode::Sync,
        };
        let (id, handle) = self
            .correlator
            .borrow_mut()
            .register(ChannelAddress::Host, mode)?;

        let envelope = Envelope::Request {
            correlation_id: id,
            kind,
            message: Message::new(ChannelAddress::Host, internal, channel, payload),
        };
        let bytes = match encode_frame(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.correlator
                    .borrow_mut()
                    .drop_call(id, "request could not be framed");
                return Err(err.into());
            }
        };

        match self.transmit(ChannelAddress::Host, bytes, Vec::new()) {
            Ok(()) => self.correlator.borrow_mut().mark_sent(id),
            Err(err) => {
                warn!(context = %self.context, %channel, call = %id, error = %err, "request not sent");
                self.correlator.borrow_mut().drop_call(id, &err.to_string());
            }
        }
        Ok(handle)
    }

    /// Pumps the inbox until `handle` completes
    fn wait_for(&self, handle: &mut CompletionHandle) -> CallOutcome {
        loop {
            if let Some(outcome) = handle.try_result() {
                return outcome;
            }
            match self.inbox.next_blocking() {
                Some(event) => Dispatcher::dispatch(self, event),
                None => {
                    self.correlator
                        .borrow_mut()
                        .drop_all("inbound channel closed");
                }
            }
        }
    }

    fn encode_value(
        &self,
        value: &Value,
        transfer: &TransferMap,
    ) -> Result<SerializedValue, IpcError> {
        encode(value, transfer, &self.config.codec_limits()).map_err(|err| {
            debug!(context = %self.context, error = %err, "value rejected by encoder");
            IpcError::from(err)
        })
    }

    /// Checks ownership of every listed port without detaching anything
    fn owned_keys(&self, ids: &[PortId]) -> Result<Vec<PortKey>, TransferError> {
        let registry = self.ports.borrow();
        ids.iter()
            .map(|id| registry.key_of(*id).ok_or(TransferError::NotOwned(*id)))
            .collect()
    }

    fn post_envelope(
        &self,
        envelope: &Envelope,
        destination: ChannelAddress,
        ports: Vec<Port>,
    ) -> Result<(), IpcError> {
        let bytes = encode_frame(envelope)?;
        if let Err(err) = self.transmit(destination, bytes, ports) {
            warn!(context = %self.context, %destination, error = %err, "message dropped");
        }
        Ok(())
    }

    fn transmit(
        &self,
        destination: ChannelAddress,
        bytes: Vec<u8>,
        ports: Vec<Port>,
    ) -> Result<(), TransportError> {
        trace!(context = %self.context, %destination, len = bytes.len(), "transmit");
        self.transport
            .borrow_mut()
            .send(&destination, TransportMessage::with_ports(bytes, ports))
    }
}

/// Resolves a transfer list to port ids
fn transfer_ids(transfer: &[Value]) -> Result<Vec<PortId>, TransferError> {
    let mut seen = HashSet::with_capacity(transfer.len());
    let mut ids = Vec::with_capacity(transfer.len());
    for entry in transfer {
        let id = entry
            .as_port()
            .ok_or_else(|| TransferError::InvalidTransferable(entry.kind().to_string()))?;
        if !seen.insert(id) {
            return Err(TransferError::Duplicate(id));
        }
        ids.push(id);
    }
    Ok(ids)
}
