//! Messaging Test Utilities
//!
//! Stub transports and helpers shared by the end-to-end tests.
//!
//! ## Test Philosophy
//!
//! - **No real host**: every transport here is a deterministic stand-in
//! - **Observable wire**: what a context sends can always be decoded and inspected
//! - **Real threading where it matters**: the scripted host replies from its own
//!   thread, so blocking calls are exercised against genuine delays

use client_ipc::{inbound_channel, BridgeConfig, ChannelProxy, InboundSink};
use core_types::CorrelationId;
use ipc::{
    decode_frame, encode_frame, ChannelAddress, Envelope, InvokeReply, Message, Transport,
    TransportError, TransportMessage, DEFAULT_MAX_FRAME_LEN,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::Duration;
use structured_value::{encode_plain, CodecLimits, Value};

/// Installs a test-friendly tracing subscriber (`RUST_LOG` controls output)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Everything a recording transport was asked to send
pub type Outbox = Rc<RefCell<Vec<(ChannelAddress, TransportMessage)>>>;

/// Accepts every message and keeps it
#[derive(Default)]
pub struct RecordingTransport {
    outbox: Outbox,
}

impl RecordingTransport {
    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }
}

impl Transport for RecordingTransport {
    fn send(
        &mut self,
        destination: &ChannelAddress,
        message: TransportMessage,
    ) -> Result<(), TransportError> {
        self.outbox.borrow_mut().push((*destination, message));
        Ok(())
    }
}

/// Refuses every message as if the destination were gone
pub struct FailingTransport;

impl Transport for FailingTransport {
    fn send(
        &mut self,
        destination: &ChannelAddress,
        _message: TransportMessage,
    ) -> Result<(), TransportError> {
        Err(TransportError::ConnectionLost(*destination))
    }
}

/// Hands every message, ports included, straight to a peer context
///
/// Stands in for a host that relays traffic between two hosted contexts.
pub struct RelayTransport {
    peer: InboundSink,
}

impl Transport for RelayTransport {
    fn send(
        &mut self,
        _destination: &ChannelAddress,
        message: TransportMessage,
    ) -> Result<(), TransportError> {
        self.peer.on_message(message);
        Ok(())
    }
}

/// What the scripted host does in response to a request
#[derive(Debug, Clone)]
pub enum HostEvent {
    Frame(Envelope),
    Lost(ChannelAddress),
}

type Responder = Box<dyn FnMut(CorrelationId, &Message) -> Vec<HostEvent>>;

/// A host that answers requests from a background thread after a delay
///
/// Every envelope the context sends is logged. For requests the responder
/// decides which events to emit; they are delivered in order, on another
/// thread, once `delay` has elapsed.
pub struct ScriptedHost {
    sink: InboundSink,
    delay: Duration,
    responder: Responder,
    log: Rc<RefCell<Vec<Envelope>>>,
}

impl ScriptedHost {
    pub fn new<F>(sink: InboundSink, delay: Duration, responder: F) -> Self
    where
        F: FnMut(CorrelationId, &Message) -> Vec<HostEvent> + 'static,
    {
        Self {
            sink,
            delay,
            responder: Box::new(responder),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn log(&self) -> Rc<RefCell<Vec<Envelope>>> {
        self.log.clone()
    }
}

enum Outbound {
    Frame(Vec<u8>),
    Lost(ChannelAddress),
}

impl Transport for ScriptedHost {
    fn send(
        &mut self,
        _destination: &ChannelAddress,
        message: TransportMessage,
    ) -> Result<(), TransportError> {
        let envelope = decode_frame(&message.bytes, DEFAULT_MAX_FRAME_LEN)
            .map_err(|err| TransportError::SendFailed(err.to_string()))?;
        self.log.borrow_mut().push(envelope.clone());

        let Envelope::Request {
            correlation_id,
            message,
            ..
        } = envelope
        else {
            return Ok(());
        };

        let outbound = (self.responder)(correlation_id, &message)
            .into_iter()
            .map(|event| match event {
                HostEvent::Frame(envelope) => encode_frame(&envelope)
                    .map(Outbound::Frame)
                    .map_err(|err| TransportError::SendFailed(err.to_string())),
                HostEvent::Lost(address) => Ok(Outbound::Lost(address)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let sink = self.sink.clone();
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            for event in outbound {
                match event {
                    Outbound::Frame(bytes) => sink.on_message(TransportMessage::new(bytes)),
                    Outbound::Lost(address) => sink.on_destination_lost(address),
                }
            }
        });
        Ok(())
    }
}

/// A context whose transport records everything it sends
pub fn recording_context() -> (ChannelProxy<RecordingTransport>, Outbox, InboundSink) {
    let (sink, inbox) = inbound_channel();
    let transport = RecordingTransport::default();
    let outbox = transport.outbox();
    let proxy = ChannelProxy::new(BridgeConfig::default(), transport, inbox);
    (proxy, outbox, sink)
}

/// A context talking to a [`ScriptedHost`]
pub fn scripted_context<F>(
    delay: Duration,
    responder: F,
) -> (ChannelProxy<ScriptedHost>, Rc<RefCell<Vec<Envelope>>>, InboundSink)
where
    F: FnMut(CorrelationId, &Message) -> Vec<HostEvent> + 'static,
{
    let (sink, inbox) = inbound_channel();
    let host = ScriptedHost::new(sink.clone(), delay, responder);
    let log = host.log();
    let proxy = ChannelProxy::new(BridgeConfig::default(), host, inbox);
    (proxy, log, sink)
}

/// Two contexts wired to each other through a relaying host
pub fn relayed_pair() -> (ChannelProxy<RelayTransport>, ChannelProxy<RelayTransport>) {
    let (sink_a, inbox_a) = inbound_channel();
    let (sink_b, inbox_b) = inbound_channel();
    let a = ChannelProxy::new(
        BridgeConfig::default(),
        RelayTransport { peer: sink_b },
        inbox_a,
    );
    let b = ChannelProxy::new(
        BridgeConfig::default(),
        RelayTransport { peer: sink_a },
        inbox_b,
    );
    (a, b)
}

/// Decodes everything in an outbox
pub fn sent_envelopes(outbox: &Outbox) -> Vec<(ChannelAddress, Envelope)> {
    outbox
        .borrow()
        .iter()
        .map(|(destination, message)| {
            let envelope = decode_frame(&message.bytes, DEFAULT_MAX_FRAME_LEN)
                .expect("context sent an undecodable frame");
            (*destination, envelope)
        })
        .collect()
}

fn encode_for_test(value: &Value) -> structured_value::SerializedValue {
    encode_plain(value, &CodecLimits::default()).expect("test value must be encodable")
}

/// Successful reply to `id`
pub fn reply_ok(id: CorrelationId, value: &Value) -> HostEvent {
    HostEvent::Frame(Envelope::Reply(InvokeReply::ok(id, encode_for_test(value))))
}

/// Error reply to `id`
pub fn reply_err(id: CorrelationId, error: &str) -> HostEvent {
    HostEvent::Frame(Envelope::Reply(InvokeReply::err(id, error)))
}

/// Unsolicited message from the host
pub fn host_message(internal: bool, channel: &str, value: &Value) -> HostEvent {
    HostEvent::Frame(Envelope::Message(Message::new(
        ChannelAddress::Host,
        internal,
        channel,
        encode_for_test(value),
    )))
}

/// Frame bytes for pushing an event straight into a sink
pub fn frame_of(event: HostEvent) -> TransportMessage {
    match event {
        HostEvent::Frame(envelope) => TransportMessage::new(
            encode_frame(&envelope).expect("test envelope must be encodable"),
        ),
        HostEvent::Lost(address) => panic!("{} is not a frame", address),
    }
}
