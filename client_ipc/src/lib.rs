//! # Client IPC
//!
//! The context-side half of the message bus: a [`ChannelProxy`] per hosted
//! context that sends messages to the host, correlates requests with their
//! replies and dispatches inbound messages to channel handlers.
//!
//! ## Threading
//!
//! A proxy belongs to the thread of its context and is neither `Send` nor
//! `Sync`. Transports run wherever they like and hand inbound traffic over
//! through an [`InboundSink`], which is cloneable and `Send`. Nothing is
//! dispatched until the context pumps its inbox, either explicitly with
//! [`ChannelProxy::dispatch_pending`] or while blocked in
//! [`ChannelProxy::send_sync`].
//!
//! ```ignore
//! let (sink, inbox) = inbound_channel();
//! let proxy = ChannelProxy::new(BridgeConfig::default(), transport_for(sink), inbox);
//!
//! proxy.on(false, "status", |_, event| println!("{:?}", event.args));
//! let total = proxy.send_sync(false, "sum", &Value::array(vec![1.into(), 2.into()]))?;
//! ```

pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod inbox;
pub mod proxy;

pub use config::{BridgeConfig, ConfigError};
pub use correlator::{CallMode, CallOutcome, CallState, CompletionHandle, Correlator, PendingCall};
pub use dispatcher::{Dispatcher, Handler, IpcEvent};
pub use error::{CallError, IpcError};
pub use inbox::{inbound_channel, InboundEvent, InboundSink, Inbox};
pub use proxy::ChannelProxy;
