//! Request/reply correlation
//!
//! Every `invoke` and `send_sync` registers a [`PendingCall`] keyed by a
//! fresh [`CorrelationId`]. The call reaches exactly one terminal state:
//! resolved by a matching reply, rejected by a remote error, or dropped
//! because its destination went away. The caller observes that outcome
//! once, through the [`CompletionHandle`] returned at registration.

use crate::error::{CallError, IpcError};
use core_types::CorrelationId;
use ipc::ChannelAddress;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use structured_value::Value;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, trace, warn};

/// What a finished call produced
pub type CallOutcome = Result<Value, CallError>;

/// How the caller waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    Async,
    Sync,
}

/// Lifecycle of a pending call
///
/// `Created -> Sent -> {Resolved | Rejected | Dropped}`. A call may also be
/// dropped before it was ever sent, when the transport refuses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Created,
    Sent,
    Resolved,
    Rejected,
    Dropped,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Resolved | CallState::Rejected | CallState::Dropped
        )
    }
}

/// A call awaiting its reply
#[derive(Debug)]
pub struct PendingCall {
    pub id: CorrelationId,
    pub created_at: Instant,
    pub destination: ChannelAddress,
    pub mode: CallMode,
    state: CallState,
    completion: oneshot::Sender<CallOutcome>,
}

impl PendingCall {
    pub fn state(&self) -> CallState {
        self.state
    }

    fn complete(self, state: CallState, outcome: CallOutcome) {
        trace!(
            call = %self.id,
            ?state,
            elapsed_us = self.created_at.elapsed().as_micros() as u64,
            "call finished"
        );
        // The caller may have dropped its handle; nothing to deliver then.
        let _ = self.completion.send(outcome);
    }
}

/// Caller's side of a pending call
///
/// Yields the outcome exactly once, either by polling with
/// [`CompletionHandle::try_result`] or by awaiting it on an executor that
/// shares the context's thread. Awaiting a handle whose outcome was already
/// taken yields [`CallError::Consumed`].
#[derive(Debug)]
pub struct CompletionHandle {
    id: CorrelationId,
    rx: oneshot::Receiver<CallOutcome>,
    finished: bool,
}

impl CompletionHandle {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Returns the outcome if it has arrived
    ///
    /// After the outcome has been returned once, later calls return `None`.
    pub fn try_result(&mut self) -> Option<CallOutcome> {
        if self.finished {
            return None;
        }
        let outcome = match self.rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => Err(abandoned()),
        };
        self.finished = true;
        Some(outcome)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Future for CompletionHandle {
    type Output = CallOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The receiver must not be polled again once it has completed
        if self.finished {
            return Poll::Ready(Err(CallError::Consumed));
        }
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(outcome) => {
                self.finished = true;
                Poll::Ready(outcome.unwrap_or_else(|_| Err(abandoned())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

fn abandoned() -> CallError {
    CallError::ConnectionLost("call abandoned".to_string())
}

/// Table of in-flight calls for one context
#[derive(Debug)]
pub struct Correlator {
    next_id: u64,
    max_pending: usize,
    pending: HashMap<CorrelationId, PendingCall>,
}

impl Correlator {
    pub fn new(max_pending: usize) -> Self {
        Self {
            next_id: 1,
            max_pending,
            pending: HashMap::new(),
        }
    }

    /// Registers a new call in the `Created` state
    pub fn register(
        &mut self,
        destination: ChannelAddress,
        mode: CallMode,
    ) -> Result<(CorrelationId, CompletionHandle), IpcError> {
        if self.pending.len() >= self.max_pending {
            warn!(limit = self.max_pending, "pending call limit reached");
            return Err(IpcError::TooManyPendingCalls(self.max_pending));
        }

        let id = CorrelationId::from_raw(self.next_id);
        self.next_id += 1;

        let (completion, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCall {
                id,
                created_at: Instant::now(),
                destination,
                mode,
                state: CallState::Created,
                completion,
            },
        );
        debug!(call = %id, %destination, ?mode, "call registered");

        Ok((
            id,
            CompletionHandle {
                id,
                rx,
                finished: false,
            },
        ))
    }

    /// Records that the request left through the transport
    pub fn mark_sent(&mut self, id: CorrelationId) {
        if let Some(call) = self.pending.get_mut(&id) {
            if call.state == CallState::Created {
                call.state = CallState::Sent;
            }
        }
    }

    /// Completes a call with its reply value
    ///
    /// Returns false for unknown or already finished calls; late and
    /// duplicate replies are ignored.
    pub fn resolve(&mut self, id: CorrelationId, value: Value) -> bool {
        self.finish(id, CallState::Resolved, Ok(value))
    }

    /// Completes a call with an error reply
    pub fn reject(&mut self, id: CorrelationId, error: CallError) -> bool {
        self.finish(id, CallState::Rejected, Err(error))
    }

    /// Drops one call as if its destination had gone away
    pub fn drop_call(&mut self, id: CorrelationId, reason: &str) -> bool {
        self.finish(
            id,
            CallState::Dropped,
            Err(CallError::ConnectionLost(reason.to_string())),
        )
    }

    /// Drops every pending call; returns how many there were
    pub fn drop_all(&mut self, reason: &str) -> usize {
        let calls: Vec<PendingCall> = self.pending.drain().map(|(_, call)| call).collect();
        let count = calls.len();
        for call in calls {
            call.complete(
                CallState::Dropped,
                Err(CallError::ConnectionLost(reason.to_string())),
            );
        }
        if count > 0 {
            debug!(count, reason, "dropped all pending calls");
        }
        count
    }

    /// Drops the calls addressed to `destination`
    pub fn drop_destination(&mut self, destination: ChannelAddress, reason: &str) -> usize {
        let ids: Vec<CorrelationId> = self
            .pending
            .values()
            .filter(|call| call.destination == destination)
            .map(|call| call.id)
            .collect();
        for id in &ids {
            self.drop_call(*id, reason);
        }
        if !ids.is_empty() {
            debug!(count = ids.len(), %destination, reason, "dropped pending calls");
        }
        ids.len()
    }

    /// State of a call that has not finished yet
    pub fn state(&self, id: CorrelationId) -> Option<CallState> {
        self.pending.get(&id).map(PendingCall::state)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn finish(&mut self, id: CorrelationId, state: CallState, outcome: CallOutcome) -> bool {
        match self.pending.remove(&id) {
            Some(call) => {
                call.complete(state, outcome);
                true
            }
            None => {
                debug!(call = %id, "completion for unknown call ignored");
                false
            }
        }
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        self.drop_all("context torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::HostedContextId;
    use std::sync::Arc;
    use std::task::{Wake, Waker};

    fn correlator() -> Correlator {
        Correlator::new(16)
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let mut c = correlator();
        let (a, _ha) = c.register(ChannelAddress::Host, CallMode::Async).unwrap();
        let (b, _hb) = c.register(ChannelAddress::Host, CallMode::Async).unwrap();
        assert!(b > a);
        assert_eq!(c.pending_count(), 2);
    }

    #[test]
    fn test_state_transitions() {
        let mut c = correlator();
        let (id, mut handle) = c.register(ChannelAddress::Host, CallMode::Async).unwrap();
        assert_eq!(c.state(id), Some(CallState::Created));

        c.mark_sent(id);
        assert_eq!(c.state(id), Some(CallState::Sent));
        assert!(handle.try_result().is_none());

        assert!(c.resolve(id, Value::from(7)));
        assert_eq!(c.state(id), None);
        assert_eq!(handle.try_result(), Some(Ok(Value::from(7))));
    }

    #[test]
    fn test_outcome_observed_once() {
        let mut c = correlator();
        let (id, mut handle) = c.register(ChannelAddress::Host, CallMode::Async).unwrap();
        c.mark_sent(id);
        c.reject(id, CallError::Remote("boom".into()));

        assert_eq!(
            handle.try_result(),
            Some(Err(CallError::Remote("boom".into())))
        );
        assert!(handle.is_finished());
        assert!(handle.try_result().is_none());
    }

    struct NoopWake;

    impl Wake for NoopWake {
        fn wake(self: Arc<Self>) {}
    }

    fn poll_once(handle: &mut CompletionHandle) -> Poll<CallOutcome> {
        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);
        Pin::new(handle).poll(&mut cx)
    }

    #[test]
    fn test_poll_resolves_handle() {
        let mut c = correlator();
        let (id, mut handle) = c.register(ChannelAddress::Host, CallMode::Async).unwrap();
        assert!(poll_once(&mut handle).is_pending());

        c.resolve(id, Value::from("done"));
        assert_eq!(poll_once(&mut handle), Poll::Ready(Ok(Value::from("done"))));
        assert!(handle.is_finished());
        assert_eq!(poll_once(&mut handle), Poll::Ready(Err(CallError::Consumed)));
    }

    #[test]
    fn test_poll_after_try_result() {
        let mut c = correlator();
        let (id, mut handle) = c.register(ChannelAddress::Host, CallMode::Async).unwrap();
        c.mark_sent(id);
        c.resolve(id, Value::from(1));

        assert_eq!(handle.try_result(), Some(Ok(Value::from(1))));
        assert_eq!(poll_once(&mut handle), Poll::Ready(Err(CallError::Consumed)));
        assert!(handle.try_result().is_none());
    }

    #[test]
    fn test_duplicate_reply_ignored() {
        let mut c = correlator();
        let (id, mut handle) = c.register(ChannelAddress::Host, CallMode::Async).unwrap();
        c.mark_sent(id);

        assert!(c.resolve(id, Value::from("first")));
        assert!(!c.resolve(id, Value::from("second")));
        assert!(!c.reject(id, CallError::Remote("late".into())));

        assert_eq!(handle.try_result(), Some(Ok(Value::from("first"))));
    }

    #[test]
    fn test_unknown_reply_ignored() {
        let mut c = correlator();
        assert!(!c.resolve(CorrelationId::from_raw(99), Value::Null));
    }

    #[test]
    fn test_drop_all_rejects_everything() {
        let mut c = correlator();
        let (_, mut h1) = c.register(ChannelAddress::Host, CallMode::Async).unwrap();
        let (_, mut h2) = c.register(ChannelAddress::Host, CallMode::Sync).unwrap();

        assert_eq!(c.drop_all("host gone"), 2);
        assert_eq!(c.pending_count(), 0);

        for handle in [&mut h1, &mut h2] {
            let outcome = handle.try_result().unwrap();
            assert_eq!(outcome, Err(CallError::ConnectionLost("host gone".into())));
        }
    }

    #[test]
    fn test_drop_destination_is_selective() {
        let mut c = correlator();
        let other = ChannelAddress::HostedContext(HostedContextId::new(4));
        let (kept, _h1) = c.register(ChannelAddress::Host, CallMode::Async).unwrap();
        let (_, mut h2) = c.register(other, CallMode::Async).unwrap();

        assert_eq!(c.drop_destination(other, "gone"), 1);
        assert_eq!(c.state(kept), Some(CallState::Created));
        assert!(h2.try_result().unwrap().unwrap_err().is_connection_lost());
    }

    #[test]
    fn test_pending_limit() {
        let mut c = Correlator::new(1);
        let (_id, _handle) = c.register(ChannelAddress::Host, CallMode::Async).unwrap();
        assert!(matches!(
            c.register(ChannelAddress::Host, CallMode::Async),
            Err(IpcError::TooManyPendingCalls(1))
        ));
    }

    #[test]
    fn test_teardown_drops_pending_calls() {
        let mut c = correlator();
        let (_, mut handle) = c.register(ChannelAddress::Host, CallMode::Async).unwrap();
        drop(c);
        assert!(handle.try_result().unwrap().unwrap_err().is_connection_lost());
    }

    #[test]
    fn test_caller_may_drop_handle() {
        let mut c = correlator();
        let (id, handle) = c.register(ChannelAddress::Host, CallMode::Async).unwrap();
        drop(handle);
        assert!(c.resolve(id, Value::Null));
    }
}
