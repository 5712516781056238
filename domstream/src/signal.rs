//! Signal Bus
//!
//! Synchronous publish/subscribe for one stream instance.
//!
//! # 1) Emission
//!
//! `emit` takes the handler list for the signal kind under the lock, removes
//! the one-shot subscriptions from the live list, releases the lock and only
//! then invokes the handlers of that snapshot in subscription order.
//!
//! Consequences:
//!
//! - A handler may subscribe, unsubscribe or emit on the same bus. The lock
//!   is not held, so there is no deadlock, and the running snapshot is not
//!   affected.
//! - A handler added during an emission runs from the next emission on.
//! - A handler removed during an emission still runs in that emission if it
//!   was part of the snapshot.
//! - A one-shot handler runs at most once, even if its own invocation emits
//!   the same signal again.
//!
//! # 2) Unsubscribing
//!
//! Subscriptions are addressed by the [`SubscriptionId`] returned on
//! subscription. Removing an id twice, or an id of a one-shot handler that
//! already ran, is a no-op.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::chunk::Chunk;
use crate::error::Fault;
use crate::stream::Stream;

// ============================================================================
// Signal Types
// ============================================================================

/// Closed set of signal names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Readable,
    Data,
    End,
    Pipe,
    Unpipe,
    Drain,
    Error,
    Close,
    Finish,
}

/// Signal with its typed payload
#[derive(Clone)]
pub enum Signal {
    /// Buffer gained data while a consumer was waiting, or a size-0 peek
    Readable,
    Data(Chunk),
    /// Optional final chunk
    End(Option<Chunk>),
    /// Source stream of a newly attached pipe
    Pipe(Stream),
    /// Source stream of a detached pipe
    Unpipe(Stream),
    Drain,
    Error(Fault),
    Close,
    Finish,
}

impl Signal {
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Readable => SignalKind::Readable,
            Signal::Data(_) => SignalKind::Data,
            Signal::End(_) => SignalKind::End,
            Signal::Pipe(_) => SignalKind::Pipe,
            Signal::Unpipe(_) => SignalKind::Unpipe,
            Signal::Drain => SignalKind::Drain,
            Signal::Error(_) => SignalKind::Error,
            Signal::Close => SignalKind::Close,
            Signal::Finish => SignalKind::Finish,
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Data(chunk) => f.debug_tuple("Data").field(chunk).finish(),
            Signal::End(chunk) => f.debug_tuple("End").field(chunk).finish(),
            Signal::Pipe(src) => f.debug_tuple("Pipe").field(&src.id()).finish(),
            Signal::Unpipe(src) => f.debug_tuple("Unpipe").field(&src.id()).finish(),
            Signal::Error(fault) => f.debug_tuple("Error").field(&fault.to_string()).finish(),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

/// Handler invoked with the emitting stream and the signal
pub type Handler = Arc<dyn Fn(&Stream, &Signal) + Send + Sync>;

/// Token returned by `on`/`once`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    kind: SignalKind,
    seq: u64,
}

impl SubscriptionId {
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        self.kind
    }
}

struct Subscriber {
    id: SubscriptionId,
    once: bool,
    handler: Handler,
}

struct BusState {
    next_seq: u64,
    subscribers: HashMap<SignalKind, Vec<Subscriber>>,
}

// ============================================================================
// Bus
// ============================================================================

/// Per-stream publish/subscribe
pub struct SignalBus {
    inner: Mutex<BusState>,
}

impl SignalBus {
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusState {
                next_seq: 0,
                subscribers: HashMap::new(),
            }),
        }
    }

    /// Persistent subscription
    pub fn on(&self, kind: SignalKind, handler: Handler) -> SubscriptionId {
        self.subscribe(kind, handler, false)
    }

    /// Subscription removed before its first invocation
    pub fn once(&self, kind: SignalKind, handler: Handler) -> SubscriptionId {
        self.subscribe(kind, handler, true)
    }

    fn subscribe(&self, kind: SignalKind, handler: Handler, once: bool) -> SubscriptionId {
        let mut state = self.inner.lock();
        let id = SubscriptionId {
            kind,
            seq: state.next_seq,
        };
        state.next_seq += 1;
        state.subscribers.entry(kind).or_default().push(Subscriber {
            id,
            once,
            handler,
        });
        id
    }

    /// Remove a subscription. Returns `false` if it was not subscribed.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut state = self.inner.lock();
        let Some(list) = state.subscribers.get_mut(&id.kind()) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        before != list.len()
    }

    /// Number of current subscriptions for a signal kind
    #[must_use]
    pub fn listener_count(&self, kind: SignalKind) -> usize {
        self.inner.lock().subscribers.get(&kind).map_or(0, Vec::len)
    }

    /// Emit to every current handler of the signal's kind.
    ///
    /// Returns the number of handlers invoked.
    pub fn emit(&self, emitter: &Stream, signal: &Signal) -> usize {
        self.emit_except(emitter, signal, &[])
    }

    /// Emit, skipping the given subscriptions.
    ///
    /// Skipped one-shot subscriptions stay subscribed.
    pub fn emit_except(&self, emitter: &Stream, signal: &Signal, skip: &[SubscriptionId]) -> usize {
        let kind = signal.kind();
        let snapshot: Vec<Handler> = {
            let mut state = self.inner.lock();
            let Some(list) = state.subscribers.get_mut(&kind) else {
                log::trace!("bus.emit: {kind:?} on {} has no handlers", emitter.id());
                return 0;
            };
            let snapshot = list
                .iter()
                .filter(|s| !skip.contains(&s.id))
                .map(|s| Arc::clone(&s.handler))
                .collect();
            list.retain(|s| !s.once || skip.contains(&s.id));
            snapshot
        };

        log::trace!(
            "bus.emit: {kind:?} on {} -> {} handlers",
            emitter.id(),
            snapshot.len()
        );

        for handler in &snapshot {
            handler(emitter, signal);
        }
        snapshot.len()
    }
}

impl fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        let mut map = f.debug_map();
        for (kind, list) in &state.subscribers {
            map.entry(kind, &list.len());
        }
        map.finish()
    }
}
