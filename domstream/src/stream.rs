//! Stream Core
//!
//! A stream holds a chunk buffer, a signal bus and the read/write state that
//! decides, for every incoming chunk, whether it is delivered immediately as
//! a `data` signal or buffered for a consumer that asked for more.
//!
//! # Delivery paths
//!
//! ```text
//!   write(chunk) ──needs_more or flowing?──no──▶ emit Data(chunk)
//!                           │
//!                          yes
//!                           ▼
//!   push(chunk) ──▶ buffer.append ──needs_more?──yes──▶ emit Readable
//!
//!   read() ── buffer empty ──▶ needs_more = true, None
//! ```
//!
//! Emitting `Readable` clears `needs_more`, so a waiting consumer is notified
//! once per failed read.
//!
//! # Thread Safety
//!
//! `Stream` is a cheap handle around `Arc`. State is guarded by one
//! `parking_lot::Mutex` per stream. The mutex is not reentrant, so it is
//! never held while handlers, middleware steps or deferred tasks run: they
//! are free to call back into any stream, including the one that invoked
//! them.

use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{error, trace, warn};

use crate::chunk::{value_kind, Chunk};
use crate::error::{Fault, StreamError};
use crate::idgen::{next_stream_id, StreamId};
use crate::io::ChunkBuffer;
use crate::pipe::PipeLink;
use crate::signal::{Signal, SignalBus, SignalKind, SubscriptionId};
use crate::stack::{Next, StackRunner};
use crate::tick::TickQueue;

/// Mutable state of one stream
pub(crate) struct StreamState {
    /// Reads are permitted. No operation revokes it: buffered chunks stay
    /// readable after `end`.
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    /// A consumer asked for data the buffer could not provide
    pub(crate) needs_more: bool,
    pub(crate) has_emitted_readable: bool,
    /// Writes report back-pressure until `drain()`
    pub(crate) need_drain: bool,
    pub(crate) end_emitted: bool,
    pub(crate) buffer: ChunkBuffer,

    // Pipe coordination, see `crate::pipe`
    pub(crate) flowing: bool,
    pub(crate) pumping: bool,
    pub(crate) ran_out: bool,
    pub(crate) awaiting_drain: usize,
    pub(crate) destinations: Vec<PipeLink>,
    pub(crate) pump_readable: Option<SubscriptionId>,

    stack: StackRunner,
    unhandled_errors: Vec<Fault>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            readable: true,
            writable: true,
            needs_more: false,
            has_emitted_readable: false,
            need_drain: false,
            end_emitted: false,
            buffer: ChunkBuffer::new(),
            flowing: false,
            pumping: false,
            ran_out: false,
            awaiting_drain: 0,
            destinations: Vec::new(),
            pump_readable: None,
            stack: StackRunner::new(),
            unhandled_errors: Vec::new(),
        }
    }

    /// Record that a consumer is waiting; re-arms the readable notification
    pub(crate) fn set_needs_more(&mut self) {
        self.needs_more = true;
        self.has_emitted_readable = false;
    }
}

/// Point-in-time copy of a stream's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStatus {
    /// Informational, always `true`
    pub readable: bool,
    pub writable: bool,
    pub needs_more: bool,
    pub has_emitted_readable: bool,
    pub need_drain: bool,
    pub end_emitted: bool,
    pub flowing: bool,
    pub ran_out: bool,
    pub awaiting_drain: usize,
    pub buffered: usize,
    pub pipes: usize,
}

struct StreamInner {
    id: StreamId,
    hint: String,
    state: Mutex<StreamState>,
    bus: SignalBus,
    ticks: TickQueue,
}

/// Push/pull chunk stream
///
/// Clones share the same stream.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<StreamInner>,
}

/// Non-owning reference to a stream
#[derive(Clone)]
pub struct WeakStream(Weak<StreamInner>);

impl WeakStream {
    #[must_use]
    pub fn upgrade(&self) -> Option<Stream> {
        self.0.upgrade().map(|inner| Stream { inner })
    }
}

impl Stream {
    /// Create a stream with its own tick queue
    #[must_use]
    pub fn new(hint: &str) -> Self {
        Self::with_ticks(hint, TickQueue::new())
    }

    /// Create a stream that posts deferred work to `ticks`
    #[must_use]
    pub fn with_ticks(hint: &str, ticks: TickQueue) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: next_stream_id(),
                hint: hint.to_string(),
                state: Mutex::new(StreamState::new()),
                bus: SignalBus::new(),
                ticks,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> StreamId {
        self.inner.id
    }

    #[must_use]
    pub fn hint(&self) -> &str {
        &self.inner.hint
    }

    /// Queue used for deferred work of this stream
    #[must_use]
    pub fn ticks(&self) -> &TickQueue {
        &self.inner.ticks
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakStream {
        WeakStream(Arc::downgrade(&self.inner))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.inner.state.lock()
    }

    #[must_use]
    pub fn status(&self) -> StreamStatus {
        let st = self.lock();
        StreamStatus {
            readable: st.readable,
            writable: st.writable,
            needs_more: st.needs_more,
            has_emitted_readable: st.has_emitted_readable,
            need_drain: st.need_drain,
            end_emitted: st.end_emitted,
            flowing: st.flowing,
            ran_out: st.ran_out,
            awaiting_drain: st.awaiting_drain,
            buffered: st.buffer.len(),
            pipes: st.destinations.len(),
        }
    }

    // ------------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------------

    pub fn on<F>(&self, kind: SignalKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Stream, &Signal) + Send + Sync + 'static,
    {
        self.inner.bus.on(kind, Arc::new(handler))
    }

    pub fn once<F>(&self, kind: SignalKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Stream, &Signal) + Send + Sync + 'static,
    {
        self.inner.bus.once(kind, Arc::new(handler))
    }

    /// Unsubscribe; a no-op for ids that are no longer subscribed
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.bus.off(id)
    }

    #[must_use]
    pub fn listener_count(&self, kind: SignalKind) -> usize {
        self.inner.bus.listener_count(kind)
    }

    /// Subscribe to `data` with a chunk-typed handler
    pub fn on_data<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Stream, &Chunk) + Send + Sync + 'static,
    {
        self.on(SignalKind::Data, move |stream, signal| {
            if let Signal::Data(chunk) = signal {
                handler(stream, chunk);
            }
        })
    }

    /// Subscribe to `end`; the handler gets the optional final chunk
    pub fn on_end<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Stream, Option<&Chunk>) + Send + Sync + 'static,
    {
        self.on(SignalKind::End, move |stream, signal| {
            if let Signal::End(chunk) = signal {
                handler(stream, chunk.as_ref());
            }
        })
    }

    /// Subscribe a `data` handler and an `end` handler in one call
    pub fn through<D, E>(&self, on_data: D, on_end: E) -> &Self
    where
        D: Fn(&Stream, &Chunk) + Send + Sync + 'static,
        E: Fn(&Stream, Option<&Chunk>) + Send + Sync + 'static,
    {
        self.on_data(on_data);
        self.on_end(on_end);
        self
    }

    /// Emit a signal on this stream. Returns the number of handlers invoked.
    ///
    /// Emitting `Readable` marks the waiting consumer as served, emitting
    /// `End` marks the stream as ended. An `Error` nobody listens to is
    /// logged and kept, see [`Stream::take_unhandled_errors`].
    pub fn emit(&self, signal: Signal) -> usize {
        self.emit_except(signal, &[])
    }

    pub(crate) fn emit_except(&self, signal: Signal, skip: &[SubscriptionId]) -> usize {
        match &signal {
            Signal::Readable => {
                let mut st = self.lock();
                st.needs_more = false;
                st.has_emitted_readable = true;
            }
            Signal::End(_) => {
                let mut st = self.lock();
                st.end_emitted = true;
                st.writable = false;
            }
            _ => {}
        }

        let n = self.inner.bus.emit_except(self, &signal, skip);

        if n == 0 {
            if let Signal::Error(fault) = signal {
                error!(stream = %self.id(), hint = self.hint(), "unhandled error signal: {fault}");
                self.lock().unhandled_errors.push(fault);
            }
        }
        n
    }

    /// Error signals that were emitted while nobody listened
    pub fn take_unhandled_errors(&self) -> Vec<Fault> {
        std::mem::take(&mut self.lock().unhandled_errors)
    }

    // ------------------------------------------------------------------------
    // Write side
    // ------------------------------------------------------------------------

    /// Write a chunk.
    ///
    /// The chunk is buffered with [`Stream::push`] if a consumer is waiting
    /// for data or the stream is piped, so the pump delivers it in order and
    /// under the destinations' back-pressure. Otherwise it is emitted right
    /// away as `data`. Writing [`Chunk::END`] ends the stream.
    ///
    /// Returns `false` when the stream reports back-pressure, see
    /// [`Stream::hold`].
    ///
    /// # Errors
    ///
    /// `InvalidChunkType` for chunks that fail validation.
    pub fn write(&self, chunk: impl Into<Chunk>) -> Result<bool, StreamError> {
        let chunk = chunk.into();
        let (buffered, writable) = {
            let st = self.lock();
            (st.needs_more || st.flowing, st.writable)
        };
        if !writable {
            warn!(stream = %self.id(), hint = self.hint(), "write after end");
        }

        if buffered || chunk.is_end() {
            self.push(chunk)?;
        } else {
            chunk.validate()?;
            self.emit(Signal::Data(chunk));
        }
        Ok(!self.lock().need_drain)
    }

    /// Append a chunk to the buffer.
    ///
    /// [`Chunk::END`] is not buffered: it emits `end` and returns `None`.
    /// Otherwise returns the new buffer length, after emitting `readable` if
    /// a consumer was waiting.
    ///
    /// # Errors
    ///
    /// `InvalidChunkType`; the buffer is left unchanged.
    pub fn push(&self, chunk: impl Into<Chunk>) -> Result<Option<usize>, StreamError> {
        let chunk = chunk.into();
        if chunk.is_end() {
            self.emit(Signal::End(None));
            return Ok(None);
        }

        let (len, notify) = {
            let mut st = self.lock();
            let len = st.buffer.append(chunk)?;
            (len, st.needs_more)
        };
        if notify {
            self.emit(Signal::Readable);
        }
        Ok(Some(len))
    }

    /// Alias of [`Stream::push`]
    pub fn queue(&self, chunk: impl Into<Chunk>) -> Result<Option<usize>, StreamError> {
        self.push(chunk)
    }

    /// Insert a chunk at the head of the buffer, returning the new length
    ///
    /// # Errors
    ///
    /// `InvalidChunkType`, including for [`Chunk::END`].
    pub fn unshift(&self, chunk: impl Into<Chunk>) -> Result<usize, StreamError> {
        let (len, notify) = {
            let mut st = self.lock();
            let len = st.buffer.prepend(chunk.into())?;
            (len, st.needs_more)
        };
        if notify {
            self.emit(Signal::Readable);
        }
        Ok(len)
    }

    /// Write the final chunk, if any, then emit `end`
    ///
    /// `end` is emitted even if the final chunk is rejected.
    ///
    /// # Errors
    ///
    /// Propagates the error of writing the final chunk.
    pub fn end(&self, chunk: Option<Chunk>) -> Result<&Self, StreamError> {
        let written = match chunk {
            Some(chunk) => self.write(chunk).map(|_| ()),
            None => Ok(()),
        };
        self.emit(Signal::End(None));
        written.map(|()| self)
    }

    /// Report back-pressure: writes return `false` until [`Stream::drain`]
    pub fn hold(&self) {
        self.lock().need_drain = true;
    }

    /// Lift back-pressure and emit `drain`. Returns `false` if the stream was
    /// not holding.
    pub fn drain(&self) -> bool {
        let was_holding = std::mem::replace(&mut self.lock().need_drain, false);
        if was_holding {
            self.emit(Signal::Drain);
        }
        was_holding
    }

    // ------------------------------------------------------------------------
    // Read side
    // ------------------------------------------------------------------------

    /// Read from the buffer without consuming.
    ///
    /// | buffer / `size`          | result                                  |
    /// |--------------------------|-----------------------------------------|
    /// | empty                    | `None`, consumer marked as waiting      |
    /// | `Some(0)`                | `None`, `readable` emitted once         |
    /// | `Some(n)`, n > len       | `None`, consumer marked as waiting      |
    /// | `None`                   | every buffered chunk                    |
    /// | `Some(n)`                | chunks `offset..n`                      |
    #[must_use]
    pub fn read(&self, size: Option<usize>, offset: Option<usize>) -> Option<Vec<Chunk>> {
        let mut st = self.lock();
        if st.buffer.is_empty() {
            st.set_needs_more();
            return None;
        }

        match size {
            Some(0) => {
                let notify = !st.has_emitted_readable;
                drop(st);
                if notify {
                    self.emit(Signal::Readable);
                }
                None
            }
            Some(n) if n > st.buffer.len() => {
                trace!(stream = %self.id(), want = n, have = st.buffer.len(), "read: short buffer");
                st.set_needs_more();
                None
            }
            None => Some(st.buffer.snapshot()),
            Some(n) => Some(st.buffer.take(n, offset.unwrap_or(0))),
        }
    }

    /// [`Stream::read`] with size and offset given as JSON values
    ///
    /// # Errors
    ///
    /// `InvalidArgumentType` if a given value is not a non-negative integer.
    pub fn read_value(
        &self,
        size: Option<&Value>,
        offset: Option<&Value>,
    ) -> Result<Option<Vec<Chunk>>, StreamError> {
        let size = as_index(size)?;
        let offset = as_index(offset)?;
        Ok(self.read(size, offset))
    }

    /// Remove and return every buffered chunk
    pub fn take_all(&self) -> Vec<Chunk> {
        self.lock().buffer.drain_all()
    }

    // ------------------------------------------------------------------------
    // Middleware
    // ------------------------------------------------------------------------

    /// Append a step to the stack that processes start-event payloads
    pub fn use_middleware<F>(&self, step: F) -> &Self
    where
        F: Fn(&Stream, Chunk, Next<'_>) -> Result<(), StreamError> + Send + Sync + 'static,
    {
        self.lock().stack.push(Arc::new(step));
        self
    }

    /// Run a payload through the middleware stack
    ///
    /// # Errors
    ///
    /// The first error returned by a step.
    pub fn run_stack(&self, chunk: Chunk) -> Result<(), StreamError> {
        let stack = self.lock().stack.clone();
        if stack.is_empty() {
            trace!(stream = %self.id(), "run_stack: no middleware, {} dropped", chunk.kind());
            return Ok(());
        }
        trace!(stream = %self.id(), steps = stack.len(), "run_stack");
        stack.run(self, chunk)
    }
}

fn as_index(value: Option<&Value>) -> Result<Option<usize>, StreamError> {
    let Some(value) = value else {
        return Ok(None);
    };
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| StreamError::InvalidArgumentType {
            expected: "non-negative integer",
            found: value_kind(value).to_string(),
        })
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Stream {}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stream(id={}, hint={})", self.inner.id, self.inner.hint)
    }
}
