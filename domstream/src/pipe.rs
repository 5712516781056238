//! Pipe Coordinator
//!
//! Fans the chunks of one source stream out to N destination streams.
//!
//! # States of a source
//!
//! ```text
//!             pipe()                     write() == false
//!   Idle ──────────────▶ Flowing ─────────────────────────▶ AwaitingDrain
//!    ▲                    │   ▲                                  │
//!    │   buffer empty     │   │        all drain credits back    │
//!    └── (ran_out) ◀──────┘   └──────────────────────────────────┘
//!
//!   source `end` or last destination detached ──▶ Unpiped
//! ```
//!
//! - The pump loop pulls one chunk at a time from the head of the source
//!   buffer and writes it to every destination in registration order.
//! - A destination whose write returns `false` takes one drain credit. The
//!   loop stops as soon as any credit is out and resumes when the last one
//!   comes back through the destination's `drain` signal.
//! - When the buffer runs out, `ran_out` is set and the next `readable` on the
//!   source restarts the loop.
//! - Only one pump loop runs per source: `flow` called while the loop is
//!   running (from a handler reacting to a write) returns immediately, and
//!   the running loop picks up whatever changed.
//!
//! # Wiring per pipe
//!
//! | stream | signal                  | reaction                             |
//! |--------|-------------------------|--------------------------------------|
//! | src    | `end` (once)            | end the destination, then cleanup    |
//! | src    | `data`                  | forward data emitted outside the pump|
//! | dest   | `unpipe` from this src  | cleanup                              |
//! | dest   | `drain`                 | return the drain credit              |
//! | dest   | `error` (once)          | unpipe, re-raise if nobody listens   |
//! | dest   | `close`/`finish` (once) | unpipe                               |
//! | dest   | `end` (once)            | stop forwarding `data`               |
//!
//! Cleanup removes every subscription of the table above. Handlers on the
//! destination hold the source weakly.

use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::chunk::Chunk;
use crate::idgen::StreamId;
use crate::signal::{Signal, SignalKind, SubscriptionId};
use crate::stream::{Stream, WeakStream};

/// Options for [`Stream::pipe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipeOptions {
    /// End the destination when the source ends
    pub end: bool,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self { end: true }
    }
}

/// One attached destination with its wiring
pub(crate) struct PipeLink {
    pub(crate) dest: Stream,
    /// This destination holds a drain credit
    pub(crate) awaiting_drain: bool,
    src_end: Option<SubscriptionId>,
    forward: Option<SubscriptionId>,
    dest_subs: Vec<SubscriptionId>,
}

/// Why the pump loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpExit {
    RanOut,
    AwaitingDrain,
    NoDestinations,
    Ended,
}

impl Stream {
    /// Pipe this stream into `dest`, returning `dest` for chaining.
    ///
    /// The first pipe starts the pump loop, which immediately delivers what
    /// is already buffered. If this stream has already ended, `dest` is ended
    /// (or just detached with `end: false`) on the next tick.
    pub fn pipe(&self, dest: &Stream, options: PipeOptions) -> Stream {
        let src = self;
        if src.lock().destinations.iter().any(|l| l.dest == *dest) {
            warn!(src = %src.id(), dest = %dest.id(), "pipe: destination already attached");
            return dest.clone();
        }

        let src_id = src.id();
        let dest_id = dest.id();
        let weak_src = src.downgrade();

        // Source end
        let end_emitted = src.lock().end_emitted;
        let src_end = if end_emitted {
            let weak = weak_src.clone();
            let d = dest.clone();
            src.ticks().defer(move || {
                if let Some(src) = weak.upgrade() {
                    on_source_end(&src, &d, options.end);
                }
            });
            None
        } else {
            let d = dest.clone();
            Some(src.once(SignalKind::End, move |src, _| {
                on_source_end(src, &d, options.end);
            }))
        };

        // Data emitted on the source directly goes to the destination as-is
        let d = dest.clone();
        let forward = src.on(SignalKind::Data, move |_, signal| {
            if let Signal::Data(chunk) = signal {
                d.emit(Signal::Data(chunk.clone()));
            }
        });

        let dest_subs = wire_destination(dest, src_id, &weak_src);

        src.lock().destinations.push(PipeLink {
            dest: dest.clone(),
            awaiting_drain: false,
            src_end,
            forward: Some(forward),
            dest_subs,
        });
        debug!(src = %src_id, dest = %dest_id, hint = src.hint(), "pipe attached");

        dest.emit(Signal::Pipe(src.clone()));

        let start = {
            let mut st = src.lock();
            if st.flowing {
                false
            } else {
                st.flowing = true;
                true
            }
        };
        if start {
            let id = src.on(SignalKind::Readable, |src, _| {
                let resume = std::mem::replace(&mut src.lock().ran_out, false);
                if resume {
                    flow(src);
                }
            });
            src.lock().pump_readable = Some(id);
            flow(src);
        }

        dest.clone()
    }

    /// Detach `dest`, or every destination when `None`.
    ///
    /// The detached destination receives `unpipe` carrying this stream.
    /// Detaching a destination that is not attached does nothing.
    pub fn unpipe(&self, dest: Option<&Stream>) -> &Self {
        match dest {
            Some(dest) => {
                if self.detach(dest.id()) {
                    dest.emit(Signal::Unpipe(self.clone()));
                } else {
                    trace!(src = %self.id(), dest = %dest.id(), "unpipe: not attached");
                }
            }
            None => {
                let dests: Vec<Stream> = self
                    .lock()
                    .destinations
                    .iter()
                    .map(|l| l.dest.clone())
                    .collect();
                for dest in &dests {
                    self.unpipe(Some(dest));
                }
            }
        }
        self
    }

    /// Remove a destination and all of its wiring. Returns `false` if the
    /// destination was not attached.
    pub(crate) fn detach(&self, dest_id: StreamId) -> bool {
        let (link, resume) = {
            let mut st = self.lock();
            let Some(pos) = st.destinations.iter().position(|l| l.dest.id() == dest_id) else {
                return false;
            };
            let link = st.destinations.remove(pos);

            // A destination leaving while holding a credit must not stall the
            // others
            let mut resume = st.destinations.is_empty();
            if link.awaiting_drain {
                st.awaiting_drain = st.awaiting_drain.saturating_sub(1);
                resume |= st.awaiting_drain == 0;
            }
            (link, resume)
        };

        if let Some(id) = link.src_end {
            self.off(id);
        }
        if let Some(id) = link.forward {
            self.off(id);
        }
        for id in &link.dest_subs {
            link.dest.off(*id);
        }
        debug!(src = %self.id(), dest = %dest_id, "pipe detached");

        if resume {
            flow(self);
        }
        true
    }

    fn return_drain_credit(&self, dest_id: StreamId) {
        let resume = {
            let mut st = self.lock();
            let Some(link) = st.destinations.iter_mut().find(|l| l.dest.id() == dest_id) else {
                return;
            };
            if !link.awaiting_drain {
                return;
            }
            link.awaiting_drain = false;
            st.awaiting_drain = st.awaiting_drain.saturating_sub(1);
            st.awaiting_drain == 0
        };
        trace!(src = %self.id(), dest = %dest_id, resume, "drain credit returned");
        if resume {
            flow(self);
        }
    }

    fn take_drain_credit(&self, dest_id: StreamId) {
        let mut st = self.lock();
        let Some(link) = st.destinations.iter_mut().find(|l| l.dest.id() == dest_id) else {
            return;
        };
        if !link.awaiting_drain {
            link.awaiting_drain = true;
            st.awaiting_drain += 1;
        }
    }

    fn drop_forwarder(&self, dest_id: StreamId) {
        let forward = {
            let mut st = self.lock();
            st.destinations
                .iter_mut()
                .find(|l| l.dest.id() == dest_id)
                .and_then(|l| l.forward.take())
        };
        if let Some(id) = forward {
            self.off(id);
        }
    }
}

fn on_source_end(src: &Stream, dest: &Stream, do_end: bool) {
    if do_end {
        if let Err(e) = dest.end(None) {
            warn!(src = %src.id(), dest = %dest.id(), "pipe: ending destination failed: {e}");
        }
    }
    src.detach(dest.id());
}

fn wire_destination(dest: &Stream, src_id: StreamId, weak_src: &WeakStream) -> Vec<SubscriptionId> {
    let dest_id = dest.id();
    let mut subs = Vec::with_capacity(6);

    let weak = weak_src.clone();
    subs.push(dest.on(SignalKind::Unpipe, move |_, signal| {
        if let Signal::Unpipe(from) = signal {
            if from.id() != src_id {
                return;
            }
            if let Some(src) = weak.upgrade() {
                src.detach(dest_id);
            }
        }
    }));

    let weak = weak_src.clone();
    subs.push(dest.on(SignalKind::Drain, move |_, _| {
        if let Some(src) = weak.upgrade() {
            src.return_drain_credit(dest_id);
        }
    }));

    let weak = weak_src.clone();
    subs.push(dest.once(SignalKind::Error, move |dest, signal| {
        let Signal::Error(fault) = signal else {
            return;
        };
        if let Some(src) = weak.upgrade() {
            src.unpipe(Some(dest));
        }
        if dest.listener_count(SignalKind::Error) == 0 {
            dest.emit(Signal::Error(fault.clone()));
        }
    }));

    for kind in [SignalKind::Close, SignalKind::Finish] {
        let weak = weak_src.clone();
        subs.push(dest.once(kind, move |dest, _| {
            if let Some(src) = weak.upgrade() {
                src.unpipe(Some(dest));
            }
        }));
    }

    let weak = weak_src.clone();
    subs.push(dest.once(SignalKind::End, move |_, _| {
        if let Some(src) = weak.upgrade() {
            src.drop_forwarder(dest_id);
        }
    }));

    subs
}

/// The pump loop
pub(crate) fn flow(src: &Stream) {
    {
        let mut st = src.lock();
        if st.pumping {
            trace!(src = %src.id(), "flow: already pumping");
            return;
        }
        st.pumping = true;
        st.awaiting_drain = 0;
        for link in &mut st.destinations {
            link.awaiting_drain = false;
        }
    }

    let exit = loop {
        let (chunk, dests, forwarders) = {
            let mut st = src.lock();
            if st.destinations.is_empty() {
                break PumpExit::NoDestinations;
            }
            if st.end_emitted {
                break PumpExit::Ended;
            }
            let Some(chunk) = st.buffer.pop_front() else {
                st.set_needs_more();
                break PumpExit::RanOut;
            };
            let dests: Vec<Stream> = st.destinations.iter().map(|l| l.dest.clone()).collect();
            let forwarders: Vec<SubscriptionId> =
                st.destinations.iter().filter_map(|l| l.forward).collect();
            (chunk, dests, forwarders)
        };

        trace!(src = %src.id(), pipes = dests.len(), "flow: {} chunk", chunk.kind());
        deliver(src, &dests, &chunk);

        // Direct listeners see the chunk too; forwarders already got it
        src.emit_except(Signal::Data(chunk), &forwarders);

        if src.lock().awaiting_drain > 0 {
            break PumpExit::AwaitingDrain;
        }
    };

    let readable = {
        let mut st = src.lock();
        st.pumping = false;
        match exit {
            PumpExit::RanOut => {
                st.ran_out = true;
                None
            }
            PumpExit::AwaitingDrain | PumpExit::Ended => None,
            PumpExit::NoDestinations => {
                st.flowing = false;
                st.ran_out = false;
                st.pump_readable.take()
            }
        }
    };
    trace!(src = %src.id(), "flow: stopped, {exit:?}");

    if exit == PumpExit::NoDestinations {
        if let Some(id) = readable {
            src.off(id);
        }
        // Nothing to pipe into: hand leftovers to direct listeners
        if src.listener_count(SignalKind::Data) > 0 {
            let pending = src.take_all();
            for chunk in pending {
                src.emit(Signal::Data(chunk));
            }
        }
    }
}

fn deliver(src: &Stream, dests: &[Stream], chunk: &Chunk) {
    for dest in dests {
        match dest.write(chunk.clone()) {
            Ok(true) => {}
            Ok(false) => src.take_drain_credit(dest.id()),
            Err(e) => warn!(src = %src.id(), dest = %dest.id(), "flow: write failed: {e}"),
        }
    }
}
