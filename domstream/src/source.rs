//! Binding streams to external event sources
//!
//! An event source is anything that can call back when a named event fires.
//! Binding a stream registers two kinds of triggers on it:
//!
//! - `start` events carry data: their payload runs through the stream's
//!   middleware stack, whose last step writes it to the stream.
//! - `end` events terminate: their payload becomes the `end` signal's chunk.

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use crate::chunk::{value_kind, Chunk};
use crate::error::StreamError;
use crate::signal::Signal;
use crate::stream::Stream;

/// What a bound event does to the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerRole {
    Start,
    End,
}

/// Callback an event source invokes with the event payload
#[derive(Clone)]
pub struct Trigger(Arc<dyn Fn(Chunk) -> Result<(), StreamError> + Send + Sync>);

impl Trigger {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Chunk) -> Result<(), StreamError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// # Errors
    ///
    /// Whatever the bound stream reports for this payload.
    pub fn fire(&self, payload: Chunk) -> Result<(), StreamError> {
        (self.0)(payload)
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Trigger")
    }
}

/// Capability to register named triggers
pub trait EventSource {
    /// Invoke `trigger` whenever `event` fires.
    ///
    /// # Errors
    ///
    /// `StreamError::Source` if the source cannot observe `event`.
    fn bind(&mut self, event: &str, role: TriggerRole, trigger: Trigger)
        -> Result<(), StreamError>;
}

// ============================================================================
// Options
// ============================================================================

/// Event names for [`Stream::bind`]
///
/// Each role accepts a space-separated string or a list of names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BindOptions {
    #[serde(default, deserialize_with = "event_names")]
    pub start: Vec<String>,
    #[serde(default, deserialize_with = "event_names")]
    pub end: Vec<String>,
}

impl BindOptions {
    #[must_use]
    pub fn new(start: &str, end: &str) -> Self {
        Self {
            start: split_names([start]),
            end: split_names([end]),
        }
    }

    /// Parse options from a JSON record
    ///
    /// # Errors
    ///
    /// `InvalidArgumentType` if `value` is not an object or a role is neither
    /// a string nor a list of strings.
    pub fn from_value(value: &Value) -> Result<Self, StreamError> {
        if !value.is_object() {
            return Err(StreamError::InvalidArgumentType {
                expected: "object",
                found: value_kind(value).to_string(),
            });
        }
        Self::deserialize(value).map_err(|e| StreamError::InvalidArgumentType {
            expected: "event name or list of event names",
            found: e.to_string(),
        })
    }
}

fn split_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    names
        .into_iter()
        .flat_map(str::split_whitespace)
        .map(str::to_string)
        .collect()
}

fn event_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Names {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Names::deserialize(deserializer)? {
        Names::One(s) => split_names([s.as_str()]),
        Names::Many(list) => split_names(list.iter().map(String::as_str)),
    })
}

// ============================================================================
// Binding
// ============================================================================

impl Stream {
    /// Register this stream's triggers on `source`.
    ///
    /// Appends [`Stream::write`] as the last middleware step, so start
    /// payloads reach the stream after every step added before.
    ///
    /// # Errors
    ///
    /// The first error returned by `source.bind`.
    pub fn bind<S>(&self, source: &mut S, options: &BindOptions) -> Result<&Self, StreamError>
    where
        S: EventSource + ?Sized,
    {
        let weak = self.downgrade();
        let start = Trigger::new(move |payload| match weak.upgrade() {
            Some(stream) => stream.run_stack(payload),
            None => Ok(()),
        });

        let weak = self.downgrade();
        let end = Trigger::new(move |payload| {
            if let Some(stream) = weak.upgrade() {
                stream.emit(Signal::End(Some(payload)));
            }
            Ok(())
        });

        for event in &options.start {
            source.bind(event, TriggerRole::Start, start.clone())?;
        }
        for event in &options.end {
            source.bind(event, TriggerRole::End, end.clone())?;
        }
        debug!(
            stream = %self.id(),
            start = ?options.start,
            end = ?options.end,
            "bound to event source"
        );

        Ok(self.use_middleware(|stream, chunk, _next| stream.write(chunk).map(|_| ())))
    }

    /// Alias of [`Stream::bind`]
    ///
    /// # Errors
    ///
    /// See [`Stream::bind`].
    pub fn source<S>(&self, source: &mut S, options: &BindOptions) -> Result<&Self, StreamError>
    where
        S: EventSource + ?Sized,
    {
        self.bind(source, options)
    }
}

// ============================================================================
// In-memory event source
// ============================================================================

/// Event source driven by explicit `fire` calls
///
/// Clones share the same table.
#[derive(Clone, Default)]
pub struct EventTable {
    inner: Arc<Mutex<HashMap<String, Vec<(TriggerRole, Trigger)>>>>,
}

impl EventTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `event`, returning the number of triggers run
    ///
    /// # Errors
    ///
    /// The first trigger error; later triggers for the event do not run.
    pub fn fire(&self, event: &str, payload: Chunk) -> Result<usize, StreamError> {
        let triggers: Vec<Trigger> = self
            .inner
            .lock()
            .get(event)
            .map(|list| list.iter().map(|(_, t)| t.clone()).collect())
            .unwrap_or_default();

        for trigger in &triggers {
            trigger.fire(payload.clone())?;
        }
        Ok(triggers.len())
    }

    /// Bound event names with their roles, sorted by name
    #[must_use]
    pub fn bindings(&self) -> Vec<(String, TriggerRole)> {
        let table = self.inner.lock();
        let mut out: Vec<(String, TriggerRole)> = table
            .iter()
            .flat_map(|(name, list)| list.iter().map(move |(role, _)| (name.clone(), *role)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl EventSource for EventTable {
    fn bind(
        &mut self,
        event: &str,
        role: TriggerRole,
        trigger: Trigger,
    ) -> Result<(), StreamError> {
        if event.is_empty() {
            return Err(StreamError::Source {
                event: event.to_string(),
                reason: "empty event name".to_string(),
            });
        }
        self.inner
            .lock()
            .entry(event.to_string())
            .or_default()
            .push((role, trigger));
        Ok(())
    }
}

impl fmt::Debug for EventTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventTable(events={})", self.inner.lock().len())
    }
}

/// Fire events read line by line from `reader`.
///
/// A line is `<event> [payload]`. The payload is parsed as JSON when
/// possible and taken as a string otherwise; a missing payload is
/// [`Chunk::Undefined`]. Blank lines are skipped.
///
/// Returns the number of lines that fired at least one trigger.
///
/// # Errors
///
/// I/O errors of `reader` and the first trigger error.
pub async fn feed_lines<R>(table: &EventTable, reader: R) -> Result<usize, StreamError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut fired = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (event, payload) = match line.split_once(char::is_whitespace) {
            Some((event, rest)) => (event, parse_payload(rest.trim())),
            None => (line, Chunk::Undefined),
        };
        if table.fire(event, payload)? == 0 {
            debug!("feed_lines: nothing bound to `{event}`");
        } else {
            fired += 1;
        }
    }
    Ok(fired)
}

fn parse_payload(text: &str) -> Chunk {
    serde_json::from_str::<Value>(text).map_or_else(|_| Chunk::from(text), Chunk::from)
}
