//! Stack Runner
//!
//! Ordered middleware applied to values coming from an event source before
//! they reach the stream. Each step receives the current value and a [`Next`]
//! continuation; the chain stops at the first step that does not call it.

use std::fmt;
use std::sync::Arc;

use crate::chunk::Chunk;
use crate::error::StreamError;
use crate::stream::Stream;

/// One middleware step, invoked with the stream it was registered on
pub type Middleware =
    Arc<dyn Fn(&Stream, Chunk, Next<'_>) -> Result<(), StreamError> + Send + Sync>;

/// Continuation handed to a middleware step
pub struct Next<'a> {
    steps: &'a [Middleware],
    stream: &'a Stream,
    original: &'a Chunk,
}

impl Next<'_> {
    /// Continue with the next step.
    ///
    /// `None` forwards the value the chain was started with.
    pub fn call(self, chunk: Option<Chunk>) -> Result<(), StreamError> {
        let Some((step, rest)) = self.steps.split_first() else {
            return Ok(());
        };
        let chunk = chunk.unwrap_or_else(|| self.original.clone());
        let next = Next {
            steps: rest,
            stream: self.stream,
            original: self.original,
        };
        step(self.stream, chunk, next)
    }
}

/// Ordered list of middleware steps
#[derive(Clone, Default)]
pub struct StackRunner {
    steps: Vec<Middleware>,
}

impl StackRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Middleware) {
        self.steps.push(step);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run `chunk` through the steps in order. An empty stack does nothing.
    pub fn run(&self, stream: &Stream, chunk: Chunk) -> Result<(), StreamError> {
        let next = Next {
            steps: &self.steps,
            stream,
            original: &chunk,
        };
        next.call(None)
    }
}

impl fmt::Debug for StackRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StackRunner(steps={})", self.steps.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn step(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Middleware {
        let log = Arc::clone(log);
        Arc::new(move |_: &Stream, chunk: Chunk, next: Next<'_>| {
            log.lock()
                .push(format!("{name}:{}", chunk.as_str().unwrap_or("?")));
            next.call(None)
        })
    }

    #[test]
    fn test_push_grows_stack() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = StackRunner::new();
        assert!(stack.is_empty());

        stack.push(step(&log, "a"));
        stack.push(step(&log, "b"));
        assert_eq!(stack.len(), 2);
        assert!(!stack.is_empty());
    }

    #[test]
    fn test_run_visits_steps_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = StackRunner::new();
        stack.push(step(&log, "a"));
        stack.push(step(&log, "b"));

        let stream = Stream::new("stack");
        stack.run(&stream, Chunk::from("x")).unwrap();
        assert_eq!(*log.lock(), vec!["a:x", "b:x"]);
    }

    #[test]
    fn test_clone_is_independent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = StackRunner::new();
        stack.push(step(&log, "a"));

        let snapshot = stack.clone();
        stack.push(step(&log, "b"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(stack.len(), 2);
    }
}
