//! Cooperative deferred callbacks
//!
//! The streams never spawn threads or timers. Work that must happen "later"
//! (for example ending a destination piped from an already ended source) is
//! posted to a [`TickQueue`] and runs when the owner of the queue calls
//! [`TickQueue::run_pending`].

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

type Task = Box<dyn FnOnce() + Send>;

/// FIFO of deferred tasks, shared by clones
#[derive(Clone, Default)]
pub struct TickQueue {
    inner: Arc<Mutex<VecDeque<Task>>>,
}

impl TickQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a task to the next turn
    pub fn defer(&self, task: impl FnOnce() + Send + 'static) {
        self.inner.lock().push_back(Box::new(task));
    }

    /// Run the tasks that were queued before this call.
    ///
    /// Tasks posted while running wait for the next call.
    /// Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let due = self.inner.lock().len();
        let mut ran = 0;
        while ran < due {
            // Lock released before the task runs: tasks may post more tasks
            let Some(task) = self.inner.lock().pop_front() else {
                break;
            };
            task();
            ran += 1;
        }
        log::trace!("tick: ran {ran} deferred task(s)");
        ran
    }

    /// Run turns until no task is left. Returns the total number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.run_pending();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl fmt::Debug for TickQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TickQueue(pending={})", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_run_in_order() {
        let queue = TickQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            queue.defer(move || log.lock().push(i));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_nested_task_waits_for_next_turn() {
        let queue = TickQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let q = queue.clone();
        let l = Arc::clone(&log);
        queue.defer(move || {
            l.lock().push("outer");
            let l2 = Arc::clone(&l);
            q.defer(move || l2.lock().push("inner"));
        });

        assert_eq!(queue.run_pending(), 1);
        assert_eq!(*log.lock(), vec!["outer"]);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(*log.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_run_until_idle() {
        let queue = TickQueue::new();
        let q = queue.clone();
        queue.defer(move || q.defer(|| {}));
        assert_eq!(queue.run_until_idle(), 2);
        assert_eq!(queue.run_pending(), 0);
    }
}
