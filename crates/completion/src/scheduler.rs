//! The scheduling seam used to deliver completion callbacks.
//!
//! A [`Scheduler`] accepts zero-argument thunks and runs them later, in the
//! order they were submitted, on the same logical thread. The embedding
//! application usually owns the real loop (a GUI main loop, a game tick, a
//! test harness) and implements this trait on top of it. [`LocalScheduler`]
//! is a plain FIFO queue for embedders that have no loop of their own.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

use tracing::{error, warn};

use crate::config::{SchedulerConfig, UnhandledPolicy};
use crate::error::UnhandledError;

pub type Task = Box<dyn FnOnce() + 'static>;

/// Tracing target for the "result never observed" condition.
pub const UNHANDLED_TARGET: &str = "completion::unhandled";

/// Deferred, FIFO, non-reentrant execution of thunks.
///
/// Implementations must never run a task synchronously from inside
/// [`enqueue`](Scheduler::enqueue), and must run tasks in submission order.
pub trait Scheduler {
    /// Queue `task` to run after the current call stack unwinds.
    fn enqueue(&self, task: Task);

    /// Called when a failed completion state is dropped unobserved.
    fn report_unhandled(&self, report: UnhandledError) {
        log_unhandled(&report);
    }
}

fn log_unhandled(report: &UnhandledError) {
    error!(
        target: UNHANDLED_TARGET,
        error_type = report.type_name,
        error = %report.message,
        "{report}"
    );
}

/// Single-threaded FIFO scheduler.
///
/// Nothing runs until the owner calls [`tick`](Self::tick) or
/// [`run_until_idle`](Self::run_until_idle).
pub struct LocalScheduler {
    queue: RefCell<VecDeque<Task>>,
    policy: UnhandledPolicy,
    unhandled: RefCell<Vec<UnhandledError>>,
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocalScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalScheduler")
            .field("queued", &self.len())
            .field("policy", &self.policy)
            .field("unhandled", &self.unhandled.borrow().len())
            .finish()
    }
}

impl LocalScheduler {
    /// Empty queue with the default (`Log`) unhandled policy.
    pub fn new() -> Self {
        Self::with_policy(UnhandledPolicy::default())
    }

    /// Empty queue with the given unhandled policy.
    pub fn with_policy(policy: UnhandledPolicy) -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            policy,
            unhandled: RefCell::new(Vec::new()),
        }
    }

    /// Empty queue configured from the `[scheduler]` config section.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::with_policy(config.unhandled)
    }

    /// How unhandled errors are reported.
    pub fn policy(&self) -> UnhandledPolicy {
        self.policy
    }

    /// Run the oldest queued task. Returns false if the queue was empty.
    pub fn tick(&self) -> bool {
        // Release the queue before running so the task can enqueue more work.
        let next = self.queue.borrow_mut().pop_front();
        match next {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including tasks queued along the
    /// way. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.tick() {
            ran += 1;
        }
        ran
    }

    /// Number of tasks waiting to run.
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Drain the reports recorded under [`UnhandledPolicy::Collect`].
    pub fn take_unhandled(&self) -> Vec<UnhandledError> {
        std::mem::take(&mut *self.unhandled.borrow_mut())
    }
}

impl Scheduler for LocalScheduler {
    fn enqueue(&self, task: Task) {
        self.queue.borrow_mut().push_back(task);
    }

    fn report_unhandled(&self, report: UnhandledError) {
        match self.policy {
            UnhandledPolicy::Log => log_unhandled(&report),
            UnhandledPolicy::Collect => {
                warn!(target: UNHANDLED_TARGET, "{report}");
                self.unhandled.borrow_mut().push(report);
            }
            UnhandledPolicy::Panic => {
                // A second panic while unwinding would abort the process.
                if std::thread::panicking() {
                    log_unhandled(&report);
                } else {
                    panic!("{report}");
                }
            }
        }
    }
}
