//! Single-assignment, multi-subscriber completion state.
//!
//! A [`CompletionState`] holds the eventual outcome of one deferred operation.
//! The producer settles it exactly once with [`complete`] or [`error`]; any
//! number of consumers register interest with [`subscribe`]. Callbacks are
//! never run in the caller's stack frame: they are always handed to the
//! [`Scheduler`], which runs them later in FIFO order.
//!
//! ```text
//! Pending ──complete(v)──► Completed
//!    │
//!    └─────error(e)──────► Failed
//! ```
//!
//! A state that ends `Failed` without ever being subscribed to (or explicitly
//! ignored) is reported to [`Scheduler::report_unhandled`] when its last
//! handle drops.
//!
//! [`complete`]: CompletionState::complete
//! [`error`]: CompletionState::error
//! [`subscribe`]: CompletionState::subscribe

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::{SettleError, UnhandledError};
use crate::scheduler::{Scheduler, Task};

// =============================================================================
// Identity and status
// =============================================================================

/// Handle returned by [`CompletionState::subscribe`], used to cancel interest.
///
/// Unique within the state that issued it; ids from different states may
/// collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// The raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Lifecycle status of a completion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// No outcome yet.
    Pending,
    /// Settled with a value.
    Completed,
    /// Settled with an error.
    Failed,
}

impl Status {
    /// Whether this is a terminal status (no further transitions).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Lowercase name used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// State
// =============================================================================

/// Subscriber callback. Receives `Ok(value)` or `Err(error)` plus the id it
/// was registered under.
pub type Callback<T, E> = Box<dyn FnOnce(Result<&T, &E>, SubscriptionId)>;

struct Core<T, E: fmt::Debug> {
    outcome: Option<Rc<Result<T, E>>>,
    handled: bool,
    subscribers: BTreeMap<SubscriptionId, Callback<T, E>>,
    next_id: u64,
    scheduler: Rc<dyn Scheduler>,
}

impl<T, E: fmt::Debug> Core<T, E> {
    fn status(&self) -> Status {
        match self.outcome.as_deref() {
            None => Status::Pending,
            Some(Ok(_)) => Status::Completed,
            Some(Err(_)) => Status::Failed,
        }
    }

    fn allocate_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }
}

impl<T, E: fmt::Debug> Drop for Core<T, E> {
    fn drop(&mut self) {
        if self.handled {
            return;
        }
        if let Some(Err(err)) = self.outcome.as_deref() {
            self.scheduler
                .report_unhandled(UnhandledError::from_error(err));
        }
    }
}

/// The eventual outcome of one deferred operation.
///
/// Cloning yields another handle to the same state. The state is disposed of
/// when the last handle drops.
pub struct CompletionState<T, E: fmt::Debug> {
    core: Rc<RefCell<Core<T, E>>>,
}

/// Completion state carrying an [`anyhow::Error`] on failure.
pub type Completion<T> = CompletionState<T, anyhow::Error>;

impl<T, E: fmt::Debug> Clone for CompletionState<T, E> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T, E: fmt::Debug> fmt::Debug for CompletionState<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.borrow();
        f.debug_struct("CompletionState")
            .field("status", &core.status())
            .field("handled", &core.handled)
            .field("subscribers", &core.subscribers.len())
            .finish()
    }
}

impl<T: 'static, E: fmt::Debug + 'static> CompletionState<T, E> {
    /// Create a pending state whose callbacks run on `scheduler`.
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            core: Rc::new(RefCell::new(Core {
                outcome: None,
                handled: false,
                subscribers: BTreeMap::new(),
                next_id: 0,
                scheduler,
            })),
        }
    }

    /// Register interest in the outcome.
    ///
    /// Marks the state handled. If the state is already settled the callback
    /// is enqueued right away; otherwise it is stored and enqueued when the
    /// producer settles.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnOnce(Result<&T, &E>, SubscriptionId) + 'static,
    {
        let mut core = self.core.borrow_mut();
        core.handled = true;
        let id = core.allocate_id();
        match core.outcome.clone() {
            Some(outcome) => {
                let scheduler = Rc::clone(&core.scheduler);
                drop(core);
                trace!(subscription = %id, "late subscriber scheduled");
                scheduler.enqueue(deliver(outcome, Box::new(callback), id));
            }
            None => {
                core.subscribers.insert(id, Box::new(callback));
                trace!(subscription = %id, "subscriber stored");
            }
        }
        id
    }

    /// Cancel a pending subscription.
    ///
    /// Returns whether an entry was removed. Unknown, already-cancelled and
    /// already-scheduled ids are a no-op: a callback that was handed to the
    /// scheduler still runs.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.core.borrow_mut().subscribers.remove(&id);
        trace!(subscription = %id, removed = removed.is_some(), "unsubscribe");
        // Dropped outside the borrow: the callback may own handles to this state.
        removed.is_some()
    }

    /// Settle with a value.
    ///
    /// # Panics
    ///
    /// If the state is already settled, or if `value` is a bare
    /// `CompletionState`. Wrappers such as `Rc<CompletionState<..>>`,
    /// `Box<..>` or `Option<..>` are not inspected.
    pub fn complete(&self, value: T) {
        if is_completion_handle::<T>() {
            fail(&SettleError::NestedHandle {
                type_name: std::any::type_name::<T>(),
            });
        }
        self.settle(Ok(value));
    }

    /// Settle with an error.
    ///
    /// # Panics
    ///
    /// If the state is already settled.
    pub fn error(&self, err: E) {
        self.settle(Err(err));
    }

    /// Mark the outcome as deliberately discarded, suppressing the unhandled
    /// error report.
    pub fn ignore(&self) {
        self.core.borrow_mut().handled = true;
        trace!("completion state ignored");
    }

    pub fn is_complete(&self) -> bool {
        self.core.borrow().outcome.is_some()
    }

    pub fn status(&self) -> Status {
        self.core.borrow().status()
    }

    /// Whether a subscriber has ever been registered or `ignore` was called.
    pub fn is_handled(&self) -> bool {
        self.core.borrow().handled
    }

    /// Number of callbacks still waiting for the outcome.
    pub fn subscriber_count(&self) -> usize {
        self.core.borrow().subscribers.len()
    }

    fn settle(&self, outcome: Result<T, E>) {
        let (scheduler, subscribers, outcome) = {
            let mut core = self.core.borrow_mut();
            let status = core.status();
            if status.is_terminal() {
                drop(core);
                fail(&SettleError::AlreadySettled { status });
            }
            let outcome = Rc::new(outcome);
            core.outcome = Some(Rc::clone(&outcome));
            (
                Rc::clone(&core.scheduler),
                std::mem::take(&mut core.subscribers),
                outcome,
            )
        };

        let status = if outcome.is_ok() {
            Status::Completed
        } else {
            Status::Failed
        };
        debug!(
            status = %status,
            subscribers = subscribers.len(),
            "completion state settled"
        );

        // Ids are allocated in increasing order, so this is registration order.
        for (id, callback) in subscribers {
            scheduler.enqueue(deliver(Rc::clone(&outcome), callback, id));
        }
    }
}

fn deliver<T: 'static, E: 'static>(
    outcome: Rc<Result<T, E>>,
    callback: Callback<T, E>,
    id: SubscriptionId,
) -> Task {
    Box::new(move || callback((*outcome).as_ref(), id))
}

#[track_caller]
fn fail(err: &SettleError) -> ! {
    panic!("{err}")
}

/// Whether `T` is a `CompletionState` of any parameters.
fn is_completion_handle<T>() -> bool {
    fn path_of<U: ?Sized>() -> &'static str {
        let name = std::any::type_name::<U>();
        name.split('<').next().unwrap_or(name)
    }
    path_of::<T>() == path_of::<CompletionState<(), ()>>()
}
