//! One-shot completion states for cooperative, single-threaded schedulers.
//!
//! A [`CompletionState`] is settled once by the producer of a deferred
//! operation and observed by any number of subscribers. Subscriber callbacks
//! are always delivered through a [`Scheduler`], never from inside the call
//! that triggered them.
//!
//! ```
//! use std::rc::Rc;
//! use completion::{CompletionState, LocalScheduler};
//!
//! let scheduler = Rc::new(LocalScheduler::new());
//! let state: CompletionState<u32, String> = CompletionState::new(scheduler.clone());
//!
//! state.subscribe(|outcome, _id| assert_eq!(outcome, Ok(&42)));
//! state.complete(42);
//!
//! // Nothing has run yet; the callback is queued.
//! assert_eq!(scheduler.run_until_idle(), 1);
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod state;

pub use config::{Config, SchedulerConfig, UnhandledPolicy};
pub use error::{ConfigError, LogError, SettleError, UnhandledError};
pub use scheduler::{LocalScheduler, Scheduler, Task};
pub use state::{Callback, Completion, CompletionState, Status, SubscriptionId};
