//! Error types for completion states and their ambient plumbing.
//!
//! Two classes of failure exist around a [`CompletionState`]:
//!
//! - **Precondition violations** ([`SettleError`]): settling a state twice, or
//!   settling it with another pending handle. These are programming errors and
//!   surface as panics carrying the error's `Display` text.
//! - **Unobserved failures** ([`UnhandledError`]): a state failed and was
//!   dropped without anyone subscribing or calling `ignore`. These are
//!   reported to the scheduler, never to subscribers.
//!
//! [`CompletionState`]: crate::CompletionState

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::state::Status;

/// A producer broke the settle-once contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettleError {
    #[error("completion state already settled as {status}")]
    AlreadySettled { status: Status },

    #[error("cannot complete with a pending-operation handle ({type_name})")]
    NestedHandle { type_name: &'static str },
}

/// A failed state was discarded before anything observed it.
///
/// This is a separate condition from the producer's error: it is raised at
/// disposal time and carries a rendering of the original error rather than
/// the error itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unhandled completion error ({type_name}): {message}")]
pub struct UnhandledError {
    /// Type of the producer's error value.
    pub type_name: &'static str,
    /// `Debug` rendering of the producer's error value.
    pub message: String,
}

impl UnhandledError {
    pub(crate) fn from_error<E: fmt::Debug>(err: &E) -> Self {
        Self {
            type_name: std::any::type_name::<E>(),
            message: format!("{err:?}"),
        }
    }
}

/// Failure to load a [`Config`](crate::config::Config).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failure to install the global logging subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}
