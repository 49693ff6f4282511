//! Error types for feed-flow.

use std::fmt;
use std::sync::Arc;

use crate::feed::FeedId;

/// Protocol errors raised by states and source contexts.
///
/// Failures of a feed's producing function are not reported through this type
/// on the read path: they are captured onto the Error axis of the message
/// instead, so a failed fetch does not terminate the stream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    /// The update was built from a message that is no longer the current one.
    ///
    /// Re-read the state and rebuild the update from the fresh message.
    #[error("stale message: update was not built from the current message of the state")]
    StaleMessage,

    /// The source context was disposed while the operation was in progress.
    #[error("source context has been disposed")]
    ContextDisposed,

    /// The state was disposed before it produced the awaited message.
    #[error("state has been disposed")]
    StateDisposed,

    /// The operation was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// The feed is already bound to a state of another value type in this context.
    #[error("{feed} is already bound to a state of a different value type")]
    TypeMismatch {
        /// The feed that was requested.
        feed: FeedId,
    },

    /// A feed produced a message whose previous entry is not the entry it produced last.
    #[error("{feed} broke the message chain")]
    BrokenChain {
        /// The offending feed.
        feed: FeedId,
    },

    /// A failure raised by user code, such as a page loader.
    #[error("source failed: {0}")]
    Source(CapturedError),
}

impl FeedError {
    /// Returns `true` for [`FeedError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FeedError::Cancelled)
    }

    /// Returns the captured user error if this is a `Source` variant.
    pub fn source_error(&self) -> Option<&CapturedError> {
        match self {
            FeedError::Source(e) => Some(e),
            _ => None,
        }
    }
}

/// A user error captured onto the Error axis.
///
/// Cloning is cheap. Two captured errors are equal only if they are the same
/// capture, so re-raising an identical failure is still reported as a change.
#[derive(Clone)]
pub struct CapturedError(Arc<anyhow::Error>);

impl CapturedError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    /// The wrapped error.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// Attempts to downcast the captured error to a specific type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// Returns `true` if the captured error is of type `E`.
    pub fn is<E: std::error::Error + Send + Sync + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }
}

impl<T: Into<anyhow::Error>> From<T> for CapturedError {
    fn from(err: T) -> Self {
        CapturedError::new(err)
    }
}

impl PartialEq for CapturedError {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

/// Several errors set concurrently on the Error axis.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} errors occurred: {}", .errors.len(), join(.errors))]
pub struct AggregateError {
    pub errors: Vec<CapturedError>,
}

impl AggregateError {
    /// Combine errors, flattening nested aggregates.
    pub fn flatten(errors: impl IntoIterator<Item = CapturedError>) -> Self {
        let mut flat = Vec::new();
        for err in errors {
            match err.downcast_ref::<AggregateError>() {
                Some(nested) => flat.extend(nested.errors.iter().cloned()),
                None => flat.push(err),
            }
        }
        Self { errors: flat }
    }
}

fn join(errors: &[CapturedError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
