//! Tracer trait for observing states, contexts and feed executions.
//!
//! The default [`NoopTracer`] ignores every event. Install a custom tracer with
//! [`SourceContextBuilder::tracer`](crate::SourceContextBuilder::tracer); every
//! state created in that context reports to it.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use feed_flow::{SpanId, Tracer, TracerStateKey, UpdateOutcome};
//!
//! struct CountingTracer(AtomicU64);
//!
//! impl Tracer for CountingTracer {
//!     fn new_span_id(&self) -> SpanId {
//!         SpanId(self.0.fetch_add(1, Ordering::Relaxed))
//!     }
//!
//!     fn on_update(&self, state: &TracerStateKey, outcome: UpdateOutcome) {
//!         println!("{:?}: {:?}", state, outcome);
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::feed::FeedId;

/// Unique identifier for a feed execution span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(pub u64);

/// A state in a type-erased manner for tracing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TracerStateKey {
    /// Unique id of the state.
    pub state_id: u64,
    /// The value type name (e.g., "alloc::string::String")
    pub value_type: &'static str,
    /// The feed the state is bound to, if any.
    pub feed: Option<FeedId>,
}

impl TracerStateKey {
    #[inline]
    pub fn new(state_id: u64, value_type: &'static str, feed: Option<FeedId>) -> Self {
        Self {
            state_id,
            value_type,
            feed,
        }
    }
}

/// Result of a call to [`State::update`](crate::State::update).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new message was committed and readers were woken.
    Committed { version: u64 },
    /// The update produced no change; nothing happened.
    Unchanged,
    /// The update was built from a stale message.
    Rejected,
    /// The state was disposed; the update was dropped.
    Disposed,
    /// The update was cancelled before it acquired the writer lock.
    Cancelled,
}

/// How a feed execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// The producer returned a value (possibly `None`).
    Value,
    /// The producer failed; the error was captured onto the Error axis.
    Error { message: String },
    /// The execution was cancelled.
    Cancelled,
}

/// Tracer trait for observing feed-flow.
///
/// All methods except [`new_span_id`](Tracer::new_span_id) have default empty
/// implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: states report from whichever task
/// updates them.
pub trait Tracer: Send + Sync + 'static {
    /// Generate a new unique span ID.
    ///
    /// This is the only required method. Called at the start of each execution.
    fn new_span_id(&self) -> SpanId;

    /// Called when a state is created.
    #[inline]
    fn on_state_created(&self, _state: &TracerStateKey, _context_id: u64) {}

    /// Called when a reader starts enumerating a state.
    #[inline]
    fn on_reader_attached(&self, _state: &TracerStateKey) {}

    /// Called when a reader stops enumerating a state.
    #[inline]
    fn on_reader_detached(&self, _state: &TracerStateKey) {}

    /// Called after every update attempt.
    #[inline]
    fn on_update(&self, _state: &TracerStateKey, _outcome: UpdateOutcome) {}

    /// Called once when a state is disposed.
    #[inline]
    fn on_state_disposed(&self, _state: &TracerStateKey) {}

    /// Called when a feed is used outside of a source context.
    #[inline]
    fn on_detached_subscription(&self, _feed: FeedId) {}

    /// Called when a feed execution starts.
    #[inline]
    fn on_execution_start(&self, _span_id: SpanId, _feed: FeedId) {}

    /// Called when a feed execution ends.
    #[inline]
    fn on_execution_end(&self, _span_id: SpanId, _feed: FeedId, _result: ExecutionResult) {}

    /// Called when a page is requested through a context.
    #[inline]
    fn on_page_requested(&self, _context_id: u64, _desired_page_size: Option<u32>, _issued: usize) {}

    /// Called once when a source context is disposed.
    #[inline]
    fn on_context_disposed(&self, _context_id: u64) {}
}

/// Zero-cost tracer that discards all events.
///
/// This is the default tracer of [`SourceContext`](crate::SourceContext).
pub struct NoopTracer;

/// Global span counter for NoopTracer.
static NOOP_SPAN_COUNTER: AtomicU64 = AtomicU64::new(1);

impl Tracer for NoopTracer {
    #[inline(always)]
    fn new_span_id(&self) -> SpanId {
        SpanId(NOOP_SPAN_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingTracer {
        updates: AtomicUsize,
        committed: AtomicUsize,
    }

    impl Tracer for CountingTracer {
        fn new_span_id(&self) -> SpanId {
            SpanId(1)
        }

        fn on_update(&self, _state: &TracerStateKey, outcome: UpdateOutcome) {
            self.updates.fetch_add(1, Ordering::Relaxed);
            if matches!(outcome, UpdateOutcome::Committed { .. }) {
                self.committed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[test]
    fn test_noop_tracer_span_id() {
        let tracer = NoopTracer;
        let id1 = tracer.new_span_id();
        let id2 = tracer.new_span_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_counting_tracer() {
        let tracer = CountingTracer {
            updates: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
        };
        let key = TracerStateKey::new(1, "i32", None);
        tracer.on_update(&key, UpdateOutcome::Committed { version: 1 });
        tracer.on_update(&key, UpdateOutcome::Unchanged);

        assert_eq!(tracer.updates.load(Ordering::Relaxed), 2);
        assert_eq!(tracer.committed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_tracer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopTracer>();
        assert_send_sync::<Arc<CountingTracer>>();
    }
}
