//! Event types for feed-flow tracing.
//!
//! This module defines every event a [`SourceContext`](feed_flow::SourceContext)
//! reports: state lifecycle, reader attachment, update outcomes, feed
//! executions and page requests.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use feed_flow::SpanId;

use feed_flow::{
    ExecutionResult as TracerExecutionResult, FeedId, TracerStateKey,
    UpdateOutcome as TracerUpdateOutcome,
};

/// Represents a state in a serializable manner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    /// Unique id of the state within the process.
    pub state_id: u64,
    /// The value type name (e.g., "alloc::string::String")
    pub value_type: String,
    /// Id of the feed the state is bound to.
    pub feed_id: Option<u64>,
}

impl StateKey {
    pub fn new(state_id: u64, value_type: impl Into<String>, feed_id: Option<u64>) -> Self {
        Self {
            state_id,
            value_type: value_type.into(),
            feed_id,
        }
    }
}

impl From<&TracerStateKey> for StateKey {
    fn from(key: &TracerStateKey) -> Self {
        Self {
            state_id: key.state_id,
            value_type: key.value_type.to_string(),
            feed_id: key.feed.map(|feed| feed.value()),
        }
    }
}

/// Why an update did not commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    /// The update produced no change.
    Unchanged,
    /// The update was built from a stale message.
    Rejected,
    /// The state was already disposed.
    Disposed,
    /// The update was cancelled while waiting for the writer.
    Cancelled,
}

/// How a feed execution ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionResult {
    /// The producer returned a value.
    Value,
    /// The producer failed with the given message.
    Error { message: String },
    /// The execution was cancelled.
    Cancelled,
}

impl From<TracerExecutionResult> for ExecutionResult {
    fn from(result: TracerExecutionResult) -> Self {
        match result {
            TracerExecutionResult::Value => ExecutionResult::Value,
            TracerExecutionResult::Error { message } => ExecutionResult::Error { message },
            TracerExecutionResult::Cancelled => ExecutionResult::Cancelled,
        }
    }
}

/// Events emitted by states, contexts and feed executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlowEvent {
    // === State Lifecycle ===
    /// A state was created in a context.
    StateCreated { state: StateKey, context_id: u64 },

    /// A reader started enumerating a state.
    ReaderAttached { state: StateKey },

    /// A reader stopped enumerating a state.
    ReaderDetached { state: StateKey },

    /// An update committed a new message.
    UpdateCommitted { state: StateKey, version: u64 },

    /// An update was attempted but nothing was committed.
    UpdateSkipped { state: StateKey, reason: SkipReason },

    /// A state was disposed.
    StateDisposed { state: StateKey },

    // === Contexts ===
    /// A feed was used without a source context.
    DetachedSubscription { feed_id: u64 },

    /// Pages were requested through a context.
    PageRequested {
        context_id: u64,
        desired_page_size: Option<u32>,
        /// Number of paginated feeds that accepted the request.
        issued: usize,
    },

    /// A context was disposed.
    ContextDisposed { context_id: u64 },

    // === Executions ===
    /// A feed execution started.
    ExecutionStart { span_id: SpanId, feed_id: u64 },

    /// A feed execution completed.
    ExecutionEnd {
        span_id: SpanId,
        feed_id: u64,
        result: ExecutionResult,
        /// Time between start and end of the execution.
        duration: Duration,
    },
}

impl FlowEvent {
    /// Build the event for an update outcome.
    pub fn update(state: StateKey, outcome: TracerUpdateOutcome) -> Self {
        let reason = match outcome {
            TracerUpdateOutcome::Committed { version } => {
                return FlowEvent::UpdateCommitted { state, version };
            }
            TracerUpdateOutcome::Unchanged => SkipReason::Unchanged,
            TracerUpdateOutcome::Rejected => SkipReason::Rejected,
            TracerUpdateOutcome::Disposed => SkipReason::Disposed,
            TracerUpdateOutcome::Cancelled => SkipReason::Cancelled,
        };
        FlowEvent::UpdateSkipped { state, reason }
    }

    /// The state this event is about, if any.
    pub fn state(&self) -> Option<&StateKey> {
        match self {
            FlowEvent::StateCreated { state, .. }
            | FlowEvent::ReaderAttached { state }
            | FlowEvent::ReaderDetached { state }
            | FlowEvent::UpdateCommitted { state, .. }
            | FlowEvent::UpdateSkipped { state, .. }
            | FlowEvent::StateDisposed { state } => Some(state),
            _ => None,
        }
    }

    /// The feed this event is about, if any.
    pub fn feed_id(&self) -> Option<u64> {
        match self {
            FlowEvent::DetachedSubscription { feed_id }
            | FlowEvent::ExecutionStart { feed_id, .. }
            | FlowEvent::ExecutionEnd { feed_id, .. } => Some(*feed_id),
            _ => self.state().and_then(|state| state.feed_id),
        }
    }
}

/// An ordered record of flow events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub events: Vec<FlowEvent>,
}

/// Event kind for comparison (without ids, spans or durations).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    StateCreated { value_type: String },
    ReaderAttached { value_type: String },
    ReaderDetached { value_type: String },
    UpdateCommitted { value_type: String, version: u64 },
    UpdateSkipped { value_type: String, reason: SkipReason },
    StateDisposed { value_type: String },
    DetachedSubscription,
    PageRequested { desired_page_size: Option<u32>, issued: usize },
    ContextDisposed,
    ExecutionStart,
    ExecutionEnd { result: ExecutionResult },
}

impl From<&FlowEvent> for EventKind {
    fn from(event: &FlowEvent) -> Self {
        match event {
            FlowEvent::StateCreated { state, .. } => EventKind::StateCreated {
                value_type: state.value_type.clone(),
            },
            FlowEvent::ReaderAttached { state } => EventKind::ReaderAttached {
                value_type: state.value_type.clone(),
            },
            FlowEvent::ReaderDetached { state } => EventKind::ReaderDetached {
                value_type: state.value_type.clone(),
            },
            FlowEvent::UpdateCommitted { state, version } => EventKind::UpdateCommitted {
                value_type: state.value_type.clone(),
                version: *version,
            },
            FlowEvent::UpdateSkipped { state, reason } => EventKind::UpdateSkipped {
                value_type: state.value_type.clone(),
                reason: *reason,
            },
            FlowEvent::StateDisposed { state } => EventKind::StateDisposed {
                value_type: state.value_type.clone(),
            },
            FlowEvent::DetachedSubscription { .. } => EventKind::DetachedSubscription,
            FlowEvent::PageRequested {
                desired_page_size,
                issued,
                ..
            } => EventKind::PageRequested {
                desired_page_size: *desired_page_size,
                issued: *issued,
            },
            FlowEvent::ContextDisposed { .. } => EventKind::ContextDisposed,
            FlowEvent::ExecutionStart { .. } => EventKind::ExecutionStart,
            FlowEvent::ExecutionEnd { result, .. } => EventKind::ExecutionEnd {
                result: result.clone(),
            },
        }
    }
}

/// Convert a trace to a list of event kinds for comparison.
pub fn to_kinds(trace: &ExecutionTrace) -> Vec<EventKind> {
    trace.events.iter().map(EventKind::from).collect()
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: FlowEvent) {
        self.events.push(event);
    }

    /// Events concerning the given state.
    pub fn events_for_state(&self, state_id: u64) -> Vec<&FlowEvent> {
        self.events
            .iter()
            .filter(|event| event.state().is_some_and(|state| state.state_id == state_id))
            .collect()
    }

    /// Events concerning the given feed, including those of states bound to it.
    pub fn events_for_feed(&self, feed: FeedId) -> Vec<&FlowEvent> {
        self.events
            .iter()
            .filter(|event| event.feed_id() == Some(feed.value()))
            .collect()
    }

    /// Completed executions with their results and durations.
    pub fn execution_ends(
        &self,
    ) -> impl Iterator<Item = (&SpanId, &ExecutionResult, &Duration)> {
        self.events.iter().filter_map(|event| match event {
            FlowEvent::ExecutionEnd {
                span_id,
                result,
                duration,
                ..
            } => Some((span_id, result, duration)),
            _ => None,
        })
    }

    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&FlowEvent) -> bool,
    {
        self.events.iter().any(predicate)
    }
}
