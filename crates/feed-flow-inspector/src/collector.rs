//! Event collector for testing.
//!
//! `EventCollector` accumulates events for later inspection and assertion.

use parking_lot::Mutex;

use crate::events::{ExecutionTrace, FlowEvent};
use crate::sink::EventSink;

/// Accumulates events for assertions.
///
/// # Example
///
/// ```ignore
/// use feed_flow::SourceContext;
/// use feed_flow_inspector::{EventCollector, EventSinkTracer};
/// use std::sync::Arc;
///
/// let collector = Arc::new(EventCollector::new());
/// let context = SourceContext::builder()
///     .tracer(EventSinkTracer::new(collector.clone()))
///     .build();
///
/// // Create and read states here
///
/// let trace = collector.trace();
/// assert!(!trace.events.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Mutex<Vec<FlowEvent>>,
    flushes: Mutex<usize>,
}

impl EventCollector {
    /// Create a new empty event collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get collected events as an execution trace.
    pub fn trace(&self) -> ExecutionTrace {
        ExecutionTrace {
            events: self.events.lock().clone(),
        }
    }

    /// Get collected events as a vector.
    pub fn events(&self) -> Vec<FlowEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Take collected events, clearing the collector.
    pub fn take(&self) -> Vec<FlowEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Number of times the collector was flushed, one per disposed context.
    pub fn flushes(&self) -> usize {
        *self.flushes.lock()
    }
}

impl EventSink for EventCollector {
    fn emit(&self, event: FlowEvent) {
        self.events.lock().push(event);
    }

    fn flush(&self) {
        *self.flushes.lock() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{SpanId, StateKey};

    fn created(state_id: u64) -> FlowEvent {
        FlowEvent::StateCreated {
            state: StateKey::new(state_id, "u32", None),
            context_id: 1,
        }
    }

    #[test]
    fn test_collector_basic() {
        let collector = EventCollector::new();
        assert!(collector.is_empty());

        collector.emit(created(1));

        assert_eq!(collector.len(), 1);
        assert!(!collector.is_empty());
    }

    #[test]
    fn test_collector_trace() {
        let collector = EventCollector::new();
        collector.emit(created(1));
        collector.emit(FlowEvent::ExecutionStart {
            span_id: SpanId(1),
            feed_id: 2,
        });

        let trace = collector.trace();
        assert_eq!(trace.events.len(), 2);
        assert_eq!(trace.events_for_state(1).len(), 1);
    }

    #[test]
    fn test_collector_clear_and_take() {
        let collector = EventCollector::new();
        collector.emit(created(1));
        collector.clear();
        assert!(collector.is_empty());

        collector.emit(created(2));
        let taken = collector.take();
        assert_eq!(taken, vec![created(2)]);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_collector_counts_flushes() {
        let collector = EventCollector::new();
        collector.flush();
        collector.flush();
        assert_eq!(collector.flushes(), 2);
    }
}
