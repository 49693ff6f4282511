//! `EventSinkTracer`: bridge between the feed-flow [`Tracer`] and an [`EventSink`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use feed_flow::{
    ExecutionResult as TracerExecutionResult, FeedId, SpanId, Tracer, TracerStateKey,
    UpdateOutcome as TracerUpdateOutcome,
};
use parking_lot::Mutex;

use crate::events::FlowEvent;
use crate::sink::EventSink;

/// Global span ID counter for EventSinkTracer.
static SPAN_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A `Tracer` implementation that forwards events to an `EventSink`.
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
/// // Read states...
///
/// let trace = collector.trace();
/// ```
pub struct EventSinkTracer {
    sink: Arc<dyn EventSink>,
    start_times: Mutex<HashMap<SpanId, Instant>>,
}

impl EventSinkTracer {
    /// Create a new EventSinkTracer wrapping the given sink.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            start_times: Mutex::new(HashMap::new()),
        }
    }

    fn elapsed(&self, span_id: SpanId) -> Duration {
        self.start_times
            .lock()
            .remove(&span_id)
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }
}

impl Tracer for EventSinkTracer {
    #[inline]
    fn new_span_id(&self) -> SpanId {
        SpanId(SPAN_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    fn on_state_created(&self, state: &TracerStateKey, context_id: u64) {
        self.sink.emit(FlowEvent::StateCreated {
            state: state.into(),
            context_id,
        });
    }

    fn on_reader_attached(&self, state: &TracerStateKey) {
        self.sink.emit(FlowEvent::ReaderAttached {
            state: state.into(),
        });
    }

    fn on_reader_detached(&self, state: &TracerStateKey) {
        self.sink.emit(FlowEvent::ReaderDetached {
            state: state.into(),
        });
    }

    fn on_update(&self, state: &TracerStateKey, outcome: TracerUpdateOutcome) {
        self.sink.emit(FlowEvent::update(state.into(), outcome));
    }

    fn on_state_disposed(&self, state: &TracerStateKey) {
        self.sink.emit(FlowEvent::StateDisposed {
            state: state.into(),
        });
    }

    fn on_detached_subscription(&self, feed: FeedId) {
        self.sink.emit(FlowEvent::DetachedSubscription {
            feed_id: feed.value(),
        });
    }

    fn on_execution_start(&self, span_id: SpanId, feed: FeedId) {
        self.start_times.lock().insert(span_id, Instant::now());
        self.sink.emit(FlowEvent::ExecutionStart {
            span_id,
            feed_id: feed.value(),
        });
    }

    fn on_execution_end(&self, span_id: SpanId, feed: FeedId, result: TracerExecutionResult) {
        let duration = self.elapsed(span_id);
        self.sink.emit(FlowEvent::ExecutionEnd {
            span_id,
            feed_id: feed.value(),
            result: result.into(),
            duration,
        });
    }

    fn on_page_requested(&self, context_id: u64, desired_page_size: Option<u32>, issued: usize) {
        self.sink.emit(FlowEvent::PageRequested {
            context_id,
            desired_page_size,
            issued,
        });
    }

    fn on_context_disposed(&self, context_id: u64) {
        self.sink.emit(FlowEvent::ContextDisposed { context_id });
        self.sink.flush();
    }
}
