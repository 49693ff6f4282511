//! Event sink trait and implementations.
//!
//! The `EventSink` trait defines the interface for receiving flow events.
//! Implementations can collect events for testing, write them to a file, or
//! forward them to a monitoring backend.

use std::sync::Arc;

use crate::events::FlowEvent;

/// Trait for receiving flow events.
///
/// # Example
///
/// ```ignore
/// use feed_flow_inspector::{EventSink, FlowEvent};
///
/// struct PrintSink;
///
/// impl EventSink for PrintSink {
///     fn emit(&self, event: FlowEvent) {
///         println!("{:?}", event);
///     }
/// }
/// ```
pub trait EventSink: Send + Sync + 'static {
    /// Called when an event occurs.
    fn emit(&self, event: FlowEvent);

    /// Called when a context is disposed.
    ///
    /// The default implementation does nothing.
    fn flush(&self) {}
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: FlowEvent) {
        (**self).emit(event);
    }

    fn flush(&self) {
        (**self).flush();
    }
}

/// Sink that discards all events.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: FlowEvent) {}
}

/// A sink that forwards events to multiple child sinks.
pub struct MultiplexSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl MultiplexSink {
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for MultiplexSink {
    fn emit(&self, event: FlowEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }

    fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }
}

/// A sink that filters events before forwarding.
pub struct FilterSink<F, S>
where
    F: Fn(&FlowEvent) -> bool + Send + Sync + 'static,
    S: EventSink,
{
    filter: F,
    inner: S,
}

impl<F, S> FilterSink<F, S>
where
    F: Fn(&FlowEvent) -> bool + Send + Sync + 'static,
    S: EventSink,
{
    pub fn new(filter: F, inner: S) -> Self {
        Self { filter, inner }
    }
}

impl<F, S> EventSink for FilterSink<F, S>
where
    F: Fn(&FlowEvent) -> bool + Send + Sync + 'static,
    S: EventSink,
{
    fn emit(&self, event: FlowEvent) {
        if (self.filter)(&event) {
            self.inner.emit(event);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{SpanId, StateKey};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingSink {
        emitted: AtomicU32,
        flushed: AtomicU32,
    }

    impl CountingSink {
        fn emitted(&self) -> u32 {
            self.emitted.load(Ordering::SeqCst)
        }

        fn flushed(&self) -> u32 {
            self.flushed.load(Ordering::SeqCst)
        }
    }

    impl EventSink for CountingSink {
        fn emit(&self, _event: FlowEvent) {
            self.emitted.fetch_add(1, Ordering::SeqCst);
        }

        fn flush(&self) {
            self.flushed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn start() -> FlowEvent {
        FlowEvent::ExecutionStart {
            span_id: SpanId(1),
            feed_id: 1,
        }
    }

    #[test]
    fn test_null_sink() {
        let sink = NullSink;
        sink.emit(start());
        sink.flush();
    }

    #[test]
    fn test_multiplex_sink() {
        let sink1 = Arc::new(CountingSink::default());
        let sink2 = Arc::new(CountingSink::default());

        let multiplex = MultiplexSink::new(vec![Box::new(sink1.clone()), Box::new(sink2.clone())]);
        multiplex.emit(start());
        multiplex.flush();

        assert_eq!(sink1.emitted(), 1);
        assert_eq!(sink2.emitted(), 1);
        assert_eq!(sink1.flushed(), 1);
        assert_eq!(sink2.flushed(), 1);
    }

    #[test]
    fn test_filter_sink() {
        let filter_sink = FilterSink::new(
            |e| matches!(e, FlowEvent::ExecutionStart { .. }),
            CountingSink::default(),
        );

        filter_sink.emit(start());
        filter_sink.emit(FlowEvent::StateDisposed {
            state: StateKey::new(1, "u32", None),
        });
        filter_sink.flush();

        assert_eq!(filter_sink.inner.emitted(), 1);
        assert_eq!(filter_sink.inner.flushed(), 1);
    }
}
