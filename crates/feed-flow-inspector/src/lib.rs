//! Flow Inspector: event collection and inspection for feed-flow.
//!
//! Install an [`EventSinkTracer`] on a source context to turn every tracer
//! callback into a serializable [`FlowEvent`]:
//!
//! - **EventCollector**: collects events for testing and assertion
//! - **FilterSink** / **MultiplexSink**: route events to several sinks
//!
//! # Quick Start
//!
//! ```ignore
//! use feed_flow::{Feed, SourceContext};
//! use feed_flow_inspector::{EventCollector, EventSinkTracer, ExecutionResult, FlowEvent};
//! use std::sync::Arc;
//!
//! let collector = Arc::new(EventCollector::new());
//! let context = SourceContext::builder()
//!     .tracer(EventSinkTracer::new(collector.clone()))
//!     .build();
//!
//! let state = context.get_or_create_state(&Feed::from_async(|_| async { Ok(Some(1)) }))?;
//! state.value(&token).await?;
//!
//! let trace = collector.trace();
//! assert!(trace.events.iter().any(|e| matches!(
//!     e,
//!     FlowEvent::ExecutionEnd { result: ExecutionResult::Value, .. }
//! )));
//! ```
//!
//! # Event Types
//!
//! - **State Lifecycle**: `StateCreated`, `ReaderAttached`, `ReaderDetached`,
//!   `UpdateCommitted`, `UpdateSkipped`, `StateDisposed`
//! - **Contexts**: `DetachedSubscription`, `PageRequested`, `ContextDisposed`
//! - **Executions**: `ExecutionStart`, `ExecutionEnd`
//!
//! See [`FlowEvent`] for the complete list.

mod collector;
mod events;
mod sink;
mod tracer_impl;

pub use collector::EventCollector;
pub use events::{
    to_kinds, EventKind, ExecutionResult, ExecutionTrace, FlowEvent, SkipReason, SpanId, StateKey,
};
pub use sink::{EventSink, FilterSink, MultiplexSink, NullSink};
pub use tracer_impl::EventSinkTracer;
