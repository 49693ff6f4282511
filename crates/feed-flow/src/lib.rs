//! Feed-Flow: an async reactive value engine.
//!
//! Turns asynchronous, possibly retried producers into versioned streams of
//! immutable messages. Any number of readers observe every transition exactly
//! once, in commit order, while a single writer serializes updates.
//!
//! # Key Features
//!
//! - **Messages over axes**: every message carries the value (the Data axis) and
//!   metadata axes such as Error, Progress, Pagination and Selection
//! - **Broadcast without polling**: readers walk a chain of one-shot futures,
//!   so late readers start at the current message and never miss a transition
//! - **Scoped lifetimes**: a [`SourceContext`] memoizes one [`State`] per feed and
//!   disposes all of them at once
//! - **Incremental pagination**: [`PaginationDependency`] accumulates pages across
//!   executions and resets when another input changes
//!
//! # Example
//!
//! ```ignore
//! use feed_flow::{Feed, SourceContext};
//! use tokio_util::sync::CancellationToken;
//!
//! let feed = Feed::from_async(|_execution| async { Ok(Some(fetch_user().await?)) });
//!
//! let context = SourceContext::builder().build();
//! let state = context.get_or_create_state(&feed)?;
//!
//! let mut source = state.get_source(&CancellationToken::new());
//! while let Some(message) = source.next().await {
//!     println!("{:?} (loading: {})", message.current().data(), message.current().is_transient());
//! }
//! ```
//!
//! # Tracing
//!
//! Lifecycle events are reported to the [`Tracer`] of the context (see the
//! [`tracer`] module); human-readable logs go through the `tracing` crate.

mod axis;
mod context;
mod error;
mod execution;
mod feed;
mod frontier;
mod message;
mod pagination;
mod request;
mod state;
pub mod tracer;

pub use axis::{Axis, AxisPayload, AxisRules, AxisValue, BindingSource, DefaultRules, TypedAxis};
pub use context::{Owner, OwnerId, SourceContext, SourceContextBuilder};
pub use error::{AggregateError, CapturedError, FeedError};
pub use execution::{
    Dependency, DependencyId, ExecuteCause, ExecuteRequest, ExecutionId, ExecutionTrigger,
    FeedExecution, FeedSession,
};
pub use feed::{Feed, FeedId, FeedSource, FeedValue};
pub use message::{Changes, Message, MessageBuilder, MessageEntry};
pub use pagination::{
    CursorPageEnumerator, EnumeratorFactory, IndexPageEnumerator, Page, PageEnumerator,
    PageIndexRequest, PageToken, PageTokens, PaginationDependency, PaginationInfo,
};
pub use request::{
    ContextRequest, EndRequest, PageRequest, RefreshRequest, RequestHandler, RequestRegistration,
};
pub use state::{State, SubscriptionMode};
pub use tracer::{ExecutionResult, NoopTracer, SpanId, Tracer, TracerStateKey, UpdateOutcome};

pub use feed_flow_collections::{
    ApplyError, DifferentialList, ListChange, SelectionIndexRange, SelectionInfo,
};
