//! Execution pipeline of async feeds.
//!
//! A [`FeedSession`] is one subscription to a feed built around a producing
//! function. The function runs once per [`FeedExecution`]; executions are
//! triggered by [`ExecuteRequest`]s (the initial run, refreshes, pages, ...).
//! Requests arriving while an execution runs are coalesced into the next one.
//!
//! Each execution:
//!
//! 1. calls [`Dependency::on_executing`] on every registered dependency,
//! 2. publishes a loading message (progress set, unless only pages were requested),
//! 3. runs the producing function,
//! 4. calls [`Dependency::on_executed`],
//! 5. publishes the result: the data, or no data plus the captured error.
//!
//! Dependencies can stage axis values on the execution; staged values are
//! applied to both messages.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::axis::{Axis, AxisValue};
use crate::context::SourceContext;
use crate::error::CapturedError;
use crate::feed::{FeedId, FeedValue};
use crate::message::{Message, MessageBuilder};
use crate::pagination::PageToken;
use crate::request::{ContextRequest, RequestHandler, RequestRegistration};
use crate::tracer::{ExecutionResult, SpanId};

static DEPENDENCY_COUNTER: AtomicU64 = AtomicU64::new(1);
static EXECUTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`Dependency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyId(u64);

impl DependencyId {
    /// Allocate a fresh id.
    pub fn new() -> Self {
        Self(DEPENDENCY_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for DependencyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dependency#{}", self.0)
    }
}

/// Identity of a [`FeedExecution`], unique within the process.
///
/// Allocated by the engine, independent of the [`SpanId`] a tracer hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(u64);

impl ExecutionId {
    fn next() -> Self {
        Self(EXECUTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "execution#{}", self.0)
    }
}

/// Why an execution is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteCause {
    /// First run of a session.
    Initial,
    /// One more page was requested.
    Page {
        token: PageToken,
        desired_page_size: Option<u32>,
    },
    /// A refresh was requested through the context.
    Refresh,
    /// Any other reason.
    Custom(String),
}

/// A request to run the producing function again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    /// The dependency that asked, if any.
    pub issuer: Option<DependencyId>,
    pub cause: ExecuteCause,
}

impl ExecuteRequest {
    pub fn initial() -> Self {
        Self {
            issuer: None,
            cause: ExecuteCause::Initial,
        }
    }

    pub fn refresh() -> Self {
        Self {
            issuer: None,
            cause: ExecuteCause::Refresh,
        }
    }

    pub fn page(issuer: DependencyId, token: PageToken, desired_page_size: Option<u32>) -> Self {
        Self {
            issuer: Some(issuer),
            cause: ExecuteCause::Page {
                token,
                desired_page_size,
            },
        }
    }

    pub fn custom(issuer: Option<DependencyId>, reason: impl Into<String>) -> Self {
        Self {
            issuer,
            cause: ExecuteCause::Custom(reason.into()),
        }
    }
}

/// One run of a producing function.
pub struct FeedExecution {
    id: ExecutionId,
    span: SpanId,
    feed: FeedId,
    requests: Vec<ExecuteRequest>,
    token: CancellationToken,
    context: SourceContext,
    staged: Mutex<BTreeMap<Axis, AxisValue>>,
}

impl FeedExecution {
    pub(crate) fn new(
        span: SpanId,
        feed: FeedId,
        requests: Vec<ExecuteRequest>,
        token: CancellationToken,
        context: SourceContext,
    ) -> Self {
        Self {
            id: ExecutionId::next(),
            span,
            feed,
            requests,
            token,
            context,
            staged: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    /// The span reported to the tracer.
    pub fn span(&self) -> SpanId {
        self.span
    }

    pub fn feed(&self) -> FeedId {
        self.feed
    }

    /// The requests that triggered this execution.
    pub fn requests(&self) -> &[ExecuteRequest] {
        &self.requests
    }

    /// Cancelled when the session stops.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn context(&self) -> &SourceContext {
        &self.context
    }

    /// Whether every request of this execution was issued by `dependency`.
    pub fn is_only_issued_by(&self, dependency: DependencyId) -> bool {
        !self.requests.is_empty()
            && self
                .requests
                .iter()
                .all(|r| r.issuer == Some(dependency))
    }

    /// Whether this execution only loads more pages.
    pub fn is_pagination_only(&self) -> bool {
        !self.requests.is_empty()
            && self
                .requests
                .iter()
                .all(|r| matches!(r.cause, ExecuteCause::Page { .. }))
    }

    /// Page tokens requested from `dependency` in this execution.
    pub fn page_tokens(&self, dependency: DependencyId) -> Vec<PageToken> {
        self.requests
            .iter()
            .filter(|r| r.issuer == Some(dependency))
            .filter_map(|r| match &r.cause {
                ExecuteCause::Page { token, .. } => Some(*token),
                _ => None,
            })
            .collect()
    }

    /// The largest page size requested from `dependency`, or the context default.
    pub fn desired_page_size(&self, dependency: DependencyId) -> Option<u32> {
        self.requests
            .iter()
            .filter(|r| r.issuer == Some(dependency))
            .filter_map(|r| match &r.cause {
                ExecuteCause::Page {
                    desired_page_size, ..
                } => *desired_page_size,
                _ => None,
            })
            .max()
            .or(self.context.default_page_size())
    }

    /// Stage an axis value for the messages published by this execution.
    pub fn set_axis(&self, axis: &Axis, value: AxisValue) {
        self.staged.lock().insert(axis.clone(), value);
    }

    fn apply_staged<T>(&self, builder: &mut MessageBuilder<T>) {
        for (axis, value) in self.staged.lock().iter() {
            builder.set(axis, value.clone());
        }
    }
}

impl fmt::Debug for FeedExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedExecution")
            .field("id", &self.id)
            .field("span", &self.span)
            .field("feed", &self.feed)
            .field("requests", &self.requests)
            .finish()
    }
}

/// A participant of the executions of a session.
#[async_trait]
pub trait Dependency: Send + Sync + 'static {
    fn id(&self) -> DependencyId;

    /// Called before the producing function runs.
    async fn on_executing(&self, execution: &FeedExecution);

    /// Called after the producing function returned.
    async fn on_executed(&self, execution: &FeedExecution);
}

/// Sends execution requests to a session.
#[derive(Clone)]
pub struct ExecutionTrigger(mpsc::UnboundedSender<ExecuteRequest>);

impl ExecutionTrigger {
    /// Queue `request`. Returns `false` if the session has stopped.
    pub fn execute(&self, request: ExecuteRequest) -> bool {
        self.0.send(request).is_ok()
    }
}

impl fmt::Debug for ExecutionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionTrigger")
            .field("closed", &self.0.is_closed())
            .finish()
    }
}

/// One subscription to an async feed.
pub struct FeedSession<T> {
    feed: FeedId,
    context: SourceContext,
    token: CancellationToken,
    trigger: ExecutionTrigger,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<ExecuteRequest>>>,
    dependencies: Mutex<Vec<Arc<dyn Dependency>>>,
    registrations: Mutex<Vec<RequestRegistration>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FeedValue> FeedSession<T> {
    /// Create a session of `feed` in `context`. Refresh requests of the context
    /// trigger executions of this session.
    pub fn new(feed: FeedId, context: &SourceContext) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            feed,
            context: context.clone(),
            token: context.token().child_token(),
            trigger: ExecutionTrigger(sender),
            receiver: Mutex::new(Some(receiver)),
            dependencies: Mutex::new(Vec::new()),
            registrations: Mutex::new(Vec::new()),
            _marker: PhantomData,
        });

        let trigger = session.trigger.clone();
        session.register_handler(Arc::new(move |request: &ContextRequest| {
            if let ContextRequest::Refresh(_) = request {
                trigger.execute(ExecuteRequest::refresh());
            }
        }));
        session
    }

    pub fn feed(&self) -> FeedId {
        self.feed
    }

    pub fn context(&self) -> &SourceContext {
        &self.context
    }

    pub fn trigger(&self) -> ExecutionTrigger {
        self.trigger.clone()
    }

    /// Add a dependency to every later execution.
    pub fn register_dependency(&self, dependency: Arc<dyn Dependency>) {
        self.dependencies.lock().push(dependency);
    }

    /// Register a request handler on the context for the lifetime of the session.
    pub fn register_handler(&self, handler: Arc<dyn RequestHandler>) {
        let registration = self.context.register_handler(handler);
        self.registrations.lock().push(registration);
    }

    /// Run `producer` once now and again on every request.
    ///
    /// Dropping the returned stream stops the session. Only the first call
    /// yields messages.
    pub fn run<F, Fut>(self: Arc<Self>, producer: F) -> BoxStream<'static, Message<T>>
    where
        F: Fn(Arc<FeedExecution>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        let session = self;

        stream! {
            let receiver = session.receiver.lock().take();
            let Some(mut receiver) = receiver else {
                return;
            };
            let _stop = session.token.clone().drop_guard();
            let mut pending = vec![ExecuteRequest::initial()];
            let mut last = Message::<T>::initial();

            loop {
                if pending.is_empty() {
                    let request = tokio::select! {
                        biased;
                        _ = session.token.cancelled() => None,
                        request = receiver.recv() => request,
                    };
                    match request {
                        Some(request) => pending.push(request),
                        None => break,
                    }
                }
                while let Ok(request) = receiver.try_recv() {
                    pending.push(request);
                }

                let tracer = session.context.tracer();
                let span = tracer.new_span_id();
                let execution = Arc::new(FeedExecution::new(
                    span,
                    session.feed,
                    std::mem::take(&mut pending),
                    session.token.child_token(),
                    session.context.clone(),
                ));
                debug!(feed = %session.feed, span = span.0, requests = execution.requests().len(), "execution started");
                tracer.on_execution_start(span, session.feed);
                let mut end = ExecutionEnd::new(&session.context, span, session.feed);

                let dependencies = session.dependencies.lock().clone();
                for dependency in &dependencies {
                    dependency.on_executing(&execution).await;
                }

                let loading = {
                    let mut builder = last.with();
                    if !execution.is_pagination_only() {
                        builder.progress(true);
                    }
                    execution.apply_staged(&mut builder);
                    builder.build()
                };
                if !loading.changes().is_empty() {
                    last = loading.clone();
                    yield loading;
                }

                let result = tokio::select! {
                    biased;
                    _ = session.token.cancelled() => None,
                    result = producer(execution.clone()) => Some(result),
                };
                let Some(result) = result else {
                    break;
                };

                for dependency in &dependencies {
                    dependency.on_executed(&execution).await;
                }

                let (done, outcome) = {
                    let mut builder = last.with();
                    builder.progress(false);
                    let outcome = match result {
                        Ok(data) => {
                            builder.data(data).error(None);
                            ExecutionResult::Value
                        }
                        Err(err) => {
                            let message = err.to_string();
                            debug!(feed = %session.feed, span = span.0, error = %message, "producer failed");
                            builder.data(None).error(Some(CapturedError::new(err)));
                            ExecutionResult::Error { message }
                        }
                    };
                    execution.apply_staged(&mut builder);
                    (builder.build(), outcome)
                };
                end.set(outcome);
                if !done.changes().is_empty() {
                    last = done.clone();
                    yield done;
                }
                drop(end);
            }
        }
        .boxed()
    }
}

/// Reports the end of an execution to the tracer when dropped.
///
/// Cancelled unless a result was set, so a session stream dropped in the middle
/// of an execution still closes its span.
struct ExecutionEnd {
    context: SourceContext,
    span: SpanId,
    feed: FeedId,
    result: ExecutionResult,
}

impl ExecutionEnd {
    fn new(context: &SourceContext, span: SpanId, feed: FeedId) -> Self {
        Self {
            context: context.clone(),
            span,
            feed,
            result: ExecutionResult::Cancelled,
        }
    }

    fn set(&mut self, result: ExecutionResult) {
        self.result = result;
    }
}

impl Drop for ExecutionEnd {
    fn drop(&mut self) {
        let result = std::mem::replace(&mut self.result, ExecutionResult::Cancelled);
        self.context.tracer().on_execution_end(self.span, self.feed, result);
    }
}
