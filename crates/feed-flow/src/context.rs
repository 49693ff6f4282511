//! Source contexts: the scope that correlates feeds with their states.
//!
//! A [`SourceContext`] keeps at most one live [`State`] per feed and shares one
//! cancellation scope with all of them. Contexts are usually attached to an
//! [`Owner`]: dropping the owner disposes its context.
//!
//! Code running inside [`SourceContext::as_current`] can reach the context with
//! [`SourceContext::current`] without passing it around. Outside of any scope,
//! `current` is a detached context that does not memoize anything.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::FeedError;
use crate::feed::{Feed, FeedId, FeedValue};
use crate::pagination::PageTokens;
use crate::request::{
    ContextRequest, PageRequest, RefreshRequest, RequestHandler, RequestRegistration, RequestSource,
};
use crate::state::{State, SubscriptionMode};
use crate::tracer::{NoopTracer, Tracer};

tokio::task_local! {
    static CURRENT: SourceContext;
}

static CONTEXT_COUNTER: AtomicU64 = AtomicU64::new(1);
static OWNER_COUNTER: AtomicU64 = AtomicU64::new(1);

static NONE: LazyLock<SourceContext> =
    LazyLock::new(|| SourceContext::create(SourceContextBuilder::new(), None, true));

static OWNERS: LazyLock<Mutex<HashMap<OwnerId, SourceContext>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// A state as stored by its context, type-erased.
#[async_trait]
pub(crate) trait OwnedState: Send + Sync + 'static {
    fn as_any(&self) -> &dyn std::any::Any;

    fn dispose(&self);

    async fn shutdown(&self);
}

/// Identity of an [`Owner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

/// An identity that a context can be attached to.
///
/// Dropping the owner disposes its context right away: the cancellation scope
/// is cancelled and every state is disposed. Use
/// [`SourceContext::dispose`] beforehand to also wait for feed subscriptions to
/// wind down.
#[derive(Debug)]
pub struct Owner {
    id: OwnerId,
}

impl Owner {
    pub fn new() -> Self {
        Self {
            id: OwnerId(OWNER_COUNTER.fetch_add(1, Ordering::Relaxed)),
        }
    }

    pub fn id(&self) -> OwnerId {
        self.id
    }

    /// The context of this owner, created on first use.
    pub fn context(&self) -> SourceContext {
        SourceContext::get_or_create(self)
    }
}

impl Default for Owner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Owner {
    fn drop(&mut self) {
        let context = OWNERS.lock().remove(&self.id);
        if let Some(context) = context {
            context.dispose_now();
        }
    }
}

/// Scope correlating feeds to states, with a shared cancellation lifetime.
///
/// Cloning is cheap: clones refer to the same context.
#[derive(Clone)]
pub struct SourceContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: u64,
    owner: Option<OwnerId>,
    detached: bool,
    token: CancellationToken,
    states: Mutex<Option<HashMap<FeedId, Arc<dyn OwnedState>>>>,
    requests: RequestSource,
    tracer: Arc<dyn Tracer>,
    subscription_mode: SubscriptionMode,
    default_page_size: Option<u32>,
    disposed: AtomicBool,
}

impl SourceContext {
    fn create(builder: SourceContextBuilder, owner: Option<OwnerId>, detached: bool) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: CONTEXT_COUNTER.fetch_add(1, Ordering::Relaxed),
                owner,
                detached,
                token: CancellationToken::new(),
                states: Mutex::new(Some(HashMap::new())),
                requests: RequestSource::new(),
                tracer: builder.tracer,
                subscription_mode: builder.subscription_mode,
                default_page_size: builder.default_page_size,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a builder for a context with custom settings.
    pub fn builder() -> SourceContextBuilder {
        SourceContextBuilder::new()
    }

    /// The ambient context of the running task, or [`none`](Self::none).
    pub fn current() -> SourceContext {
        CURRENT
            .try_with(SourceContext::clone)
            .unwrap_or_else(|_| Self::none())
    }

    /// The detached context.
    ///
    /// Feeds used through it get a new, unshared state on every call.
    pub fn none() -> SourceContext {
        NONE.clone()
    }

    /// The context of `owner`, created with default settings on first call.
    pub fn get_or_create(owner: &Owner) -> SourceContext {
        OWNERS
            .lock()
            .entry(owner.id)
            .or_insert_with(|| Self::create(SourceContextBuilder::new(), Some(owner.id), false))
            .clone()
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.inner.owner
    }

    /// Returns `true` for the detached context.
    pub fn is_detached(&self) -> bool {
        self.inner.detached
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// The cancellation scope shared by every state of this context.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn tracer(&self) -> &dyn Tracer {
        &*self.inner.tracer
    }

    pub fn subscription_mode(&self) -> SubscriptionMode {
        self.inner.subscription_mode
    }

    /// Page size used when a page request does not specify one.
    pub fn default_page_size(&self) -> Option<u32> {
        self.inner.default_page_size
    }

    /// The state of `feed` in this context, created on first request.
    ///
    /// Concurrent first requests still yield a single state. On the detached
    /// context a new state is created on every call and a warning is logged.
    pub fn get_or_create_state<T: FeedValue>(&self, feed: &Feed<T>) -> Result<State<T>, FeedError> {
        if self.inner.detached {
            warn!(
                feed = %feed.id(),
                "feed used outside of a source context: every call creates a new subscription \
                 that is not shared, which hurts performance"
            );
            self.tracer().on_detached_subscription(feed.id());
            return Ok(State::from_feed(self, feed, self.inner.subscription_mode));
        }

        if let Some(existing) = self.lookup(feed)? {
            return Ok(existing);
        }

        let created = State::from_feed(self, feed, self.inner.subscription_mode);
        let outcome = {
            let mut states = self.inner.states.lock();
            match states.as_mut() {
                None => Err(FeedError::ContextDisposed),
                Some(states) => match states.entry(feed.id()) {
                    Entry::Occupied(entry) => downcast(entry.get(), feed).map(Some),
                    Entry::Vacant(entry) => {
                        entry.insert(Arc::new(created.clone()));
                        Ok(None)
                    }
                },
            }
        };

        match outcome {
            Ok(None) => Ok(created),
            Ok(Some(existing)) => {
                created.dispose();
                Ok(existing)
            }
            Err(err) => {
                created.dispose();
                Err(err)
            }
        }
    }

    fn lookup<T: FeedValue>(&self, feed: &Feed<T>) -> Result<Option<State<T>>, FeedError> {
        let states = self.inner.states.lock();
        let states = states.as_ref().ok_or(FeedError::ContextDisposed)?;
        states
            .get(&feed.id())
            .map(|existing| downcast(existing, feed))
            .transpose()
    }

    /// Run `future` with this context as the ambient one.
    ///
    /// Scopes nest: the previous ambient context is restored when `future`
    /// completes.
    pub fn as_current<F: Future>(&self, future: F) -> impl Future<Output = F::Output> {
        CURRENT.scope(self.clone(), future)
    }

    /// Run `f` with this context as the ambient one.
    pub fn as_current_sync<R>(&self, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(self.clone(), f)
    }

    /// Register a handler for the requests of this context.
    pub fn register_handler(&self, handler: Arc<dyn RequestHandler>) -> RequestRegistration {
        self.inner.requests.register(handler)
    }

    /// Deliver `request` to every handler of this context.
    pub fn send_request(&self, request: &ContextRequest) {
        self.inner.requests.send(request);
    }

    /// Ask every paginated feed of this context to load one more page.
    ///
    /// Returns the tokens issued by the feeds that accepted the request.
    pub fn request_page(&self, desired_page_size: Option<u32>) -> PageTokens {
        self.send_page_request(PageRequest::new(desired_page_size.or(self.inner.default_page_size)))
    }

    /// Like [`request_page`](Self::request_page), for the subscription of `feed` only.
    pub fn request_page_for(&self, feed: FeedId, desired_page_size: Option<u32>) -> PageTokens {
        self.send_page_request(PageRequest::for_feed(
            feed,
            desired_page_size.or(self.inner.default_page_size),
        ))
    }

    fn send_page_request(&self, request: PageRequest) -> PageTokens {
        self.send_request(&ContextRequest::Page(request.clone()));
        let tokens = request.tokens();
        self.tracer()
            .on_page_requested(self.inner.id, request.desired_page_size(), tokens.len());
        tokens
    }

    /// Ask every feed of this context to execute again.
    pub fn request_refresh(&self) {
        self.send_request(&ContextRequest::Refresh(RefreshRequest));
    }

    /// Cancel the scope, dispose every state and wait for their feeds to stop.
    ///
    /// Idempotent. A no-op on the detached context.
    pub async fn dispose(&self) {
        if let Some(states) = self.begin_dispose() {
            for state in states {
                state.shutdown().await;
            }
        }
    }

    /// Like [`dispose`](Self::dispose) without waiting for feed subscriptions.
    pub fn dispose_now(&self) {
        if let Some(states) = self.begin_dispose() {
            for state in states {
                state.dispose();
            }
        }
    }

    fn begin_dispose(&self) -> Option<Vec<Arc<dyn OwnedState>>> {
        if self.inner.detached || self.inner.disposed.swap(true, Ordering::AcqRel) {
            return None;
        }

        self.inner.token.cancel();
        self.inner.requests.end();
        let states = self.inner.states.lock().take().unwrap_or_default();

        if let Some(owner) = self.inner.owner {
            let mut owners = OWNERS.lock();
            if owners.get(&owner).is_some_and(|c| c == self) {
                owners.remove(&owner);
            }
        }

        debug!(context = self.inner.id, states = states.len(), "source context disposed");
        self.tracer().on_context_disposed(self.inner.id);
        Some(states.into_values().collect())
    }

    pub(crate) fn registered_handlers(&self) -> usize {
        self.inner.requests.len()
    }
}

fn downcast<T: FeedValue>(state: &Arc<dyn OwnedState>, feed: &Feed<T>) -> Result<State<T>, FeedError> {
    state
        .as_any()
        .downcast_ref::<State<T>>()
        .cloned()
        .ok_or(FeedError::TypeMismatch { feed: feed.id() })
}

impl PartialEq for SourceContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SourceContext {}

impl std::fmt::Debug for SourceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceContext")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .field("detached", &self.inner.detached)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Builder for [`SourceContext`] with custom settings.
pub struct SourceContextBuilder {
    tracer: Arc<dyn Tracer>,
    subscription_mode: SubscriptionMode,
    default_page_size: Option<u32>,
}

impl Default for SourceContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceContextBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            tracer: Arc::new(NoopTracer),
            subscription_mode: SubscriptionMode::default(),
            default_page_size: None,
        }
    }

    /// Set the tracer that observes every state of the context.
    pub fn tracer<T: Tracer>(mut self, tracer: T) -> Self {
        self.tracer = Arc::new(tracer);
        self
    }

    /// Set how states of the context enumerate their feeds.
    ///
    /// Defaults to [`SubscriptionMode::Lazy`].
    pub fn subscription_mode(mut self, mode: SubscriptionMode) -> Self {
        self.subscription_mode = mode;
        self
    }

    /// Set the page size used when a page request does not carry one.
    pub fn default_page_size(mut self, size: Option<u32>) -> Self {
        self.default_page_size = size;
        self
    }

    /// Build a context without owner. Dispose it explicitly.
    pub fn build(self) -> SourceContext {
        SourceContext::create(self, None, false)
    }

    /// Build the context of `owner`, replacing (and disposing) any previous one.
    pub fn build_for(self, owner: &Owner) -> SourceContext {
        let context = SourceContext::create(self, Some(owner.id), false);
        let previous = OWNERS.lock().insert(owner.id, context.clone());
        if let Some(previous) = previous {
            previous.dispose_now();
        }
        context
    }
}
