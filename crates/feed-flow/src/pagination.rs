//! Incremental loading of paginated collections.
//!
//! A [`PaginationDependency`] sits inside the executions of a [`FeedSession`].
//! Page requests sent through the context issue a [`PageToken`] and trigger an
//! execution; the producing function then calls
//! [`PaginationDependency::get_items`] to advance the page enumerator and get
//! the accumulated items.
//!
//! Items only grow within an epoch. Any execution that is not purely a page
//! continuation of the dependency (the initial run, a refresh, a change of
//! another input) starts a new epoch: the enumerator is discarded and the
//! accumulated items are cleared.
//!
//! Progress of page requests is reported on the Pagination axis through
//! [`PaginationInfo`], so requesters can wait for their tokens to complete
//! (see [`State::load_more`]).

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use feed_flow_collections::DifferentialList;
use futures::stream::{BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::axis::{Axis, AxisValue};
use crate::context::SourceContext;
use crate::error::{CapturedError, FeedError};
use crate::execution::{
    Dependency, DependencyId, ExecuteRequest, ExecutionId, ExecutionTrigger, FeedExecution,
    FeedSession,
};
use crate::feed::{Feed, FeedId, FeedSource, FeedValue};
use crate::message::Message;
use crate::request::{ContextRequest, PageRequest};
use crate::state::State;

// ============================================================================
// Tokens and pagination info
// ============================================================================

/// Identifies one page request handled by a dependency.
///
/// Tokens of a dependency increase monotonically, so completing a token also
/// completes every earlier token of the same dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageToken {
    owner: DependencyId,
    value: u64,
}

impl PageToken {
    /// The first token of `owner`.
    pub fn first(owner: DependencyId) -> Self {
        Self { owner, value: 1 }
    }

    pub fn owner(&self) -> DependencyId {
        self.owner
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// The token issued after this one.
    pub fn next(&self) -> Self {
        Self {
            owner: self.owner,
            value: self.value + 1,
        }
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/page#{}", self.owner, self.value)
    }
}

/// Tokens issued for one page request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageTokens(Vec<PageToken>);

impl PageTokens {
    pub fn new(tokens: Vec<PageToken>) -> Self {
        Self(tokens)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PageToken> {
        self.0.iter()
    }

    /// Whether `info` reports every token as completed.
    pub fn are_completed(&self, info: &PaginationInfo) -> bool {
        self.0.iter().all(|token| info.is_completed(token))
    }
}

/// Value of the Pagination axis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginationInfo {
    /// Whether more items can be loaded.
    pub has_more_items: bool,
    /// Whether a page is being loaded.
    pub is_loading_more: bool,
    completed: Vec<PageToken>,
}

impl PaginationInfo {
    /// `completed` holds the last completed token of each dependency.
    pub fn new(has_more_items: bool, is_loading_more: bool, completed: impl IntoIterator<Item = PageToken>) -> Self {
        let mut info = Self {
            has_more_items,
            is_loading_more,
            completed: Vec::new(),
        };
        for token in completed {
            info.complete(token);
        }
        info
    }

    /// The last completed token of each dependency, by dependency.
    pub fn completed(&self) -> &[PageToken] {
        &self.completed
    }

    pub fn is_completed(&self, token: &PageToken) -> bool {
        self.completed
            .iter()
            .any(|done| done.owner == token.owner && done.value >= token.value)
    }

    /// Combine the info of two sources: flags are OR-ed, completed tokens are
    /// united.
    pub fn merge(&self, other: &PaginationInfo) -> PaginationInfo {
        let mut merged = self.clone();
        merged.has_more_items |= other.has_more_items;
        merged.is_loading_more |= other.is_loading_more;
        for token in &other.completed {
            merged.complete(*token);
        }
        merged
    }

    fn complete(&mut self, token: PageToken) {
        match self
            .completed
            .binary_search_by_key(&token.owner, |done| done.owner)
        {
            Ok(index) => {
                let done = &mut self.completed[index];
                done.value = done.value.max(token.value);
            }
            Err(index) => self.completed.insert(index, token),
        }
    }
}

// ============================================================================
// Enumerators
// ============================================================================

/// Source of pages for a [`PaginationDependency`].
#[async_trait]
pub trait PageEnumerator<T>: Send {
    /// Load the next page. `Ok(None)` means there are no more items.
    async fn move_next(
        &mut self,
        desired_page_size: Option<u32>,
        token: &CancellationToken,
    ) -> anyhow::Result<Option<Vec<T>>>;

    /// Whether the last page returned by `move_next` was the last one.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Arguments of an index-based page loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageIndexRequest {
    /// Zero-based index of the page.
    pub index: u32,
    pub desired_page_size: Option<u32>,
    /// Items loaded so far in this epoch.
    pub total_count: usize,
}

/// Enumerates pages by index. An empty page ends the enumeration.
pub struct IndexPageEnumerator<F> {
    loader: Arc<F>,
    index: u32,
    total_count: usize,
    exhausted: bool,
}

impl<F> IndexPageEnumerator<F> {
    pub fn new(loader: Arc<F>) -> Self {
        Self {
            loader,
            index: 0,
            total_count: 0,
            exhausted: false,
        }
    }
}

#[async_trait]
impl<T, F, Fut> PageEnumerator<T> for IndexPageEnumerator<F>
where
    T: Send + 'static,
    F: Fn(PageIndexRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
{
    async fn move_next(
        &mut self,
        desired_page_size: Option<u32>,
        _token: &CancellationToken,
    ) -> anyhow::Result<Option<Vec<T>>> {
        if self.exhausted {
            return Ok(None);
        }
        let request = PageIndexRequest {
            index: self.index,
            desired_page_size,
            total_count: self.total_count,
        };
        let items = (*self.loader)(request).await?;
        if items.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        self.index += 1;
        self.total_count += items.len();
        Ok(Some(items))
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// A page of a cursor-based source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T, C> {
    pub items: Vec<T>,
    /// Cursor of the next page, `None` on the last page.
    pub next: Option<C>,
}

/// Enumerates pages by following cursors.
pub struct CursorPageEnumerator<C, F> {
    loader: Arc<F>,
    cursor: Option<C>,
}

impl<C, F> CursorPageEnumerator<C, F> {
    pub fn new(first: C, loader: Arc<F>) -> Self {
        Self {
            loader,
            cursor: Some(first),
        }
    }
}

#[async_trait]
impl<T, C, F, Fut> PageEnumerator<T> for CursorPageEnumerator<C, F>
where
    T: Send + 'static,
    C: Clone + Send + Sync + 'static,
    F: Fn(C, Option<u32>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Page<T, C>>> + Send + 'static,
{
    async fn move_next(
        &mut self,
        desired_page_size: Option<u32>,
        _token: &CancellationToken,
    ) -> anyhow::Result<Option<Vec<T>>> {
        let Some(cursor) = self.cursor.clone() else {
            return Ok(None);
        };
        let page = (*self.loader)(cursor, desired_page_size).await?;
        self.cursor = page.next;
        Ok(Some(page.items))
    }

    fn is_exhausted(&self) -> bool {
        self.cursor.is_none()
    }
}

// ============================================================================
// PaginationDependency
// ============================================================================

/// Creates the enumerator of a new epoch.
pub type EnumeratorFactory<T> = Arc<dyn Fn() -> Box<dyn PageEnumerator<T>> + Send + Sync>;

/// Accumulates the pages of an enumerator across the executions of a session.
pub struct PaginationDependency<T: Clone + Send + Sync + 'static> {
    id: DependencyId,
    feed: FeedId,
    last_token: AtomicU64,
    trigger: ExecutionTrigger,
    factory: EnumeratorFactory<T>,
    paging: tokio::sync::Mutex<Paging<T>>,
    exhausted: AtomicBool,
    ended: AtomicBool,
}

struct Paging<T: Clone> {
    enumerator: Option<Box<dyn PageEnumerator<T>>>,
    items: DifferentialList<T>,
    has_more: bool,
    epoch: u64,
    loaded_in: Option<ExecutionId>,
    completed: Option<PageToken>,
}

impl<T: Clone + Send + Sync + 'static> PaginationDependency<T> {
    /// Create a dependency and register it on `session`, both as an execution
    /// dependency and as a handler of the context's page requests.
    pub fn attach<U: FeedValue>(session: &FeedSession<U>, factory: EnumeratorFactory<T>) -> Arc<Self> {
        let dependency = Arc::new(Self {
            id: DependencyId::new(),
            feed: session.feed(),
            last_token: AtomicU64::new(0),
            trigger: session.trigger(),
            factory,
            paging: tokio::sync::Mutex::new(Paging {
                enumerator: None,
                items: DifferentialList::new(),
                has_more: true,
                epoch: 0,
                loaded_in: None,
                completed: None,
            }),
            exhausted: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        });

        session.register_dependency(dependency.clone());
        let handler = dependency.clone();
        session.register_handler(Arc::new(move |request: &ContextRequest| {
            handler.handle_request(request)
        }));
        dependency
    }

    pub fn id(&self) -> DependencyId {
        self.id
    }

    /// Issue the next token. Safe to call concurrently.
    fn issue_token(&self) -> PageToken {
        let mut current = self.last_token.load(Ordering::Acquire);
        loop {
            let next = PageToken {
                owner: self.id,
                value: current,
            }
            .next();
            match self.last_token.compare_exchange_weak(
                current,
                next.value,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    fn handle_request(&self, request: &ContextRequest) {
        match request {
            ContextRequest::Page(page) => self.request_page(page),
            ContextRequest::End(_) => self.ended.store(true, Ordering::Release),
            ContextRequest::Refresh(_) => {}
        }
    }

    fn request_page(&self, request: &PageRequest) {
        if !request.targets(self.feed)
            || self.ended.load(Ordering::Acquire)
            || self.exhausted.load(Ordering::Acquire)
        {
            return;
        }
        let token = self.issue_token();
        if self.trigger.execute(ExecuteRequest::page(self.id, token, request.desired_page_size())) {
            request.register(token);
        }
    }

    /// Load one more page and return the accumulated items.
    ///
    /// Advances the enumerator at most once per execution; later calls in the
    /// same execution return the same items. Once the enumerator is exhausted
    /// the items are returned unchanged and the enumerator is not called again.
    pub async fn get_items(&self, execution: &FeedExecution) -> Result<DifferentialList<T>, FeedError> {
        let mut paging = tokio::select! {
            biased;
            _ = execution.token().cancelled() => return Err(FeedError::Cancelled),
            paging = self.paging.lock() => paging,
        };
        if paging.loaded_in == Some(execution.id()) || !paging.has_more {
            paging.loaded_in = Some(execution.id());
            return Ok(paging.items.clone());
        }
        paging.loaded_in = Some(execution.id());

        let desired_page_size = execution.desired_page_size(self.id);
        let factory = &*self.factory;
        let enumerator = paging.enumerator.get_or_insert_with(|| factory());
        let page = tokio::select! {
            biased;
            _ = execution.token().cancelled() => return Err(FeedError::Cancelled),
            page = enumerator.move_next(desired_page_size, execution.token()) => page,
        };
        let page = page.map_err(|err| FeedError::Source(CapturedError::new(err)))?;
        let exhausted = enumerator.is_exhausted();

        match page {
            Some(items) => {
                if !items.is_empty() {
                    paging.items = paging.items.appended(items);
                }
                if exhausted {
                    paging.has_more = false;
                }
            }
            None => paging.has_more = false,
        }
        debug!(
            dependency = %self.id,
            epoch = paging.epoch,
            items = paging.items.len(),
            has_more = paging.has_more,
            "page loaded"
        );
        Ok(paging.items.clone())
    }

    /// The accumulated items of the current epoch.
    pub async fn items(&self) -> DifferentialList<T> {
        self.paging.lock().await.items.clone()
    }

    pub async fn has_more_items(&self) -> bool {
        self.paging.lock().await.has_more
    }

    /// Number of resets so far.
    pub async fn epoch(&self) -> u64 {
        self.paging.lock().await.epoch
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Dependency for PaginationDependency<T> {
    fn id(&self) -> DependencyId {
        self.id
    }

    async fn on_executing(&self, execution: &FeedExecution) {
        let mut paging = self.paging.lock().await;
        if !execution.is_only_issued_by(self.id) {
            paging.enumerator = None;
            paging.items = DifferentialList::new();
            paging.has_more = true;
            paging.epoch += 1;
            self.exhausted.store(false, Ordering::Release);
            debug!(dependency = %self.id, epoch = paging.epoch, "pagination reset");
        }

        if !execution.page_tokens(self.id).is_empty() {
            let loading = PaginationInfo::new(paging.has_more, true, paging.completed);
            execution.set_axis(&Axis::pagination(), AxisValue::new(loading));
        }
    }

    async fn on_executed(&self, execution: &FeedExecution) {
        let mut paging = self.paging.lock().await;
        let tokens = execution.page_tokens(self.id);

        if !tokens.is_empty() && paging.loaded_in != Some(execution.id()) {
            warn!(
                feed = %execution.feed(),
                dependency = %self.id,
                "page requested but the producing function did not load items"
            );
        }
        if let Some(last) = tokens.into_iter().max() {
            paging.completed = Some(paging.completed.map_or(last, |done| done.max(last)));
        }
        self.exhausted.store(!paging.has_more, Ordering::Release);

        let info = PaginationInfo::new(paging.has_more, false, paging.completed);
        execution.set_axis(&Axis::pagination(), AxisValue::new(info));
    }
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for PaginationDependency<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginationDependency")
            .field("id", &self.id)
            .field("feed", &self.feed)
            .field("last_token", &self.last_token.load(Ordering::Relaxed))
            .field("ended", &self.ended.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================================================
// Paginated feeds
// ============================================================================

impl<T> Feed<DifferentialList<T>>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// A feed of the items of enumerators created by `factory`, one enumerator
    /// per epoch.
    pub fn paginated<E, F>(factory: F) -> Self
    where
        E: PageEnumerator<T> + 'static,
        F: Fn() -> E + Send + Sync + 'static,
    {
        Self::new(PaginatedSource {
            factory: Arc::new(move || Box::new(factory()) as Box<dyn PageEnumerator<T>>),
        })
    }

    /// A feed loading pages by index. An empty page ends the collection.
    pub fn paginated_by_index<F, Fut>(loader: F) -> Self
    where
        F: Fn(PageIndexRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
    {
        let loader = Arc::new(loader);
        Self::paginated(move || IndexPageEnumerator::new(loader.clone()))
    }

    /// A feed loading pages by cursor, starting at `first`.
    pub fn paginated_by_cursor<C, F, Fut>(first: C, loader: F) -> Self
    where
        C: Clone + Send + Sync + 'static,
        F: Fn(C, Option<u32>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Page<T, C>>> + Send + 'static,
    {
        let loader = Arc::new(loader);
        Self::paginated(move || CursorPageEnumerator::new(first.clone(), loader.clone()))
    }
}

struct PaginatedSource<T> {
    factory: EnumeratorFactory<T>,
}

impl<T> FeedSource<DifferentialList<T>> for PaginatedSource<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn source(
        &self,
        feed: FeedId,
        context: &SourceContext,
    ) -> BoxStream<'static, Message<DifferentialList<T>>> {
        let session = FeedSession::new(feed, context);
        let dependency = PaginationDependency::attach(&session, self.factory.clone());
        session.run(move |execution| {
            let dependency = dependency.clone();
            async move {
                let items = dependency.get_items(&execution).await?;
                Ok(Some(items))
            }
        })
    }
}

// ============================================================================
// Loading more from a state
// ============================================================================

impl<T: FeedValue> State<T> {
    /// Ask the feed of this state for one more page and wait until it is loaded.
    ///
    /// Returns whether more items can be loaded afterwards. When the feed does
    /// not accept the request (not paginated, already exhausted), returns the
    /// flag of the current message right away.
    pub async fn load_more(
        &self,
        desired_page_size: Option<u32>,
        token: &CancellationToken,
    ) -> Result<bool, FeedError> {
        let ended = || {
            if token.is_cancelled() {
                FeedError::Cancelled
            } else {
                FeedError::StateDisposed
            }
        };

        let mut source = self.get_source(token);
        let mut message = source.next().await.ok_or_else(ended)?;
        let has_more = |message: &Message<T>| {
            message
                .current()
                .pagination()
                .is_some_and(|info| info.has_more_items)
        };

        let Some(feed) = self.tracer_key().feed else {
            return Ok(has_more(&message));
        };
        let tokens = self.context().request_page_for(feed, desired_page_size);
        if tokens.is_empty() {
            return Ok(has_more(&message));
        }

        loop {
            if let Some(info) = message.current().pagination() {
                if tokens.are_completed(info) {
                    return Ok(info.has_more_items);
                }
            }
            message = source.next().await.ok_or_else(ended)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tracing_test::traced_test;

    use super::*;

    fn single_item_pages() -> EnumeratorFactory<u32> {
        Arc::new(|| {
            Box::new(IndexPageEnumerator::new(Arc::new(|request: PageIndexRequest| async move {
                Ok::<_, anyhow::Error>(vec![request.index])
            }))) as Box<dyn PageEnumerator<u32>>
        })
    }

    async fn next(source: &mut BoxStream<'static, Message<u32>>) -> Message<u32> {
        tokio::time::timeout(Duration::from_secs(1), source.next())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_page_request_without_loading_warns_and_completes() {
        let context = SourceContext::builder().build();
        let session = FeedSession::<u32>::new(FeedId::next(), &context);
        let _dependency = PaginationDependency::attach(&session, single_item_pages());
        let mut source = session.run(|_| async { Ok(Some(0)) });

        next(&mut source).await;
        let initial = next(&mut source).await;
        assert!(initial.current().pagination().is_some_and(|info| info.has_more_items));

        let tokens = context.request_page(None);
        assert_eq!(tokens.len(), 1);
        loop {
            let message = next(&mut source).await;
            if message
                .current()
                .pagination()
                .is_some_and(|info| tokens.are_completed(info))
            {
                break;
            }
        }
        assert!(logs_contain("page requested but the producing function did not load items"));
    }

    #[tokio::test]
    async fn test_get_items_runs_once_per_execution() {
        let context = SourceContext::builder().build();
        let session = FeedSession::<u32>::new(FeedId::next(), &context);
        let dependency = PaginationDependency::attach(&session, single_item_pages());
        let mut source = session.run({
            let dependency = dependency.clone();
            move |execution| {
                let dependency = dependency.clone();
                async move {
                    let first = dependency.get_items(&execution).await?;
                    let second = dependency.get_items(&execution).await?;
                    assert_eq!(first, second);
                    Ok(Some(second.len() as u32))
                }
            }
        });

        next(&mut source).await;
        assert_eq!(next(&mut source).await.current().data(), Some(&1));
        assert_eq!(dependency.items().await.to_vec(), vec![0]);
        assert_eq!(dependency.epoch().await, 1);
        assert!(dependency.has_more_items().await);
    }

    async fn until_completed(source: &mut BoxStream<'static, Message<u32>>, tokens: &PageTokens) -> Message<u32> {
        loop {
            let message = next(source).await;
            if message
                .current()
                .pagination()
                .is_some_and(|info| tokens.are_completed(info))
            {
                return message;
            }
        }
    }

    #[tokio::test]
    async fn test_get_items_after_exhaustion_leaves_the_source_alone() {
        let calls = Arc::new(AtomicUsize::new(0));
        let factory: EnumeratorFactory<u32> = {
            let calls = calls.clone();
            Arc::new(move || {
                let calls = calls.clone();
                Box::new(IndexPageEnumerator::new(Arc::new(move |request: PageIndexRequest| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        Ok::<_, anyhow::Error>(if request.index < 2 {
                            vec![request.index]
                        } else {
                            Vec::new()
                        })
                    }
                }))) as Box<dyn PageEnumerator<u32>>
            })
        };

        let context = SourceContext::builder().build();
        let session = FeedSession::<u32>::new(FeedId::next(), &context);
        let trigger = session.trigger();
        let dependency = PaginationDependency::attach(&session, factory);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::<Vec<u32>>::new()));
        let mut source = session.run({
            let (dependency, seen) = (dependency.clone(), seen.clone());
            move |execution| {
                let (dependency, seen) = (dependency.clone(), seen.clone());
                async move {
                    let first = dependency.get_items(&execution).await?;
                    let second = dependency.get_items(&execution).await?;
                    seen.lock().push(first.to_vec());
                    seen.lock().push(second.to_vec());
                    Ok(Some(second.len() as u32))
                }
            }
        });

        next(&mut source).await;
        next(&mut source).await;
        let tokens = context.request_page(None);
        until_completed(&mut source, &tokens).await;
        let tokens = context.request_page(None);
        let exhausted = until_completed(&mut source, &tokens).await;
        assert!(!exhausted.current().pagination().unwrap().has_more_items);
        assert_eq!(exhausted.current().data(), Some(&2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(context.request_page(None).is_empty());

        seen.lock().clear();
        assert!(trigger.execute(ExecuteRequest::custom(Some(dependency.id()), "recheck")));
        let settled = loop {
            let message = next(&mut source).await;
            if !message.current().is_transient() {
                break message;
            }
        };

        assert_eq!(settled.current().data(), Some(&2));
        assert_eq!(*seen.lock(), vec![vec![0, 1], vec![0, 1]]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(dependency.epoch().await, 1);
        assert!(!dependency.has_more_items().await);
    }

    #[test]
    fn test_tokens_complete_in_order() {
        let dep = DependencyId::new();
        let first = PageToken::first(dep);
        let info = PaginationInfo::new(true, false, [first.next()]);

        assert!(info.is_completed(&first));
        assert!(info.is_completed(&first.next()));
        assert!(!info.is_completed(&first.next().next()));
        assert!(!info.is_completed(&PageToken::first(DependencyId::new())));
    }

    #[test]
    fn test_info_keeps_last_token_per_dependency() {
        let a = DependencyId::new();
        let b = DependencyId::new();
        let info = PaginationInfo::new(
            false,
            false,
            [PageToken::first(a).next(), PageToken::first(a), PageToken::first(b)],
        );
        assert_eq!(info.completed().len(), 2);
        assert!(info.is_completed(&PageToken::first(a).next()));
    }

    #[test]
    fn test_merge() {
        let a = DependencyId::new();
        let b = DependencyId::new();
        let left = PaginationInfo::new(false, true, [PageToken::first(a)]);
        let right = PaginationInfo::new(true, false, [PageToken::first(a).next(), PageToken::first(b)]);

        let merged = left.merge(&right);
        assert!(merged.has_more_items);
        assert!(merged.is_loading_more);
        assert!(PageTokens::new(vec![PageToken::first(a).next(), PageToken::first(b)]).are_completed(&merged));
        assert_eq!(merged, right.merge(&left));
    }

    #[test]
    fn test_empty_tokens_are_completed() {
        assert!(PageTokens::default().are_completed(&PaginationInfo::default()));
    }

    #[tokio::test]
    async fn test_index_enumerator_stops_on_empty_page() {
        let mut enumerator = IndexPageEnumerator::new(Arc::new(|request: PageIndexRequest| async move {
            Ok::<_, anyhow::Error>(if request.index < 2 {
                vec![request.index; 2]
            } else {
                Vec::new()
            })
        }));
        let token = CancellationToken::new();

        assert_eq!(enumerator.move_next(Some(2), &token).await.unwrap(), Some(vec![0, 0]));
        assert_eq!(enumerator.move_next(Some(2), &token).await.unwrap(), Some(vec![1, 1]));
        assert_eq!(enumerator.move_next(Some(2), &token).await.unwrap(), None);
        assert!(PageEnumerator::<u32>::is_exhausted(&enumerator));
    }

    #[tokio::test]
    async fn test_cursor_enumerator_follows_cursors() {
        let mut enumerator = CursorPageEnumerator::new(
            0u32,
            Arc::new(|cursor: u32, _size: Option<u32>| async move {
                Ok::<_, anyhow::Error>(Page {
                    items: vec![cursor],
                    next: (cursor < 1).then_some(cursor + 1),
                })
            }),
        );
        let token = CancellationToken::new();

        assert_eq!(enumerator.move_next(None, &token).await.unwrap(), Some(vec![0]));
        assert!(!PageEnumerator::<u32>::is_exhausted(&enumerator));
        assert_eq!(enumerator.move_next(None, &token).await.unwrap(), Some(vec![1]));
        assert!(PageEnumerator::<u32>::is_exhausted(&enumerator));
        assert_eq!(enumerator.move_next(None, &token).await.unwrap(), None);
    }
}
