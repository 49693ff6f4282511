//! Feeds: cold producers of message sequences.
//!
//! A [`Feed`] does nothing by itself. Each call to [`Feed::source`] starts a new
//! subscription; a [`State`] created through a [`SourceContext`] owns the one
//! subscription shared by all of its readers.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_stream::stream;
use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::axis::Axis;
use crate::context::SourceContext;
use crate::error::FeedError;
use crate::execution::{FeedExecution, FeedSession};
use crate::message::Message;
use crate::state::State;

/// Values that can flow through a feed.
///
/// Automatically implemented for all types that implement
/// `PartialEq + Send + Sync + 'static`. `PartialEq` decides whether a new value
/// is a change.
pub trait FeedValue: PartialEq + Send + Sync + 'static {}
impl<T: PartialEq + Send + Sync + 'static> FeedValue for T {}

static FEED_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of a feed. Contexts memoize states by feed id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedId(u64);

impl FeedId {
    pub(crate) fn next() -> Self {
        Self(FEED_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feed#{}", self.0)
    }
}

/// Produces the message sequence of a feed.
///
/// Messages must form a chain: each message's `previous` is the `current` of
/// the message before it. A state stops following a source that breaks the
/// chain.
pub trait FeedSource<T: FeedValue>: Send + Sync + 'static {
    fn source(&self, feed: FeedId, context: &SourceContext) -> BoxStream<'static, Message<T>>;
}

/// A handle to a producer of `T` values.
///
/// Cloning keeps the identity: clones resolve to the same state in a context.
pub struct Feed<T: FeedValue> {
    id: FeedId,
    source: Arc<dyn FeedSource<T>>,
}

impl<T: FeedValue> Feed<T> {
    pub fn new(source: impl FeedSource<T>) -> Self {
        Self {
            id: FeedId::next(),
            source: Arc::new(source),
        }
    }

    pub fn id(&self) -> FeedId {
        self.id
    }

    /// Start a new subscription in `context`.
    pub fn source(&self, context: &SourceContext) -> BoxStream<'static, Message<T>> {
        self.source.source(self.id, context)
    }

    /// The state of this feed in the ambient context.
    pub fn state(&self) -> Result<State<T>, FeedError> {
        SourceContext::current().get_or_create_state(self)
    }

    /// A feed producing `value` once.
    pub fn constant(value: T) -> Self
    where
        T: Clone,
    {
        Self::new(ConstantSource { value })
    }

    /// A feed running `producer` on every execution.
    ///
    /// The first execution starts with the subscription; refresh requests sent
    /// through the context trigger new ones. Failures are captured onto the
    /// Error axis with no data.
    pub fn from_async<F, Fut>(producer: F) -> Self
    where
        F: Fn(Arc<FeedExecution>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
    {
        Self::new(AsyncSource {
            producer: Arc::new(producer),
        })
    }

    /// A feed whose messages come from a stream created per subscription.
    pub fn from_stream<F, S>(factory: F) -> Self
    where
        F: Fn(&SourceContext) -> S + Send + Sync + 'static,
        S: Stream<Item = Message<T>> + Send + 'static,
    {
        Self::new(StreamSource { factory })
    }

    /// A feed mapping the data of this one. Other axes are forwarded as is.
    pub fn select<U, F>(&self, map: F) -> Feed<U>
    where
        U: FeedValue,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        Feed::new(SelectSource {
            parent: self.clone(),
            map: Arc::new(map),
        })
    }
}

impl<T: FeedValue> Clone for Feed<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            source: self.source.clone(),
        }
    }
}

impl<T: FeedValue> fmt::Debug for Feed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Feed<{}>({})", std::any::type_name::<T>(), self.id)
    }
}

// ============================================================================
// Sources
// ============================================================================

struct ConstantSource<T> {
    value: T,
}

impl<T: FeedValue + Clone> FeedSource<T> for ConstantSource<T> {
    fn source(&self, _feed: FeedId, _context: &SourceContext) -> BoxStream<'static, Message<T>> {
        let message = Message::initial().with().data(Some(self.value.clone())).build();
        stream::once(async move { message }).boxed()
    }
}

struct AsyncSource<F> {
    producer: Arc<F>,
}

impl<T, F, Fut> FeedSource<T> for AsyncSource<F>
where
    T: FeedValue,
    F: Fn(Arc<FeedExecution>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<T>>> + Send + 'static,
{
    fn source(&self, feed: FeedId, context: &SourceContext) -> BoxStream<'static, Message<T>> {
        let producer = self.producer.clone();
        FeedSession::new(feed, context).run(move |execution| (*producer)(execution))
    }
}

struct StreamSource<F> {
    factory: F,
}

impl<T, F, S> FeedSource<T> for StreamSource<F>
where
    T: FeedValue,
    F: Fn(&SourceContext) -> S + Send + Sync + 'static,
    S: Stream<Item = Message<T>> + Send + 'static,
{
    fn source(&self, _feed: FeedId, context: &SourceContext) -> BoxStream<'static, Message<T>> {
        (self.factory)(context).boxed()
    }
}

struct SelectSource<T: FeedValue, F> {
    parent: Feed<T>,
    map: Arc<F>,
}

impl<T, U, F> FeedSource<U> for SelectSource<T, F>
where
    T: FeedValue,
    U: FeedValue,
    F: Fn(&T) -> U + Send + Sync + 'static,
{
    fn source(&self, _feed: FeedId, context: &SourceContext) -> BoxStream<'static, Message<U>> {
        let mut upstream = self.parent.source(context);
        let map = self.map.clone();

        stream! {
            let mut last = Message::<U>::initial();
            let mut first = true;

            while let Some(message) = upstream.next().await {
                let values = message.current();
                let mut axes: Vec<Axis> = message.changes().iter().cloned().collect();
                if first {
                    axes.extend(values.axes().cloned());
                    first = false;
                }

                let mut builder = last.with();
                for axis in &axes {
                    if *axis != Axis::data() {
                        builder.set(axis, values.get(axis));
                    } else if values.is_data_undefined() {
                        builder.undefined_data();
                    } else {
                        builder.data(values.data().map(|v| (*map)(v)));
                    }
                }

                let next = builder.build();
                if !next.changes().is_empty() {
                    last = next.clone();
                    yield next;
                }
            }
        }
        .boxed()
    }
}
