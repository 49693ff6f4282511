//! The reactive cell.
//!
//! A [`State`] holds the latest [`Message`] of a value and broadcasts every
//! committed transition to all of its readers:
//!
//! - Writers go through [`State::update`], serialized by an async mutex.
//! - Readers call [`State::get_source`] and walk the chain of one-shot
//!   [`Frontier`]s from the point they joined. No reader can miss, duplicate or
//!   reorder a transition, whatever the number of readers.
//! - [`State::dispose`] severs the chain: waiting readers terminate, later
//!   updates become no-ops.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use async_stream::stream;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::context::{OwnedState, SourceContext};
use crate::error::FeedError;
use crate::feed::{Feed, FeedValue};
use crate::frontier::{Frontier, Node};
use crate::message::{Message, MessageBuilder, MessageEntry};
use crate::tracer::{TracerStateKey, UpdateOutcome};

static STATE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// When a feed-bound state enumerates its feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// Start enumerating the feed when the first reader attaches.
    #[default]
    Lazy,
    /// Start enumerating the feed as soon as the state is created.
    ///
    /// Starting needs a Tokio runtime. A state created outside of one starts
    /// its feed when the first reader attaches, as with [`Lazy`](Self::Lazy).
    Eager,
    /// Enumerate the feed only while at least one reader is attached.
    RefCounted,
}

/// A single-writer, multi-reader reactive cell over one value.
///
/// Cloning is cheap: clones share the same cell.
pub struct State<T: FeedValue> {
    inner: Arc<StateInner<T>>,
}

struct StateInner<T: FeedValue> {
    key: TracerStateKey,
    context: SourceContext,
    token: CancellationToken,
    snapshot: Mutex<Snapshot<T>>,
    next: ArcSwapOption<Frontier<T>>,
    writer: tokio::sync::Mutex<()>,
    disposed: AtomicBool,
    binding: Option<FeedBinding<T>>,
}

struct Snapshot<T> {
    current: Message<T>,
    has_current: bool,
    version: u64,
}

struct FeedBinding<T: FeedValue> {
    feed: Feed<T>,
    mode: SubscriptionMode,
    pump: Mutex<Pump>,
}

#[derive(Default)]
struct Pump {
    readers: usize,
    running: Option<RunningPump>,
}

struct RunningPump {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl<T: FeedValue> State<T> {
    /// A state without any value. Readers wait for the first update.
    pub fn empty(context: &SourceContext) -> Self {
        Self::create(context, Message::initial(), false, None)
    }

    /// A state holding `value` right away.
    ///
    /// [`current`](Self::current) returns the value synchronously and readers get
    /// it as their first message without waiting.
    pub fn with_value(context: &SourceContext, value: T) -> Self {
        let initial = Message::initial().with().data(Some(value)).build();
        Self::create(context, initial, true, None)
    }

    /// A state fed by `feed`, enumerated according to `mode`.
    pub fn from_feed(context: &SourceContext, feed: &Feed<T>, mode: SubscriptionMode) -> Self {
        let binding = FeedBinding {
            feed: feed.clone(),
            mode,
            pump: Mutex::new(Pump::default()),
        };
        let state = Self::create(context, Message::initial(), false, Some(binding));
        if mode == SubscriptionMode::Eager {
            if let Some(binding) = &state.inner.binding {
                start_pump(&state.inner, &mut binding.pump.lock());
            }
        }
        state
    }

    fn create(
        context: &SourceContext,
        current: Message<T>,
        has_current: bool,
        binding: Option<FeedBinding<T>>,
    ) -> Self {
        let key = TracerStateKey::new(
            STATE_COUNTER.fetch_add(1, Ordering::Relaxed),
            std::any::type_name::<T>(),
            binding.as_ref().map(|b| b.feed.id()),
        );
        context.tracer().on_state_created(&key, context.id());

        Self {
            inner: Arc::new(StateInner {
                key,
                context: context.clone(),
                token: context.token().child_token(),
                snapshot: Mutex::new(Snapshot {
                    current,
                    has_current,
                    version: 0,
                }),
                next: ArcSwapOption::from_pointee(Frontier::new()),
                writer: tokio::sync::Mutex::new(()),
                disposed: AtomicBool::new(false),
                binding,
            }),
        }
    }

    /// The context owning this state.
    pub fn context(&self) -> &SourceContext {
        &self.inner.context
    }

    pub fn tracer_key(&self) -> &TracerStateKey {
        &self.inner.key
    }

    /// Number of committed transitions.
    pub fn version(&self) -> u64 {
        self.inner.snapshot.lock().version
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// The latest message, if the state has a value.
    pub fn current(&self) -> Option<Message<T>> {
        let snapshot = self.inner.snapshot.lock();
        snapshot.has_current.then(|| snapshot.current.clone())
    }

    /// The live sequence of messages.
    ///
    /// The current message (if any) comes first, then every committed transition
    /// in commit order. The sequence ends silently when `token` is cancelled or
    /// the state is disposed.
    pub fn get_source(&self, token: &CancellationToken) -> BoxStream<'static, Message<T>> {
        let inner = self.inner.clone();
        let token = token.clone();

        stream! {
            // Snapshot and frontier are captured together so no transition can
            // slip in between.
            let (first, mut next) = {
                let snapshot = inner.snapshot.lock();
                let first = snapshot.has_current.then(|| snapshot.current.clone());
                (first, inner.next.load_full())
            };
            let _reader = ReaderGuard::attach(&inner);

            if let Some(first) = first {
                yield first;
            }

            while let Some(frontier) = next.take() {
                let node = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    node = frontier.wait() => node,
                };
                let Some(Node { message, next: following }) = node else {
                    break;
                };
                next = Some(following);
                yield message;
            }
        }
        .boxed()
    }

    /// Wait for the first message of the state.
    pub async fn message(&self, token: &CancellationToken) -> Result<Message<T>, FeedError> {
        if let Some(current) = self.current() {
            return Ok(current);
        }
        match self.get_source(token).next().await {
            Some(message) => Ok(message),
            None if token.is_cancelled() => Err(FeedError::Cancelled),
            None => Err(FeedError::StateDisposed),
        }
    }

    /// Wait for the first message and return its data.
    pub async fn value(&self, token: &CancellationToken) -> Result<Option<T>, FeedError>
    where
        T: Clone,
    {
        Ok(self.message(token).await?.current().data().cloned())
    }

    /// Apply `updater` to the current message and commit the result.
    ///
    /// - The returned message must be built from the current message, otherwise
    ///   [`FeedError::StaleMessage`] is returned and nothing changes.
    /// - A message without changes is a no-op: the version does not move and no
    ///   reader wakes.
    /// - On a disposed state the update is silently dropped.
    /// - Cancelling `token` while waiting for the writer lock returns
    ///   [`FeedError::Cancelled`].
    pub async fn update<F>(&self, updater: F, token: &CancellationToken) -> Result<(), FeedError>
    where
        F: FnOnce(&Message<T>) -> Message<T>,
    {
        let inner = &self.inner;
        let tracer = inner.context.tracer();

        let writer = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracer.on_update(&inner.key, UpdateOutcome::Cancelled);
                return Err(FeedError::Cancelled);
            }
            guard = inner.writer.lock() => guard,
        };

        let current = inner.snapshot.lock().current.clone();
        let updated = updater(&current);

        if !updated.previous().is_same(current.current()) {
            tracer.on_update(&inner.key, UpdateOutcome::Rejected);
            return Err(FeedError::StaleMessage);
        }
        if updated.changes().is_empty() {
            tracer.on_update(&inner.key, UpdateOutcome::Unchanged);
            return Ok(());
        }

        let next = Arc::new(Frontier::new());
        let (replaced, version) = {
            let mut snapshot = inner.snapshot.lock();
            let replaced = loop {
                let observed = inner.next.load_full();
                let Some(frontier) = observed.as_ref() else {
                    break None;
                };
                let previous = inner.next.compare_and_swap(&observed, Some(next.clone()));
                if matches!(&*previous, Some(p) if Arc::ptr_eq(p, frontier)) {
                    break Some(frontier.clone());
                }
            };
            if replaced.is_some() {
                snapshot.current = updated.clone();
                snapshot.has_current = true;
                snapshot.version += 1;
            }
            (replaced, snapshot.version)
        };
        drop(writer);

        match replaced {
            Some(frontier) => {
                frontier.resolve(Node {
                    message: updated,
                    next,
                });
                debug!(state = inner.key.state_id, version, "committed update");
                tracer.on_update(&inner.key, UpdateOutcome::Committed { version });
            }
            None => tracer.on_update(&inner.key, UpdateOutcome::Disposed),
        }
        Ok(())
    }

    /// Update through a [`MessageBuilder`] based on the current message.
    pub async fn update_message<F>(&self, configure: F, token: &CancellationToken) -> Result<(), FeedError>
    where
        F: FnOnce(&mut MessageBuilder<T>),
    {
        self.update(
            |current| {
                let mut builder = current.with();
                configure(&mut builder);
                builder.build()
            },
            token,
        )
        .await
    }

    /// Replace the data with the result of `f` applied to the current data.
    pub async fn update_data<F>(&self, f: F, token: &CancellationToken) -> Result<(), FeedError>
    where
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        self.update_message(
            |builder| {
                let data = f(builder.get_data());
                builder.data(data);
            },
            token,
        )
        .await
    }

    /// Set the data to `value`.
    pub async fn set(&self, value: T, token: &CancellationToken) -> Result<(), FeedError> {
        self.update_data(|_| Some(value), token).await
    }

    /// Sever the message chain.
    ///
    /// Every waiting reader terminates and later updates are dropped. Stops the
    /// feed subscription, if any. Idempotent.
    pub fn dispose(&self) {
        if let Some(frontier) = self.inner.next.swap(None) {
            frontier.cancel();
        }
        if !self.inner.disposed.swap(true, Ordering::AcqRel) {
            self.inner.token.cancel();
            debug!(state = self.inner.key.state_id, "state disposed");
            self.inner.context.tracer().on_state_disposed(&self.inner.key);
        }
    }

    /// Dispose and wait for the feed subscription to finish.
    pub async fn shutdown(&self) {
        self.dispose();
        let running = self
            .inner
            .binding
            .as_ref()
            .and_then(|binding| binding.pump.lock().running.take());
        if let Some(running) = running {
            let _ = running.handle.await;
        }
    }
}

impl<T: FeedValue> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: FeedValue> std::fmt::Debug for State<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("key", &self.inner.key)
            .field("version", &self.version())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<T: FeedValue> Drop for StateInner<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[async_trait]
impl<T: FeedValue> OwnedState for State<T> {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn dispose(&self) {
        State::dispose(self);
    }

    async fn shutdown(&self) {
        State::shutdown(self).await;
    }
}

// ============================================================================
// Readers and the feed subscription
// ============================================================================

struct ReaderGuard<T: FeedValue> {
    inner: Arc<StateInner<T>>,
}

impl<T: FeedValue> ReaderGuard<T> {
    fn attach(inner: &Arc<StateInner<T>>) -> Self {
        inner.context.tracer().on_reader_attached(&inner.key);
        if let Some(binding) = &inner.binding {
            let mut pump = binding.pump.lock();
            pump.readers += 1;
            if pump.running.is_none() {
                start_pump(inner, &mut pump);
            }
        }
        Self {
            inner: inner.clone(),
        }
    }
}

impl<T: FeedValue> Drop for ReaderGuard<T> {
    fn drop(&mut self) {
        let inner = &self.inner;
        inner.context.tracer().on_reader_detached(&inner.key);
        if let Some(binding) = &inner.binding {
            let mut pump = binding.pump.lock();
            pump.readers = pump.readers.saturating_sub(1);
            if binding.mode == SubscriptionMode::RefCounted && pump.readers == 0 {
                if let Some(running) = pump.running.take() {
                    debug!(state = inner.key.state_id, "last reader detached, stopping feed");
                    running.token.cancel();
                }
            }
        }
    }
}

fn start_pump<T: FeedValue>(inner: &Arc<StateInner<T>>, pump: &mut Pump) {
    let Some(binding) = &inner.binding else {
        return;
    };
    if inner.token.is_cancelled() {
        return;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(
            state = inner.key.state_id,
            "no tokio runtime, the feed starts with the first reader"
        );
        return;
    };
    let token = inner.token.child_token();
    let handle = runtime.spawn(run_pump(
        Arc::downgrade(inner),
        binding.feed.clone(),
        inner.context.clone(),
        token.clone(),
    ));
    pump.running = Some(RunningPump { token, handle });
}

async fn run_pump<T: FeedValue>(
    state: Weak<StateInner<T>>,
    feed: Feed<T>,
    context: SourceContext,
    token: CancellationToken,
) {
    let mut source = feed.source(&context);
    let mut last: Option<MessageEntry<T>> = None;

    loop {
        let message = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            message = source.next() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if let Some(last) = &last {
            if !message.previous().is_same(last) {
                let err = FeedError::BrokenChain { feed: feed.id() };
                error!(%err, "stopping feed subscription");
                break;
            }
        }
        let is_first = last.is_none();
        last = Some(message.current().clone());

        let Some(inner) = state.upgrade() else {
            break;
        };
        let result = State { inner }
            .update(|current| rebase(current, &message, is_first), &token)
            .await;
        match result {
            Ok(()) | Err(FeedError::Cancelled) => {}
            Err(err) => {
                error!(%err, feed = %feed.id(), "failed to apply feed message");
                break;
            }
        }
    }

    debug!(feed = %feed.id(), "feed subscription ended");
}

/// Apply the changes of a feed message on top of the state's current message.
///
/// The first message of a subscription applies every axis it carries.
fn rebase<T: FeedValue>(current: &Message<T>, incoming: &Message<T>, is_first: bool) -> Message<T> {
    let mut builder = current.with();
    let values = incoming.current();
    if is_first {
        for axis in values.axes() {
            builder.set(axis, values.get(axis));
        }
    }
    for axis in incoming.changes() {
        builder.set(axis, values.get(axis));
    }
    builder.build()
}
