//! Tests for paginated feeds and State::load_more.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use feed_flow::{
    DifferentialList, Feed, Message, Page, PageIndexRequest, SourceContext, SpanId, State, Tracer,
};
use futures::StreamExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

type Items = DifferentialList<u32>;

/// A feed over `0..total`, counting loader calls.
fn numbers(total: u32) -> (Arc<AtomicUsize>, Feed<Items>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let feed = Feed::paginated_by_index({
        let calls = calls.clone();
        move |request: PageIndexRequest| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let size = request.desired_page_size.unwrap_or(2);
                let start = request.index * size;
                Ok((start..(start + size).min(total)).collect::<Vec<u32>>())
            }
        }
    });
    (calls, feed)
}

fn context() -> SourceContext {
    SourceContext::builder().default_page_size(Some(2)).build()
}

/// Wait for a settled message with data.
async fn settled(state: &State<Items>) -> Message<Items> {
    let mut source = state.get_source(&CancellationToken::new());
    loop {
        let message = timeout(Duration::from_secs(1), source.next())
            .await
            .unwrap()
            .unwrap();
        if !message.current().is_transient() && !message.current().is_data_undefined() {
            return message;
        }
    }
}

fn items(state: &State<Items>) -> Vec<u32> {
    state
        .current()
        .and_then(|message| message.current().data().map(DifferentialList::to_vec))
        .unwrap_or_default()
}

// =============================================================================
// Accumulation and exhaustion
// =============================================================================

#[tokio::test]
async fn test_load_more_accumulates_until_exhausted() {
    let context = context();
    let (calls, feed) = numbers(5);
    let state = context.get_or_create_state(&feed).unwrap();
    let token = CancellationToken::new();

    let first = settled(&state).await;
    assert_eq!(first.current().data().map(DifferentialList::to_vec), Some(vec![0, 1]));
    assert!(first.current().pagination().unwrap().has_more_items);

    assert!(state.load_more(None, &token).await.unwrap());
    assert_eq!(items(&state), vec![0, 1, 2, 3]);

    assert!(state.load_more(None, &token).await.unwrap());
    assert_eq!(items(&state), vec![0, 1, 2, 3, 4]);

    // The empty page ends the collection.
    assert!(!state.load_more(None, &token).await.unwrap());
    assert_eq!(items(&state), vec![0, 1, 2, 3, 4]);
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    // Exhausted: the loader is not called again.
    assert!(!state.load_more(None, &token).await.unwrap());
    assert!(!state.load_more(Some(10), &token).await.unwrap());
    assert_eq!(items(&state), vec![0, 1, 2, 3, 4]);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(!state.current().unwrap().current().pagination().unwrap().has_more_items);

    context.dispose().await;
}

/// Hands out the same span for every execution.
struct ConstantSpanTracer;

impl Tracer for ConstantSpanTracer {
    fn new_span_id(&self) -> SpanId {
        SpanId(1)
    }
}

#[tokio::test]
async fn test_load_more_ignores_tracer_span_ids() {
    let context = SourceContext::builder()
        .default_page_size(Some(1))
        .tracer(ConstantSpanTracer)
        .build();
    let (calls, feed) = numbers(5);
    let state = context.get_or_create_state(&feed).unwrap();
    let token = CancellationToken::new();

    for _ in 0..3 {
        assert!(state.load_more(None, &token).await.unwrap());
    }
    assert_eq!(items(&state), vec![0, 1, 2, 3]);
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    context.dispose().await;
}

#[tokio::test]
async fn test_load_more_on_fresh_state() {
    let context = context();
    let (_, feed) = numbers(10);
    let state = context.get_or_create_state(&feed).unwrap();

    assert!(state.load_more(None, &CancellationToken::new()).await.unwrap());
    assert_eq!(items(&state), vec![0, 1, 2, 3]);

    context.dispose().await;
}

#[tokio::test]
async fn test_desired_page_size_is_forwarded() {
    let context = context();
    let (_, feed) = numbers(20);
    let state = context.get_or_create_state(&feed).unwrap();
    settled(&state).await;

    // Page 1 of size 5 is 5..10.
    state.load_more(Some(5), &CancellationToken::new()).await.unwrap();
    assert_eq!(items(&state), vec![0, 1, 5, 6, 7, 8, 9]);

    context.dispose().await;
}

#[tokio::test]
async fn test_page_loads_do_not_flag_progress() {
    let context = context();
    let (_, feed) = numbers(10);
    let state = context.get_or_create_state(&feed).unwrap();
    settled(&state).await;

    let mut source = state.get_source(&CancellationToken::new());
    source.next().await.unwrap();
    context.request_page(None);

    let loading = source.next().await.unwrap();
    assert!(!loading.current().is_transient());
    assert!(loading.current().pagination().unwrap().is_loading_more);

    let loaded = source.next().await.unwrap();
    assert!(!loaded.current().pagination().unwrap().is_loading_more);
    assert_eq!(loaded.current().data().unwrap().len(), 4);

    context.dispose().await;
}

// =============================================================================
// Epochs
// =============================================================================

#[tokio::test]
async fn test_refresh_starts_a_new_epoch() {
    let context = context();
    let (calls, feed) = numbers(10);
    let state = context.get_or_create_state(&feed).unwrap();
    let token = CancellationToken::new();
    settled(&state).await;
    state.load_more(None, &token).await.unwrap();
    assert_eq!(items(&state), vec![0, 1, 2, 3]);

    let mut source = state.get_source(&token);
    source.next().await.unwrap();
    context.request_refresh();
    let reset = loop {
        let message = source.next().await.unwrap();
        if !message.current().is_transient() {
            break message;
        }
    };
    assert_eq!(reset.current().data().map(DifferentialList::to_vec), Some(vec![0, 1]));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    assert!(state.load_more(None, &token).await.unwrap());
    assert_eq!(items(&state), vec![0, 1, 2, 3]);

    context.dispose().await;
}

// =============================================================================
// Cursors and failures
// =============================================================================

#[tokio::test]
async fn test_cursor_pages_until_last_cursor() {
    let context = context();
    let feed = Feed::paginated_by_cursor(0u32, |cursor: u32, _size: Option<u32>| async move {
        Ok(Page {
            items: vec![cursor * 10, cursor * 10 + 1],
            next: (cursor < 2).then_some(cursor + 1),
        })
    });
    let state = context.get_or_create_state(&feed).unwrap();
    let token = CancellationToken::new();
    settled(&state).await;

    assert!(state.load_more(None, &token).await.unwrap());
    assert!(!state.load_more(None, &token).await.unwrap());
    assert_eq!(items(&state), vec![0, 1, 10, 11, 20, 21]);

    context.dispose().await;
}

#[tokio::test]
async fn test_failed_page_is_captured_and_retried() {
    let context = context();
    let failed_once = Arc::new(AtomicBool::new(false));
    let feed = Feed::paginated_by_index({
        let failed_once = failed_once.clone();
        move |request: PageIndexRequest| {
            let fail = request.index == 1 && !failed_once.swap(true, Ordering::SeqCst);
            async move {
                if fail {
                    anyhow::bail!("page 1 unavailable");
                }
                Ok(vec![request.index])
            }
        }
    });
    let state = context.get_or_create_state(&feed).unwrap();
    let token = CancellationToken::new();
    settled(&state).await;

    assert!(state.load_more(None, &token).await.unwrap());
    let failed = state.current().unwrap();
    assert_eq!(failed.current().data(), None);
    assert!(failed
        .current()
        .error()
        .is_some_and(|e| e.to_string().contains("page 1 unavailable")));

    assert!(state.load_more(None, &token).await.unwrap());
    let recovered = state.current().unwrap();
    assert!(recovered.current().error().is_none());
    assert_eq!(items(&state), vec![0, 1]);

    context.dispose().await;
}

// =============================================================================
// Several paginated feeds
// =============================================================================

#[tokio::test]
async fn test_load_more_only_targets_its_own_feed() {
    let context = context();
    let (calls_a, feed_a) = numbers(10);
    let (calls_b, feed_b) = numbers(10);
    let a = context.get_or_create_state(&feed_a).unwrap();
    let b = context.get_or_create_state(&feed_b).unwrap();
    settled(&a).await;
    settled(&b).await;

    a.load_more(None, &CancellationToken::new()).await.unwrap();
    assert_eq!(calls_a.load(Ordering::SeqCst), 2);
    assert_eq!(calls_b.load(Ordering::SeqCst), 1);
    assert_eq!(items(&b), vec![0, 1]);

    context.dispose().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_page_requests_issue_distinct_tokens() {
    let context = context();
    let (_, feed) = numbers(1_000);
    let state = context.get_or_create_state(&feed).unwrap();
    settled(&state).await;

    let requesters: Vec<_> = (0..8)
        .map(|_| {
            let context = context.clone();
            tokio::spawn(async move {
                (0..10)
                    .flat_map(|_| context.request_page(Some(1)).iter().copied().collect::<Vec<_>>())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut tokens = Vec::new();
    for requester in requesters {
        tokens.extend(requester.await.unwrap());
    }
    let distinct: HashSet<_> = tokens.iter().copied().collect();
    assert_eq!(tokens.len(), 80);
    assert_eq!(distinct.len(), 80);

    context.dispose().await;
}
