//! Requests sent to the feeds of a source context.
//!
//! Consumers do not talk to feeds directly: they send a [`ContextRequest`]
//! through [`SourceContext::send_request`](crate::SourceContext::send_request)
//! and every [`RequestHandler`] registered on the context receives it.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slab::Slab;

use crate::feed::FeedId;
use crate::pagination::{PageToken, PageTokens};

/// A request delivered to the handlers of a context.
#[derive(Debug, Clone)]
pub enum ContextRequest {
    /// Load one more page.
    Page(PageRequest),
    /// Re-execute the producing functions.
    Refresh(RefreshRequest),
    /// The context is going away; handlers are unregistered right after.
    End(EndRequest),
}

/// Ask paginated feeds to load one more page.
///
/// Each handler that accepts the request registers the [`PageToken`] it issued,
/// so the requester can wait for those tokens to complete.
#[derive(Debug, Clone)]
pub struct PageRequest {
    desired_page_size: Option<u32>,
    target: Option<FeedId>,
    issued: Arc<Mutex<Vec<PageToken>>>,
}

impl PageRequest {
    /// A request for every paginated feed of the context.
    pub fn new(desired_page_size: Option<u32>) -> Self {
        Self {
            desired_page_size,
            target: None,
            issued: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A request for the paginated feed `feed` only.
    pub fn for_feed(feed: FeedId, desired_page_size: Option<u32>) -> Self {
        Self {
            target: Some(feed),
            ..Self::new(desired_page_size)
        }
    }

    pub fn desired_page_size(&self) -> Option<u32> {
        self.desired_page_size
    }

    /// Whether the subscription of `feed` should handle this request.
    pub fn targets(&self, feed: FeedId) -> bool {
        self.target.map_or(true, |target| target == feed)
    }

    /// Record a token issued for this request.
    pub fn register(&self, token: PageToken) {
        self.issued.lock().push(token);
    }

    /// The tokens issued so far.
    pub fn tokens(&self) -> PageTokens {
        PageTokens::new(self.issued.lock().clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefreshRequest;

#[derive(Debug, Clone, Default)]
pub struct EndRequest;

/// Receives the requests of a context.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: &ContextRequest);
}

impl<F> RequestHandler for F
where
    F: Fn(&ContextRequest) + Send + Sync + 'static,
{
    fn handle(&self, request: &ContextRequest) {
        self(request)
    }
}

type Handlers = Mutex<Option<Slab<Arc<dyn RequestHandler>>>>;

/// Handler arena of a context. `None` once ended.
pub(crate) struct RequestSource {
    handlers: Arc<Handlers>,
}

impl RequestSource {
    pub(crate) fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Some(Slab::new()))),
        }
    }

    pub(crate) fn register(&self, handler: Arc<dyn RequestHandler>) -> RequestRegistration {
        let key = self
            .handlers
            .lock()
            .as_mut()
            .map(|handlers| handlers.insert(handler.clone()));
        match key {
            Some(key) => RequestRegistration {
                handlers: Arc::downgrade(&self.handlers),
                key: Some(key),
            },
            None => {
                // Already ended: the handler only ever sees the end.
                handler.handle(&ContextRequest::End(EndRequest));
                RequestRegistration {
                    handlers: Weak::new(),
                    key: None,
                }
            }
        }
    }

    /// Deliver `request` to every registered handler.
    ///
    /// Handlers run outside of the arena lock, so they may register or drop
    /// registrations themselves.
    pub(crate) fn send(&self, request: &ContextRequest) {
        let handlers: Vec<_> = match self.handlers.lock().as_ref() {
            Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
            None => return,
        };
        for handler in handlers {
            handler.handle(request);
        }
    }

    /// Send [`EndRequest`] and unregister every handler.
    pub(crate) fn end(&self) {
        self.send(&ContextRequest::End(EndRequest));
        self.handlers.lock().take();
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.lock().as_ref().map_or(0, Slab::len)
    }
}

/// Keeps a handler registered. Dropping it unregisters the handler.
#[must_use = "dropping the registration unregisters the handler"]
pub struct RequestRegistration {
    handlers: Weak<Handlers>,
    key: Option<usize>,
}

impl Drop for RequestRegistration {
    fn drop(&mut self) {
        let (Some(handlers), Some(key)) = (self.handlers.upgrade(), self.key) else {
            return;
        };
        let mut guard = handlers.lock();
        if let Some(slab) = guard.as_mut() {
            slab.try_remove(key);
        }
    }
}

impl std::fmt::Debug for RequestRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRegistration")
            .field("key", &self.key)
            .finish()
    }
}
