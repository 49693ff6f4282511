//! One-shot futures chained into a broadcast list.
//!
//! A [`Frontier`] is the pending next transition of a state. Resolving it hands
//! every waiter a [`Node`]: the committed message plus the frontier after it.
//! Readers walk the chain independently, so each one sees every transition from
//! the point it joined, exactly once.

use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;

use crate::message::Message;

/// A resolved transition.
pub(crate) struct Node<T> {
    pub(crate) message: Message<T>,
    pub(crate) next: Arc<Frontier<T>>,
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self {
            message: self.message.clone(),
            next: self.next.clone(),
        }
    }
}

pub(crate) struct Frontier<T> {
    sender: Mutex<Option<oneshot::Sender<Node<T>>>>,
    receiver: Shared<oneshot::Receiver<Node<T>>>,
}

impl<T> Frontier<T> {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: receiver.shared(),
        }
    }

    /// Complete the frontier with `node`. Only the first completion counts.
    pub(crate) fn resolve(&self, node: Node<T>) {
        if let Some(sender) = self.sender.lock().take() {
            // The receiver lives as long as `self`, so sending cannot fail here.
            let _ = sender.send(node);
        }
    }

    /// Cancel the frontier: every waiter gets `None`.
    pub(crate) fn cancel(&self) {
        self.sender.lock().take();
    }

    /// Wait for the frontier to resolve. `None` when it was cancelled.
    pub(crate) async fn wait(&self) -> Option<Node<T>> {
        self.receiver.clone().await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_waiter_gets_the_node() {
        let frontier = Arc::new(Frontier::<i32>::new());
        let next = Arc::new(Frontier::new());
        let message = Message::initial().with().data(Some(5)).build();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let frontier = frontier.clone();
                tokio::spawn(async move { frontier.wait().await.map(|n| n.message) })
            })
            .collect();

        frontier.resolve(Node {
            message,
            next: next.clone(),
        });

        for waiter in waiters {
            let message = waiter.await.unwrap().unwrap();
            assert_eq!(message.current().data(), Some(&5));
        }

        // Late waiters still observe the resolution.
        let late = frontier.wait().await.unwrap();
        assert!(Arc::ptr_eq(&late.next, &next));
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiters_with_none() {
        let frontier = Arc::new(Frontier::<i32>::new());
        let waiter = {
            let frontier = frontier.clone();
            tokio::spawn(async move { frontier.wait().await.is_none() })
        };
        frontier.cancel();
        assert!(waiter.await.unwrap());

        // Resolving after cancellation is ignored.
        frontier.resolve(Node {
            message: Message::initial(),
            next: Arc::new(Frontier::new()),
        });
        assert!(frontier.wait().await.is_none());
    }
}
