use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

/// Receiving end of a hub queue.
///
/// Dropping the subscription unsubscribes it; the hub prunes it on the next
/// publish.
#[derive(Debug)]
pub struct Subscription<T> {
    queue: Option<String>,
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(queue: Option<String>, receiver: mpsc::UnboundedReceiver<T>) -> Self {
        Self { queue, receiver }
    }

    /// Name of the queue this subscription is attached to, if any.
    pub fn queue_name(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    /// Wait for the next event. `None` once the hub is disposed and the
    /// buffered events are drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Stop receiving events.
    pub fn unsubscribe(mut self) {
        self.receiver.close();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
