//! Subscription handles.

use bytes::Bytes;
use tokio::sync::mpsc;

/// A child appeared directly beneath a subscribed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildAdded {
    /// Final path segment of the new child
    pub key: String,
    /// Value written
    pub value: Bytes,
}

/// Stream of events from one store subscription.
///
/// Events for one path arrive in commit order. Dropping the handle cancels
/// the subscription; [`Subscription::close`] does the same explicitly and may
/// be called any number of times.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    closed: bool,
}

impl<T> Subscription<T> {
    /// Wrap the receiving half of an event channel.
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx, closed: false }
    }

    /// Next event, or `None` once closed or the store side has gone away.
    pub async fn next(&mut self) -> Option<T> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    /// Stop receiving. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.rx.close();
            self.closed = true;
        }
    }

    /// True after [`Subscription::close`].
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
