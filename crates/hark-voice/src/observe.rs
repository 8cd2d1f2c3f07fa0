//! Publication primitives for the session's outbound streams.
//!
//! [`Observable`] replays its latest value to every new subscriber and then
//! delivers each change in emission order. [`EventBus`] only delivers what is
//! published after subscription. Both fan out over unbounded channels so a
//! slow observer never blocks the publisher, and both drop closed subscribers
//! on the next publish.

use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct ObservableInner<T> {
    current: T,
    subscribers: Vec<mpsc::UnboundedSender<T>>,
}

/// A value with change notification.
pub struct Observable<T: Clone> {
    inner: Mutex<ObservableInner<T>>,
}

impl<T: Clone> Observable<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Mutex::new(ObservableInner {
                current: initial,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn get(&self) -> T {
        lock(&self.inner).current.clone()
    }

    /// Subscribe; the current value is the first item received.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);
        // Cannot fail: we hold the receiver.
        let _ = tx.send(inner.current.clone());
        inner.subscribers.push(tx);
        rx
    }

    /// Replace the value and notify every subscriber.
    pub fn publish(&self, value: T) {
        let mut inner = lock(&self.inner);
        inner.current = value.clone();
        inner.subscribers.retain(|tx| tx.send(value.clone()).is_ok());
    }

    /// Publish only if the value differs from the current one. Returns whether it published.
    pub fn publish_if_changed(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        let mut inner = lock(&self.inner);
        if inner.current == value {
            return false;
        }
        inner.current = value.clone();
        inner.subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        true
    }
}

/// Fan-out of discrete events with no replay.
pub struct EventBus<T: Clone> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    /// Deliver to every live subscriber. Returns how many received it.
    pub fn publish(&self, event: T) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
