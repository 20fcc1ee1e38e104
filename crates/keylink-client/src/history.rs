//! Bounded, insertion-ordered history of broadcast payloads.
//!
//! [`HistoryBuffer`] is the plain FIFO store. [`ChannelHistory`] feeds one
//! from a channel subscription. Each consumer owns its own buffer, so one
//! consumer's pause or clear never affects another.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::router::{Subscription, SubscriptionRouter};

/// Fixed-capacity FIFO buffer.
///
/// Once full, every push evicts exactly one item: the oldest. While paused,
/// pushes are discarded and resuming does not replay them.
#[derive(Clone, Debug)]
pub struct HistoryBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    paused: bool,
}

impl<T> HistoryBuffer<T> {
    /// Create an empty buffer holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            paused: false,
        }
    }

    /// Append `item`, returning the evicted item if the buffer was full.
    ///
    /// A zero-capacity buffer evicts `item` itself. A paused buffer drops it
    /// and returns `None`.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.paused {
            return None;
        }
        if self.capacity == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Remove every item.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Discard incoming items until [`resume`](Self::resume).
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Accept incoming items again.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Whether pushes are being discarded.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Maximum number of items held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items held.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Oldest-first iterator.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Most recently pushed item.
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }
}

impl<T: Clone> HistoryBuffer<T> {
    /// Oldest-first copy of the contents.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// History buffer fed by a channel subscription.
///
/// Payloads that do not decode as `T` are logged and skipped. Dropping the
/// history ends its subscription.
pub struct ChannelHistory<T> {
    buffer: Arc<Mutex<HistoryBuffer<T>>>,
    subscription: Subscription,
}

impl<T> ChannelHistory<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Subscribe to `channel` and retain the last `capacity` payloads.
    pub fn attach(router: &Arc<SubscriptionRouter>, channel: &str, capacity: usize) -> Self {
        let buffer = Arc::new(Mutex::new(HistoryBuffer::new(capacity)));
        let sink = Arc::clone(&buffer);
        let subscription = router.subscribe(channel, move |frame| match frame.decode::<T>() {
            Ok(item) => {
                let _ = sink.lock().push(item);
            }
            Err(e) => {
                warn!(channel = %frame.channel, seq = frame.seq, error = %e, "skipping undecodable payload");
            }
        });
        Self {
            buffer,
            subscription,
        }
    }
}

impl<T> ChannelHistory<T> {
    /// Channel feeding this history.
    pub fn channel(&self) -> &str {
        self.subscription.channel()
    }

    /// Remove every item.
    pub fn clear(&self) {
        self.buffer.lock().clear();
    }

    /// Discard incoming payloads until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.buffer.lock().pause();
    }

    /// Accept incoming payloads again.
    pub fn resume(&self) {
        self.buffer.lock().resume();
    }

    /// Whether incoming payloads are being discarded.
    pub fn is_paused(&self) -> bool {
        self.buffer.lock().is_paused()
    }

    /// Number of payloads held.
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Whether no payloads are held.
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Run `f` against the buffer without copying it.
    pub fn with<R>(&self, f: impl FnOnce(&HistoryBuffer<T>) -> R) -> R {
        f(&self.buffer.lock())
    }
}

impl<T: Clone> ChannelHistory<T> {
    /// Oldest-first copy of the contents.
    pub fn snapshot(&self) -> Vec<T> {
        self.buffer.lock().to_vec()
    }

    /// Most recent payload.
    pub fn latest(&self) -> Option<T> {
        self.buffer.lock().latest().cloned()
    }
}

impl<T> Drop for ChannelHistory<T> {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

impl<T> std::fmt::Debug for ChannelHistory<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHistory")
            .field("channel", &self.channel())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
