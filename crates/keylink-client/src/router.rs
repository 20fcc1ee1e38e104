//! Channel → handler registry and broadcast fan-out.
//!
//! Subscriptions express durable interest: they survive reconnects and are
//! only removed through [`Subscription::unsubscribe`]. Dispatch runs on the
//! connection task, so handlers must not block.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use keylink_proto::BroadcastFrame;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

/// Callback invoked for every broadcast on a subscribed channel.
pub type Handler = Arc<dyn Fn(&BroadcastFrame) + Send + Sync>;

/// Change in local interest for a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Interest {
    /// The channel gained its first subscriber.
    Gained(String),
    /// The channel lost its last subscriber.
    Lost(String),
}

type InterestListener = Box<dyn Fn(Interest) + Send + Sync>;

struct Entry {
    id: u64,
    handler: Handler,
    active: Arc<AtomicBool>,
}

/// Per-channel subscriber sets for one client.
pub struct SubscriptionRouter {
    channels: RwLock<HashMap<String, Vec<Entry>>>,
    /// Highest `seq` delivered per channel on the current connection.
    last_seq: Mutex<HashMap<String, u64>>,
    next_id: AtomicU64,
    listener: RwLock<Option<InterestListener>>,
}

impl SubscriptionRouter {
    /// Create an empty router.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(HashMap::new()),
            last_seq: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            listener: RwLock::new(None),
        })
    }

    /// Be told when a channel gains its first or loses its last subscriber.
    ///
    /// The listener runs while the registry is locked: it must not block or
    /// call back into the router.
    pub fn set_listener(&self, listener: impl Fn(Interest) + Send + Sync + 'static) {
        *self.listener.write() = Some(Box::new(listener));
    }

    /// Add `handler` to `channel`'s subscriber set.
    pub fn subscribe(
        self: &Arc<Self>,
        channel: &str,
        handler: impl Fn(&BroadcastFrame) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        {
            let mut channels = self.channels.write();
            let entries = channels.entry(channel.to_string()).or_default();
            entries.push(Entry {
                id,
                handler: Arc::new(handler),
                active: Arc::clone(&active),
            });
            // Under the lock, so interest changes reach the listener in
            // registry order even when racing an unsubscribe
            if entries.len() == 1 {
                self.notify(Interest::Gained(channel.to_string()));
            }
        }
        debug!(channel, id, "subscribed");
        Subscription {
            router: Arc::downgrade(self),
            channel: channel.to_string(),
            id,
            active,
        }
    }

    fn remove(&self, channel: &str, id: u64) {
        {
            let mut channels = self.channels.write();
            let Some(entries) = channels.get_mut(channel) else {
                return;
            };
            entries.retain(|e| e.id != id);
            if entries.is_empty() {
                let _ = channels.remove(channel);
                self.notify(Interest::Lost(channel.to_string()));
            }
        }
        debug!(channel, id, "unsubscribed");
    }

    /// Called with the `channels` write lock held.
    fn notify(&self, interest: Interest) {
        if let Some(listener) = self.listener.read().as_ref() {
            listener(interest);
        }
    }

    /// Deliver `frame` to every current subscriber of its channel.
    ///
    /// Frames whose `seq` does not advance past the last one seen on the
    /// channel are dropped. A panicking handler is logged and skipped.
    /// Returns the number of handlers invoked successfully.
    pub fn dispatch(&self, frame: &BroadcastFrame) -> usize {
        {
            let mut last_seq = self.last_seq.lock();
            match last_seq.get(&frame.channel) {
                Some(&last) if frame.seq <= last => {
                    debug!(
                        channel = %frame.channel,
                        seq = frame.seq,
                        last,
                        "dropping stale or duplicate broadcast"
                    );
                    return 0;
                }
                _ => {
                    let _ = last_seq.insert(frame.channel.clone(), frame.seq);
                }
            }
        }

        // Snapshot so handlers may subscribe or unsubscribe re-entrantly
        let handlers: Vec<(u64, Handler, Arc<AtomicBool>)> = {
            let channels = self.channels.read();
            let Some(entries) = channels.get(&frame.channel) else {
                debug!(channel = %frame.channel, seq = frame.seq, "no subscribers, discarding");
                return 0;
            };
            entries
                .iter()
                .map(|e| (e.id, Arc::clone(&e.handler), Arc::clone(&e.active)))
                .collect()
        };

        let mut delivered = 0;
        for (id, handler, active) in handlers {
            if !active.load(Ordering::Acquire) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| handler(frame))).is_ok() {
                delivered += 1;
            } else {
                error!(
                    channel = %frame.channel,
                    seq = frame.seq,
                    subscriber = id,
                    "subscriber handler panicked, continuing dispatch"
                );
            }
        }
        delivered
    }

    /// Forget per-channel sequence numbers (a new connection restarts them).
    pub fn reset_sequences(&self) {
        self.last_seq.lock().clear();
    }

    /// Channels with at least one subscriber.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.read().get(channel).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for SubscriptionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRouter")
            .field("channels", &self.channels())
            .finish_non_exhaustive()
    }
}

/// Handle returned by [`SubscriptionRouter::subscribe`].
///
/// Dropping the handle keeps the subscription alive; call
/// [`unsubscribe`](Self::unsubscribe) to end it.
#[must_use = "an unsubscribe handle that is dropped can never end the subscription"]
#[derive(Debug)]
pub struct Subscription {
    router: Weak<SubscriptionRouter>,
    channel: String,
    id: u64,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// Stop delivery to this handler. Idempotent.
    ///
    /// Takes effect immediately, including for a dispatch already in flight.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(router) = self.router.upgrade() {
            router.remove(&self.channel, self.id);
        }
    }

    /// Channel this subscription listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether the handler still receives broadcasts.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}
