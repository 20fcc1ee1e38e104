//! Pending-request table owned by the connection task.
//!
//! Each `command`/`query` frame is registered under its correlation id with a
//! deadline. Exactly one of three things settles an entry: the matching
//! `response`, its deadline, or a connection drop. Whatever arrives after
//! that is dropped.

use std::collections::HashMap;
use std::future::poll_fn;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Poll;
use std::time::Duration;

use keylink_proto::{CorrelationId, ResponseFrame};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, warn};

use crate::errors::ClientError;

/// Completion handle for one caller.
pub(crate) type Reply = oneshot::Sender<Result<Value, ClientError>>;

struct PendingRequest {
    method: String,
    /// `None` for requests issued by the client itself (channel announcements).
    reply: Option<Reply>,
    deadline: delay_queue::Key,
    issued_at: Instant,
}

impl PendingRequest {
    fn settle(self, outcome: Result<Value, ClientError>) {
        match self.reply {
            // The caller may have stopped waiting; that is fine
            Some(reply) => {
                let _ = reply.send(outcome);
            }
            None => {
                if let Err(e) = outcome {
                    warn!(method = %self.method, error = %e, "internal request failed");
                }
            }
        }
    }
}

pub(crate) struct Correlator {
    pending: HashMap<CorrelationId, PendingRequest>,
    deadlines: DelayQueue<CorrelationId>,
    timeout: Duration,
    gauge: Arc<AtomicUsize>,
}

impl Correlator {
    pub(crate) fn new(timeout: Duration, gauge: Arc<AtomicUsize>) -> Self {
        Self {
            pending: HashMap::new(),
            deadlines: DelayQueue::new(),
            timeout,
            gauge,
        }
    }

    /// Track a request that is about to be sent.
    pub(crate) fn register(&mut self, id: CorrelationId, method: &str, reply: Option<Reply>) {
        let deadline = self.deadlines.insert(id.clone(), self.timeout);
        let previous = self.pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                reply,
                deadline,
                issued_at: Instant::now(),
            },
        );
        if let Some(previous) = previous {
            // Only reachable with a reused id; never leave a caller hanging
            let _ = self.deadlines.try_remove(&previous.deadline);
            previous.settle(Err(ClientError::Protocol("duplicate correlation id".into())));
        }
        self.sync_gauge();
    }

    /// Settle the entry matching `response`.
    ///
    /// Returns `false` when no entry matches (unknown id, or already settled
    /// by its timeout); the frame is then dropped.
    pub(crate) fn resolve(&mut self, response: ResponseFrame) -> bool {
        let Some(entry) = self.pending.remove(&response.id) else {
            warn!(id = %response.id, "dropping response for unknown or expired request");
            return false;
        };
        let _ = self.deadlines.try_remove(&entry.deadline);
        self.sync_gauge();

        debug!(
            id = %response.id,
            method = %entry.method,
            ok = response.ok,
            elapsed_ms = u64::try_from(entry.issued_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "request settled"
        );
        entry.settle(response.into_outcome().map_err(ClientError::from));
        true
    }

    /// Wait for the next deadline and reject that request with `Timeout`.
    ///
    /// Never completes while the table is empty.
    pub(crate) async fn expire_next(&mut self) {
        let expired = poll_fn(|cx| match self.deadlines.poll_expired(cx) {
            Poll::Ready(Some(expired)) => Poll::Ready(expired.into_inner()),
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        })
        .await;

        if let Some(entry) = self.pending.remove(&expired) {
            self.sync_gauge();
            let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(id = %expired, method = %entry.method, timeout_ms, "request timed out");
            let method = entry.method.clone();
            entry.settle(Err(ClientError::Timeout { method, timeout_ms }));
        }
    }

    /// Reject every pending request with `err`. Returns how many were rejected.
    pub(crate) fn drain(&mut self, err: &ClientError) -> usize {
        self.deadlines.clear();
        let count = self.pending.len();
        for (_, entry) in self.pending.drain() {
            entry.settle(Err(err.clone()));
        }
        self.sync_gauge();
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    fn sync_gauge(&self) {
        self.gauge.store(self.pending.len(), Ordering::Relaxed);
    }
}
