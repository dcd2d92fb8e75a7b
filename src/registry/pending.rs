//! Correlation registry for in-flight synchronous requests.
//!
//! At most one request per [`CorrelationKey`] is registered at a time. Later
//! submissions on a busy key wait in a per-key FIFO until the registered one
//! resolves; the engine then writes and registers the next.
//!
//! Every registered entry leaves the registry exactly once: by a matching
//! response, by a protocol error, by its deadline, by caller cancellation,
//! or by shutdown. Whichever happens first removes the entry, which makes
//! every later path a no-op.
//!
//! The registry is owned by the dispatch actor and never shared, so it takes
//! no locks.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Result, ZnpError};
use crate::protocol::{CorrelationKey, Frame};

/// Identifies one synchronous submission for cancellation.
pub type RequestId = u64;

/// Where the outcome of a synchronous request is delivered.
pub type Reply = oneshot::Sender<Result<Frame>>;

/// A registered request waiting for its response.
#[derive(Debug)]
struct PendingRequest {
    id: RequestId,
    reply: Reply,
    deadline: Instant,
    /// Registration sequence, for "oldest" lookups.
    order: u64,
}

/// A submission waiting for its key to become free.
#[derive(Debug)]
pub struct Queued {
    pub id: RequestId,
    pub frame: Frame,
    pub reply: Reply,
}

/// In-flight synchronous requests by correlation key.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    entries: HashMap<CorrelationKey, PendingRequest>,
    queues: HashMap<CorrelationKey, VecDeque<Queued>>,
    next_order: u64,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a request is registered under `key`.
    pub fn is_busy(&self, key: &CorrelationKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Register a written request.
    ///
    /// The caller checks [`is_busy`](Self::is_busy) first; an existing entry
    /// is never overwritten, and the new reply is failed instead.
    pub fn register(&mut self, key: CorrelationKey, id: RequestId, reply: Reply, deadline: Instant) {
        if self.entries.contains_key(&key) {
            tracing::error!(%key, id, "key already registered; rejecting request");
            let _ = reply.send(Err(ZnpError::InvalidFrame(format!(
                "request already pending for {key}"
            ))));
            return;
        }
        let order = self.next_order;
        self.next_order += 1;
        self.entries.insert(
            key,
            PendingRequest {
                id,
                reply,
                deadline,
                order,
            },
        );
        tracing::debug!(%key, id, pending = self.entries.len(), "registered pending request");
    }

    /// Park a submission until `key` is free.
    pub fn enqueue(&mut self, key: CorrelationKey, queued: Queued) {
        let queue = self.queues.entry(key).or_default();
        queue.push_back(queued);
        tracing::debug!(%key, queued = queue.len(), "key busy; queued request");
    }

    /// Resolve the request registered under `key`.
    ///
    /// Returns `false` if nothing was registered, leaving `outcome` undelivered.
    pub fn resolve(&mut self, key: &CorrelationKey, outcome: Result<Frame>) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        if entry.reply.send(outcome).is_err() {
            tracing::debug!(%key, id = entry.id, "caller went away before resolution");
        }
        true
    }

    /// Next queued submission for a free `key`, skipping cancelled callers.
    pub fn dequeue(&mut self, key: &CorrelationKey) -> Option<Queued> {
        let queue = self.queues.get_mut(key)?;
        let next = loop {
            match queue.pop_front() {
                Some(queued) if queued.reply.is_closed() => continue,
                other => break other,
            }
        };
        if queue.is_empty() {
            self.queues.remove(key);
        }
        next
    }

    /// Key of the earliest registered request still pending.
    pub fn oldest(&self) -> Option<CorrelationKey> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.order)
            .map(|(key, _)| *key)
    }

    /// Earliest deadline among registered requests.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.deadline).min()
    }

    /// Time out every request whose deadline is at or before `now`.
    ///
    /// Returns the freed keys.
    pub fn expire(&mut self, now: Instant) -> Vec<CorrelationKey> {
        let expired: Vec<CorrelationKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            tracing::debug!(%key, "request timed out");
            self.resolve(
                key,
                Err(ZnpError::Timeout {
                    subsystem: key.subsystem,
                    command: key.command,
                }),
            );
        }
        expired
    }

    /// Drop the submission `id`, wherever it is.
    ///
    /// Returns the key if a registered entry was removed, so the caller can
    /// move that key's queue along.
    pub fn cancel(&mut self, id: RequestId) -> Option<CorrelationKey> {
        let registered = self
            .entries
            .iter()
            .find(|(_, entry)| entry.id == id)
            .map(|(key, _)| *key);
        if let Some(key) = registered {
            self.entries.remove(&key);
            tracing::debug!(%key, id, "cancelled pending request");
            return Some(key);
        }

        for (key, queue) in &mut self.queues {
            if let Some(position) = queue.iter().position(|queued| queued.id == id) {
                queue.remove(position);
                tracing::debug!(%key, id, "cancelled queued request");
                break;
            }
        }
        self.queues.retain(|_, queue| !queue.is_empty());
        None
    }

    /// Resolve everything, registered and queued, with [`ZnpError::Closed`].
    pub fn drain(&mut self) {
        let count = self.entries.len() + self.queued_len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.reply.send(Err(ZnpError::Closed));
        }
        for (_, queue) in self.queues.drain() {
            for queued in queue {
                let _ = queued.reply.send(Err(ZnpError::Closed));
            }
        }
        if count > 0 {
            tracing::debug!(count, "closed outstanding requests");
        }
    }

    /// Number of registered requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of submissions waiting for a busy key.
    pub fn queued_len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}
