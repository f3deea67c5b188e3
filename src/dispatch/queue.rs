//! Priority dispatch queue.
//!
//! Pending recrawl jobs are ordered by (priority rank, admission sequence):
//! critical before high before normal before low, FIFO within a rank.
//!
//! Entries with a future `not_before` wait in a second heap ordered by
//! eligibility time and are promoted into the ready heap once eligible, so a
//! deferred entry never blocks ready entries behind it and is never handed out
//! early. Consumers suspend on a [`Notify`] while nothing is ready; `admit`
//! and `close` wake them.

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

use super::types::Priority;
use crate::types::{Error, JobGroupId, JobId, Result, TenantId};

/// A batch of urls to admit with shared attributes.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub urls: Vec<String>,
    pub priority: Priority,
    pub group_id: JobGroupId,
    pub tenant_id: Option<TenantId>,
    pub not_before: Option<DateTime<Utc>>,
}

/// One pending job, consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub url: String,
    pub priority: Priority,
    pub group_id: JobGroupId,
    pub tenant_id: Option<TenantId>,
    pub not_before: Option<DateTime<Utc>>,
    pub enqueued_at: DateTime<Utc>,
    /// Logical enqueue timestamp, assigned on admission.
    seq: u64,
}

impl QueueEntry {
    /// Whether the entry may be dispatched at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.not_before.map_or(true, |nb| nb <= now)
    }

    fn dispatch_key(&self) -> (u8, u64) {
        (self.priority.rank(), self.seq)
    }
}

/// Ready heap item (wraps for min-heap behavior on the dispatch key).
#[derive(Debug)]
struct ReadyItem(QueueEntry);

impl Ord for ReadyItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is max-heap, so reverse
        other.0.dispatch_key().cmp(&self.0.dispatch_key())
    }
}

impl PartialOrd for ReadyItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ReadyItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReadyItem {}

/// Deferred heap item, earliest `not_before` on top.
#[derive(Debug)]
struct DeferredItem(QueueEntry);

impl Ord for DeferredItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .not_before
            .cmp(&self.0.not_before)
            .then_with(|| other.0.dispatch_key().cmp(&self.0.dispatch_key()))
    }
}

impl PartialOrd for DeferredItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DeferredItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DeferredItem {}

#[derive(Debug, Default)]
struct QueueState {
    ready: BinaryHeap<ReadyItem>,
    deferred: BinaryHeap<DeferredItem>,
    next_seq: u64,
    closed: bool,
}

impl QueueState {
    /// Move every deferred entry that became eligible into the ready heap.
    fn promote(&mut self, now: DateTime<Utc>) {
        while self
            .deferred
            .peek()
            .is_some_and(|item| item.0.is_eligible(now))
        {
            if let Some(DeferredItem(entry)) = self.deferred.pop() {
                self.ready.push(ReadyItem(entry));
            }
        }
    }

    fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.deferred.peek().and_then(|item| item.0.not_before)
    }
}

/// Delay-aware priority queue shared by submitters and the worker pool.
#[derive(Debug, Default)]
pub struct PriorityDispatchQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl PriorityDispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assign one job id per url, in input order, without making anything visible.
    pub fn stage(&self, request: &EnqueueRequest) -> Vec<QueueEntry> {
        let now = Utc::now();
        request
            .urls
            .iter()
            .map(|url| QueueEntry {
                job_id: JobId::new(),
                url: url.clone(),
                priority: request.priority,
                group_id: request.group_id.clone(),
                tenant_id: request.tenant_id.clone(),
                not_before: request.not_before,
                enqueued_at: now,
                seq: 0,
            })
            .collect()
    }

    /// Make staged entries visible to consumers, all at once.
    pub fn admit(&self, entries: Vec<QueueEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let count = entries.len();
        {
            let mut state = self.lock();
            if state.closed {
                return Err(Error::cancelled("dispatch queue is closed"));
            }
            let now = Utc::now();
            for mut entry in entries {
                entry.seq = state.next_seq;
                state.next_seq += 1;
                if entry.is_eligible(now) {
                    state.ready.push(ReadyItem(entry));
                } else {
                    state.deferred.push(DeferredItem(entry));
                }
            }
        }
        tracing::debug!(count, "queue_entries_admitted");
        self.notify.notify_waiters();
        Ok(())
    }

    /// Stage and admit a batch, returning job ids in url order.
    pub fn enqueue(&self, request: EnqueueRequest) -> Result<Vec<JobId>> {
        let entries = self.stage(&request);
        let job_ids = entries.iter().map(|e| e.job_id.clone()).collect();
        self.admit(entries)?;
        Ok(job_ids)
    }

    /// Pop the next ready entry without waiting.
    pub fn try_next(&self) -> Option<QueueEntry> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.promote(Utc::now());
        state.ready.pop().map(|ReadyItem(entry)| entry)
    }

    /// Wait for the next ready entry. Returns `None` once the queue is closed.
    pub async fn next(&self) -> Option<QueueEntry> {
        loop {
            // Register interest before inspecting state so a concurrent
            // admit/close between the check and the wait is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                state.promote(Utc::now());
                if let Some(ReadyItem(entry)) = state.ready.pop() {
                    return Some(entry);
                }
                state.next_deadline()
            };

            match deadline {
                Some(at) => {
                    let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Ready entries as a stream; ends when the queue is closed.
    pub fn consume(&self) -> impl Stream<Item = QueueEntry> + '_ {
        stream::unfold(self, |queue| async move {
            queue.next().await.map(|entry| (entry, queue))
        })
    }

    /// Stop admitting and wake every waiting consumer. Pending entries stay
    /// until [`drain`](Self::drain).
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Remove and return every remaining entry in dispatch order.
    pub fn drain(&self) -> Vec<QueueEntry> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let mut entries: Vec<QueueEntry> = state
            .ready
            .drain()
            .map(|ReadyItem(e)| e)
            .chain(state.deferred.drain().map(|DeferredItem(e)| e))
            .collect();
        entries.sort_by_key(QueueEntry::dispatch_key);
        entries
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        let state = self.lock();
        state.ready.len() + state.deferred.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn deferred_len(&self) -> usize {
        self.lock().deferred.len()
    }
}
