//! Ingest queue: bounded FIFO of accepted events with per-user single flight
//!
//! Durability comes from the event store: the engine persists the event row
//! before admission, and on startup the queue is rehydrated from the store's
//! unprocessed set. The queue itself is the in-memory head pointer.
//!
//! `dequeue` never releases an event for a user who already has one in
//! flight; together with FIFO order this serializes same-user events in
//! enqueue order while different users process in parallel.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::{EngineError, Result};
use crate::models::GameEvent;
use crate::storage::EventStore;

/// A queued event plus its retry counter.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub event: GameEvent,
    pub attempts: u32,
}

#[derive(Debug, Default)]
struct QueueInner {
    items: VecDeque<QueueItem>,
    /// Users with an event currently being processed.
    inflight: HashSet<String>,
    closed: bool,
}

/// Bounded admission queue. See module docs for the dispatch discipline.
#[derive(Debug)]
pub struct IngestQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

impl IngestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Load the store's unprocessed events, in enqueue order. Called once at
    /// startup before workers spawn; rehydration ignores the admission bound.
    pub async fn rehydrate(&self, store: &dyn EventStore) -> Result<usize> {
        let pending = store.unprocessed().await?;
        let count = pending.len();
        let mut inner = self.inner.lock().unwrap();
        for event in pending {
            inner.items.push_back(QueueItem { event, attempts: 0 });
        }
        drop(inner);
        if count > 0 {
            self.notify.notify_waiters();
        }
        Ok(count)
    }

    /// Admit an event. The caller must have persisted it first.
    pub fn enqueue(&self, event: GameEvent) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(EngineError::QueueClosed);
        }
        if inner.items.len() >= self.capacity {
            return Err(EngineError::QueueFull);
        }
        inner.items.push_back(QueueItem { event, attempts: 0 });
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Block until an event for an idle user is available. Returns `None`
    /// once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<QueueItem> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                let QueueInner {
                    items, inflight, ..
                } = &mut *inner;
                if let Some(pos) = items
                    .iter()
                    .position(|item| !inflight.contains(&item.event.user_id))
                {
                    let item = items.remove(pos).expect("position is in range");
                    inflight.insert(item.event.user_id.clone());
                    return Some(item);
                }
                if inner.closed && inner.items.is_empty() {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Release a user's in-flight slot after their event finished (or was
    /// terminally dropped).
    pub fn complete(&self, user_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.inflight.remove(user_id);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Put a transiently failed event back at the head of the line and
    /// release its user slot, preserving per-user order for the retry.
    pub fn requeue(&self, item: QueueItem) {
        let mut inner = self.inner.lock().unwrap();
        inner.inflight.remove(&item.event.user_id);
        inner.items.push_front(item);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Stop admitting; dequeuers drain what is left and then see `None`.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued plus in-flight work, used by shutdown drains and tests.
    pub fn outstanding(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.items.len() + inner.inflight.len()
    }
}
