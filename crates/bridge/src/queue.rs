//! In-memory priority queue for analysis requests. Ordering is strictly
//! `(priority, enqueue sequence)`; at most one queued item exists per uri.

use crate::error::{BridgeError, Result};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use turbo_protocol::{AnalysisResult, Priority};

pub(crate) type Reply = oneshot::Sender<Result<AnalysisResult>>;

pub(crate) struct QueueItem {
    pub uri: String,
    pub content: String,
    pub priority: Priority,
    pub reply: Reply,
    pub seq: u64,
    pub enqueued_at_ms: u64,
}

#[derive(Default)]
pub(crate) struct AnalysisQueue {
    items: Vec<QueueItem>,
    next_seq: u64,
}

impl AnalysisQueue {
    /// Enqueues a request. A queued (not yet dispatched) request for the
    /// same uri is superseded: it is removed and its reply sender is
    /// returned so the caller can fail it.
    pub fn push(
        &mut self,
        uri: &str,
        content: &str,
        priority: Priority,
        reply: Reply,
    ) -> Option<Reply> {
        let superseded = self
            .items
            .iter()
            .position(|item| item.uri == uri)
            .map(|index| self.items.remove(index).reply);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push(QueueItem {
            uri: uri.to_string(),
            content: content.to_string(),
            priority,
            reply,
            seq,
            enqueued_at_ms: now_ms(),
        });
        superseded
    }

    /// Highest-priority item, FIFO within a priority level.
    pub fn pop_best(&mut self) -> Option<QueueItem> {
        let index = self
            .items
            .iter()
            .enumerate()
            .min_by_key(|(_, item)| (item.priority, item.seq))
            .map(|(index, _)| index)?;
        Some(self.items.remove(index))
    }

    pub fn drain_all(&mut self) -> Vec<QueueItem> {
        std::mem::take(&mut self.items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

pub(crate) fn fail(reply: Reply, error: BridgeError) {
    let _ = reply.send(Err(error));
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
