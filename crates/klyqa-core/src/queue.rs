//! Per-unit-id message queue with a reserved `"all"` broadcast slot (§3
//! Message queue, §4.6, §4.8).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::message::{Message, BROADCAST_TARGET};

/// Shared handle to a queued Message; cheap to clone, so a connection
/// task can hold one across awaits without pinning the whole queue.
pub type MessageHandle = Arc<Mutex<Message>>;

/// Mapping from unit-id string (or `"all"`) to its ordered list of
/// Messages (§3).
#[derive(Default)]
pub struct MessageQueue {
    inner: Mutex<HashMap<String, VecDeque<MessageHandle>>>,
    wake: Notify,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `message` under its target key and wake anyone parked on
    /// [`MessageQueue::wait_for_wake`].
    pub async fn enqueue(&self, message: Message) -> MessageHandle {
        let target = message.target.clone();
        let handle: MessageHandle = Arc::new(Mutex::new(message));
        self.inner.lock().await.entry(target).or_default().push_back(handle.clone());
        self.wake.notify_waiters();
        handle
    }

    pub async fn has_work(&self) -> bool {
        self.inner.lock().await.values().any(|q| !q.is_empty())
    }

    /// Resolves when new work is enqueued; used by the dispatcher's
    /// cancellable idle sleep (§4.7 step 4).
    pub async fn wait_for_wake(&self) {
        self.wake.notified().await;
    }

    /// Pick the next message to serve a connection for `unit_id` (§4.6
    /// CONNECTED, no in-flight message): an undelivered broadcast message
    /// wins, else the head of the per-unit queue.
    pub async fn next_for(&self, unit_id: &str) -> Option<MessageHandle> {
        let guard = self.inner.lock().await;
        if let Some(broadcast_q) = guard.get(BROADCAST_TARGET) {
            for handle in broadcast_q {
                if !handle.lock().await.delivered_to(unit_id) {
                    return Some(handle.clone());
                }
            }
        }
        guard.get(unit_id).and_then(|q| q.front().cloned())
    }

    /// Remove `handle` from its queue, deleting the slot if it becomes
    /// empty (§4.8).
    pub async fn remove(&self, handle: &MessageHandle) {
        let target = handle.lock().await.target.clone();
        let mut guard = self.inner.lock().await;
        if let Some(q) = guard.get_mut(&target) {
            q.retain(|h| !Arc::ptr_eq(h, handle));
            if q.is_empty() {
                guard.remove(&target);
            }
        }
    }

    /// Expire and remove every message whose TTL has passed, firing each
    /// one's callback exactly once with a null answer (C8). Safe to call
    /// concurrently with C6 answering the same messages: `call_cb` is a
    /// no-op after the first call, and removal only touches the queue
    /// entry, not an in-flight connection's borrowed handle.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<MessageHandle> = {
            let guard = self.inner.lock().await;
            let mut found = Vec::new();
            for q in guard.values() {
                for handle in q {
                    if !handle.lock().await.check_ttl(now) {
                        found.push(handle.clone());
                    }
                }
            }
            found
        };
        for handle in &expired {
            handle.lock().await.call_cb();
            self.remove(handle).await;
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::QueuedCommand;
    use klyqa_protocol::commands::Command;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn message(target: &str, ttl: Duration) -> (Message, oneshot::Receiver<crate::message::MessageResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Message::new(1, target.to_owned(), vec![QueuedCommand::new(Command::Ping)], ttl, tx),
            rx,
        )
    }

    #[tokio::test]
    async fn broadcast_message_picked_for_each_undelivered_unit_id() {
        let queue = MessageQueue::new();
        let (m, _rx) = message(BROADCAST_TARGET, Duration::from_secs(5));
        queue.enqueue(m).await;

        let picked = queue.next_for("dev-1").await.expect("broadcast message should be picked");
        picked.lock().await.mark_delivered("dev-1");

        let picked_again = queue.next_for("dev-1").await;
        assert!(picked_again.is_none(), "already-delivered broadcast should not be picked again");

        let picked_for_other = queue.next_for("dev-2").await;
        assert!(picked_for_other.is_some());
    }

    #[tokio::test]
    async fn per_unit_queue_serves_head_first() {
        let queue = MessageQueue::new();
        let (m1, _r1) = message("dev-1", Duration::from_secs(5));
        let (m2, _r2) = message("dev-1", Duration::from_secs(5));
        let h1 = queue.enqueue(m1).await;
        queue.enqueue(m2).await;

        let picked = queue.next_for("dev-1").await.unwrap();
        assert!(Arc::ptr_eq(&picked, &h1));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_expired_fires_callback_and_removes_empty_slot() {
        let queue = MessageQueue::new();
        let (m, rx) = message("dev-1", Duration::from_millis(10));
        queue.enqueue(m).await;

        tokio::time::advance(Duration::from_millis(20)).await;
        let expired = queue.sweep_expired().await;
        assert_eq!(expired, 1);

        let result = rx.await.unwrap();
        assert!(result.answer_json.is_none());
        assert!(!queue.has_work().await);
    }
}
