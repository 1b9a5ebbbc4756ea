//! A queued unit of work targeting one device or the broadcast sentinel
//! `"all"` (§3 Message, §4.5).

use std::collections::HashSet;
use std::time::Duration;

use klyqa_protocol::commands::Command;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// Reserved message-queue key for broadcast messages.
pub const BROADCAST_TARGET: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Unsent,
    Sent,
    Answered,
}

/// One command in a Message's ordered list, with its forced flag (§4.4:
/// a failed value-check on a non-forced command drops the whole Message).
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub command: Command,
    pub forced: bool,
}

impl QueuedCommand {
    pub fn new(command: Command) -> Self {
        Self { command, forced: false }
    }

    pub fn forced(command: Command) -> Self {
        Self { command, forced: true }
    }
}

/// Snapshot handed to the caller when a Message reaches a terminal state,
/// decoupled from the live `Message` so the callback can carry it across
/// the channel without borrowing the queue.
#[derive(Debug, Clone)]
pub struct MessageResult {
    pub counter: u64,
    pub target: String,
    pub state: MessageState,
    pub answer_json: Option<serde_json::Value>,
    pub answer_utf8: Option<String>,
}

/// A queued unit of work. Invariants (§3): `commands` is non-empty; `state`
/// only moves forward UNSENT -> SENT -> ANSWERED; the callback fires at
/// most once.
pub struct Message {
    pub counter: u64,
    pub started: Instant,
    pub target: String,
    pub commands: Vec<QueuedCommand>,
    pub ttl: Duration,
    pub sent: Vec<Command>,
    pub answered: Vec<Command>,
    pub state: MessageState,
    pub answer_raw: Option<Vec<u8>>,
    pub answer_utf8: Option<String>,
    pub answer_json: Option<serde_json::Value>,
    pub answered_at: Option<Instant>,
    pub exception: Option<String>,
    /// Unit-ids this broadcast message has already been delivered to.
    /// `Some` only when `target == BROADCAST_TARGET`.
    pub delivered: Option<HashSet<String>>,
    callback: Option<oneshot::Sender<MessageResult>>,
}

impl Message {
    /// `commands` must be non-empty (§3 invariant i).
    pub fn new(
        counter: u64,
        target: String,
        commands: Vec<QueuedCommand>,
        ttl: Duration,
        callback: oneshot::Sender<MessageResult>,
    ) -> Self {
        assert!(!commands.is_empty(), "a Message must carry at least one command");
        let delivered = (target == BROADCAST_TARGET).then(HashSet::new);
        Self {
            counter,
            started: Instant::now(),
            target,
            commands,
            ttl,
            sent: Vec::new(),
            answered: Vec::new(),
            state: MessageState::Unsent,
            answer_raw: None,
            answer_utf8: None,
            answer_json: None,
            answered_at: None,
            exception: None,
            delivered,
            callback: Some(callback),
        }
    }

    /// Has this broadcast message already been delivered to `unit_id`?
    pub fn delivered_to(&self, unit_id: &str) -> bool {
        self.delivered.as_ref().is_some_and(|set| set.contains(unit_id))
    }

    /// Mark `unit_id` as having received this broadcast message.
    pub fn mark_delivered(&mut self, unit_id: &str) {
        if let Some(set) = self.delivered.as_mut() {
            set.insert(unit_id.to_owned());
        }
    }

    /// True while the message's deadline has not yet passed.
    pub fn check_ttl(&self, now: Instant) -> bool {
        now.duration_since(self.started) <= self.ttl
    }

    /// Record a successful decrypted answer and transition to ANSWERED.
    pub fn record_answer(&mut self, raw: Vec<u8>, utf8: String, json: serde_json::Value) {
        self.answer_raw = Some(raw);
        self.answer_utf8 = Some(utf8);
        self.answer_json = Some(json);
        self.state = MessageState::Answered;
        self.answered_at = Some(Instant::now());
    }

    fn snapshot(&self) -> MessageResult {
        MessageResult {
            counter: self.counter,
            target: self.target.clone(),
            state: self.state,
            answer_json: self.answer_json.clone(),
            answer_utf8: self.answer_utf8.clone(),
        }
    }

    /// Fire the callback with the message's current state. A no-op if the
    /// callback already fired (§3 invariant iii) or the receiver was
    /// dropped.
    pub fn call_cb(&mut self) {
        let Some(tx) = self.callback.take() else {
            return;
        };
        if tx.send(self.snapshot()).is_err() {
            debug!(counter = self.counter, "callback receiver dropped before delivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(ttl: Duration) -> (Message, oneshot::Receiver<MessageResult>) {
        let (tx, rx) = oneshot::channel();
        let m = Message::new(1, "abc".into(), vec![QueuedCommand::new(Command::Ping)], ttl, tx);
        (m, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn check_ttl_flips_false_after_deadline() {
        let (m, _rx) = msg(Duration::from_millis(50));
        assert!(m.check_ttl(Instant::now()));
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(!m.check_ttl(Instant::now()));
    }

    #[tokio::test]
    async fn callback_fires_at_most_once() {
        let (mut m, rx) = msg(Duration::from_secs(1));
        m.call_cb();
        m.call_cb();
        let result = rx.await.unwrap();
        assert_eq!(result.counter, 1);
    }

    #[test]
    fn broadcast_message_tracks_delivered_set() {
        let (tx, _rx) = oneshot::channel();
        let mut m = Message::new(
            1,
            BROADCAST_TARGET.into(),
            vec![QueuedCommand::new(Command::Request)],
            Duration::from_secs(5),
            tx,
        );
        assert!(!m.delivered_to("dev-1"));
        m.mark_delivered("dev-1");
        assert!(m.delivered_to("dev-1"));
        assert!(!m.delivered_to("dev-2"));
    }

    #[test]
    fn non_broadcast_message_has_no_delivered_set() {
        let (tx, _rx) = oneshot::channel();
        let m = Message::new(1, "dev-1".into(), vec![QueuedCommand::new(Command::Ping)], Duration::from_secs(5), tx);
        assert!(m.delivered.is_none());
    }
}
