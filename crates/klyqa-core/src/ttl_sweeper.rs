//! TTL sweeper (C8, §4.8): background task that culls overdue messages.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::debug;

use crate::queue::MessageQueue;

const SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// Run the sweeper until `shutdown` reports `true`.
pub async fn run(queue: Arc<MessageQueue>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() { break; }
            }
            _ = ticker.tick() => {
                let expired = queue.sweep_expired().await;
                if expired > 0 {
                    debug!(expired, "ttl sweep removed overdue messages");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, QueuedCommand};
    use klyqa_protocol::commands::Command;
    use tokio::sync::oneshot;

    #[tokio::test(start_paused = true)]
    async fn sweeper_expires_a_message_with_no_device_present() {
        let queue = Arc::new(MessageQueue::new());
        let (tx, rx) = oneshot::channel();
        let message = Message::new(
            1,
            "deadbeefdeadbeefdead".into(),
            vec![QueuedCommand::new(Command::Ping)],
            Duration::from_millis(10),
            tx,
        );
        queue.enqueue(message).await;

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = tokio::spawn(run(queue.clone(), shutdown_rx));

        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;

        let result = tokio::time::timeout(Duration::from_secs(1), rx).await.unwrap().unwrap();
        assert!(result.answer_json.is_none());
        assert!(!queue.has_work().await);
        sweeper.abort();
    }
}
