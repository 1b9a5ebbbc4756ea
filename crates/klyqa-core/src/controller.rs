//! Controller façade (C9, §4.9): the public entry points callers use.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use klyqa_protocol::commands::Command;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::addresses::CurrentAddresses;
use crate::connection::ConnectionContext;
use crate::dispatcher::{self, DispatcherConfig};
use crate::message::{Message, MessageResult, MessageState, QueuedCommand, BROADCAST_TARGET};
use crate::queue::MessageQueue;
use crate::registry::ControllerData;
use crate::ttl_sweeper;

struct BackgroundTasks {
    dispatcher: JoinHandle<std::io::Result<()>>,
    sweeper: JoinHandle<()>,
}

/// Public façade over the discovery/dispatch/queue machinery. Owns C7 and
/// C8 for its lifetime and exposes `send_message`/`discover`/`shutdown`.
pub struct Controller {
    controller_data: Arc<ControllerData>,
    queue: Arc<MessageQueue>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Option<BackgroundTasks>>,
    counter: AtomicU64,
}

impl Controller {
    /// Start the dispatcher and TTL sweeper and return a ready façade.
    pub fn start(config: DispatcherConfig) -> std::io::Result<Self> {
        let controller_data = Arc::new(ControllerData::new());
        let queue = Arc::new(MessageQueue::new());
        let current_addresses = Arc::new(CurrentAddresses::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ctx = ConnectionContext {
            controller: controller_data.clone(),
            queue: queue.clone(),
            current_addresses,
        };

        let dispatcher_rx = shutdown_rx.clone();
        let dispatcher = tokio::spawn(dispatcher::run(config, ctx, dispatcher_rx));
        let sweeper = tokio::spawn(ttl_sweeper::run(queue.clone(), shutdown_rx));

        Ok(Self {
            controller_data,
            queue,
            shutdown_tx,
            tasks: Mutex::new(Some(BackgroundTasks { dispatcher, sweeper })),
            counter: AtomicU64::new(0),
        })
    }

    pub fn controller_data(&self) -> &Arc<ControllerData> {
        &self.controller_data
    }

    /// Enqueue `commands` for `target_unit_id`, trigger a discovery
    /// broadcast by waking the dispatcher, and await the terminal Message
    /// (answered or TTL-expired).
    pub async fn send_message(&self, commands: Vec<QueuedCommand>, target_unit_id: &str, ttl: Duration) -> MessageResult {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let message = Message::new(counter, target_unit_id.to_owned(), commands, ttl, tx);
        self.queue.enqueue(message).await;
        rx.await.unwrap_or(MessageResult {
            counter,
            target: target_unit_id.to_owned(),
            state: MessageState::Unsent,
            answer_json: None,
            answer_utf8: None,
        })
    }

    /// Enqueue a broadcast ping targeting `"all"` with the given TTL
    /// (§4.9). Fire-and-forget: the caller is not meant to block on every
    /// device's individual answer here.
    pub async fn discover(&self, ttl: Duration) {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let (tx, _rx) = oneshot::channel();
        let message = Message::new(counter, BROADCAST_TARGET.to_owned(), vec![QueuedCommand::new(Command::Ping)], ttl, tx);
        self.queue.enqueue(message).await;
    }

    /// Stop C7 and C8 and await their completion.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(tasks) = self.tasks.lock().await.take() {
            match tasks.dispatcher.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "dispatcher exited with an error"),
                Err(e) => tracing::warn!(error = %e, "dispatcher task panicked"),
            }
            if let Err(e) = tasks.sweeper.await {
                tracing::warn!(error = %e, "ttl sweeper task panicked");
            }
            info!("controller shut down");
        }
    }
}
