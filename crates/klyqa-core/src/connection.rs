//! Per-socket state machine: WAIT_IV -> CONNECTED -> terminal (§4.6).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use klyqa_protocol::aes_session::{AesKey, AesSession, Iv};
use klyqa_protocol::device_config::DeviceConfig;
use klyqa_protocol::frame::{self, Frame, FrameParser, FrameType};
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::addresses::CurrentAddresses;
use crate::device::Device;
use crate::error::ConnectionOutcome;
use crate::queue::{MessageHandle, MessageQueue};
use crate::registry::ControllerData;

/// Read deadline for a single handshake frame; the overall connection is
/// still bounded by the dispatcher's per-process timeout (§4.7, §5), so
/// this only guards against a peer that stops sending mid-frame.
const HANDSHAKE_READ_TIMEOUT: Duration = Duration::from_secs(1);
/// Read deadline while waiting for a type-2 answer after sending a
/// message.
const ANSWER_READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(serde::Deserialize)]
struct IdentBody {
    ident: IdentFields,
}

#[derive(serde::Deserialize)]
struct IdentFields {
    unit_id: String,
    product_id: String,
    fw_version: Option<String>,
    hw_version: Option<String>,
}

/// Shared dependencies every connection task needs (§9: "expose it as an
/// explicit object passed to constructors").
#[derive(Clone)]
pub struct ConnectionContext {
    pub controller: Arc<ControllerData>,
    pub queue: Arc<MessageQueue>,
    pub current_addresses: Arc<CurrentAddresses>,
}

/// Drive one accepted TCP connection to completion and report its
/// terminal outcome (§4.6). Every exit path releases the device use-lock
/// (if held by this task) and removes the remote IP from the current
/// addresses set before returning.
pub async fn handle_connection(mut stream: TcpStream, remote: SocketAddr, ctx: ConnectionContext) -> ConnectionOutcome {
    let owner = remote.to_string();
    let mut device: Option<Arc<Device>> = None;
    let mut in_flight: Option<MessageHandle> = None;
    let mut parser = FrameParser::new();

    let outcome = drive(&mut stream, &ctx, &owner, &mut parser, &mut device, &mut in_flight).await;

    if let Some(d) = &device {
        d.use_lock.release(&owner).await;
    }
    ctx.current_addresses.remove(&remote.ip()).await;

    // Unexpected exits (not a clean close/answer/sent) leave no caller
    // hanging: the selected message, if any, is dropped with a null
    // answer (§4.6 "every exit path").
    if !matches!(
        outcome,
        ConnectionOutcome::NoError | ConnectionOutcome::Answered | ConnectionOutcome::Sent | ConnectionOutcome::NoMessageToSend
    ) {
        if let Some(handle) = in_flight.take() {
            handle.lock().await.call_cb();
            ctx.queue.remove(&handle).await;
        }
    }

    match outcome.log_level() {
        tracing::Level::ERROR => error!(?outcome, %remote, "connection finished"),
        tracing::Level::WARN => warn!(?outcome, %remote, "connection finished"),
        tracing::Level::INFO => info!(?outcome, %remote, "connection finished"),
        _ => debug!(?outcome, %remote, "connection finished"),
    }
    outcome
}

async fn drive(
    stream: &mut TcpStream,
    ctx: &ConnectionContext,
    owner: &str,
    parser: &mut FrameParser,
    device_out: &mut Option<Arc<Device>>,
    in_flight_out: &mut Option<MessageHandle>,
) -> ConnectionOutcome {
    let frame = match read_frame(stream, parser, HANDSHAKE_READ_TIMEOUT, ConnectionOutcome::NoUnitId).await {
        Ok(f) => f,
        Err(outcome) => return outcome,
    };
    if frame.frame_type != FrameType::Identity {
        return ConnectionOutcome::NoUnitId;
    }
    let ident: IdentBody = match std::str::from_utf8(&frame.payload).ok().and_then(|s| serde_json::from_str(s).ok()) {
        Some(v) => v,
        None => return ConnectionOutcome::NoUnitId,
    };

    let device = ctx.controller.get_or_create(&ident.ident.unit_id, &ident.ident.product_id).await;
    device.set_versions(ident.ident.fw_version, ident.ident.hw_version).await;
    *device_out = Some(device.clone());

    if device.use_lock.acquire(owner).await.is_err() {
        return ConnectionOutcome::DeviceLockTimeout;
    }

    if ctx.queue.next_for(&device.unit_id).await.is_none() {
        return ConnectionOutcome::NoMessageToSend;
    }

    // Key resolution order (§4.6): the "all" entry wins over a per-unit
    // key; there is no device-key fallback in this implementation.
    let key = ctx.controller.aes_key_for(&device.unit_id).await;

    let mut local_iv: Iv = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut local_iv);
    if let Err(e) = stream.write_all(&frame::emit(&local_iv, FrameType::InitialVector)).await {
        return ConnectionOutcome::SocketError(e.to_string());
    }

    let iv_frame = match read_frame(stream, parser, HANDSHAKE_READ_TIMEOUT, ConnectionOutcome::SocketError("bad iv frame".into())).await {
        Ok(f) => f,
        Err(outcome) => return outcome,
    };
    if iv_frame.frame_type != FrameType::InitialVector || iv_frame.payload.len() != 8 {
        return ConnectionOutcome::SocketError("malformed initial-vector frame".into());
    }
    let Some(key) = key else {
        return ConnectionOutcome::MissingAesKey;
    };
    let mut remote_iv = [0u8; 8];
    remote_iv.copy_from_slice(&iv_frame.payload);
    let mut session = AesSession::new(&key, &local_iv, &remote_iv);

    run_connected(stream, ctx, parser, &device, &mut session, in_flight_out).await
}

async fn run_connected(
    stream: &mut TcpStream,
    ctx: &ConnectionContext,
    parser: &mut FrameParser,
    device: &Arc<Device>,
    session: &mut AesSession,
    in_flight_out: &mut Option<MessageHandle>,
) -> ConnectionOutcome {
    let Some(handle) = ctx.queue.next_for(&device.unit_id).await else {
        return ConnectionOutcome::NoMessageToSend;
    };

    let is_broadcast = {
        let mut msg = handle.lock().await;
        let broadcast = msg.delivered.is_some();
        if broadcast {
            msg.mark_delivered(&device.unit_id);
        }
        broadcast
    };

    let cfg = device.device_config().await.unwrap_or_else(|| DeviceConfig {
        product_id: String::new(),
        color_range: None,
        brightness_range: None,
        temperature_range: None,
        compatible_scenes: HashSet::new(),
        supports_rgb: true,
    });

    let commands = handle.lock().await.commands.clone();
    for queued in &commands {
        if let Err(e) = queued.command.check(&cfg) {
            if !queued.forced {
                warn!(unit_id = %device.unit_id, error = %e, "value check failed, dropping message");
                let mut msg = handle.lock().await;
                msg.call_cb();
                drop(msg);
                ctx.queue.remove(&handle).await;
                return ConnectionOutcome::NoMessageToSend;
            }
        }
    }

    *in_flight_out = Some(handle.clone());
    for (idx, queued) in commands.iter().enumerate() {
        let ciphertext = session.encrypt_sending(&queued.command.to_json());
        if let Err(e) = stream.write_all(&frame::emit(&ciphertext, FrameType::Data)).await {
            return ConnectionOutcome::SocketError(e.to_string());
        }
        {
            let mut msg = handle.lock().await;
            msg.sent.push(queued.command.clone());
            msg.state = crate::message::MessageState::Sent;
        }
        if idx + 1 < commands.len() {
            if let Some(pause_ms) = queued.command.pause_after_ms() {
                sleep(Duration::from_millis(pause_ms)).await;
            }
        }
    }

    let answer_frame = match read_frame(stream, parser, ANSWER_READ_TIMEOUT, ConnectionOutcome::ResponseError).await {
        Ok(f) => f,
        Err(_) => return ConnectionOutcome::Sent,
    };
    if answer_frame.frame_type != FrameType::Data {
        return ConnectionOutcome::ResponseError;
    }
    let plain = match session.decrypt_receiving(&answer_frame.payload) {
        Ok(p) => p,
        Err(_) => return ConnectionOutcome::ResponseError,
    };
    let json: serde_json::Value = match serde_json::from_str(&plain) {
        Ok(v) => v,
        Err(_) => return ConnectionOutcome::ResponseError,
    };

    device.apply_status(&json).await;
    {
        let mut msg = handle.lock().await;
        msg.answered.extend(commands.iter().map(|c| c.command.clone()));
        msg.record_answer(plain.clone().into_bytes(), plain, json);
        msg.call_cb();
    }
    in_flight_out.take();

    // §3 invariant iv removes an answered Message from its queue. A
    // broadcast message has no fixed device count to compare against (one
    // can answer before the others have even connected), so it is never
    // early-removed by a delivered-count check: it stays queued until its
    // TTL expires, the same way the per-device sweep in `ttl_sweeper.rs`
    // removes it, giving every device that connects within the TTL a
    // chance to receive it regardless of answer order.
    if !is_broadcast {
        ctx.queue.remove(&handle).await;
    }

    ConnectionOutcome::Answered
}

async fn read_frame(
    stream: &mut TcpStream,
    parser: &mut FrameParser,
    deadline: Duration,
    on_unknown_type: ConnectionOutcome,
) -> Result<Frame, ConnectionOutcome> {
    loop {
        match parser.next_frame() {
            Ok(Some(frame)) => return Ok(frame),
            Ok(None) => {}
            Err(_) => return Err(on_unknown_type),
        }
        let mut buf = [0u8; 4096];
        let read = tokio::time::timeout(deadline, stream.read(&mut buf))
            .await
            .map_err(|_| ConnectionOutcome::SocketError("read timed out".to_owned()))?
            .map_err(ConnectionOutcome::from)?;
        if read == 0 {
            return Err(ConnectionOutcome::SocketError("peer closed connection".to_owned()));
        }
        parser.feed(&buf[..read]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, QueuedCommand};
    use crate::queue::MessageQueue;
    use klyqa_protocol::commands::Command;
    use klyqa_test_utils::{VirtualDevice, VirtualDeviceIdentity};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn ctx() -> ConnectionContext {
        ConnectionContext {
            controller: Arc::new(ControllerData::new()),
            queue: Arc::new(MessageQueue::new()),
            current_addresses: Arc::new(CurrentAddresses::new()),
        }
    }

    #[tokio::test]
    async fn discovery_with_no_queued_message_ends_no_message_to_send() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = ctx();

        let identity = VirtualDeviceIdentity::light("29daa5a4439969f57934");
        let device_task = tokio::spawn(async move {
            let mut device = VirtualDevice::connect(addr, &identity).await.unwrap();
            // No IV frame will arrive because the host has nothing queued.
            let err = tokio::time::timeout(Duration::from_millis(300), device.complete_handshake(&[0u8; 16])).await;
            assert!(err.is_err() || err.unwrap().is_err());
        });

        let (stream, remote) = listener.accept().await.unwrap();
        let outcome = handle_connection(stream, remote, ctx).await;
        assert_eq!(outcome, ConnectionOutcome::NoMessageToSend);
        device_task.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_identity_ends_no_unit_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = ctx();

        tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(&frame::emit(b"not-json", FrameType::Identity))
                .await
                .unwrap();
        });

        let (stream, remote) = listener.accept().await.unwrap();
        let outcome = handle_connection(stream, remote, ctx.clone()).await;
        assert_eq!(outcome, ConnectionOutcome::NoUnitId);
        assert_eq!(ctx.controller.device_count().await, 0);
    }

    #[tokio::test]
    async fn queued_color_command_is_answered() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = ctx();
        let unit_id = "00ac629de9ad2f4409dc";
        let key = [7u8; 16];
        ctx.controller.set_aes_key(unit_id, key).await;

        let (tx, rx) = oneshot::channel();
        let command = Command::Color { r: 2, g: 22, b: 222, transition_time_ms: 0 };
        let message = Message::new(1, unit_id.to_owned(), vec![QueuedCommand::new(command)], Duration::from_secs(5), tx);
        ctx.queue.enqueue(message).await;

        let identity = VirtualDeviceIdentity::light(unit_id);
        let device_task = tokio::spawn(async move {
            let mut device = VirtualDevice::connect(addr, &identity).await.unwrap();
            device.complete_handshake(&key).await.unwrap();
            let cmd = device.recv_command().await.unwrap();
            assert_eq!(cmd["color"]["red"], 2);
            device
                .send_answer(&serde_json::json!({"type": "response", "color": {"red": 2, "green": 22, "blue": 222}}))
                .await
                .unwrap();
        });

        let (stream, remote) = listener.accept().await.unwrap();
        let outcome = handle_connection(stream, remote, ctx).await;
        assert_eq!(outcome, ConnectionOutcome::Answered);
        device_task.await.unwrap();

        let result = rx.await.unwrap();
        assert_eq!(result.state, crate::message::MessageState::Answered);
        assert_eq!(result.answer_json.unwrap()["color"]["red"], 2);
    }
}
