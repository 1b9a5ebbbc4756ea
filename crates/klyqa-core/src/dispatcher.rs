//! Discovery / dispatcher loop (C7, §4.7): periodic UDP broadcast,
//! non-blocking TCP accept, per-address task spawning.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::connection::{handle_connection, ConnectionContext};
use crate::error::ConnectionOutcome;

/// Discovery payload the host broadcasts to solicit identity frames
/// (§6 Discovery).
pub const SYN_PAYLOAD: &[u8] = b"QCX-SYN";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub udp_port: u16,
    pub tcp_port: u16,
    pub bind_interface: Option<String>,
    pub discovery_broadcast: bool,
    pub process_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            udp_port: 2222,
            tcp_port: 3333,
            bind_interface: None,
            discovery_broadcast: false,
            process_timeout: Duration::from_secs(600),
        }
    }
}

/// SO_BINDTODEVICE-equivalent pin to a named interface (§4.7 step 1), applied
/// to a freshly created socket before it is bound to an address.
fn bind_to_device(socket: &Socket, cfg: &DispatcherConfig) -> std::io::Result<()> {
    if let Some(iface) = &cfg.bind_interface {
        debug!(interface = %iface, "pinning socket to interface");
        socket.bind_device(Some(iface.as_bytes()))?;
    }
    Ok(())
}

fn bind_udp(cfg: &DispatcherConfig) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    bind_to_device(&socket, cfg)?;
    let addr: SocketAddr = ([0, 0, 0, 0], cfg.udp_port).into();
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

fn bind_tcp(cfg: &DispatcherConfig) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    bind_to_device(&socket, cfg)?;
    let addr: SocketAddr = ([0, 0, 0, 0], cfg.tcp_port).into();
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}

/// Run the dispatcher loop until `shutdown` reports `true`. Aborts every
/// in-flight per-connection task before returning (§4.7, §5: shutdown
/// cancels C7, C8, and every per-connection task) rather than waiting out
/// whatever is left of their `process_timeout`.
pub async fn run(config: DispatcherConfig, ctx: ConnectionContext, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
    let udp = bind_udp(&config)?;
    let tcp = bind_tcp(&config)?;
    let broadcast_addr: SocketAddr = ([255, 255, 255, 255], config.udp_port).into();
    let mut tasks: JoinSet<ConnectionOutcome> = JoinSet::new();
    let syn_interval = Duration::from_millis(500);

    loop {
        if *shutdown.borrow() {
            break;
        }

        if ctx.queue.has_work().await || config.discovery_broadcast {
            if let Err(e) = udp.send_to(SYN_PAYLOAD, broadcast_addr).await {
                warn!(error = %e, "failed to send discovery broadcast");
            }
        }

        let idle = !ctx.queue.has_work().await;
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() { break; }
            }
            accepted = tcp.accept() => {
                handle_accept(accepted, &ctx, &config, &mut tasks).await;
            }
            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                log_task_result(result);
            }
            () = ctx.queue.wait_for_wake(), if idle => {}
            () = sleep(syn_interval), if !idle => {}
        }
    }

    tasks.shutdown().await;
    Ok(())
}

async fn handle_accept(
    accepted: std::io::Result<(tokio::net::TcpStream, SocketAddr)>,
    ctx: &ConnectionContext,
    config: &DispatcherConfig,
    tasks: &mut JoinSet<ConnectionOutcome>,
) {
    let (stream, remote) = match accepted {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "tcp accept failed");
            return;
        }
    };
    if !ctx.current_addresses.try_insert(remote.ip()).await {
        debug!(%remote, "duplicate connection from an already-active address, closing");
        drop(stream);
        return;
    }
    let conn_ctx = ctx.clone();
    let timeout = config.process_timeout;
    tasks.spawn(async move {
        match tokio::time::timeout(timeout, handle_connection(stream, remote, conn_ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => ConnectionOutcome::SocketError("per-process timeout exceeded".to_owned()),
        }
    });
}

fn log_task_result(result: Result<ConnectionOutcome, tokio::task::JoinError>) {
    match result {
        Ok(outcome) => debug!(?outcome, "connection task finished"),
        Err(e) => warn!(error = %e, "connection task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = DispatcherConfig::default();
        assert_eq!(cfg.udp_port, 2222);
        assert_eq!(cfg.tcp_port, 3333);
        assert_eq!(cfg.process_timeout, Duration::from_secs(600));
    }
}
