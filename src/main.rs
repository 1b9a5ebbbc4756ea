//! `klyqa-ctl`: CLI entry point wiring config load, logging, the cache
//! helper, and the controller façade together (C11, §6 ambient CLI).
//!
//! External collaborators (cloud sync, onboarding, a full-featured shipped
//! CLI) stay out of scope; this binary only drives the local protocol
//! engine directly.

mod cache;
mod cli;
mod config;

use std::time::Duration;

use clap::Parser;
use klyqa_core::message::QueuedCommand;
use klyqa_core::{Controller, DispatcherConfig, MessageState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = cli::Cli::parse();

    let cfg = match config::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };
    info!(udp_port = cfg.udp_port, tcp_port = cfg.tcp_port, data_dir = %cfg.data_dir.display(), "config loaded");

    let (aes_keys, device_configs) = match cache::load(&cfg.data_dir) {
        Ok(caches) => caches,
        Err(e) => {
            eprintln!("FATAL: failed to load caches: {e}");
            std::process::exit(1);
        }
    };

    let dispatcher_config = DispatcherConfig {
        udp_port: cfg.udp_port,
        tcp_port: cfg.tcp_port,
        bind_interface: cfg.bind_interface.clone(),
        discovery_broadcast: cfg.discovery_broadcast,
        process_timeout: Duration::from_secs(cfg.process_timeout_secs),
    };

    let controller = match Controller::start(dispatcher_config) {
        Ok(controller) => controller,
        Err(e) => {
            eprintln!("FATAL: failed to start controller: {e}");
            std::process::exit(1);
        }
    };
    controller.controller_data().load_caches(aes_keys, device_configs).await;
    info!("controller started");

    run_action(&controller, &cli.command).await;

    controller.shutdown().await;
}

async fn run_action(controller: &Controller, action: &cli::Action) {
    let ttl = Duration::from_secs(action.ttl_secs());
    let Some(command) = action.to_device_command() else {
        controller.discover(ttl).await;
        tokio::time::sleep(ttl).await;
        println!("discovery broadcast sent, known devices: {}", controller.controller_data().device_count().await);
        return;
    };

    let result = controller.send_message(vec![QueuedCommand::new(command)], action.target(), ttl).await;
    match result.state {
        MessageState::Answered => {
            let answer = result.answer_json.map(|v| v.to_string()).unwrap_or_default();
            println!("{} answered: {}", result.target, answer);
        }
        MessageState::Sent => println!("{} acknowledged the command but has not answered yet", result.target),
        MessageState::Unsent => {
            eprintln!("{} was never reached before the TTL of {:?} elapsed", result.target, ttl);
            std::process::exit(1);
        }
    }
}
