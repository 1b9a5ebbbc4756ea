//! Argument parsing for the `klyqa-ctl` binary (§6 ambient CLI surface).
//!
//! Deliberately small: the shipped CLI's full subcommand surface,
//! colorized output, and configuration wizards are out of scope. This
//! just wires commands the façade already exposes.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use klyqa_protocol::commands::{Command as DeviceCommand, PowerStatus};

#[derive(Debug, Parser)]
#[command(name = "klyqa-ctl", version, about = "Local protocol controller for klyqa devices")]
pub struct Cli {
    /// Path to a TOML config file. Defaults to ~/.config/klyqa-ctl/config.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Action,
}

#[derive(Debug, Subcommand)]
pub enum Action {
    /// Broadcast a discovery ping and wait for the TTL to elapse.
    Discover {
        #[arg(long, default_value_t = 3)]
        ttl_secs: u64,
    },
    /// Send a bare ping to one device.
    Ping {
        unit_id: String,
        #[arg(long, default_value_t = 5)]
        ttl_secs: u64,
    },
    /// Turn a light on or off.
    Power {
        unit_id: String,
        #[arg(value_enum)]
        status: PowerArg,
        #[arg(long, default_value_t = 5)]
        ttl_secs: u64,
    },
    /// Set a light's RGB color.
    Color {
        unit_id: String,
        r: u16,
        g: u16,
        b: u16,
        #[arg(long, default_value_t = 0)]
        transition_ms: u32,
        #[arg(long, default_value_t = 5)]
        ttl_secs: u64,
    },
    /// Set a light's brightness percentage (0-100).
    Brightness {
        unit_id: String,
        percentage: u8,
        #[arg(long, default_value_t = 0)]
        transition_ms: u32,
        #[arg(long, default_value_t = 5)]
        ttl_secs: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PowerArg {
    On,
    Off,
}

impl From<PowerArg> for PowerStatus {
    fn from(value: PowerArg) -> Self {
        match value {
            PowerArg::On => PowerStatus::On,
            PowerArg::Off => PowerStatus::Off,
        }
    }
}

impl Action {
    /// Target unit-id for this action, or `"all"` for a fleet-wide discover.
    pub fn target(&self) -> &str {
        match self {
            Action::Discover { .. } => klyqa_core::message::BROADCAST_TARGET,
            Action::Ping { unit_id, .. }
            | Action::Power { unit_id, .. }
            | Action::Color { unit_id, .. }
            | Action::Brightness { unit_id, .. } => unit_id,
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        match self {
            Action::Discover { ttl_secs }
            | Action::Ping { ttl_secs, .. }
            | Action::Power { ttl_secs, .. }
            | Action::Color { ttl_secs, .. }
            | Action::Brightness { ttl_secs, .. } => *ttl_secs,
        }
    }

    /// Render this action to the device command it sends, or `None` for
    /// `Discover`, which goes through `Controller::discover` instead.
    pub fn to_device_command(&self) -> Option<DeviceCommand> {
        match self {
            Action::Discover { .. } => None,
            Action::Ping { .. } => Some(DeviceCommand::Ping),
            Action::Power { status, .. } => Some(DeviceCommand::Power { status: (*status).into() }),
            Action::Color { r, g, b, transition_ms, .. } => Some(DeviceCommand::Color {
                r: *r,
                g: *g,
                b: *b,
                transition_time_ms: *transition_ms,
            }),
            Action::Brightness { percentage, transition_ms, .. } => Some(DeviceCommand::Brightness {
                percentage: *percentage,
                transition_time_ms: *transition_ms,
            }),
        }
    }
}
