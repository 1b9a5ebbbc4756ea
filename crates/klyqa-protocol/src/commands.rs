//! Typed commands, their JSON wire form, and the value-checks device-config
//! ranges impose on them (§4.4).

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::device_config::DeviceConfig;
use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerStatus {
    On,
    Off,
}

impl PowerStatus {
    fn wire(self) -> &'static str {
        match self {
            PowerStatus::On => "on",
            PowerStatus::Off => "off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalMode {
    Off,
    Udp,
    E131,
    Tpm2,
}

impl ExternalMode {
    fn wire(self) -> &'static str {
        match self {
            ExternalMode::Off => "EXT_OFF",
            ExternalMode::Udp => "EXT_UDP",
            ExternalMode::E131 => "EXT_E131",
            ExternalMode::Tpm2 => "EXT_TPM2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutineAction {
    List,
    Count,
    Put {
        id: String,
        scene: Option<u32>,
        commands: Vec<String>,
    },
    Start {
        id: String,
    },
    Delete {
        id: String,
    },
}

/// 1-based per §4.4; declaration order matches the wire enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkingMode {
    Standby = 1,
    Random = 2,
    Smart = 3,
    WallFollow = 4,
    Mop = 5,
    Spiral = 6,
    PartialBow = 7,
    Sroom = 8,
    ChargeGo = 9,
}

impl WorkingMode {
    fn wire(self) -> &'static str {
        match self {
            WorkingMode::Standby => "STANDBY",
            WorkingMode::Random => "RANDOM",
            WorkingMode::Smart => "SMART",
            WorkingMode::WallFollow => "WALL_FOLLOW",
            WorkingMode::Mop => "MOP",
            WorkingMode::Spiral => "SPIRAL",
            WorkingMode::PartialBow => "PARTIAL_BOW",
            WorkingMode::Sroom => "SROOM",
            WorkingMode::ChargeGo => "CHARGE_GO",
        }
    }
}

/// Wire value is `index - 1` (§4.4): `Null` encodes as `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Suction {
    Null = 1,
    Strong = 2,
    Small = 3,
    Normal = 4,
    Max = 5,
}

impl Suction {
    fn wire(self) -> u8 {
        self as u8 - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaterLevel {
    Low,
    Mid,
    High,
}

impl WaterLevel {
    fn wire(self) -> &'static str {
        match self {
            WaterLevel::Low => "LOW",
            WaterLevel::Mid => "MID",
            WaterLevel::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forwards,
    Backwards,
    TurnLeft,
    TurnRight,
    Stop,
}

impl Direction {
    fn wire(self) -> &'static str {
        match self {
            Direction::Forwards => "FORWARDS",
            Direction::Backwards => "BACKWARDS",
            Direction::TurnLeft => "TURN_LEFT",
            Direction::TurnRight => "TURN_RIGHT",
            Direction::Stop => "STOP",
        }
    }
}

/// A field name a `request {action: get|reset}` vacuum command can carry.
/// Present-and-null in the JSON means "query/reset this field".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VacuumField {
    Power,
    Cleaning,
    Beeping,
    Battery,
    Sidebrush,
    Rollingbrush,
    Filter,
    Carpetbooster,
    Area,
    Time,
    Calibrationtime,
    Workingmode,
    Workingstatus,
    Suction,
    Water,
    Direction,
    Errors,
    Cleaningrec,
    Equipmentmodel,
    Alarmmessages,
    Commissioninfo,
    Mcu,
}

impl VacuumField {
    fn key(self) -> &'static str {
        match self {
            VacuumField::Power => "power",
            VacuumField::Cleaning => "cleaning",
            VacuumField::Beeping => "beeping",
            VacuumField::Battery => "battery",
            VacuumField::Sidebrush => "sidebrush",
            VacuumField::Rollingbrush => "rollingbrush",
            VacuumField::Filter => "filter",
            VacuumField::Carpetbooster => "carpetbooster",
            VacuumField::Area => "area",
            VacuumField::Time => "time",
            VacuumField::Calibrationtime => "calibrationtime",
            VacuumField::Workingmode => "workingmode",
            VacuumField::Workingstatus => "workingstatus",
            VacuumField::Suction => "suction",
            VacuumField::Water => "water",
            VacuumField::Direction => "direction",
            VacuumField::Errors => "errors",
            VacuumField::Cleaningrec => "cleaningrec",
            VacuumField::Equipmentmodel => "equipmentmodel",
            VacuumField::Alarmmessages => "alarmmessages",
            VacuumField::Commissioninfo => "commissioninfo",
            VacuumField::Mcu => "mcu",
        }
    }
}

/// A single `request {action: set, ...}` field/value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VacuumSetField {
    Power(bool),
    Cleaning(bool),
    Beeping(bool),
    CarpetBooster(bool),
    WorkingMode(WorkingMode),
    Suction(Suction),
    Water(WaterLevel),
    Direction(Direction),
}

impl VacuumSetField {
    fn key_value(&self) -> (&'static str, serde_json::Value) {
        match self {
            VacuumSetField::Power(v) => ("power", json!(v)),
            VacuumSetField::Cleaning(v) => ("cleaning", json!(v)),
            VacuumSetField::Beeping(v) => ("beeping", json!(v)),
            VacuumSetField::CarpetBooster(v) => ("carpetbooster", json!(v)),
            VacuumSetField::WorkingMode(v) => ("workingmode", json!(v.wire())),
            VacuumSetField::Suction(v) => ("suction", json!(v.wire())),
            VacuumSetField::Water(v) => ("water", json!(v.wire())),
            VacuumSetField::Direction(v) => ("direction", json!(v.wire())),
        }
    }
}

/// Every command the local protocol can send, light and vacuum alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Ping,
    Request,
    Reboot,
    FactoryReset,
    FwUpdate {
        url: String,
    },
    Backend {
        link_enabled: bool,
    },
    Power {
        status: PowerStatus,
    },
    Color {
        r: u16,
        g: u16,
        b: u16,
        transition_time_ms: u32,
    },
    PercentColor {
        r: u16,
        g: u16,
        b: u16,
        warm: u16,
        cold: u16,
        transition_time_ms: u32,
    },
    Temperature {
        kelvin: u32,
        transition_time_ms: u32,
    },
    Brightness {
        percentage: u8,
        transition_time_ms: u32,
    },
    External {
        mode: ExternalMode,
        port: u16,
        channel: u8,
    },
    Fade {
        fade_in_ms: u32,
        fade_out_ms: u32,
    },
    Routine(RoutineAction),
    /// Scene activation, value-checked against the device's compatible
    /// scene catalog (§4.4).
    Scene {
        scene_id: u32,
        rgb: bool,
    },
    VacuumGet(Vec<VacuumField>),
    VacuumSet(Vec<VacuumSetField>),
    VacuumReset(Vec<VacuumField>),
    VacuumProductInfo,
}

impl Command {
    /// Render the command to its wire JSON string.
    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    fn to_value(&self) -> serde_json::Value {
        match self {
            Command::Ping => json!({"type": "ping"}),
            Command::Request => json!({"type": "request"}),
            Command::Reboot => json!({"type": "reboot"}),
            Command::FactoryReset => json!({"type": "factory_reset"}),
            Command::FwUpdate { url } => json!({"type": "fw_update", "url": url}),
            Command::Backend { link_enabled } => {
                json!({"type": "backend", "link_enabled": link_enabled})
            }
            Command::Power { status } => json!({"type": "request", "power": status.wire()}),
            Command::Color {
                r,
                g,
                b,
                transition_time_ms,
            } => json!({
                "type": "request",
                "color": {"red": r, "green": g, "blue": b},
                "transitionTime": transition_time_ms,
            }),
            Command::PercentColor {
                r,
                g,
                b,
                warm,
                cold,
                transition_time_ms,
            } => json!({
                "type": "request",
                "p_color": {"red": r, "green": g, "blue": b, "warm": warm, "cold": cold},
                "transitionTime": transition_time_ms,
            }),
            Command::Temperature {
                kelvin,
                transition_time_ms,
            } => json!({
                "type": "request",
                "temperature": kelvin,
                "transitionTime": transition_time_ms,
            }),
            Command::Brightness {
                percentage,
                transition_time_ms,
            } => json!({
                "type": "request",
                "brightness": {"percentage": percentage},
                "transitionTime": transition_time_ms,
            }),
            Command::External {
                mode,
                port,
                channel,
            } => json!({
                "type": "external",
                "mode": mode.wire(),
                "port": port,
                "channel": channel,
            }),
            Command::Fade {
                fade_in_ms,
                fade_out_ms,
            } => json!({"type": "fade", "fade_in": fade_in_ms, "fade_out": fade_out_ms}),
            Command::Routine(action) => routine_value(action),
            Command::Scene { scene_id, .. } => json!({"type": "request", "scene": scene_id}),
            Command::VacuumGet(fields) => {
                let mut obj = json!({"type": "request", "action": "get"});
                let map = obj.as_object_mut().unwrap();
                for f in fields {
                    map.insert(f.key().to_owned(), serde_json::Value::Null);
                }
                obj
            }
            Command::VacuumSet(fields) => {
                let mut obj = json!({"type": "request", "action": "set"});
                let map = obj.as_object_mut().unwrap();
                for f in fields {
                    let (k, v) = f.key_value();
                    map.insert(k.to_owned(), v);
                }
                obj
            }
            Command::VacuumReset(fields) => {
                let mut obj = json!({"type": "request", "action": "reset"});
                let map = obj.as_object_mut().unwrap();
                for f in fields {
                    map.insert(f.key().to_owned(), serde_json::Value::Null);
                }
                obj
            }
            Command::VacuumProductInfo => json!({"type": "request", "action": "productinfo"}),
        }
    }

    /// Milliseconds to wait after sending this command before the next one
    /// in the same Message is written, for commands that declare a
    /// transition time (§4.4, §4.6).
    pub fn pause_after_ms(&self) -> Option<u64> {
        match self {
            Command::Color {
                transition_time_ms,
                ..
            }
            | Command::PercentColor {
                transition_time_ms,
                ..
            }
            | Command::Temperature {
                transition_time_ms,
                ..
            }
            | Command::Brightness {
                transition_time_ms,
                ..
            } => Some(*transition_time_ms as u64),
            _ => None,
        }
    }

    /// Validate the command's values against the target device's
    /// device-config, per §4.4. Commands with no applicable check always
    /// pass.
    pub fn check(&self, cfg: &DeviceConfig) -> Result<(), ProtocolError> {
        match self {
            Command::Color { r, g, b, .. } => {
                let range = cfg.color_range();
                for (field, value) in [("red", *r), ("green", *g), ("blue", *b)] {
                    check_range(field, value as i64, range)?;
                }
                Ok(())
            }
            Command::PercentColor {
                r, g, b, warm, cold, ..
            } => {
                let range = cfg.color_range();
                for (field, value) in
                    [("red", *r), ("green", *g), ("blue", *b), ("warm", *warm), ("cold", *cold)]
                {
                    check_range(field, value as i64, range)?;
                }
                Ok(())
            }
            Command::Brightness { percentage, .. } => {
                check_range("percentage", *percentage as i64, cfg.brightness_range())
            }
            Command::Temperature { kelvin, .. } => {
                check_range("temperature", *kelvin as i64, cfg.temperature_range())
            }
            Command::Scene { scene_id, rgb } => {
                if cfg.scene_allowed(*scene_id, *rgb) {
                    Ok(())
                } else {
                    Err(ProtocolError::IncompatibleScene(*scene_id))
                }
            }
            _ => Ok(()),
        }
    }
}

fn check_range(field: &'static str, value: i64, range: crate::device_config::Range) -> Result<(), ProtocolError> {
    if range.contains(value) {
        Ok(())
    } else {
        Err(ProtocolError::OutOfRange {
            field,
            value,
            min: range.min,
            max: range.max,
        })
    }
}

fn routine_value(action: &RoutineAction) -> serde_json::Value {
    match action {
        RoutineAction::List => json!({"type": "routine", "action": "list"}),
        RoutineAction::Count => json!({"type": "routine", "action": "count"}),
        RoutineAction::Put { id, scene, commands } => {
            json!({"type": "routine", "action": "put", "id": id, "scene": scene, "commands": commands})
        }
        RoutineAction::Start { id } => json!({"type": "routine", "action": "start", "id": id}),
        RoutineAction::Delete { id } => json!({"type": "routine", "action": "delete", "id": id}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_config::{DeviceConfig, Range};
    use std::collections::HashSet;

    fn cfg() -> DeviceConfig {
        DeviceConfig {
            product_id: "@klyqa.lighting.rgb-cw-ww.e27".into(),
            color_range: None,
            brightness_range: None,
            temperature_range: Some(Range::new(2000, 6500)),
            compatible_scenes: HashSet::new(),
            supports_rgb: true,
        }
    }

    #[test]
    fn color_command_serializes_to_spec_shape() {
        let cmd = Command::Color {
            r: 2,
            g: 22,
            b: 222,
            transition_time_ms: 4000,
        };
        let v: serde_json::Value = serde_json::from_str(&cmd.to_json()).unwrap();
        assert_eq!(v["type"], "request");
        assert_eq!(v["color"]["red"], 2);
        assert_eq!(v["color"]["green"], 22);
        assert_eq!(v["color"]["blue"], 222);
        assert_eq!(v["transitionTime"], 4000);
        assert_eq!(cmd.pause_after_ms(), Some(4000));
    }

    #[test]
    fn color_boundary_255_ok_256_rejected() {
        let ok = Command::Color { r: 255, g: 0, b: 0, transition_time_ms: 0 };
        let bad = Command::Color { r: 256, g: 0, b: 0, transition_time_ms: 0 };
        assert!(ok.check(&cfg()).is_ok());
        assert!(matches!(bad.check(&cfg()), Err(ProtocolError::OutOfRange { .. })));
    }

    #[test]
    fn brightness_boundaries() {
        let c0 = Command::Brightness { percentage: 0, transition_time_ms: 0 };
        let c100 = Command::Brightness { percentage: 100, transition_time_ms: 0 };
        assert!(c0.check(&cfg()).is_ok());
        assert!(c100.check(&cfg()).is_ok());
    }

    #[test]
    fn brightness_101_rejected() {
        // percentage is u8 so 101 is representable; check should reject it
        let c = Command::Brightness { percentage: 101, transition_time_ms: 0 };
        assert!(matches!(c.check(&cfg()), Err(ProtocolError::OutOfRange { .. })));
    }

    #[test]
    fn temperature_boundaries() {
        let c = cfg();
        assert!(Command::Temperature { kelvin: 1999, transition_time_ms: 0 }.check(&c).is_err());
        assert!(Command::Temperature { kelvin: 6501, transition_time_ms: 0 }.check(&c).is_err());
        assert!(Command::Temperature { kelvin: 6500, transition_time_ms: 0 }.check(&c).is_ok());
        assert!(Command::Temperature { kelvin: 2000, transition_time_ms: 0 }.check(&c).is_ok());
    }

    #[test]
    fn ping_serializes_minimally() {
        assert_eq!(Command::Ping.to_json(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn vacuum_get_present_and_null_fields() {
        let cmd = Command::VacuumGet(vec![VacuumField::Power, VacuumField::Battery]);
        let v: serde_json::Value = serde_json::from_str(&cmd.to_json()).unwrap();
        assert_eq!(v["action"], "get");
        assert!(v["power"].is_null());
        assert!(v["battery"].is_null());
    }

    #[test]
    fn vacuum_suction_wire_encodes_as_index_minus_one() {
        let cmd = Command::VacuumSet(vec![VacuumSetField::Suction(Suction::Strong)]);
        let v: serde_json::Value = serde_json::from_str(&cmd.to_json()).unwrap();
        assert_eq!(v["suction"], 1);
    }

    #[test]
    fn scene_rejected_when_rgb_only_on_warm_cold_product() {
        let mut c = cfg();
        c.supports_rgb = false;
        c.compatible_scenes.insert(7);
        let cmd = Command::Scene { scene_id: 7, rgb: true };
        assert!(matches!(cmd.check(&c), Err(ProtocolError::IncompatibleScene(7))));
    }
}
