//! Device, device status, and the per-device use-lock (§3 Device / Device
//! status, §4.3).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use klyqa_protocol::DeviceConfig;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;

const USE_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Light vs. vacuum vs. an identity-only placeholder, discriminated by a
/// substring of the product-id (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Light,
    Vacuum,
    Generic,
}

impl DeviceKind {
    pub fn from_product_id(product_id: &str) -> Self {
        if product_id.contains(".lighting") {
            DeviceKind::Light
        } else if product_id.contains(".cleaning") {
            DeviceKind::Vacuum
        } else {
            DeviceKind::Generic
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LightStatus {
    pub brightness: Option<u8>,
    pub color: Option<(u16, u16, u16)>,
    pub temperature: Option<u32>,
    pub mode: Option<String>,
    pub active_scene: Option<u32>,
    pub active_command: Option<String>,
    pub firmware_version: Option<String>,
    pub sdk_version: Option<String>,
    pub connected: bool,
}

impl LightStatus {
    fn apply(&mut self, json: &serde_json::Value) {
        if let Some(p) = json.get("percentage").and_then(serde_json::Value::as_u64) {
            self.brightness = Some(p as u8);
        } else if let Some(b) = json
            .get("brightness")
            .and_then(|v| v.get("percentage"))
            .and_then(serde_json::Value::as_u64)
        {
            self.brightness = Some(b as u8);
        }
        if let Some(c) = json.get("color") {
            if let (Some(r), Some(g), Some(b)) = (
                c.get("red").and_then(serde_json::Value::as_u64),
                c.get("green").and_then(serde_json::Value::as_u64),
                c.get("blue").and_then(serde_json::Value::as_u64),
            ) {
                self.color = Some((r as u16, g as u16, b as u16));
            }
        }
        if let Some(t) = json.get("temperature").and_then(serde_json::Value::as_u64) {
            self.temperature = Some(t as u32);
        }
        if let Some(fw) = json.get("fw_version").and_then(serde_json::Value::as_str) {
            self.firmware_version = Some(fw.to_owned());
        }
        self.connected = true;
    }
}

#[derive(Debug, Clone, Default)]
pub struct VacuumStatus {
    pub power: Option<bool>,
    pub cleaning: Option<bool>,
    pub beeping: Option<bool>,
    pub battery: Option<u8>,
    pub suction: Option<String>,
    pub workingmode: Option<String>,
    pub workingstatus: Option<String>,
    pub carpet_booster: Option<bool>,
    pub consumables: HashMap<String, u32>,
    pub errors: Vec<String>,
    pub direction: Option<String>,
    pub commissioninfo: Option<serde_json::Value>,
    pub calibration_time: Option<String>,
}

impl VacuumStatus {
    fn apply(&mut self, json: &serde_json::Value) {
        if let Some(v) = json.get("power").and_then(serde_json::Value::as_bool) {
            self.power = Some(v);
        }
        if let Some(v) = json.get("cleaning").and_then(serde_json::Value::as_bool) {
            self.cleaning = Some(v);
        }
        if let Some(v) = json.get("beeping").and_then(serde_json::Value::as_bool) {
            self.beeping = Some(v);
        }
        if let Some(v) = json.get("battery").and_then(serde_json::Value::as_u64) {
            self.battery = Some(v as u8);
        }
        if let Some(v) = json.get("suction").and_then(serde_json::Value::as_str) {
            self.suction = Some(v.to_owned());
        }
        if let Some(v) = json.get("workingmode").and_then(serde_json::Value::as_str) {
            self.workingmode = Some(v.to_owned());
        }
        if let Some(v) = json.get("workingstatus").and_then(serde_json::Value::as_str) {
            self.workingstatus = Some(v.to_owned());
        }
        if let Some(v) = json.get("carpetbooster").and_then(serde_json::Value::as_bool) {
            self.carpet_booster = Some(v);
        }
        if let Some(v) = json.get("direction").and_then(serde_json::Value::as_str) {
            self.direction = Some(v.to_owned());
        }
        if let Some(v) = json.get("commissioninfo") {
            self.commissioninfo = Some(v.clone());
        }
        if let Some(errs) = json.get("errors").and_then(serde_json::Value::as_array) {
            self.errors = errs.iter().filter_map(|e| e.as_str().map(str::to_owned)).collect();
        }
    }
}

/// Polymorphic device status (§3 Device status).
#[derive(Debug, Clone)]
pub enum DeviceStatus {
    Unknown,
    Light(LightStatus),
    Vacuum(VacuumStatus),
}

impl DeviceStatus {
    fn for_kind(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Light => DeviceStatus::Light(LightStatus::default()),
            DeviceKind::Vacuum => DeviceStatus::Vacuum(VacuumStatus::default()),
            DeviceKind::Generic => DeviceStatus::Unknown,
        }
    }

    /// Self-update from an answer or identity frame's JSON body.
    pub fn apply(&mut self, json: &serde_json::Value) {
        match self {
            DeviceStatus::Light(s) => s.apply(json),
            DeviceStatus::Vacuum(s) => s.apply(json),
            DeviceStatus::Unknown => {}
        }
    }
}

/// Per-device exclusive lock with timed acquisition and owner-checked
/// release (§4.3, §5). Lives outside any per-field lock on `Device` so
/// holding it for the life of a connection never blocks status reads.
#[derive(Debug, Default)]
pub struct UseLock {
    owner: Mutex<Option<String>>,
    released: Notify,
}

impl UseLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire the lock as `owner`, waiting up to 30s for a holder
    /// to release it.
    pub async fn acquire(&self, owner: &str) -> Result<(), ()> {
        let deadline = Instant::now() + USE_LOCK_TIMEOUT;
        loop {
            {
                let mut guard = self.owner.lock().await;
                if guard.is_none() {
                    *guard = Some(owner.to_owned());
                    return Ok(());
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(());
            }
            tokio::select! {
                () = self.released.notified() => {}
                () = tokio::time::sleep(remaining) => return Err(()),
            }
        }
    }

    /// Release the lock iff `owner` currently holds it; a no-op otherwise
    /// (§4.3: "release is idempotent by owner identity").
    pub async fn release(&self, owner: &str) {
        let mut guard = self.owner.lock().await;
        if guard.as_deref() == Some(owner) {
            *guard = None;
            drop(guard);
            self.released.notify_waiters();
        }
    }
}

/// A registered device (§3 Device). The use-lock is a plain field so a
/// connection task can hold it across awaits without locking `identity`;
/// everything else mutated after the device is created lives behind its
/// own `RwLock` so reads never contend with the use-lock.
pub struct Device {
    pub unit_id: String,
    identity: RwLock<Identity>,
    status: RwLock<DeviceStatus>,
    last_address: RwLock<Option<SocketAddr>>,
    pub use_lock: UseLock,
}

struct Identity {
    product_id: String,
    fw_version: Option<String>,
    hw_version: Option<String>,
    device_config: Option<DeviceConfig>,
}

impl Device {
    pub fn new(unit_id: String, product_id: String) -> Self {
        let kind = DeviceKind::from_product_id(&product_id);
        Self {
            unit_id,
            identity: RwLock::new(Identity {
                product_id,
                fw_version: None,
                hw_version: None,
                device_config: None,
            }),
            status: RwLock::new(DeviceStatus::for_kind(kind)),
            last_address: RwLock::new(None),
            use_lock: UseLock::new(),
        }
    }

    pub async fn product_id(&self) -> String {
        self.identity.read().await.product_id.clone()
    }

    pub async fn kind(&self) -> DeviceKind {
        DeviceKind::from_product_id(&self.identity.read().await.product_id)
    }

    pub async fn set_versions(&self, fw: Option<String>, hw: Option<String>) {
        let mut id = self.identity.write().await;
        id.fw_version = fw;
        id.hw_version = hw;
    }

    pub async fn device_config(&self) -> Option<DeviceConfig> {
        self.identity.read().await.device_config.clone()
    }

    pub async fn set_device_config(&self, cfg: DeviceConfig) {
        self.identity.write().await.device_config = Some(cfg);
    }

    pub async fn apply_status(&self, json: &serde_json::Value) {
        self.status.write().await.apply(json);
    }

    pub async fn status_snapshot(&self) -> DeviceStatus {
        self.status.read().await.clone()
    }

    pub async fn set_last_address(&self, addr: SocketAddr) {
        *self.last_address.write().await = Some(addr);
    }

    pub async fn last_address(&self) -> Option<SocketAddr> {
        *self.last_address.read().await
    }
}
