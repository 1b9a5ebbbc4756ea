//! Device registry and the controller-data singleton (§3 Controller data,
//! §4.3).

use std::collections::HashMap;
use std::sync::Arc;

use klyqa_protocol::aes_session::AesKey;
use klyqa_protocol::DeviceConfig;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::device::Device;

/// Reserved key-table entry applying to every device (§3).
pub const BROADCAST_KEY: &str = "all";

/// Canonicalize a raw unit-id: lowercase, punctuation stripped (§4.3).
pub fn slugify(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Process-wide singleton holding the AES key table, device registry, and
/// device-config catalog (§3 Controller data).
pub struct ControllerData {
    aes_keys: RwLock<HashMap<String, AesKey>>,
    devices: RwLock<HashMap<String, Arc<Device>>>,
    device_configs: RwLock<HashMap<String, DeviceConfig>>,
    insertion_lock: Mutex<()>,
}

impl ControllerData {
    pub fn new() -> Self {
        Self {
            aes_keys: RwLock::new(HashMap::new()),
            devices: RwLock::new(HashMap::new()),
            device_configs: RwLock::new(HashMap::new()),
            insertion_lock: Mutex::new(()),
        }
    }

    /// Load a pre-populated key table and device-config catalog, e.g. from
    /// the external collaborator's on-disk caches.
    pub async fn load_caches(&self, aes_keys: HashMap<String, AesKey>, device_configs: HashMap<String, DeviceConfig>) {
        *self.aes_keys.write().await = aes_keys;
        *self.device_configs.write().await = device_configs;
    }

    pub async fn set_aes_key(&self, unit_id: &str, key: AesKey) {
        self.aes_keys.write().await.insert(slugify(unit_id), key);
    }

    /// Resolve the AES key for `unit_id`: the `"all"` entry wins if
    /// present, else the per-unit-id key (§4.6).
    pub async fn aes_key_for(&self, unit_id: &str) -> Option<AesKey> {
        let keys = self.aes_keys.read().await;
        keys.get(BROADCAST_KEY).or_else(|| keys.get(&slugify(unit_id))).copied()
    }

    pub async fn device_config_for(&self, product_id: &str) -> Option<DeviceConfig> {
        self.device_configs.read().await.get(product_id).cloned()
    }

    pub async fn set_device_config(&self, cfg: DeviceConfig) {
        self.device_configs.write().await.insert(cfg.product_id.clone(), cfg);
    }

    pub async fn get(&self, unit_id: &str) -> Option<Arc<Device>> {
        self.devices.read().await.get(&slugify(unit_id)).cloned()
    }

    /// Look up a device by unit-id, creating one of the right kind under
    /// the insertion lock if this is the first observation (§4.3).
    pub async fn get_or_create(&self, unit_id: &str, product_id: &str) -> Arc<Device> {
        let key = slugify(unit_id);
        if let Some(existing) = self.devices.read().await.get(&key) {
            return existing.clone();
        }
        let _guard = self.insertion_lock.lock().await;
        // Re-check: another task may have won the race while we waited.
        if let Some(existing) = self.devices.read().await.get(&key) {
            return existing.clone();
        }
        let device = Arc::new(Device::new(key.clone(), product_id.to_owned()));
        if let Some(cfg) = self.device_config_for(product_id).await {
            device.set_device_config(cfg).await;
        }
        self.devices.write().await.insert(key.clone(), device.clone());
        info!(unit_id = %key, product_id, "device registered");
        device
    }

    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }
}

impl Default for ControllerData {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_lowercases_and_strips_punctuation() {
        assert_eq!(slugify(" 29DA-A5A4 439969F57934 "), "29daa5a4439969f57934");
    }

    #[tokio::test]
    async fn aes_key_all_wins_over_per_unit_key() {
        let data = ControllerData::new();
        data.set_aes_key("unit-1", [1u8; 16]).await;
        data.set_aes_key(BROADCAST_KEY, [2u8; 16]).await;
        assert_eq!(data.aes_key_for("unit-1").await, Some([2u8; 16]));
    }

    #[tokio::test]
    async fn per_unit_key_used_when_no_broadcast_key() {
        let data = ControllerData::new();
        data.set_aes_key("unit-1", [9u8; 16]).await;
        assert_eq!(data.aes_key_for("unit-1").await, Some([9u8; 16]));
        assert_eq!(data.aes_key_for("unit-2").await, None);
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_device_on_repeated_observation() {
        let data = ControllerData::new();
        let first = data.get_or_create("AbC-123", "@klyqa.lighting.rgb-cw-ww.e27").await;
        let second = data.get_or_create("abc123", "@klyqa.lighting.rgb-cw-ww.e27").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(data.device_count().await, 1);
    }
}
