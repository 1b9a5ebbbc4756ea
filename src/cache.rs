//! On-disk caches for the AES key table and device-config catalog.
//!
//! The core only ever consumes in-memory maps (`ControllerData::load_caches`);
//! reading and writing the two JSON files that back those maps between runs
//! is this helper's job, kept outside `klyqa-core` so the core never touches
//! a filesystem path directly.

use std::collections::HashMap;
use std::path::Path;

use klyqa_protocol::aes_session::AesKey;
use klyqa_protocol::DeviceConfig;
use thiserror::Error;
use tracing::{info, warn};

const AES_KEYS_FILE: &str = "aes.json";
const DEVICE_CONFIGS_FILE: &str = "device.configs.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("reading '{0}': {1}")]
    Io(String, std::io::Error),
    #[error("parsing '{0}': {1}")]
    Parse(String, serde_json::Error),
}

/// Load `aes.json` (unit-id -> 16-byte hex key) and `device.configs.json`
/// (product-id -> device-config) from `data_dir`. Either file missing is
/// not an error: the caches simply start empty and are filled in as
/// identities and commissioning data arrive.
pub fn load(data_dir: &Path) -> Result<(HashMap<String, AesKey>, HashMap<String, DeviceConfig>), CacheError> {
    let aes_keys = load_aes_keys(&data_dir.join(AES_KEYS_FILE))?;
    let device_configs = load_device_configs(&data_dir.join(DEVICE_CONFIGS_FILE))?;
    info!(keys = aes_keys.len(), configs = device_configs.len(), "caches loaded");
    Ok((aes_keys, device_configs))
}

fn load_aes_keys(path: &Path) -> Result<HashMap<String, AesKey>, CacheError> {
    let Some(contents) = read_optional(path)? else {
        return Ok(HashMap::new());
    };
    let raw: HashMap<String, String> =
        serde_json::from_str(&contents).map_err(|e| CacheError::Parse(path.display().to_string(), e))?;
    let mut keys = HashMap::with_capacity(raw.len());
    for (unit_id, hex) in raw {
        match parse_hex_key(&hex) {
            Some(key) => {
                keys.insert(unit_id, key);
            }
            None => warn!(unit_id, "skipping aes.json entry with malformed key"),
        }
    }
    Ok(keys)
}

fn load_device_configs(path: &Path) -> Result<HashMap<String, DeviceConfig>, CacheError> {
    let Some(contents) = read_optional(path)? else {
        return Ok(HashMap::new());
    };
    serde_json::from_str(&contents).map_err(|e| CacheError::Parse(path.display().to_string(), e))
}

fn read_optional(path: &Path) -> Result<Option<String>, CacheError> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CacheError::Io(path.display().to_string(), e)),
    }
}

fn parse_hex_key(hex: &str) -> Option<AesKey> {
    if hex.len() != 32 {
        return None;
    }
    let mut key = [0u8; 16];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cache_files_yield_empty_maps() {
        let dir = tempfile::tempdir().unwrap();
        let (keys, configs) = load(dir.path()).unwrap();
        assert!(keys.is_empty());
        assert!(configs.is_empty());
    }

    #[test]
    fn aes_keys_parsed_from_hex_and_malformed_entries_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(AES_KEYS_FILE),
            r#"{"00ac629de9ad2f4409dc": "0123456789abcdef0123456789abcdef", "bad": "nothex"}"#,
        )
        .unwrap();
        let (keys, _) = load(dir.path()).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains_key("00ac629de9ad2f4409dc"));
    }

    #[test]
    fn device_configs_parsed_keyed_by_product_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEVICE_CONFIGS_FILE),
            r#"{"@klyqa.lighting.rgb-cw-ww.e27": {"product_id": "@klyqa.lighting.rgb-cw-ww.e27", "supports_rgb": true}}"#,
        )
        .unwrap();
        let (_, configs) = load(dir.path()).unwrap();
        let cfg = configs.get("@klyqa.lighting.rgb-cw-ww.e27").unwrap();
        assert!(cfg.supports_rgb);
    }
}
