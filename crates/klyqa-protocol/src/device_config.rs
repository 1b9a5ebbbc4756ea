//! Per product-id trait catalog constraining numeric command ranges.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Inclusive numeric range, e.g. `0..=255` for a color channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub min: i64,
    pub max: i64,
}

impl Range {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Defaults used when a device has no cached device-config for its
/// product-id.
pub const DEFAULT_COLOR_RANGE: Range = Range::new(0, 255);
pub const DEFAULT_BRIGHTNESS_RANGE: Range = Range::new(0, 100);
pub const DEFAULT_TEMPERATURE_RANGE: Range = Range::new(2000, 6500);

/// Trait document for one product-id: numeric ranges plus scene
/// compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub product_id: String,
    #[serde(default)]
    pub color_range: Option<Range>,
    #[serde(default)]
    pub brightness_range: Option<Range>,
    #[serde(default)]
    pub temperature_range: Option<Range>,
    /// Scene IDs this product supports; RGB-only scenes are rejected on
    /// warm/cold-only products by omitting them here.
    #[serde(default)]
    pub compatible_scenes: HashSet<u32>,
    /// True if the product has RGB channels at all (vs. warm/cold only).
    #[serde(default = "default_true")]
    pub supports_rgb: bool,
}

fn default_true() -> bool {
    true
}

impl DeviceConfig {
    pub fn color_range(&self) -> Range {
        self.color_range.unwrap_or(DEFAULT_COLOR_RANGE)
    }

    pub fn brightness_range(&self) -> Range {
        self.brightness_range.unwrap_or(DEFAULT_BRIGHTNESS_RANGE)
    }

    pub fn temperature_range(&self) -> Range {
        self.temperature_range.unwrap_or(DEFAULT_TEMPERATURE_RANGE)
    }

    pub fn scene_allowed(&self, scene_id: u32, rgb_requested: bool) -> bool {
        if rgb_requested && !self.supports_rgb {
            return false;
        }
        self.compatible_scenes.is_empty() || self.compatible_scenes.contains(&scene_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let cfg = DeviceConfig {
            product_id: "@klyqa.lighting.rgb-cw-ww.e27".into(),
            color_range: None,
            brightness_range: None,
            temperature_range: None,
            compatible_scenes: HashSet::new(),
            supports_rgb: true,
        };
        assert_eq!(cfg.color_range(), DEFAULT_COLOR_RANGE);
        assert_eq!(cfg.brightness_range(), DEFAULT_BRIGHTNESS_RANGE);
        assert_eq!(cfg.temperature_range(), DEFAULT_TEMPERATURE_RANGE);
    }

    #[test]
    fn rgb_scene_rejected_on_warm_cold_only_product() {
        let mut cfg = DeviceConfig {
            product_id: "@klyqa.lighting.cw-ww.e27".into(),
            color_range: None,
            brightness_range: None,
            temperature_range: None,
            compatible_scenes: HashSet::new(),
            supports_rgb: false,
        };
        cfg.compatible_scenes.insert(3);
        assert!(!cfg.scene_allowed(3, true));
        assert!(cfg.scene_allowed(3, false));
    }
}
