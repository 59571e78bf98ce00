use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration shared by every effect mounted on a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FxConfig {
    pub cache: CacheConfig,
    pub pool: PoolConfig,
    pub render: RenderConfig,
}

impl FxConfig {
    /// Parses a JSON document. Missing sections and fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Shader cache bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// Entries older than this are treated as invalid on lookup.
    pub ttl_secs: u64,
    /// Interval between sweeps that purge expired entries without a lookup.
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            ttl_secs: 30 * 60,
            cleanup_interval_secs: 5 * 60,
        }
    }
}

/// Free-list caps and health thresholds for the object pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub vector2_max: usize,
    pub vector3_max: usize,
    pub color_max: usize,
    pub matrix4_max: usize,
    pub quaternion_max: usize,
    pub euler_max: usize,
    pub active_warning_threshold: usize,
    pub low_free_threshold: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            vector2_max: 200,
            vector3_max: 200,
            color_max: 100,
            matrix4_max: 50,
            quaternion_max: 100,
            euler_max: 100,
            active_warning_threshold: 100,
            low_free_threshold: 5,
        }
    }
}

/// Per-frame scheduling knobs for render loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub visibility_check_interval_ms: f64,
    /// Minimum spacing between accepted pointer samples.
    pub pointer_throttle_ms: f64,
    /// Exponential smoothing factor in `(0, 1]`.
    pub pointer_smoothing: f32,
    /// Distance outside the viewport that still counts as visible.
    pub viewport_margin_px: f64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            visibility_check_interval_ms: 150.0,
            pointer_throttle_ms: 16.0,
            pointer_smoothing: 0.1,
            viewport_margin_px: 100.0,
        }
    }
}

impl RenderConfig {
    pub(crate) fn smoothing(&self) -> f32 {
        if self.pointer_smoothing.is_finite() {
            self.pointer_smoothing.clamp(0.001, 1.0)
        } else {
            0.1
        }
    }
}
