//! Device capability probing and quality tier selection.

mod tier;

pub use tier::{QualityTier, TierSettings};

use serde::{Deserialize, Serialize};

const MOBILE_MARKERS: &[&str] = &[
    "android",
    "iphone",
    "ipad",
    "ipod",
    "mobile",
    "blackberry",
    "iemobile",
    "opera mini",
];

/// Snapshot of the runtime environment, taken once per mount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub core_count: u32,
    /// Reported device memory in GB; `None` when the platform does not say.
    pub device_memory_gb: Option<f32>,
    pub is_mobile: bool,
    pub webgl_supported: bool,
}

impl DeviceProfile {
    pub fn new(core_count: u32, device_memory_gb: Option<f32>, is_mobile: bool) -> Self {
        Self {
            core_count,
            device_memory_gb,
            is_mobile,
            webgl_supported: true,
        }
    }

    pub fn without_webgl(mut self) -> Self {
        self.webgl_supported = false;
        self
    }

    /// Point score behind [`QualityTier`] selection.
    pub fn score(&self) -> i32 {
        let mobile_penalty = if self.is_mobile { 2 } else { 0 };
        core_bucket(self.core_count) + memory_bucket(self.device_memory_gb) - mobile_penalty
    }

    pub fn tier(&self) -> QualityTier {
        QualityTier::from_score(self.score())
    }

    /// Stable component of shader cache keys, e.g. `c8-m16-desktop`.
    pub fn cache_key(&self) -> String {
        let memory = match self.device_memory_gb {
            Some(gb) if gb.is_finite() => format!("m{gb}"),
            _ => "m?".to_string(),
        };
        let form = if self.is_mobile { "mobile" } else { "desktop" };
        format!("c{}-{}-{}", self.core_count, memory, form)
    }
}

fn core_bucket(cores: u32) -> i32 {
    match cores {
        8.. => 3,
        4..=7 => 2,
        _ => 1,
    }
}

fn memory_bucket(memory_gb: Option<f32>) -> i32 {
    match memory_gb {
        Some(gb) if gb >= 8.0 => 3,
        Some(gb) if gb >= 4.0 => 2,
        Some(gb) if gb.is_finite() => 1,
        // Unknown or garbage readings score as a mid-range device.
        _ => 2,
    }
}

/// Case-insensitive check for the common mobile user-agent markers.
pub fn is_mobile_user_agent(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    MOBILE_MARKERS.iter().any(|marker| ua.contains(marker))
}

/// Reads the environment and classifies it. Never fails: capabilities that
/// cannot be read are reported as unknown.
pub trait CapabilityProbe {
    fn probe(&self) -> DeviceProfile;
}

/// Probe that always returns the same profile.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub DeviceProfile);

impl CapabilityProbe for StaticProbe {
    fn probe(&self) -> DeviceProfile {
        self.0
    }
}

/// Probe for native hosts. Memory is not portable to query, so it is left
/// unknown; the host is assumed to be a desktop with a working GPU.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProbe;

impl CapabilityProbe for HostProbe {
    fn probe(&self) -> DeviceProfile {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        DeviceProfile::new(cores, None, false)
    }
}
