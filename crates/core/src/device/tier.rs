use std::fmt;

use serde::{Deserialize, Serialize};

/// Discrete performance class controlling shader complexity, element counts
/// and frame skipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    High,
}

impl QualityTier {
    pub const ALL: [QualityTier; 3] = [QualityTier::Low, QualityTier::Medium, QualityTier::High];

    pub fn from_score(score: i32) -> Self {
        if score >= 5 {
            Self::High
        } else if score >= 3 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn settings(self) -> TierSettings {
        match self {
            Self::Low => TierSettings {
                update_interval: 3,
                max_balls: 5,
                max_particles: 5,
                dither_matrix_size: 2,
                noise_octaves: 1,
                max_pixel_ratio: 1.0,
            },
            Self::Medium => TierSettings {
                update_interval: 2,
                max_balls: 8,
                max_particles: 8,
                dither_matrix_size: 4,
                noise_octaves: 2,
                max_pixel_ratio: 1.5,
            },
            Self::High => TierSettings {
                update_interval: 1,
                max_balls: 12,
                max_particles: 12,
                dither_matrix_size: 4,
                noise_octaves: 3,
                max_pixel_ratio: 2.0,
            },
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Knobs derived from a [`QualityTier`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierSettings {
    /// Only every `update_interval`-th frame callback does any work.
    pub update_interval: u64,
    pub max_balls: usize,
    pub max_particles: usize,
    /// Side length of the ordered-dither threshold matrix.
    pub dither_matrix_size: usize,
    pub noise_octaves: usize,
    pub max_pixel_ratio: f32,
}

impl TierSettings {
    /// Every pair of particles can be linked at once.
    pub fn max_links(&self) -> usize {
        self.max_particles * self.max_particles.saturating_sub(1) / 2
    }
}
