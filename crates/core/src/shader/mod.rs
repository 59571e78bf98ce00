//! Shader source generation and the compiled-program cache.

mod cache;
mod source;

pub use cache::{
    cache_key, CacheEntryInfo, CacheStats, ShaderCacheManager, ShaderMaterial, SharedCache,
};
pub use source::{generate, uniform_defaults};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which backdrop a program renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderVariant {
    Dither,
    Metaballs,
    DataNetwork,
}

impl ShaderVariant {
    pub const ALL: [ShaderVariant; 3] = [
        ShaderVariant::Dither,
        ShaderVariant::Metaballs,
        ShaderVariant::DataNetwork,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dither => "dither",
            Self::Metaballs => "metaballs",
            Self::DataNetwork => "data_network",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "dither" => Some(Self::Dither),
            "metaballs" => Some(Self::Metaballs),
            "data_network" | "network" => Some(Self::DataNetwork),
            _ => None,
        }
    }
}

impl fmt::Display for ShaderVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GLSL ES 3.00 vertex + fragment pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderSource {
    pub vertex: String,
    pub fragment: String,
}

impl ShaderSource {
    /// Rough size measure used in logs.
    pub fn line_count(&self) -> usize {
        self.vertex.lines().count() + self.fragment.lines().count()
    }
}
