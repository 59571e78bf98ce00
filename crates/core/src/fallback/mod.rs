use std::fmt;

use serde::{Deserialize, Serialize};

/// Brand background shown underneath every effect.
pub const BACKGROUND_COLOR: &str = "#0b1020";
pub const BACKGROUND_GRADIENT: &str =
    "linear-gradient(135deg, #0b1020 0%, #14213d 50%, #0b1020 100%)";

/// Why the static background is showing instead of an animated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Shader or context still being prepared.
    Loading,
    /// The device cannot run WebGL.
    Unsupported,
    /// A runtime failure inside the effect.
    Error,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Loading => "loading",
            Self::Unsupported => "unsupported",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FallbackStyle {
    pub background_color: &'static str,
    pub background_image: &'static str,
}

/// Static gradient renderer. The output does not depend on the reason, so
/// switching between loading, unsupported and error never flickers.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackRenderer;

impl FallbackRenderer {
    pub fn style(&self, reason: FallbackReason) -> FallbackStyle {
        tracing::debug!(%reason, "rendering fallback background");
        FallbackStyle {
            background_color: BACKGROUND_COLOR,
            background_image: BACKGROUND_GRADIENT,
        }
    }

    /// Inline CSS declarations for the container element.
    pub fn css(&self, reason: FallbackReason) -> String {
        let style = self.style(reason);
        format!(
            "background-color: {}; background-image: {};",
            style.background_color, style.background_image
        )
    }
}
