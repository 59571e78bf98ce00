use std::fmt;

use serde::Serialize;

use crate::{fallback::FallbackReason, pool::Vec2, FxError, Result};

/// Lifecycle of one render loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Uninitialized,
    Probing,
    /// Program and pooled objects acquired, first frame scheduled.
    Ready,
    Running,
    Disposed,
    /// Terminal: the static gradient is shown instead.
    Fallback(FallbackReason),
}

impl LoopState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Probing => "probing",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Disposed => "disposed",
            Self::Fallback(_) => "fallback",
        }
    }

    /// Whether frames are still being scheduled.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }

    pub(crate) fn can_move_to(self, next: LoopState) -> bool {
        use LoopState::*;
        match (self, next) {
            (Uninitialized, Probing) => true,
            (Probing, Ready) => true,
            (Probing | Ready | Running, Fallback(_)) => true,
            (Ready, Running) => true,
            (Disposed, _) => false,
            (_, Disposed) => true,
            _ => false,
        }
    }

    /// Returns `next` if the move is allowed.
    pub(crate) fn checked(self, next: LoopState) -> Result<LoopState> {
        if self.can_move_to(next) {
            Ok(next)
        } else {
            Err(FxError::InvalidTransition {
                from: self.name(),
                to: next.name(),
            })
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fallback(reason) => write!(f, "fallback ({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Mutable per-loop frame bookkeeping. Owned by exactly one loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnimationFrameState {
    pub frame_counter: u64,
    pub first_frame_timestamp: Option<f64>,
    pub last_frame_timestamp: f64,
    pub is_in_viewport: bool,
    /// Smoothed pointer, normalised with y up.
    pub pointer: Vec2,
    pub pointer_target: Vec2,
    pub last_pointer_sample: Option<f64>,
    pub last_visibility_check: Option<f64>,
    pub updates: u64,
    pub draws: u64,
    pub skipped: u64,
    pub culled: u64,
}

impl Default for AnimationFrameState {
    fn default() -> Self {
        let centre = Vec2::new(0.5, 0.5);
        Self {
            frame_counter: 0,
            first_frame_timestamp: None,
            last_frame_timestamp: 0.0,
            is_in_viewport: true,
            pointer: centre,
            pointer_target: centre,
            last_pointer_sample: None,
            last_visibility_check: None,
            updates: 0,
            draws: 0,
            skipped: 0,
            culled: 0,
        }
    }
}

impl AnimationFrameState {
    /// Seconds elapsed since the first frame callback.
    pub fn elapsed_secs(&self, timestamp_ms: f64) -> f32 {
        let origin = self.first_frame_timestamp.unwrap_or(timestamp_ms);
        ((timestamp_ms - origin).max(0.0) / 1000.0) as f32
    }

    pub(crate) fn visibility_due(&self, now_ms: f64, interval_ms: f64) -> bool {
        self.last_visibility_check
            .map_or(true, |last| now_ms - last >= interval_ms)
    }

    pub(crate) fn pointer_due(&self, now_ms: f64, throttle_ms: f64) -> bool {
        self.last_pointer_sample
            .map_or(true, |last| now_ms - last >= throttle_ms)
    }
}
