//! The animated backdrops and their mount-time props.
//!
//! An [`Effect`] only computes uniforms. Scheduling, frame skipping, culling
//! and resource lifetime belong to [`crate::render::RenderLoop`].

mod dither;
mod metaballs;
mod network;

pub use dither::{DitherEffect, DitherProps};
pub use metaballs::{MetaballsEffect, MetaballsProps};
pub use network::{NetworkEffect, NetworkProps};

use crate::{
    device::TierSettings,
    pool::{Held, PoolBatch, PoolManager, Vec2},
    shader::ShaderVariant,
    uniforms::Uniforms,
};

/// Per-frame inputs handed to [`Effect::update`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInput {
    /// Seconds since the loop's first frame.
    pub time: f32,
    /// Drawing buffer size in pixels.
    pub resolution: Vec2,
    /// Smoothed pointer position, normalised to `[0, 1]` with y up.
    pub pointer: Vec2,
}

pub trait Effect {
    fn variant(&self) -> ShaderVariant;

    /// Clamps props to what the tier allows. Called once, after probing.
    fn configure(&mut self, settings: &TierSettings);

    /// Props expressed as uniforms, applied over the program defaults.
    fn uniform_overrides(&self) -> Uniforms;

    /// Takes the long-lived pooled objects the effect writes every frame.
    fn acquire(&mut self, pools: &mut PoolManager);

    /// Writes this frame's uniforms. Transient objects come from `batch`.
    fn update(&mut self, input: &FrameInput, batch: &mut PoolBatch, uniforms: &mut Uniforms);

    /// Hands back every object taken in [`Effect::acquire`].
    fn take_pooled(&mut self) -> Vec<Held>;

    fn pooled_count(&self) -> usize;
}

/// Deterministic value in `[0, 1)` for element `index`, so layouts are
/// identical across mounts.
pub(crate) fn unit_hash(index: u32, salt: u32) -> f32 {
    let mut x = index.wrapping_mul(0x9e37_79b9) ^ salt.wrapping_mul(0x85eb_ca6b);
    x ^= x >> 16;
    x = x.wrapping_mul(0x7feb_352d);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846c_a68b);
    x ^= x >> 16;
    (x >> 8) as f32 / (1u32 << 24) as f32
}

/// Clamps a possibly negative or oversized count to `0..=max`.
pub(crate) fn clamp_count(requested: i64, max: usize) -> usize {
    requested.clamp(0, max as i64) as usize
}

pub(crate) fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
