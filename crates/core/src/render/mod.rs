//! Per-effect render loop controller.
//!
//! A [`RenderLoop`] owns one effect, its material and the pooled objects the
//! effect writes each frame. The host calls [`RenderLoop::on_frame`] from its
//! animation-frame callback; the loop re-arms the callback itself through its
//! [`FrameScheduler`] so at most one is ever pending.

mod services;
mod state;

pub use services::{Diagnostics, FxServices};
pub use state::{AnimationFrameState, LoopState};

use crate::{
    device::{CapabilityProbe, DeviceProfile, QualityTier, TierSettings},
    effects::{Effect, FrameInput},
    fallback::{FallbackReason, FallbackRenderer, FallbackStyle},
    pool::{PoolBatch, ReturnQueue, Vec2},
    shader::ShaderMaterial,
    timeline::{FrameScheduler, FrameToken},
    FxError, Result,
};

/// Answers whether the effect's surface is worth drawing right now.
pub trait ViewportProbe {
    fn is_visible(&self) -> bool;
}

/// Probe for hosts without a notion of visibility.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysVisible;

impl ViewportProbe for AlwaysVisible {
    fn is_visible(&self) -> bool {
        true
    }
}

/// What a single [`RenderLoop::on_frame`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The loop is not scheduling frames (not started, disposed or fallback).
    Inactive,
    /// Dropped by the tier's update interval.
    Skipped,
    /// Off screen; no update and no draw.
    Culled,
    Drawn,
    /// The draw failed and the loop switched to the fallback.
    Failed,
}

pub struct RenderLoop<E: Effect> {
    effect: E,
    services: FxServices,
    scheduler: Box<dyn FrameScheduler>,
    viewport: Box<dyn ViewportProbe>,
    state: LoopState,
    frame: AnimationFrameState,
    profile: Option<DeviceProfile>,
    tier: Option<QualityTier>,
    settings: Option<TierSettings>,
    material: Option<ShaderMaterial>,
    returns: Option<ReturnQueue>,
    pending: Option<FrameToken>,
    resolution: Vec2,
}

impl<E: Effect> RenderLoop<E> {
    pub fn new(
        effect: E,
        services: FxServices,
        scheduler: Box<dyn FrameScheduler>,
        viewport: Box<dyn ViewportProbe>,
    ) -> Self {
        Self {
            effect,
            services,
            scheduler,
            viewport,
            state: LoopState::Uninitialized,
            frame: AnimationFrameState::default(),
            profile: None,
            tier: None,
            settings: None,
            material: None,
            returns: None,
            pending: None,
            resolution: Vec2::new(300.0, 150.0),
        }
    }

    /// Probes the device, prepares the program and pooled objects, and
    /// schedules the first frame.
    ///
    /// Returns the state the loop ended up in. Unsupported devices and shader
    /// failures land in [`LoopState::Fallback`] and are not errors; only
    /// calling `start` twice is.
    pub fn start(&mut self, probe: &dyn CapabilityProbe) -> Result<LoopState> {
        self.move_to(LoopState::Probing)?;
        let variant = self.effect.variant();

        let profile = probe.probe();
        let tier = profile.tier();
        self.profile = Some(profile);
        tracing::info!(
            %variant,
            %tier,
            score = profile.score(),
            webgl = profile.webgl_supported,
            "device probed"
        );

        if !profile.webgl_supported {
            self.enter_fallback(FallbackReason::Unsupported);
            return Ok(self.state);
        }

        let settings = tier.settings();
        self.tier = Some(tier);
        self.settings = Some(settings);
        self.effect.configure(&settings);

        let overrides = self.effect.uniform_overrides();
        let material = match self.services.cache.try_borrow_mut() {
            Ok(mut cache) => cache.get_material(variant, &profile, tier, Some(&overrides)),
            Err(_) => Err(FxError::ContextUnavailable("shader cache is busy".into())),
        };
        let mut material = match material {
            Ok(material) => material,
            Err(err) => {
                tracing::warn!(%variant, error = %err, "shader unavailable; showing fallback");
                self.enter_fallback(FallbackReason::Error);
                return Ok(self.state);
            }
        };
        material.uniforms_mut().set("uResolution", self.resolution);
        self.material = Some(material);

        let acquired = match self.services.pools.try_borrow_mut() {
            Ok(mut pools) => {
                self.returns = Some(pools.returns());
                self.effect.acquire(&mut pools);
                true
            }
            Err(_) => false,
        };
        if !acquired {
            tracing::warn!(%variant, "pool manager busy during start; showing fallback");
            self.enter_fallback(FallbackReason::Error);
            return Ok(self.state);
        }

        self.pending = Some(self.scheduler.request());
        self.move_to(LoopState::Ready)?;
        Ok(self.state)
    }

    /// Animation-frame callback body.
    pub fn on_frame(&mut self, timestamp_ms: f64) -> FrameOutcome {
        if !self.state.is_active() {
            return FrameOutcome::Inactive;
        }
        self.pending = None;
        if self.state == LoopState::Ready {
            self.state = LoopState::Running;
            tracing::debug!(variant = %self.effect.variant(), "render loop running");
        }

        self.frame.frame_counter += 1;
        self.frame.first_frame_timestamp.get_or_insert(timestamp_ms);
        self.frame.last_frame_timestamp = timestamp_ms;

        let outcome = self.step(timestamp_ms);
        if self.state.is_active() {
            self.pending = Some(self.scheduler.request());
        }
        outcome
    }

    /// Records a pointer sample in normalised coordinates. Samples closer
    /// together than the configured throttle are dropped.
    pub fn pointer_moved(&mut self, x: f32, y: f32, now_ms: f64) -> bool {
        if matches!(self.state, LoopState::Disposed | LoopState::Fallback(_)) {
            return false;
        }
        if !x.is_finite() || !y.is_finite() {
            return false;
        }
        let throttle = self.services.config.render.pointer_throttle_ms;
        if !self.frame.pointer_due(now_ms, throttle) {
            return false;
        }
        self.frame.last_pointer_sample = Some(now_ms);
        self.frame.pointer_target = Vec2::new(x, y);
        true
    }

    /// New drawing buffer size in device pixels.
    pub fn resize(&mut self, width: u32, height: u32) {
        if matches!(self.state, LoopState::Disposed) {
            return;
        }
        let (width, height) = (width.max(1), height.max(1));
        self.resolution = Vec2::new(width as f32, height as f32);
        match self.services.gpu.try_borrow_mut() {
            Ok(mut gpu) => gpu.resize(width, height),
            Err(_) => tracing::warn!(width, height, "gpu busy; backend resize skipped"),
        }
        if let Some(material) = self.material.as_mut() {
            material.uniforms_mut().set("uResolution", self.resolution);
        }
    }

    /// Device pixel ratio to render at, capped by the tier.
    pub fn pixel_ratio(&self, device_ratio: f64) -> f64 {
        let cap = self
            .settings
            .map_or(1.0, |settings| f64::from(settings.max_pixel_ratio));
        if device_ratio.is_finite() && device_ratio > 0.0 {
            device_ratio.min(cap)
        } else {
            1.0
        }
    }

    /// Static background to show underneath or instead of the canvas.
    pub fn background(&self) -> Option<FallbackStyle> {
        let reason = match self.state {
            LoopState::Uninitialized | LoopState::Probing | LoopState::Ready => {
                FallbackReason::Loading
            }
            LoopState::Fallback(reason) => reason,
            LoopState::Running | LoopState::Disposed => return None,
        };
        Some(FallbackRenderer.style(reason))
    }

    /// Cancels the pending frame and returns every held resource. Safe to
    /// call more than once.
    pub fn dispose(&mut self) {
        if self.state == LoopState::Disposed {
            return;
        }
        self.cancel_pending();
        self.release_resources();
        self.state = LoopState::Disposed;
        tracing::debug!(
            variant = %self.effect.variant(),
            frames = self.frame.frame_counter,
            draws = self.frame.draws,
            "render loop disposed"
        );
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn frame(&self) -> &AnimationFrameState {
        &self.frame
    }

    pub fn profile(&self) -> Option<&DeviceProfile> {
        self.profile.as_ref()
    }

    pub fn tier(&self) -> Option<QualityTier> {
        self.tier
    }

    pub fn material(&self) -> Option<&ShaderMaterial> {
        self.material.as_ref()
    }

    pub fn effect(&self) -> &E {
        &self.effect
    }

    pub fn services(&self) -> &FxServices {
        &self.services
    }

    pub fn pending_frame(&self) -> Option<FrameToken> {
        self.pending
    }

    pub fn resolution(&self) -> Vec2 {
        self.resolution
    }

    fn step(&mut self, timestamp_ms: f64) -> FrameOutcome {
        let interval = self
            .settings
            .map_or(1, |settings| settings.update_interval.max(1));
        if self.frame.frame_counter % interval != 0 {
            self.frame.skipped += 1;
            return FrameOutcome::Skipped;
        }

        let check_interval = self.services.config.render.visibility_check_interval_ms;
        if self.frame.visibility_due(timestamp_ms, check_interval) {
            self.check_visibility(timestamp_ms);
        }
        if !self.frame.is_in_viewport {
            self.frame.culled += 1;
            return FrameOutcome::Culled;
        }

        let smoothing = self.services.config.render.smoothing();
        let target = self.frame.pointer_target;
        self.frame.pointer.approach(target, smoothing);
        let input = FrameInput {
            time: self.frame.elapsed_secs(timestamp_ms),
            resolution: self.resolution,
            pointer: self.frame.pointer,
        };

        let Some(material) = self.material.as_mut() else {
            return FrameOutcome::Inactive;
        };
        let mut batch = PoolBatch::new(self.services.pools.clone());
        self.effect.update(&input, &mut batch, material.uniforms_mut());
        batch.dispose();
        self.frame.updates += 1;

        let drawn = match self.services.gpu.try_borrow_mut() {
            Ok(mut gpu) => gpu.draw(material.program_id(), material.uniforms()),
            Err(_) => Err(FxError::ContextUnavailable("gpu backend is busy".into())),
        };
        match drawn {
            Ok(()) => {
                self.frame.draws += 1;
                FrameOutcome::Drawn
            }
            Err(err) => {
                tracing::warn!(
                    variant = %self.effect.variant(),
                    error = %err,
                    "draw failed; showing fallback"
                );
                self.enter_fallback(FallbackReason::Error);
                FrameOutcome::Failed
            }
        }
    }

    fn check_visibility(&mut self, now_ms: f64) {
        self.frame.last_visibility_check = Some(now_ms);
        let visible = self.viewport.is_visible();
        if visible != self.frame.is_in_viewport {
            tracing::debug!(variant = %self.effect.variant(), visible, "viewport visibility changed");
        }
        self.frame.is_in_viewport = visible;

        // Piggyback cache expiry on the same low-frequency tick.
        if let Ok(mut cache) = self.services.cache.try_borrow_mut() {
            cache.maybe_cleanup();
        }
    }

    fn move_to(&mut self, next: LoopState) -> Result<()> {
        self.state = self.state.checked(next)?;
        tracing::debug!(variant = %self.effect.variant(), state = %self.state, "render loop state");
        Ok(())
    }

    fn enter_fallback(&mut self, reason: FallbackReason) {
        self.cancel_pending();
        self.release_resources();
        if let Err(err) = self.move_to(LoopState::Fallback(reason)) {
            tracing::debug!(error = %err, "fallback requested from a terminal state");
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(token) = self.pending.take() {
            self.scheduler.cancel(token);
        }
    }

    fn release_resources(&mut self) {
        let held = self.effect.take_pooled();
        if let Some(returns) = &self.returns {
            returns.release(&self.services.pools, held);
        }

        if self.material.take().is_some() {
            if let Ok(mut cache) = self.services.cache.try_borrow_mut() {
                cache.release_unused();
            }
        }
    }
}

impl<E: Effect> Drop for RenderLoop<E> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<E: Effect + std::fmt::Debug> std::fmt::Debug for RenderLoop<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderLoop")
            .field("effect", &self.effect)
            .field("state", &self.state)
            .field("tier", &self.tier)
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        rc::Rc,
    };

    use super::*;
    use crate::{
        config::FxConfig,
        device::StaticProbe,
        effects::{
            DitherEffect, DitherProps, MetaballsEffect, MetaballsProps, NetworkEffect, NetworkProps,
        },
        gpu::{self, HeadlessBackend},
        timeline::{ManualClock, ManualScheduler},
        uniforms::UniformValue,
    };

    struct Toggle(Rc<Cell<bool>>);

    impl ViewportProbe for Toggle {
        fn is_visible(&self) -> bool {
            self.0.get()
        }
    }

    struct Harness {
        gpu: Rc<RefCell<HeadlessBackend>>,
        scheduler: Rc<RefCell<ManualScheduler>>,
        visible: Rc<Cell<bool>>,
        services: FxServices,
    }

    impl Harness {
        fn new(backend: HeadlessBackend) -> Self {
            let (gpu, shared) = gpu::shared(backend);
            let services = FxServices::new(FxConfig::default(), shared, Rc::new(ManualClock::new()));
            Self {
                gpu,
                scheduler: Rc::new(RefCell::new(ManualScheduler::new())),
                visible: Rc::new(Cell::new(true)),
                services,
            }
        }

        fn mount<E: Effect>(&self, effect: E) -> RenderLoop<E> {
            RenderLoop::new(
                effect,
                self.services.clone(),
                Box::new(self.scheduler.clone()),
                Box::new(Toggle(self.visible.clone())),
            )
        }

        /// Fires `count` callbacks spaced 16 ms apart starting at `start_ms`.
        fn run<E: Effect>(&self, lp: &mut RenderLoop<E>, start_ms: f64, count: usize) -> Vec<FrameOutcome> {
            (0..count)
                .map(|i| {
                    assert!(self.scheduler.borrow_mut().fire(), "no frame pending");
                    lp.on_frame(start_ms + i as f64 * 16.0)
                })
                .collect()
        }
    }

    fn high() -> StaticProbe {
        StaticProbe(DeviceProfile::new(8, Some(16.0), false))
    }

    #[test]
    fn frame_skipping_follows_update_interval() {
        for (profile, interval) in [
            (DeviceProfile::new(8, Some(16.0), false), 1),
            (DeviceProfile::new(4, Some(4.0), false), 2),
            (DeviceProfile::new(2, Some(2.0), true), 3),
        ] {
            let h = Harness::new(HeadlessBackend::new());
            let mut lp = h.mount(DitherEffect::new(DitherProps::default()));
            assert_eq!(lp.start(&StaticProbe(profile)).unwrap(), LoopState::Ready);
            assert_eq!(lp.tier().unwrap().settings().update_interval, interval);

            let m = 7;
            let outcomes = h.run(&mut lp, 0.0, m * interval as usize);
            let drawn = outcomes.iter().filter(|o| **o == FrameOutcome::Drawn).count();
            assert_eq!(drawn, m);
            assert_eq!(h.gpu.borrow().draw_calls(), m as u64);
            assert_eq!(lp.frame().skipped, (m * (interval as usize - 1)) as u64);
            assert_eq!(lp.state(), LoopState::Running);
        }
    }

    #[test]
    fn unsupported_device_never_compiles() {
        let h = Harness::new(HeadlessBackend::new());
        let mut lp = h.mount(DitherEffect::new(DitherProps::default()));
        let probe = StaticProbe(DeviceProfile::new(8, Some(16.0), false).without_webgl());

        assert_eq!(
            lp.start(&probe).unwrap(),
            LoopState::Fallback(FallbackReason::Unsupported)
        );
        assert_eq!(h.gpu.borrow().compile_calls(), 0);
        assert!(h.scheduler.borrow().pending().is_none());
        assert_eq!(lp.on_frame(0.0), FrameOutcome::Inactive);
        assert_eq!(
            lp.background(),
            Some(FallbackRenderer.style(FallbackReason::Loading))
        );
    }

    #[test]
    fn compile_failure_falls_back_without_leaking() {
        let h = Harness::new(HeadlessBackend::new().fail_compiles_containing("MAX_BALLS"));
        let mut lp = h.mount(MetaballsEffect::new(MetaballsProps::default()));

        assert_eq!(lp.start(&high()).unwrap(), LoopState::Fallback(FallbackReason::Error));
        assert_eq!(lp.effect().pooled_count(), 0);
        assert_eq!(h.services.pool_stats().total_active, 0);
        assert_eq!(h.services.cache_stats().compile_failures, 1);
        assert!(lp.pending_frame().is_none());
    }

    #[test]
    fn starting_twice_is_rejected() {
        let h = Harness::new(HeadlessBackend::new());
        let mut lp = h.mount(DitherEffect::new(DitherProps::default()));
        lp.start(&high()).unwrap();
        assert!(matches!(
            lp.start(&high()),
            Err(FxError::InvalidTransition { from: "ready", to: "probing" })
        ));
    }

    #[test]
    fn hidden_surface_skips_draws_until_next_check() {
        let h = Harness::new(HeadlessBackend::new());
        let mut lp = h.mount(DitherEffect::new(DitherProps::default()));
        lp.start(&high()).unwrap();

        h.visible.set(false);
        // 0..=144 ms: the first check sees the surface hidden.
        let outcomes = h.run(&mut lp, 0.0, 10);
        assert!(outcomes.iter().all(|o| *o == FrameOutcome::Culled));

        h.visible.set(true);
        assert_eq!(h.run(&mut lp, 160.0, 1), vec![FrameOutcome::Drawn]);
        assert_eq!(lp.frame().culled, 10);
        assert_eq!(h.gpu.borrow().draw_calls(), 1);
    }

    #[test]
    fn pointer_samples_are_throttled_and_smoothed() {
        let h = Harness::new(HeadlessBackend::new());
        let mut lp = h.mount(DitherEffect::new(DitherProps::default()));
        lp.start(&high()).unwrap();

        assert!(lp.pointer_moved(1.0, 1.0, 100.0));
        assert!(!lp.pointer_moved(0.0, 0.0, 110.0));
        assert!(!lp.pointer_moved(f32::NAN, 0.0, 200.0));
        assert_eq!(lp.frame().pointer_target, Vec2::new(1.0, 1.0));
        assert!(lp.pointer_moved(0.9, 0.9, 116.0));

        h.run(&mut lp, 0.0, 1);
        let pointer = lp.frame().pointer;
        assert!((pointer.x - 0.54).abs() < 1e-6);
        assert!((pointer.y - 0.54).abs() < 1e-6);

        let program = lp.material().unwrap().program_id();
        let gpu = h.gpu.borrow();
        let uniforms = gpu.last_uniforms(program).unwrap();
        assert_eq!(uniforms.get("uMouse"), Some(&UniformValue::from(pointer)));
    }

    #[test]
    fn dispose_releases_everything_and_stops_frames() {
        let h = Harness::new(HeadlessBackend::new());
        let before = h.services.pool_stats().total_active;

        let mut lp = h.mount(MetaballsEffect::new(MetaballsProps::default()));
        lp.start(&high()).unwrap();
        h.run(&mut lp, 0.0, 5);
        assert!(h.services.pool_stats().total_active > before);

        lp.dispose();
        assert_eq!(lp.state(), LoopState::Disposed);
        assert_eq!(h.services.pool_stats().total_active, before);
        assert!(h.scheduler.borrow().pending().is_none());
        assert_eq!(h.scheduler.borrow().cancelled(), 1);

        let frames = lp.frame().frame_counter;
        assert_eq!(lp.on_frame(1000.0), FrameOutcome::Inactive);
        assert_eq!(lp.frame().frame_counter, frames);
        assert!(!lp.pointer_moved(0.1, 0.1, 5000.0));

        lp.dispose();
        assert_eq!(h.scheduler.borrow().cancelled(), 1);
        assert!(lp.background().is_none());
    }

    #[test]
    fn dispose_while_pools_are_borrowed_still_returns_objects() {
        let h = Harness::new(HeadlessBackend::new());
        let before = h.services.pool_stats().total_active;

        let mut lp = h.mount(NetworkEffect::new(NetworkProps::default()));
        lp.start(&high()).unwrap();
        assert!(h.services.pool_stats().total_active > before);

        {
            let _guard = h.services.pools.borrow_mut();
            lp.dispose();
        }
        assert_eq!(lp.state(), LoopState::Disposed);
        assert_eq!(h.services.pool_stats().total_active, before);
        assert!(h.services.health_status().healthy);
    }

    #[test]
    fn draw_failure_switches_to_fallback() {
        let h = Harness::new(HeadlessBackend::new());
        let mut lp = h.mount(MetaballsEffect::new(MetaballsProps::default()));
        lp.start(&high()).unwrap();
        h.run(&mut lp, 0.0, 2);

        h.gpu.borrow_mut().set_fail_draws(true);
        assert_eq!(h.run(&mut lp, 32.0, 1), vec![FrameOutcome::Failed]);
        assert_eq!(lp.state(), LoopState::Fallback(FallbackReason::Error));
        assert!(h.scheduler.borrow().pending().is_none());
        assert_eq!(h.services.pool_stats().total_active, 0);
        assert!(lp.background().is_some());
    }

    #[test]
    fn loops_share_compiled_programs() {
        let h = Harness::new(HeadlessBackend::new());
        let mut first = h.mount(DitherEffect::new(DitherProps::default()));
        let mut second = h.mount(DitherEffect::new(DitherProps {
            wave_speed: 0.2,
            ..DitherProps::default()
        }));
        first.start(&high()).unwrap();
        second.start(&high()).unwrap();

        assert_eq!(h.gpu.borrow().compile_calls(), 1);
        assert_eq!(h.services.cache_stats().hits, 1);
        let a = first.material().unwrap();
        let b = second.material().unwrap();
        assert_eq!(a.program_id(), b.program_id());
        assert_ne!(a.uniforms().float("uWaveSpeed"), b.uniforms().float("uWaveSpeed"));
    }

    #[test]
    fn resize_updates_backend_and_uniform() {
        let h = Harness::new(HeadlessBackend::new());
        let mut lp = h.mount(DitherEffect::new(DitherProps::default()));
        lp.start(&high()).unwrap();
        lp.resize(1280, 0);

        assert_eq!(h.gpu.borrow().size(), (1280, 1));
        assert_eq!(
            lp.material().unwrap().uniforms().get("uResolution"),
            Some(&UniformValue::from(Vec2::new(1280.0, 1.0)))
        );
        assert_eq!(lp.pixel_ratio(3.0), 2.0);
        assert_eq!(lp.pixel_ratio(f64::NAN), 1.0);
    }
}
