use std::f32::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::{
    device::TierSettings,
    pool::{Color, Held, PoolBatch, PoolManager, Vec2, Vec3},
    shader::ShaderVariant,
    uniforms::{UniformValue, Uniforms},
};

use super::{clamp_count, finite_or, unit_hash, Effect, FrameInput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaballsProps {
    /// Hex color of the blobs.
    pub color: String,
    pub cursor_ball_color: String,
    /// Requested number of balls; clamped to the tier maximum.
    pub ball_count: i64,
    pub speed: f32,
    /// Orbit radius as a fraction of the shorter canvas side.
    pub animation_size: f32,
    /// Spread multiplier: below 1 pulls balls together.
    pub clump_factor: f32,
    pub cursor_ball_size: f32,
    pub enable_mouse_interaction: bool,
    pub enable_transparency: bool,
}

impl Default for MetaballsProps {
    fn default() -> Self {
        Self {
            color: "#ffffff".to_string(),
            cursor_ball_color: "#ffffff".to_string(),
            ball_count: 15,
            speed: 0.3,
            animation_size: 0.3,
            clump_factor: 1.0,
            cursor_ball_size: 3.0,
            enable_mouse_interaction: true,
            enable_transparency: false,
        }
    }
}

/// Per-ball motion parameters, fixed at configure time.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Orbit {
    speed: f32,
    phase: f32,
    radius: f32,
    wobble: f32,
}

#[derive(Debug)]
pub struct MetaballsEffect {
    props: MetaballsProps,
    color: Color,
    cursor_color: Color,
    ball_count: usize,
    orbits: Vec<Orbit>,
    balls: Vec<Box<Vec3>>,
    cursor: Option<Box<Vec3>>,
}

impl MetaballsEffect {
    pub fn new(props: MetaballsProps) -> Self {
        let color = Color::from_hex(&props.color).unwrap_or(Color::new(1.0, 1.0, 1.0));
        let cursor_color = Color::from_hex(&props.cursor_ball_color).unwrap_or(color);
        let ball_count = props.ball_count.max(0) as usize;
        Self {
            props,
            color,
            cursor_color,
            ball_count,
            orbits: Vec::new(),
            balls: Vec::new(),
            cursor: None,
        }
    }

    /// Number of balls after clamping to the tier.
    pub fn ball_count(&self) -> usize {
        self.ball_count
    }

    /// Current ball centres and radii in pixels.
    pub fn balls(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.balls.iter().map(|ball| **ball)
    }
}

impl Effect for MetaballsEffect {
    fn variant(&self) -> ShaderVariant {
        ShaderVariant::Metaballs
    }

    fn configure(&mut self, settings: &TierSettings) {
        self.ball_count = clamp_count(self.props.ball_count, settings.max_balls);
        self.orbits = (0..self.ball_count as u32)
            .map(|i| Orbit {
                speed: 0.3 + unit_hash(i, 1) * 0.7,
                phase: unit_hash(i, 2) * TAU,
                radius: 0.05 + unit_hash(i, 3) * 0.05,
                wobble: 0.5 + unit_hash(i, 4),
            })
            .collect();
    }

    fn uniform_overrides(&self) -> Uniforms {
        Uniforms::new()
            .with("uColor", self.color)
            .with("uCursorColor", self.cursor_color)
            .with("uBallCount", self.ball_count as i32)
            .with("uTransparent", self.props.enable_transparency)
    }

    fn acquire(&mut self, pools: &mut PoolManager) {
        self.balls = (0..self.ball_count).map(|_| pools.acquire(Vec3::ZERO)).collect();
        if self.props.enable_mouse_interaction {
            self.cursor = Some(pools.acquire(Vec3::ZERO));
        }
    }

    fn update(&mut self, input: &FrameInput, batch: &mut PoolBatch, uniforms: &mut Uniforms) {
        let res = input.resolution;
        let short_side = res.x.min(res.y).max(1.0);
        let spread = finite_or(self.props.animation_size, 0.3) * finite_or(self.props.clump_factor, 1.0);
        let t = input.time * finite_or(self.props.speed, 0.3);

        let center = batch.acquire(Vec2::new(res.x * 0.5, res.y * 0.5));
        let (cx, cy) = (center.x, center.y);

        for (ball, orbit) in self.balls.iter_mut().zip(&self.orbits) {
            let angle = t * orbit.speed + orbit.phase;
            ball.set(
                cx + angle.cos() * spread * short_side,
                cy + (angle * orbit.wobble).sin() * spread * short_side,
                orbit.radius * short_side,
            );
        }

        if let Some(cursor) = self.cursor.as_deref_mut() {
            cursor.set(
                input.pointer.x * res.x,
                input.pointer.y * res.y,
                finite_or(self.props.cursor_ball_size, 3.0).max(0.0) * short_side / 100.0,
            );
            uniforms.set("uCursorBall", *cursor);
        } else {
            uniforms.set("uCursorBall", Vec3::ZERO);
        }

        uniforms.set("uResolution", res);
        uniforms.set("uBallCount", self.ball_count as i32);
        uniforms.set(
            "uBalls",
            UniformValue::Vec3Array(self.balls.iter().map(|b| b.to_array()).collect()),
        );
    }

    fn take_pooled(&mut self) -> Vec<Held> {
        self.balls
            .drain(..)
            .chain(self.cursor.take())
            .map(Held::from)
            .collect()
    }

    fn pooled_count(&self) -> usize {
        self.balls.len() + usize::from(self.cursor.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::PoolConfig, device::QualityTier};

    fn effect(count: i64) -> MetaballsEffect {
        MetaballsEffect::new(MetaballsProps {
            ball_count: count,
            ..MetaballsProps::default()
        })
    }

    #[test]
    fn ball_count_is_capped_per_tier() {
        for (tier, cap) in [
            (QualityTier::Low, 5),
            (QualityTier::Medium, 8),
            (QualityTier::High, 12),
        ] {
            let mut fx = effect(50);
            fx.configure(&tier.settings());
            assert_eq!(fx.ball_count(), cap);
        }

        let mut negative = effect(-4);
        negative.configure(&QualityTier::High.settings());
        assert_eq!(negative.ball_count(), 0);
    }

    #[test]
    fn balls_stay_within_orbit_bounds() {
        let pools = PoolManager::shared(&PoolConfig::default());
        let mut fx = effect(12);
        fx.configure(&QualityTier::High.settings());
        fx.acquire(&mut pools.borrow_mut());
        assert_eq!(fx.pooled_count(), 13);

        let mut uniforms = Uniforms::new();
        let input = FrameInput {
            time: 3.7,
            resolution: Vec2::new(1000.0, 500.0),
            pointer: Vec2::new(0.5, 0.5),
        };
        let mut batch = PoolBatch::new(pools.clone());
        fx.update(&input, &mut batch, &mut uniforms);
        batch.dispose();

        for ball in fx.balls() {
            assert!((ball.x - 500.0).abs() <= 0.3 * 500.0 + 1e-3);
            assert!((ball.y - 250.0).abs() <= 0.3 * 500.0 + 1e-3);
            assert!(ball.z > 0.0);
        }
        match uniforms.get("uBalls") {
            Some(UniformValue::Vec3Array(balls)) => assert_eq!(balls.len(), 12),
            other => panic!("unexpected uBalls: {other:?}"),
        }
        assert_eq!(
            uniforms.get("uCursorBall"),
            Some(&UniformValue::Vec3([500.0, 250.0, 15.0]))
        );

        for held in fx.take_pooled() {
            pools.borrow_mut().release_held(held);
        }
        assert_eq!(pools.borrow().stats().total_active, 0);
    }

    #[test]
    fn invalid_colors_fall_back_to_white() {
        let fx = MetaballsEffect::new(MetaballsProps {
            color: "not-a-color".into(),
            cursor_ball_color: "#zzz".into(),
            ..MetaballsProps::default()
        });
        assert_eq!(
            fx.uniform_overrides().get("uColor"),
            Some(&UniformValue::Vec3([1.0, 1.0, 1.0]))
        );
    }
}
