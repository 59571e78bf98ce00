use std::f32::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::{
    device::TierSettings,
    pool::{Color, Held, PoolBatch, PoolManager, Vec2},
    shader::ShaderVariant,
    uniforms::{UniformValue, Uniforms},
};

use super::{clamp_count, finite_or, unit_hash, Effect, FrameInput};

/// Props of the particle field with proximity links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkProps {
    pub color: String,
    /// Requested particle count; clamped to the tier maximum.
    pub particle_count: i64,
    /// Particles closer than this (normalised units) are linked.
    pub connection_distance: f32,
    pub speed: f32,
    /// Radius around the pointer inside which particles are pushed away.
    pub cursor_radius: f32,
    pub enable_mouse_interaction: bool,
    pub transparent: bool,
}

impl Default for NetworkProps {
    fn default() -> Self {
        Self {
            color: "#4d9bff".to_string(),
            particle_count: 12,
            connection_distance: 0.15,
            speed: 0.2,
            cursor_radius: 0.15,
            enable_mouse_interaction: true,
            transparent: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Anchor {
    base: Vec2,
    amplitude: f32,
    speed: f32,
    phase: f32,
}

#[derive(Debug)]
pub struct NetworkEffect {
    props: NetworkProps,
    color: Color,
    particle_count: usize,
    max_links: usize,
    anchors: Vec<Anchor>,
    particles: Vec<Box<Vec2>>,
    links: Vec<[f32; 4]>,
}

impl NetworkEffect {
    pub fn new(props: NetworkProps) -> Self {
        let color = Color::from_hex(&props.color).unwrap_or(Color::new(0.3, 0.6, 1.0));
        let particle_count = props.particle_count.max(0) as usize;
        Self {
            props,
            color,
            particle_count,
            max_links: 0,
            anchors: Vec::new(),
            particles: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn particle_count(&self) -> usize {
        self.particle_count
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn particles(&self) -> impl Iterator<Item = Vec2> + '_ {
        self.particles.iter().map(|p| **p)
    }

    fn rebuild_links(&mut self) {
        let max_links = self.max_links;
        let limit = finite_or(self.props.connection_distance, 0.15).max(0.0);
        self.links.clear();
        'outer: for (i, a) in self.particles.iter().enumerate() {
            for b in &self.particles[i + 1..] {
                if self.links.len() >= max_links {
                    break 'outer;
                }
                if a.distance(**b) < limit {
                    self.links.push([a.x, a.y, b.x, b.y]);
                }
            }
        }
    }
}

impl Effect for NetworkEffect {
    fn variant(&self) -> ShaderVariant {
        ShaderVariant::DataNetwork
    }

    fn configure(&mut self, settings: &TierSettings) {
        self.particle_count = clamp_count(self.props.particle_count, settings.max_particles);
        self.max_links = settings.max_links();
        self.anchors = (0..self.particle_count as u32)
            .map(|i| Anchor {
                base: Vec2::new(
                    0.05 + unit_hash(i, 11) * 0.9,
                    0.05 + unit_hash(i, 12) * 0.9,
                ),
                amplitude: 0.01 + unit_hash(i, 13) * 0.04,
                speed: 0.5 + unit_hash(i, 14),
                phase: unit_hash(i, 15) * TAU,
            })
            .collect();
    }

    fn uniform_overrides(&self) -> Uniforms {
        Uniforms::new()
            .with("uColor", self.color)
            .with("uParticleCount", self.particle_count as i32)
            .with("uTransparent", self.props.transparent)
    }

    fn acquire(&mut self, pools: &mut PoolManager) {
        self.particles = self
            .anchors
            .iter()
            .map(|anchor| pools.acquire(anchor.base))
            .collect();
    }

    fn update(&mut self, input: &FrameInput, batch: &mut PoolBatch, uniforms: &mut Uniforms) {
        let t = input.time * finite_or(self.props.speed, 0.2);
        let cursor_radius = finite_or(self.props.cursor_radius, 0.15).max(0.0);
        let pointer = *batch.acquire(input.pointer);

        for (particle, anchor) in self.particles.iter_mut().zip(&self.anchors) {
            let angle = t * anchor.speed + anchor.phase;
            particle.set(
                anchor.base.x + angle.cos() * anchor.amplitude,
                anchor.base.y + (angle * 1.1).sin() * anchor.amplitude,
            );

            if self.props.enable_mouse_interaction && cursor_radius > 0.0 {
                let d = particle.distance(pointer);
                if d > 1e-6 && d < cursor_radius {
                    let push = (cursor_radius - d) / cursor_radius * 0.05;
                    let dir = batch.acquire(Vec2::new(
                        (particle.x - pointer.x) / d,
                        (particle.y - pointer.y) / d,
                    ));
                    particle.x += dir.x * push;
                    particle.y += dir.y * push;
                }
            }
        }
        self.rebuild_links();

        uniforms.set("uTime", input.time);
        uniforms.set("uResolution", input.resolution);
        uniforms.set("uMouse", pointer);
        uniforms.set("uParticleCount", self.particle_count as i32);
        uniforms.set(
            "uParticles",
            UniformValue::Vec2Array(self.particles.iter().map(|p| p.to_array()).collect()),
        );
        uniforms.set("uLinkCount", self.links.len() as i32);
        uniforms.set("uLinks", UniformValue::Vec4Array(self.links.clone()));
    }

    fn take_pooled(&mut self) -> Vec<Held> {
        self.particles.drain(..).map(Held::from).collect()
    }

    fn pooled_count(&self) -> usize {
        self.particles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::PoolConfig, device::QualityTier};

    fn configured(count: i64, tier: QualityTier) -> NetworkEffect {
        let mut fx = NetworkEffect::new(NetworkProps {
            particle_count: count,
            ..NetworkProps::default()
        });
        fx.configure(&tier.settings());
        fx
    }

    #[test]
    fn particle_count_is_capped_per_tier() {
        assert_eq!(configured(500, QualityTier::Low).particle_count(), 5);
        assert_eq!(configured(500, QualityTier::Medium).particle_count(), 8);
        assert_eq!(configured(500, QualityTier::High).particle_count(), 12);
        assert_eq!(configured(3, QualityTier::High).particle_count(), 3);
        assert_eq!(configured(-1, QualityTier::High).particle_count(), 0);
    }

    #[test]
    fn links_respect_distance_and_cap() {
        let pools = PoolManager::shared(&PoolConfig::default());
        let mut fx = configured(12, QualityTier::High);
        fx.acquire(&mut pools.borrow_mut());

        let mut uniforms = Uniforms::new();
        let input = FrameInput {
            time: 1.0,
            resolution: Vec2::new(640.0, 480.0),
            pointer: Vec2::new(-1.0, -1.0),
        };
        let mut batch = PoolBatch::new(pools.clone());
        fx.update(&input, &mut batch, &mut uniforms);
        drop(batch);

        assert!(fx.link_count() <= QualityTier::High.settings().max_links());
        match uniforms.get("uLinks") {
            Some(UniformValue::Vec4Array(links)) => {
                assert_eq!(links.len(), fx.link_count());
                for [ax, ay, bx, by] in links {
                    let d = Vec2::new(*ax, *ay).distance(Vec2::new(*bx, *by));
                    assert!(d < 0.15);
                }
            }
            other => panic!("unexpected uLinks: {other:?}"),
        }

        for held in fx.take_pooled() {
            pools.borrow_mut().release_held(held);
        }
        assert_eq!(pools.borrow().stats().total_active, 0);
    }

    #[test]
    fn pointer_pushes_nearby_particles_away() {
        let pools = PoolManager::shared(&PoolConfig::default());
        let mut fx = configured(1, QualityTier::High);
        fx.acquire(&mut pools.borrow_mut());

        let anchor = fx.anchors[0];
        let far = FrameInput {
            time: 0.0,
            resolution: Vec2::new(100.0, 100.0),
            pointer: Vec2::new(5.0, 5.0),
        };
        let mut batch = PoolBatch::new(pools.clone());
        fx.update(&far, &mut batch, &mut Uniforms::new());
        let undisturbed = fx.particles().next().unwrap();

        let near = FrameInput {
            pointer: Vec2::new(undisturbed.x + 0.01, undisturbed.y),
            ..far
        };
        fx.update(&near, &mut batch, &mut Uniforms::new());
        let pushed = fx.particles().next().unwrap();

        assert!(pushed.x < undisturbed.x);
        assert!((undisturbed.x - anchor.base.x).abs() <= anchor.amplitude + 1e-6);
        batch.dispose();
        for held in fx.take_pooled() {
            pools.borrow_mut().release_held(held);
        }
    }
}
