use serde::{Deserialize, Serialize};

use crate::{
    device::TierSettings,
    pool::{Color, Held, PoolBatch, PoolManager, Vec2},
    shader::ShaderVariant,
    uniforms::Uniforms,
};

use super::{finite_or, Effect, FrameInput};

/// Props of the ordered-dither wave background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DitherProps {
    pub wave_speed: f32,
    pub wave_frequency: f32,
    pub wave_amplitude: f32,
    pub wave_color: [f32; 3],
    /// Quantisation levels per channel, clamped to `2..=16`.
    pub color_num: f32,
    /// Size of one dither cell in device pixels, at least 1.
    pub pixel_size: f32,
    pub disable_animation: bool,
    pub enable_mouse_interaction: bool,
    pub mouse_radius: f32,
}

impl Default for DitherProps {
    fn default() -> Self {
        Self {
            wave_speed: 0.05,
            wave_frequency: 3.0,
            wave_amplitude: 0.3,
            wave_color: [0.5, 0.5, 0.5],
            color_num: 4.0,
            pixel_size: 2.0,
            disable_animation: false,
            enable_mouse_interaction: true,
            mouse_radius: 0.3,
        }
    }
}

impl DitherProps {
    fn sanitized(&self) -> Self {
        let defaults = Self::default();
        let channel = |c: f32| finite_or(c, 0.5).clamp(0.0, 1.0);
        Self {
            wave_speed: finite_or(self.wave_speed, defaults.wave_speed).max(0.0),
            wave_frequency: finite_or(self.wave_frequency, defaults.wave_frequency).max(0.0),
            wave_amplitude: finite_or(self.wave_amplitude, defaults.wave_amplitude).clamp(0.0, 1.0),
            wave_color: self.wave_color.map(channel),
            color_num: finite_or(self.color_num, defaults.color_num).clamp(2.0, 16.0),
            pixel_size: finite_or(self.pixel_size, defaults.pixel_size).max(1.0),
            mouse_radius: finite_or(self.mouse_radius, defaults.mouse_radius).max(0.0),
            ..self.clone()
        }
    }
}

#[derive(Debug)]
pub struct DitherEffect {
    props: DitherProps,
    resolution: Option<Box<Vec2>>,
    mouse: Option<Box<Vec2>>,
}

impl DitherEffect {
    pub fn new(props: DitherProps) -> Self {
        Self {
            props: props.sanitized(),
            resolution: None,
            mouse: None,
        }
    }

    pub fn props(&self) -> &DitherProps {
        &self.props
    }
}

impl Effect for DitherEffect {
    fn variant(&self) -> ShaderVariant {
        ShaderVariant::Dither
    }

    fn configure(&mut self, settings: &TierSettings) {
        // Cells smaller than the matrix waste fill rate on low tiers.
        if settings.dither_matrix_size <= 2 {
            self.props.pixel_size = self.props.pixel_size.max(3.0);
        }
    }

    fn uniform_overrides(&self) -> Uniforms {
        let [r, g, b] = self.props.wave_color;
        Uniforms::new()
            .with("uWaveSpeed", self.props.wave_speed)
            .with("uWaveFrequency", self.props.wave_frequency)
            .with("uWaveAmplitude", self.props.wave_amplitude)
            .with("uWaveColor", Color::new(r, g, b))
            .with("uColorNum", self.props.color_num)
            .with("uPixelSize", self.props.pixel_size)
            .with("uMouseRadius", self.props.mouse_radius)
            .with("uEnableMouse", self.props.enable_mouse_interaction)
    }

    fn acquire(&mut self, pools: &mut PoolManager) {
        self.resolution = Some(pools.acquire(Vec2::new(1.0, 1.0)));
        self.mouse = Some(pools.acquire(Vec2::new(0.5, 0.5)));
    }

    fn update(&mut self, input: &FrameInput, _batch: &mut PoolBatch, uniforms: &mut Uniforms) {
        if !self.props.disable_animation {
            uniforms.set("uTime", input.time);
        }
        if let Some(resolution) = self.resolution.as_deref_mut() {
            *resolution = input.resolution;
            uniforms.set("uResolution", *resolution);
        }
        if self.props.enable_mouse_interaction {
            if let Some(mouse) = self.mouse.as_deref_mut() {
                *mouse = input.pointer;
                uniforms.set("uMouse", *mouse);
            }
        }
    }

    fn take_pooled(&mut self) -> Vec<Held> {
        [self.resolution.take(), self.mouse.take()]
            .into_iter()
            .flatten()
            .map(Held::from)
            .collect()
    }

    fn pooled_count(&self) -> usize {
        usize::from(self.resolution.is_some()) + usize::from(self.mouse.is_some())
    }
}
