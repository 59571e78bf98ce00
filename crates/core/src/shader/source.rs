//! GLSL generation specialised per quality tier.
//!
//! Loops over octaves, metaballs, particles and links are unrolled here and
//! every uniform array has a fixed length, so the driver sees straight-line
//! code whose instruction count scales with the tier.

use crate::{
    device::QualityTier,
    pool::{Color, Vec2},
    uniforms::{UniformValue, Uniforms},
};

use super::{ShaderSource, ShaderVariant};

const BAYER_2X2: [u8; 4] = [0, 2, 3, 1];
const BAYER_4X4: [u8; 16] = [0, 8, 2, 10, 12, 4, 14, 6, 3, 11, 1, 9, 15, 7, 13, 5];

const VERTEX: &str = "#version 300 es
precision highp float;
out vec2 vUv;
void main() {
    vec2 pos = vec2(float((gl_VertexID << 1) & 2), float(gl_VertexID & 2));
    vUv = pos;
    gl_Position = vec4(pos * 2.0 - 1.0, 0.0, 1.0);
}
";

/// Generates the program for `variant` at `tier`. Pure: equal inputs give
/// byte-identical output.
pub fn generate(variant: ShaderVariant, tier: QualityTier) -> ShaderSource {
    let fragment = match variant {
        ShaderVariant::Dither => dither_fragment(tier),
        ShaderVariant::Metaballs => metaballs_fragment(tier),
        ShaderVariant::DataNetwork => network_fragment(tier),
    };
    ShaderSource {
        vertex: VERTEX.to_string(),
        fragment,
    }
}

/// Uniform values a freshly compiled program starts with.
pub fn uniform_defaults(variant: ShaderVariant, tier: QualityTier) -> Uniforms {
    let settings = tier.settings();
    let base = Uniforms::new()
        .with("uTime", 0.0_f32)
        .with("uResolution", Vec2::new(1.0, 1.0))
        .with("uMouse", Vec2::new(0.5, 0.5));

    match variant {
        ShaderVariant::Dither => base
            .with("uWaveSpeed", 0.05_f32)
            .with("uWaveFrequency", 3.0_f32)
            .with("uWaveAmplitude", 0.3_f32)
            .with("uWaveColor", Color::new(0.5, 0.5, 0.5))
            .with("uColorNum", 4.0_f32)
            .with("uPixelSize", 2.0_f32)
            .with("uMouseRadius", 0.3_f32)
            .with("uEnableMouse", true),
        ShaderVariant::Metaballs => base
            .with("uColor", Color::new(1.0, 1.0, 1.0))
            .with("uCursorColor", Color::new(1.0, 1.0, 1.0))
            .with("uCursorBall", UniformValue::Vec3([0.0, 0.0, 0.0]))
            .with("uBallCount", 0_i32)
            .with(
                "uBalls",
                UniformValue::Vec3Array(vec![[0.0; 3]; settings.max_balls]),
            )
            .with("uTransparent", true),
        ShaderVariant::DataNetwork => base
            .with("uColor", Color::new(0.3, 0.6, 1.0))
            .with("uParticleCount", 0_i32)
            .with(
                "uParticles",
                UniformValue::Vec2Array(vec![[0.0; 2]; settings.max_particles]),
            )
            .with("uLinkCount", 0_i32)
            .with(
                "uLinks",
                UniformValue::Vec4Array(vec![[0.0; 4]; settings.max_links()]),
            )
            .with("uTransparent", true),
    }
}

fn header(variant: ShaderVariant, tier: QualityTier) -> String {
    format!(
        "#version 300 es\n// backdrop {variant} ({tier})\nprecision highp float;\nin vec2 vUv;\nout vec4 fragColor;\n"
    )
}

fn float_list(values: impl Iterator<Item = f32>) -> String {
    values
        .map(|v| format!("{v:.6}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn dither_fragment(tier: QualityTier) -> String {
    let settings = tier.settings();
    let size = settings.dither_matrix_size;
    let (cells, scale): (&[u8], f32) = if size == 2 {
        (&BAYER_2X2[..], 4.0)
    } else {
        (&BAYER_4X4[..], 16.0)
    };
    let len = cells.len();
    let matrix = float_list(cells.iter().map(|&c| c as f32 / scale));

    let mut octaves = String::new();
    for octave in 0..settings.noise_octaves {
        octaves.push_str(&format!(
            "    // octave {octave}\n    value += amp * abs(noise(p));\n    p *= uWaveFrequency;\n    amp *= uWaveAmplitude;\n"
        ));
    }

    let mut src = header(ShaderVariant::Dither, tier);
    src.push_str(
        "uniform float uTime;
uniform vec2 uResolution;
uniform vec2 uMouse;
uniform float uWaveSpeed;
uniform float uWaveFrequency;
uniform float uWaveAmplitude;
uniform vec3 uWaveColor;
uniform float uColorNum;
uniform float uPixelSize;
uniform float uMouseRadius;
uniform bool uEnableMouse;
",
    );
    src.push_str(&format!(
        "const int DITHER_SIZE = {size};\nconst float bayer[{len}] = float[{len}]({matrix});\n"
    ));
    src.push_str(
        "
float hash(vec2 p) {
    return fract(sin(dot(p, vec2(127.1, 311.7))) * 43758.5453);
}

float noise(vec2 p) {
    vec2 i = floor(p);
    vec2 f = fract(p);
    vec2 u = f * f * (3.0 - 2.0 * f);
    float a = hash(i);
    float b = hash(i + vec2(1.0, 0.0));
    float c = hash(i + vec2(0.0, 1.0));
    float d = hash(i + vec2(1.0, 1.0));
    return mix(mix(a, b, u.x), mix(c, d, u.x), u.y) * 2.0 - 1.0;
}

float fbm(vec2 p) {
    float value = 0.0;
    float amp = 1.0;
",
    );
    src.push_str(&octaves);
    src.push_str(
        "    return value;
}

vec3 dither(vec2 fragCoord, vec3 color) {
    vec2 cell = floor(fragCoord / uPixelSize);
    int x = int(mod(cell.x, float(DITHER_SIZE)));
    int y = int(mod(cell.y, float(DITHER_SIZE)));
    float threshold = bayer[y * DITHER_SIZE + x] - 0.25;
    float levels = max(uColorNum - 1.0, 1.0);
    color += threshold / levels;
    color = clamp(color - 0.2, 0.0, 1.0);
    return floor(color * levels + 0.5) / levels;
}

void main() {
    vec2 uv = vUv - 0.5;
    uv.x *= uResolution.x / uResolution.y;
    float f = fbm(uv + fbm(uv - uTime * uWaveSpeed));
    if (uEnableMouse) {
        vec2 mouse = (uMouse - 0.5) * vec2(uResolution.x / uResolution.y, 1.0);
        float d = length(uv - mouse);
        f -= 0.5 * (1.0 - smoothstep(0.0, uMouseRadius, d));
    }
    vec3 color = mix(vec3(0.0), uWaveColor, f);
    fragColor = vec4(dither(gl_FragCoord.xy, color), 1.0);
}
",
    );
    src
}

fn metaballs_fragment(tier: QualityTier) -> String {
    let max_balls = tier.settings().max_balls;

    let mut field = String::new();
    for i in 0..max_balls {
        field.push_str(&format!(
            "    if (uBallCount > {i}) sum += ball(p, uBalls[{i}]);\n"
        ));
    }

    let mut src = header(ShaderVariant::Metaballs, tier);
    src.push_str(&format!("const int MAX_BALLS = {max_balls};\n"));
    src.push_str(
        "uniform vec2 uResolution;
uniform vec3 uColor;
uniform vec3 uCursorColor;
uniform vec3 uCursorBall;
uniform int uBallCount;
uniform vec3 uBalls[MAX_BALLS];
uniform bool uTransparent;

float ball(vec2 p, vec3 b) {
    vec2 d = p - b.xy;
    return (b.z * b.z) / max(dot(d, d), 1e-4);
}

void main() {
    vec2 p = vUv * uResolution;
    float sum = 0.0;
",
    );
    src.push_str(&field);
    src.push_str(
        "    float cursor = ball(p, uCursorBall);
    float total = sum + cursor;
    float inside = smoothstep(0.9, 1.0, total);
    vec3 color = mix(uColor, uCursorColor, cursor / max(total, 1e-4));
    float alpha = uTransparent ? inside : 1.0;
    fragColor = vec4(color * inside, alpha);
}
",
    );
    src
}

fn network_fragment(tier: QualityTier) -> String {
    let settings = tier.settings();
    let max_particles = settings.max_particles;
    let max_links = settings.max_links();

    let mut dots = String::new();
    for i in 0..max_particles {
        dots.push_str(&format!(
            "    if (uParticleCount > {i}) glow += dotGlow(p, uParticles[{i}]);\n"
        ));
    }
    let mut links = String::new();
    for i in 0..max_links {
        links.push_str(&format!(
            "    if (uLinkCount > {i}) line = max(line, segment(p, uLinks[{i}]));\n"
        ));
    }

    let mut src = header(ShaderVariant::DataNetwork, tier);
    src.push_str(&format!(
        "const int MAX_PARTICLES = {max_particles};\nconst int MAX_LINKS = {max_links};\n"
    ));
    src.push_str(
        "uniform float uTime;
uniform vec2 uResolution;
uniform vec2 uMouse;
uniform vec3 uColor;
uniform int uParticleCount;
uniform vec2 uParticles[MAX_PARTICLES];
uniform int uLinkCount;
uniform vec4 uLinks[MAX_LINKS];
uniform bool uTransparent;

float dotGlow(vec2 p, vec2 c) {
    float d = length(p - c);
    return 0.0025 / max(d * d, 1e-5);
}

float segment(vec2 p, vec4 s) {
    vec2 a = s.xy;
    vec2 b = s.zw;
    vec2 pa = p - a;
    vec2 ba = b - a;
    float h = clamp(dot(pa, ba) / max(dot(ba, ba), 1e-6), 0.0, 1.0);
    float d = length(pa - ba * h);
    return 1.0 - smoothstep(0.0, 0.004, d);
}

void main() {
    vec2 p = vUv;
    float glow = 0.0;
    float line = 0.0;
",
    );
    src.push_str(&dots);
    src.push_str(&links);
    src.push_str(
        "    float halo = 1.0 - smoothstep(0.0, 0.25, length(p - uMouse));
    float intensity = clamp(glow + line * 0.35 + halo * 0.1, 0.0, 1.0);
    float alpha = uTransparent ? intensity : 1.0;
    fragColor = vec4(uColor * intensity, alpha);
}
",
    );
    src
}
