use std::{cell::RefCell, path::PathBuf, rc::Rc};

use backdrop_core::{
    gpu, AlwaysVisible, CapabilityProbe, Clock, DeviceProfile, DitherEffect, DitherProps, Effect,
    FallbackReason, FallbackRenderer, FrameOutcome, FxConfig, FxError, FxServices,
    HeadlessBackend, HostProbe, ManualClock, ManualScheduler, MetaballsEffect, MetaballsProps,
    NetworkEffect, NetworkProps, QualityTier, RenderLoop, ShaderVariant, StaticProbe,
};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const FRAME_MS: f64 = 1000.0 / 60.0;

fn main() -> backdrop_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Tiers => run_tiers(),
        Commands::Probe { device } => run_probe(&device),
        Commands::Shader { variant, tier } => run_shader(&variant, &tier),
        Commands::Simulate {
            effect,
            frames,
            config,
            device,
        } => run_simulate(&effect, frames, config.as_ref(), &device),
        Commands::Fallback => run_fallback(),
    }
}

fn run_tiers() -> backdrop_core::Result<()> {
    println!("{:>5} {:>7} {:>7} {:>5} {:>7}", "cores", "memory", "mobile", "score", "tier");
    for cores in [1, 2, 4, 8, 16] {
        for memory in [None, Some(2.0), Some(4.0), Some(8.0), Some(16.0)] {
            for mobile in [false, true] {
                let profile = DeviceProfile::new(cores, memory, mobile);
                let memory = memory.map_or_else(|| "?".to_string(), |gb| format!("{gb}GB"));
                println!(
                    "{:>5} {:>7} {:>7} {:>5} {:>7}",
                    cores,
                    memory,
                    mobile,
                    profile.score(),
                    profile.tier().as_str()
                );
            }
        }
    }
    println!();
    for tier in QualityTier::ALL {
        println!("{tier}: {}", serde_json::to_string(&tier.settings())?);
    }
    Ok(())
}

fn run_probe(device: &DeviceArgs) -> backdrop_core::Result<()> {
    let profile = device.probe().probe();
    tracing::info!(?profile, "probed device");
    let report = json!({
        "profile": profile,
        "cache_key": profile.cache_key(),
        "score": profile.score(),
        "tier": profile.tier(),
        "settings": profile.tier().settings(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_shader(variant: &str, tier: &str) -> backdrop_core::Result<()> {
    let variant = ShaderVariant::parse(variant)
        .ok_or_else(|| FxError::msg(format!("unknown shader variant `{variant}`")))?;
    let tier =
        QualityTier::parse(tier).ok_or_else(|| FxError::msg(format!("unknown tier `{tier}`")))?;

    let source = backdrop_core::shader::generate(variant, tier);
    tracing::info!(%variant, %tier, lines = source.line_count(), "generated shader");
    println!("// ---- vertex ----\n{}", source.vertex);
    println!("// ---- fragment ----\n{}", source.fragment);
    Ok(())
}

fn run_simulate(
    effect: &str,
    frames: u32,
    config: Option<&PathBuf>,
    device: &DeviceArgs,
) -> backdrop_core::Result<()> {
    let config = match config {
        Some(path) => FxConfig::load(path)?,
        None => FxConfig::default(),
    };
    let (backend, shared) = gpu::shared(HeadlessBackend::new());
    let clock = ManualClock::new();
    let services = FxServices::new(config, shared, Rc::new(clock.clone()));
    let probe = device.probe();

    let mut mounts: Vec<Box<dyn Mounted>> = Vec::new();
    for name in effect_names(effect)? {
        let mut mount: Box<dyn Mounted> = match name {
            ShaderVariant::Dither => {
                Box::new(Mount::new(DitherEffect::new(DitherProps::default()), &services))
            }
            ShaderVariant::Metaballs => {
                Box::new(Mount::new(MetaballsEffect::new(MetaballsProps::default()), &services))
            }
            ShaderVariant::DataNetwork => {
                Box::new(Mount::new(NetworkEffect::new(NetworkProps::default()), &services))
            }
        };
        mount.start(probe.as_ref())?;
        mounts.push(mount);
    }

    tracing::info!(frames, effects = mounts.len(), "simulating");
    for frame in 0..frames {
        clock.advance(FRAME_MS);
        let now = clock.now_ms();
        // Slow circular sweep so pointer smoothing has something to chase.
        let angle = frame as f32 * 0.05;
        for mount in &mut mounts {
            mount.pointer(0.5 + 0.3 * angle.cos(), 0.5 + 0.3 * angle.sin(), now);
            mount.fire(now);
        }
    }

    let running = json!({
        "loops": mounts.iter().map(|m| m.summary()).collect::<Vec<_>>(),
        "diagnostics": services.diagnostics(),
        "compile_calls": backend.borrow().compile_calls(),
        "draw_calls": backend.borrow().draw_calls(),
    });

    for mount in &mut mounts {
        mount.dispose();
    }
    let report = json!({
        "running": running,
        "after_unmount": services.diagnostics(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_fallback() -> backdrop_core::Result<()> {
    let renderer = FallbackRenderer;
    for reason in [
        FallbackReason::Loading,
        FallbackReason::Unsupported,
        FallbackReason::Error,
    ] {
        println!("{:>11}: {}", reason.to_string(), renderer.css(reason));
    }
    Ok(())
}

fn effect_names(effect: &str) -> backdrop_core::Result<Vec<ShaderVariant>> {
    if effect == "all" {
        return Ok(ShaderVariant::ALL.to_vec());
    }
    effect
        .split(',')
        .map(|name| {
            ShaderVariant::parse(name.trim())
                .ok_or_else(|| FxError::msg(format!("unknown effect `{name}`")))
        })
        .collect()
}

/// Type-erased view of a mounted loop so different effects can share a page.
trait Mounted {
    fn start(&mut self, probe: &dyn CapabilityProbe) -> backdrop_core::Result<()>;
    fn pointer(&mut self, x: f32, y: f32, now_ms: f64);
    fn fire(&mut self, now_ms: f64) -> FrameOutcome;
    fn summary(&self) -> serde_json::Value;
    fn dispose(&mut self);
}

struct Mount<E: Effect> {
    render: RenderLoop<E>,
    scheduler: Rc<RefCell<ManualScheduler>>,
}

impl<E: Effect> Mount<E> {
    fn new(effect: E, services: &FxServices) -> Self {
        let scheduler = Rc::new(RefCell::new(ManualScheduler::new()));
        let render = RenderLoop::new(
            effect,
            services.clone(),
            Box::new(scheduler.clone()),
            Box::new(AlwaysVisible),
        );
        Self { render, scheduler }
    }
}

impl<E: Effect> Mounted for Mount<E> {
    fn start(&mut self, probe: &dyn CapabilityProbe) -> backdrop_core::Result<()> {
        let state = self.render.start(probe)?;
        tracing::info!(variant = %self.render.effect().variant(), %state, "mounted");
        Ok(())
    }

    fn pointer(&mut self, x: f32, y: f32, now_ms: f64) {
        self.render.pointer_moved(x, y, now_ms);
    }

    fn fire(&mut self, now_ms: f64) -> FrameOutcome {
        if self.scheduler.borrow_mut().fire() {
            self.render.on_frame(now_ms)
        } else {
            FrameOutcome::Inactive
        }
    }

    fn summary(&self) -> serde_json::Value {
        let frame = self.render.frame();
        json!({
            "effect": self.render.effect().variant(),
            "state": self.render.state().to_string(),
            "tier": self.render.tier(),
            "frames": frame.frame_counter,
            "updates": frame.updates,
            "draws": frame.draws,
            "skipped": frame.skipped,
            "culled": frame.culled,
            "pooled": self.render.effect().pooled_count(),
            "pointer": frame.pointer,
        })
    }

    fn dispose(&mut self) {
        self.render.dispose();
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Device-adaptive backdrop effects toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the quality tier for every core/memory/mobile combination.
    Tiers,
    /// Score a device profile. Without `--cores` the host is probed.
    Probe {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Dump the generated GLSL for a variant at a tier.
    Shader {
        /// `dither`, `metaballs` or `data_network`.
        variant: String,
        /// `low`, `medium` or `high`.
        tier: String,
    },
    /// Run render loops against a headless GPU and report diagnostics.
    Simulate {
        /// Comma separated effect list, or `all`.
        #[arg(short, long, default_value = "all")]
        effect: String,
        /// Number of animation frames to fire.
        #[arg(short, long, default_value_t = 120)]
        frames: u32,
        /// Optional JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Print the fallback CSS for every reason.
    Fallback,
}

#[derive(Args, Debug)]
struct DeviceArgs {
    /// Logical core count of the simulated device.
    #[arg(long)]
    cores: Option<u32>,
    /// Reported device memory in GB.
    #[arg(long)]
    memory: Option<f32>,
    #[arg(long)]
    mobile: bool,
    /// Simulate a browser without WebGL.
    #[arg(long)]
    no_webgl: bool,
}

impl DeviceArgs {
    fn probe(&self) -> Box<dyn CapabilityProbe> {
        let Some(cores) = self.cores else {
            let host = HostProbe.probe();
            let profile = DeviceProfile {
                device_memory_gb: self.memory,
                is_mobile: self.mobile,
                ..host
            };
            return Box::new(StaticProbe(self.webgl(profile)));
        };
        let profile = DeviceProfile::new(cores, self.memory, self.mobile);
        Box::new(StaticProbe(self.webgl(profile)))
    }

    fn webgl(&self, profile: DeviceProfile) -> DeviceProfile {
        if self.no_webgl {
            profile.without_webgl()
        } else {
            profile
        }
    }
}
