//! Core library for the device-adaptive backdrop effects.
//!
//! Each module owns one subsystem: capability probing and quality tiers,
//! shader generation and the compiled-program cache, object pools, the
//! per-effect render loop, and the static fallback. Everything is
//! single-threaded; shared services live behind `Rc<RefCell<_>>` and are
//! handed to each render loop through [`FxServices`].

pub mod config;
pub mod device;
pub mod effects;
pub mod error;
pub mod fallback;
pub mod gpu;
pub mod pool;
pub mod render;
pub mod shader;
pub mod timeline;
pub mod uniforms;

pub use config::{CacheConfig, FxConfig, PoolConfig, RenderConfig};
pub use device::{CapabilityProbe, DeviceProfile, HostProbe, QualityTier, StaticProbe, TierSettings};
pub use effects::{
    DitherEffect, DitherProps, Effect, FrameInput, MetaballsEffect, MetaballsProps, NetworkEffect,
    NetworkProps,
};
pub use error::{FxError, Result};
pub use fallback::{FallbackReason, FallbackRenderer, FallbackStyle};
pub use gpu::{GpuBackend, HeadlessBackend, ProgramId, SharedGpu};
pub use pool::{PoolBatch, PoolHealth, PoolManager, PoolStats, ReturnQueue, SharedPools};
pub use render::{
    AlwaysVisible, AnimationFrameState, Diagnostics, FrameOutcome, FxServices, LoopState,
    RenderLoop, ViewportProbe,
};
pub use shader::{CacheStats, ShaderCacheManager, ShaderMaterial, ShaderSource, ShaderVariant};
pub use timeline::{
    Clock, FrameScheduler, FrameToken, ManualClock, ManualScheduler, SharedClock, SystemClock,
};
pub use uniforms::{UniformValue, Uniforms};
