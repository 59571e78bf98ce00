//! Browser bindings: mounts the backdrop effects onto WebGL2 canvases.
//!
//! Everything that touches the DOM is compiled for `wasm32` only. The
//! geometry and props helpers in [`input`] are plain Rust so they can be
//! tested on the host.

pub mod input;

pub use input::{drawing_buffer_size, intersects_viewport, normalized_pointer, parse_props, Rect};

// Only compile wasm-specific code when targeting wasm32.
#[cfg(target_arch = "wasm32")]
mod wasm;

#[cfg(target_arch = "wasm32")]
pub use wasm::{
    configure, mount_dither, mount_metaballs, mount_network, pool_stats, DocumentViewport,
    EffectHandle, NavigatorProbe, PerformanceClock, WebGlBackend,
};
