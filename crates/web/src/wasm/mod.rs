use wasm_bindgen::prelude::*;

mod gl;
mod mount;
mod probe;

pub use gl::WebGlBackend;
pub use mount::{configure, mount_dither, mount_metaballs, mount_network, pool_stats, EffectHandle};
pub use probe::{DocumentViewport, NavigatorProbe, PerformanceClock};

/// Routes panics and `tracing` output to the browser console.
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
    tracing_wasm::set_as_global_default();
}
