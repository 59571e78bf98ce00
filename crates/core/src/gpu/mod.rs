//! Seam between the engine and whatever actually talks to the GPU.

mod headless;

pub use headless::HeadlessBackend;

use std::{cell::RefCell, rc::Rc};

use crate::{shader::ShaderSource, uniforms::Uniforms, Result};

/// Backend-assigned handle of a linked vertex + fragment program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// Minimal GPU surface the engine needs.
pub trait GpuBackend {
    /// Compiles and links `source`. This is the expensive call the shader
    /// cache exists to avoid.
    fn compile(&mut self, source: &ShaderSource) -> Result<ProgramId>;

    /// Frees a program. Unknown ids are ignored.
    fn delete_program(&mut self, program: ProgramId);

    /// Uploads `uniforms` and draws one full-surface pass with `program`.
    fn draw(&mut self, program: ProgramId, uniforms: &Uniforms) -> Result<()>;

    fn resize(&mut self, width: u32, height: u32);
}

pub type SharedGpu = Rc<RefCell<dyn GpuBackend>>;

/// Wraps a concrete backend into the shared handle used by the services.
pub fn shared<B: GpuBackend + 'static>(backend: B) -> (Rc<RefCell<B>>, SharedGpu) {
    let concrete = Rc::new(RefCell::new(backend));
    let erased: SharedGpu = concrete.clone();
    (concrete, erased)
}
