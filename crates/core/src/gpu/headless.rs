use std::collections::{BTreeMap, HashSet};

use crate::{shader::ShaderSource, uniforms::Uniforms, FxError, Result};

use super::{GpuBackend, ProgramId};

/// In-memory backend used by the command line simulator and by tests.
///
/// It does no rendering; it validates that sources look like GLSL, hands
/// out program ids, and counts every call.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u32,
    live: HashSet<ProgramId>,
    compile_calls: u64,
    delete_calls: u64,
    draw_calls: u64,
    fail_compile_containing: Option<String>,
    fail_draws: bool,
    last_uniforms: BTreeMap<ProgramId, Uniforms>,
    size: (u32, u32),
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self {
            size: (1, 1),
            ..Self::default()
        }
    }

    /// Any fragment source containing `marker` fails to compile.
    pub fn fail_compiles_containing(mut self, marker: impl Into<String>) -> Self {
        self.fail_compile_containing = Some(marker.into());
        self
    }

    pub fn set_fail_draws(&mut self, fail: bool) {
        self.fail_draws = fail;
    }

    pub fn compile_calls(&self) -> u64 {
        self.compile_calls
    }

    pub fn delete_calls(&self) -> u64 {
        self.delete_calls
    }

    pub fn draw_calls(&self) -> u64 {
        self.draw_calls
    }

    pub fn live_programs(&self) -> usize {
        self.live.len()
    }

    pub fn is_live(&self, program: ProgramId) -> bool {
        self.live.contains(&program)
    }

    pub fn last_uniforms(&self, program: ProgramId) -> Option<&Uniforms> {
        self.last_uniforms.get(&program)
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }
}

impl GpuBackend for HeadlessBackend {
    fn compile(&mut self, source: &ShaderSource) -> Result<ProgramId> {
        self.compile_calls += 1;

        if !source.fragment.contains("void main") || !source.vertex.contains("void main") {
            return Err(FxError::msg("shader stage has no entry point"));
        }
        if let Some(marker) = &self.fail_compile_containing {
            if source.fragment.contains(marker.as_str()) {
                return Err(FxError::msg(format!("injected failure on `{marker}`")));
            }
        }

        self.next_id += 1;
        let id = ProgramId(self.next_id);
        self.live.insert(id);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.delete_calls += 1;
        self.live.remove(&program);
        self.last_uniforms.remove(&program);
    }

    fn draw(&mut self, program: ProgramId, uniforms: &Uniforms) -> Result<()> {
        if self.fail_draws {
            return Err(FxError::ContextUnavailable("context lost".into()));
        }
        if !self.live.contains(&program) {
            return Err(FxError::msg(format!("draw with deleted program {}", program.0)));
        }
        self.draw_calls += 1;
        self.last_uniforms.insert(program, uniforms.clone());
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width.max(1), height.max(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(fragment: &str) -> ShaderSource {
        ShaderSource {
            vertex: "void main() {}".to_string(),
            fragment: fragment.to_string(),
        }
    }

    #[test]
    fn counts_compiles_and_draws() {
        let mut gpu = HeadlessBackend::new();
        let program = gpu.compile(&source("void main() {}")).unwrap();
        gpu.draw(program, &Uniforms::new().with("uTime", 1.0_f32)).unwrap();

        assert_eq!(gpu.compile_calls(), 1);
        assert_eq!(gpu.draw_calls(), 1);
        assert_eq!(gpu.last_uniforms(program).unwrap().float("uTime"), Some(1.0));
    }

    #[test]
    fn rejects_draws_with_deleted_programs() {
        let mut gpu = HeadlessBackend::new();
        let program = gpu.compile(&source("void main() {}")).unwrap();
        gpu.delete_program(program);
        assert!(gpu.draw(program, &Uniforms::new()).is_err());
        assert_eq!(gpu.live_programs(), 0);
    }

    #[test]
    fn injected_failures_only_hit_matching_sources() {
        let mut gpu = HeadlessBackend::new().fail_compiles_containing("BROKEN");
        assert!(gpu.compile(&source("// BROKEN\nvoid main() {}")).is_err());
        assert!(gpu.compile(&source("void main() {}")).is_ok());
        assert_eq!(gpu.compile_calls(), 2);
    }
}
