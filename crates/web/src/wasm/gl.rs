use std::collections::HashMap;

use backdrop_core::{
    FxError, GpuBackend, ProgramId, Result, ShaderSource, UniformValue, Uniforms,
};
use web_sys::{
    WebGl2RenderingContext as GL, WebGlProgram, WebGlShader, WebGlUniformLocation,
    WebGlVertexArrayObject,
};

struct LinkedProgram {
    program: WebGlProgram,
    locations: HashMap<String, Option<WebGlUniformLocation>>,
}

/// [`GpuBackend`] over one WebGL2 context.
///
/// Draws a single full-screen triangle generated from `gl_VertexID`, so the
/// only vertex state is an empty vertex array object.
pub struct WebGlBackend {
    gl: GL,
    vao: Option<WebGlVertexArrayObject>,
    programs: HashMap<ProgramId, LinkedProgram>,
    next_id: u32,
}

impl WebGlBackend {
    pub fn new(gl: GL) -> Self {
        let vao = gl.create_vertex_array();
        gl.enable(GL::BLEND);
        gl.blend_func(GL::SRC_ALPHA, GL::ONE_MINUS_SRC_ALPHA);
        Self {
            gl,
            vao,
            programs: HashMap::new(),
            next_id: 0,
        }
    }

    fn ensure_context(&self) -> Result<()> {
        if self.gl.is_context_lost() {
            Err(FxError::ContextUnavailable("webgl context lost".into()))
        } else {
            Ok(())
        }
    }

    fn compile_stage(&self, kind: u32, source: &str) -> Result<WebGlShader> {
        let shader = self
            .gl
            .create_shader(kind)
            .ok_or_else(|| FxError::ContextUnavailable("createShader returned null".into()))?;
        self.gl.shader_source(&shader, source);
        self.gl.compile_shader(&shader);

        let ok = self
            .gl
            .get_shader_parameter(&shader, GL::COMPILE_STATUS)
            .as_bool()
            .unwrap_or(false);
        if ok {
            Ok(shader)
        } else {
            let log = self.gl.get_shader_info_log(&shader).unwrap_or_default();
            self.gl.delete_shader(Some(&shader));
            Err(FxError::msg(log))
        }
    }
}

impl GpuBackend for WebGlBackend {
    fn compile(&mut self, source: &ShaderSource) -> Result<ProgramId> {
        self.ensure_context()?;
        let vertex = self.compile_stage(GL::VERTEX_SHADER, &source.vertex)?;
        let fragment = match self.compile_stage(GL::FRAGMENT_SHADER, &source.fragment) {
            Ok(fragment) => fragment,
            Err(err) => {
                self.gl.delete_shader(Some(&vertex));
                return Err(err);
            }
        };

        let gl = &self.gl;
        let program = gl
            .create_program()
            .ok_or_else(|| FxError::ContextUnavailable("createProgram returned null".into()))?;
        gl.attach_shader(&program, &vertex);
        gl.attach_shader(&program, &fragment);
        gl.link_program(&program);
        gl.detach_shader(&program, &vertex);
        gl.detach_shader(&program, &fragment);
        gl.delete_shader(Some(&vertex));
        gl.delete_shader(Some(&fragment));

        let linked = gl
            .get_program_parameter(&program, GL::LINK_STATUS)
            .as_bool()
            .unwrap_or(false);
        if !linked {
            let log = gl.get_program_info_log(&program).unwrap_or_default();
            gl.delete_program(Some(&program));
            return Err(FxError::msg(log));
        }

        self.next_id += 1;
        let id = ProgramId(self.next_id);
        self.programs.insert(
            id,
            LinkedProgram {
                program,
                locations: HashMap::new(),
            },
        );
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        if let Some(linked) = self.programs.remove(&program) {
            self.gl.delete_program(Some(&linked.program));
        }
    }

    fn draw(&mut self, program: ProgramId, uniforms: &Uniforms) -> Result<()> {
        self.ensure_context()?;
        let gl = &self.gl;
        let linked = self
            .programs
            .get_mut(&program)
            .ok_or_else(|| FxError::msg(format!("unknown program {}", program.0)))?;

        gl.use_program(Some(&linked.program));
        for (name, value) in uniforms.iter() {
            let location = linked
                .locations
                .entry(name.to_string())
                .or_insert_with(|| gl.get_uniform_location(&linked.program, name));
            if let Some(location) = location.as_ref() {
                upload(gl, location, value);
            }
        }

        gl.bind_vertex_array(self.vao.as_ref());
        gl.clear_color(0.0, 0.0, 0.0, 0.0);
        gl.clear(GL::COLOR_BUFFER_BIT);
        gl.draw_arrays(GL::TRIANGLES, 0, 3);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.gl.viewport(0, 0, width as i32, height as i32);
    }
}

impl Drop for WebGlBackend {
    fn drop(&mut self) {
        for (_, linked) in self.programs.drain() {
            self.gl.delete_program(Some(&linked.program));
        }
        if let Some(vao) = self.vao.take() {
            self.gl.delete_vertex_array(Some(&vao));
        }
    }
}

fn upload(gl: &GL, location: &WebGlUniformLocation, value: &UniformValue) {
    let location = Some(location);
    match value {
        UniformValue::Float(v) => gl.uniform1f(location, *v),
        UniformValue::Int(v) => gl.uniform1i(location, *v),
        UniformValue::Bool(v) => gl.uniform1i(location, i32::from(*v)),
        UniformValue::Vec2([x, y]) => gl.uniform2f(location, *x, *y),
        UniformValue::Vec3([x, y, z]) => gl.uniform3f(location, *x, *y, *z),
        UniformValue::Vec4([x, y, z, w]) => gl.uniform4f(location, *x, *y, *z, *w),
        UniformValue::Mat4(m) => gl.uniform_matrix4fv_with_f32_array(location, false, m),
        UniformValue::Vec2Array(items) if !items.is_empty() => {
            gl.uniform2fv_with_f32_array(location, &flatten(items))
        }
        UniformValue::Vec3Array(items) if !items.is_empty() => {
            gl.uniform3fv_with_f32_array(location, &flatten(items))
        }
        UniformValue::Vec4Array(items) if !items.is_empty() => {
            gl.uniform4fv_with_f32_array(location, &flatten(items))
        }
        // Empty arrays leave the previous contents; the count uniform masks them.
        UniformValue::Vec2Array(_) | UniformValue::Vec3Array(_) | UniformValue::Vec4Array(_) => {}
    }
}

fn flatten<const N: usize>(items: &[[f32; N]]) -> Vec<f32> {
    items.iter().flatten().copied().collect()
}
