//! Shader programs and the host-to-shader binding protocol.
//!
//! A [`Shader`] is created from opaque stage sources, linked once and then driven through
//! [`Shader::begin`] / [`Shader::end`]. Uniform, attribute and block lookups are cached per
//! shader; names that the program does not declare are skipped silently.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::backend::{ActiveUniform, ImageAccess, ProgramId, ShaderId, UniformLocation};
use crate::capabilities::Requirement;
use crate::color_buffer::ColorBuffer;
use crate::context::GraphicsContext;
use crate::error::{Error, Result};
use crate::format::PixelFormat;
use crate::session::Lifetime;
use crate::shader_storage_buffer::ShaderStorageBuffer;
use crate::texture::Sampled;
use crate::uniform::{UniformType, UniformValue};

/// A programmable pipeline stage.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
}

impl ShaderStage {
    pub fn native(self) -> u32 {
        match self {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::TessellationControl => glow::TESS_CONTROL_SHADER,
            ShaderStage::TessellationEvaluation => glow::TESS_EVALUATION_SHADER,
            ShaderStage::Geometry => glow::GEOMETRY_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::TessellationControl => "tessellation control",
            ShaderStage::TessellationEvaluation => "tessellation evaluation",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Fragment => "fragment",
        };

        f.write_str(name)
    }
}

/// Stage sources of a program.
///
/// ```
/// use draw_glow::shader::ShaderSources;
///
/// let sources = ShaderSources::new("flat", "void main() {}", "void main() {}");
/// assert!(sources.geometry.is_none());
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ShaderSources {
    /// Used in diagnostics only.
    pub name: String,
    pub vertex: String,
    pub tessellation_control: Option<String>,
    pub tessellation_evaluation: Option<String>,
    pub geometry: Option<String>,
    pub fragment: String,
}

impl ShaderSources {
    pub fn new(name: &str, vertex: &str, fragment: &str) -> Self {
        ShaderSources {
            name: name.to_owned(),
            vertex: vertex.to_owned(),
            fragment: fragment.to_owned(),
            ..Default::default()
        }
    }

    pub fn with_geometry(mut self, geometry: &str) -> Self {
        self.geometry = Some(geometry.to_owned());
        self
    }

    pub fn with_tessellation(mut self, control: &str, evaluation: &str) -> Self {
        self.tessellation_control = Some(control.to_owned());
        self.tessellation_evaluation = Some(evaluation.to_owned());
        self
    }

    fn stages(&self) -> Vec<(ShaderStage, &str)> {
        let mut stages = vec![(ShaderStage::Vertex, self.vertex.as_str())];

        if let Some(src) = &self.tessellation_control {
            stages.push((ShaderStage::TessellationControl, src));
        }

        if let Some(src) = &self.tessellation_evaluation {
            stages.push((ShaderStage::TessellationEvaluation, src));
        }

        if let Some(src) = &self.geometry {
            stages.push((ShaderStage::Geometry, src));
        }

        stages.push((ShaderStage::Fragment, self.fragment.as_str()));
        stages
    }
}

/// Split `name[index]` into the array name and the element index; other names are element 0.
fn array_element(name: &str) -> (&str, u32) {
    name.strip_suffix(']')
        .and_then(|rest| rest.rsplit_once('['))
        .and_then(|(base, index)| Some((base, index.parse().ok()?)))
        .unwrap_or((name, 0))
}

/// Cached information about a declared uniform.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct UniformSlot {
    location: UniformLocation,
    ty: UniformType,
    size: u32,
}

/// A linked shader program.
///
/// Cloning a `Shader` yields another handle to the same program.
#[derive(Clone)]
pub struct Shader(Rc<ShaderInner>);

struct ShaderInner {
    context: GraphicsContext,
    lifetime: Lifetime,
    name: String,
    program: ProgramId,
    running: Cell<bool>,
    declared: HashMap<String, ActiveUniform>,
    uniforms: RefCell<HashMap<String, Option<UniformSlot>>>,
    attributes: RefCell<HashMap<String, Option<u32>>>,
    blocks: RefCell<HashMap<String, Option<u32>>>,
    block_bindings: RefCell<HashMap<u32, u32>>,
    storage_blocks: RefCell<HashMap<String, Option<u32>>>,
    storage_bindings: RefCell<HashMap<String, u32>>,
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Shader")
            .field("name", &self.0.name)
            .field("program", &self.0.program)
            .field("running", &self.0.running.get())
            .finish()
    }
}

impl Shader {
    pub(crate) fn new(context: &GraphicsContext, sources: &ShaderSources) -> Result<Self> {
        context.check()?;
        let caps = context.capabilities();

        if sources.tessellation_control.is_some() || sources.tessellation_evaluation.is_some() {
            caps.require("tessellation shaders", Requirement::TESSELLATION)?;
        }

        if sources.geometry.is_some() {
            caps.require("geometry shaders", Requirement::GEOMETRY_SHADERS)?;
        }

        let mut compiled: Vec<ShaderId> = Vec::new();
        for (stage, source) in sources.stages() {
            let result = context.with_backend("compile_shader", |b| {
                Ok(b.compile_shader(stage, source))
            })?;

            match result {
                Ok(id) => compiled.push(id),
                Err(log) => {
                    log::error!(
                        "{} shader of '{}' failed to compile:\n{}",
                        stage,
                        sources.name,
                        log
                    );
                    delete_stages(context, &compiled);
                    return Err(Error::Compile {
                        stage,
                        shader_source: source.to_owned(),
                        log,
                    });
                }
            }
        }

        let linked = context.with_backend("link_program", |b| Ok(b.link_program(&compiled)))?;
        delete_stages(context, &compiled);

        let program = linked.map_err(|log| {
            log::error!("shader '{}' failed to link:\n{}", sources.name, log);
            Error::Link {
                name: sources.name.clone(),
                log,
            }
        })?;

        let declared = context
            .with_backend("active_uniforms", |b| Ok(b.active_uniforms(program)))?
            .into_iter()
            .map(|u| (u.name.clone(), u))
            .collect();

        log::debug!("linked shader '{}' as {:?}", sources.name, program);

        Ok(Shader(Rc::new(ShaderInner {
            context: context.clone(),
            lifetime: Lifetime::new(context),
            name: sources.name.clone(),
            program,
            running: Cell::new(false),
            declared,
            uniforms: RefCell::new(HashMap::new()),
            attributes: RefCell::new(HashMap::new()),
            blocks: RefCell::new(HashMap::new()),
            block_bindings: RefCell::new(HashMap::new()),
            storage_blocks: RefCell::new(HashMap::new()),
            storage_bindings: RefCell::new(HashMap::new()),
        })))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_running(&self) -> bool {
        self.0.running.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.lifetime.is_destroyed()
    }

    pub(crate) fn lifetime(&self) -> &Lifetime {
        &self.0.lifetime
    }

    pub(crate) fn program(&self) -> ProgramId {
        self.0.program
    }

    pub(crate) fn check(&self) -> Result<()> {
        self.0.lifetime.check("shader")
    }

    /// Make the program current.
    pub fn begin(&self) -> Result<()> {
        self.check()?;
        self.0.running.set(true);
        self.0
            .context
            .with_backend("use_program", |b| Ok(b.use_program(Some(self.0.program))))
    }

    pub fn end(&self) -> Result<()> {
        self.check()?;
        self.0.running.set(false);
        self.0
            .context
            .with_backend("use_program", |b| Ok(b.use_program(None)))
    }

    fn uniform_slot(&self, name: &str) -> Option<UniformSlot> {
        if let Some(slot) = self.0.uniforms.borrow().get(name) {
            return *slot;
        }

        let (key, element) = array_element(name);
        let slot = self.0.declared.get(key).and_then(|declared| {
            if element >= declared.size.max(1) {
                log::debug!(
                    "uniform '{}' of shader '{}' has {} elements",
                    key,
                    self.0.name,
                    declared.size
                );
                return None;
            }

            let location = self
                .0
                .context
                .backend()
                .uniform_location(self.0.program, name)?;

            Some(UniformSlot {
                location,
                ty: declared.ty,
                size: declared.size,
            })
        });

        if slot.is_none() {
            log::trace!("shader '{}' has no uniform '{}'", self.0.name, name);
        }

        self.0.uniforms.borrow_mut().insert(name.to_owned(), slot);
        slot
    }

    /// Whether the program declares an active uniform `name`.
    pub fn has_uniform(&self, name: &str) -> bool {
        self.uniform_slot(name).is_some()
    }

    /// Set a uniform; names the program does not declare are ignored.
    pub fn uniform(&self, name: &str, value: UniformValue) -> Result<()> {
        self.check()?;

        let slot = match self.uniform_slot(name) {
            Some(slot) => slot,
            None => return Ok(()),
        };

        if !value.matches(slot.ty) {
            return Err(Error::UniformTypeMismatch {
                name: name.to_owned(),
                declared: if slot.size > 1 {
                    format!("{}[{}]", slot.ty, slot.size)
                } else {
                    slot.ty.to_string()
                },
                requested: value.type_name().to_owned(),
            });
        }

        let value = value.resolved();
        self.0.context.with_backend("uniform", |b| {
            b.set_uniform(self.0.program, slot.location, &value)
        })
    }

    /// Bind `texture` to `unit` and point the sampler uniform `name` at it.
    ///
    /// Units are allocated by the caller, see [`TextureUnits`](crate::uniform::TextureUnits).
    pub fn texture(&self, name: &str, unit: u32, texture: &dyn Sampled) -> Result<()> {
        self.check()?;
        texture.bind_sampled(unit)?;
        self.uniform(name, UniformValue::Int(unit as i32))
    }

    /// Bind one level of a colour buffer to image unit `unit`.
    pub fn image(
        &self,
        name: &str,
        unit: u32,
        color_buffer: &ColorBuffer,
        level: u32,
        access: ImageAccess,
    ) -> Result<()> {
        self.check()?;
        self.0
            .context
            .capabilities()
            .require("image load/store", Requirement::IMAGE_LOAD_STORE)?;

        let core = color_buffer.core();
        core.check()?;

        if let PixelFormat::Color(format, _) = core.desc.format {
            if format.component_count() == 3 {
                return Err(Error::usage(format!(
                    "image binding of color buffer with format {:?} is not supported",
                    format
                )));
            }
        }

        if self.uniform_slot(name).is_none() {
            return Ok(());
        }

        let image = core.image(level, 0)?;
        let native = core.desc.native;
        self.0.context.with_backend("bind_image_texture", |b| {
            b.bind_image_texture(unit, image, access, native)
        })?;

        self.uniform(name, UniformValue::Int(unit as i32))
    }

    /// Bind a storage buffer to the storage block `name`.
    ///
    /// A program without such a block is logged and otherwise ignored.
    pub fn buffer(&self, name: &str, buffer: &ShaderStorageBuffer) -> Result<()> {
        self.check()?;
        buffer.check()?;

        let index = match self.storage_block_index(name) {
            Some(index) => index,
            None => {
                log::warn!(
                    "shader '{}' has no storage block '{}', buffer not bound",
                    self.0.name,
                    name
                );
                return Ok(());
            }
        };

        let binding = {
            let mut bindings = self.0.storage_bindings.borrow_mut();
            let next = bindings.len() as u32;
            match bindings.get(name) {
                Some(&binding) => binding,
                None => {
                    bindings.insert(name.to_owned(), next);
                    let program = self.0.program;
                    self.0.context.with_backend("storage_block_binding", |b| {
                        Ok(b.storage_block_binding(program, index, next))
                    })?;
                    next
                }
            }
        };

        let id = buffer.id();
        self.0.context.with_backend("bind_storage_buffer", |b| {
            b.bind_storage_buffer(binding, Some(id))
        })
    }

    fn storage_block_index(&self, name: &str) -> Option<u32> {
        if let Some(index) = self.0.storage_blocks.borrow().get(name) {
            return *index;
        }

        let index = self
            .0
            .context
            .backend()
            .storage_block_index(self.0.program, name);
        self.0
            .storage_blocks
            .borrow_mut()
            .insert(name.to_owned(), index);
        index
    }

    /// Assign the uniform block `name` to a binding point.
    ///
    /// The shader must be running.
    pub fn block(&self, name: &str, binding: u32) -> Result<()> {
        self.check()?;

        if !self.is_running() {
            return Err(Error::usage(format!(
                "shader '{}' is not running, call begin() before binding blocks",
                self.0.name
            )));
        }

        let cached = self.0.blocks.borrow().get(name).copied();
        let index = match cached {
            Some(index) => index,
            None => {
                let index = self
                    .0
                    .context
                    .backend()
                    .uniform_block_index(self.0.program, name);
                self.0.blocks.borrow_mut().insert(name.to_owned(), index);
                index
            }
        };

        let index = index.ok_or_else(|| {
            Error::usage(format!(
                "shader '{}' has no uniform block '{}'",
                self.0.name, name
            ))
        })?;

        if self.0.block_bindings.borrow().get(&index) == Some(&binding) {
            return Ok(());
        }

        let program = self.0.program;
        self.0.context.with_backend("uniform_block_binding", |b| {
            Ok(b.uniform_block_binding(program, index, binding))
        })?;
        self.0.block_bindings.borrow_mut().insert(index, binding);

        Ok(())
    }

    /// Location of the vertex attribute `name`.
    pub fn attribute_index(&self, name: &str) -> Option<u32> {
        if self.is_destroyed() {
            return None;
        }

        if let Some(location) = self.0.attributes.borrow().get(name) {
            return *location;
        }

        let location = self
            .0
            .context
            .backend()
            .attribute_location(self.0.program, name);
        self.0
            .attributes
            .borrow_mut()
            .insert(name.to_owned(), location);
        location
    }

    /// Free the program and every vertex array built for it.
    pub fn destroy(&self) -> Result<()> {
        if !self.0.lifetime.begin_destroy() {
            return Ok(());
        }

        self.0.running.set(false);
        self.0.uniforms.borrow_mut().clear();
        self.0.attributes.borrow_mut().clear();
        self.0.blocks.borrow_mut().clear();
        self.0.block_bindings.borrow_mut().clear();
        self.0.storage_blocks.borrow_mut().clear();
        self.0.storage_bindings.borrow_mut().clear();

        let program = self.0.program;
        self.0.context.evict_program(program);
        self.0
            .context
            .with_backend("delete_program", |b| Ok(b.delete_program(program)))
    }
}

fn delete_stages(context: &GraphicsContext, stages: &[ShaderId]) {
    let mut backend = context.backend();
    for &stage in stages {
        backend.delete_shader(stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered_like_the_pipeline() {
        let sources = ShaderSources::new("s", "v", "f")
            .with_geometry("g")
            .with_tessellation("tc", "te");
        let stages: Vec<ShaderStage> = sources.stages().into_iter().map(|(s, _)| s).collect();

        assert_eq!(
            stages,
            vec![
                ShaderStage::Vertex,
                ShaderStage::TessellationControl,
                ShaderStage::TessellationEvaluation,
                ShaderStage::Geometry,
                ShaderStage::Fragment,
            ]
        );
    }

    #[test]
    fn array_element_names() {
        assert_eq!(array_element("u_values[3]"), ("u_values", 3));
        assert_eq!(array_element("u_values[0]"), ("u_values", 0));
        assert_eq!(array_element("u_values"), ("u_values", 0));
        assert_eq!(array_element("u_lights[1].color"), ("u_lights[1].color", 0));
        assert_eq!(array_element("u_values[i]"), ("u_values[i]", 0));
    }

    #[test]
    fn stage_names() {
        assert_eq!(ShaderStage::TessellationControl.to_string(), "tessellation control");
        assert_eq!(ShaderStage::Fragment.native(), glow::FRAGMENT_SHADER);
    }
}
