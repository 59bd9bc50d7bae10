//! The driver facade.
//!
//! [`Driver`] owns a [`GraphicsContext`], creates resources into sessions and dispatches draws.
//! Vertex arrays are built on demand from the vertex formats of the bound buffers and the
//! attribute locations of the shader, and cached per context.

use std::fmt;
use std::ops::Range;

use crate::array_cubemap::ArrayCubemap;
use crate::array_texture::{ArrayTexture, ArrayTextureDescriptor};
use crate::backend::{Backend, DrawCall, IndexSource, VertexArrayId, VertexAttribute};
use crate::capabilities::{Requirement, MAX_VERTEX_ATTRIBUTES};
use crate::color_buffer::{ColorBuffer, ColorBufferDescriptor};
use crate::config::DriverConfiguration;
use crate::context::GraphicsContext;
use crate::cubemap::{Cubemap, CubemapDescriptor};
use crate::depth_buffer::{DepthBuffer, DepthBufferDescriptor};
use crate::draw_style::{self, DrawStyle};
use crate::error::{Error, Result};
use crate::format::ColorRGBa;
use crate::index_buffer::IndexBuffer;
use crate::render_target::{RenderTarget, RenderTargetDescriptor};
use crate::session::{Resource, Session};
use crate::shader::{Shader, ShaderSources};
use crate::shader_storage_buffer::ShaderStorageBuffer;
use crate::vao::VertexDescription;
use crate::vertex_buffer::VertexBuffer;
use crate::vertex_format::{DrawPrimitive, IndexType, VertexFormat};
use crate::volume_texture::{VolumeTexture, VolumeTextureDescriptor};

/// Source of shader programs, provided by the embedding application.
///
/// The driver hands it back unchanged; sources are opaque to this crate.
pub trait ShaderGenerators {
    /// Sources of the program called `name`, if this generator knows it.
    fn sources(&self, name: &str) -> Option<ShaderSources>;
}

/// Creates resources and issues draws on one context.
pub struct Driver {
    context: GraphicsContext,
    generators: Option<Box<dyn ShaderGenerators>>,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Driver")
            .field("context", &self.context)
            .field("shader_generators", &self.generators.is_some())
            .finish()
    }
}

impl Driver {
    pub fn new(backend: Box<dyn Backend>, config: DriverConfiguration) -> Result<Self> {
        Ok(Self::from_context(GraphicsContext::new(backend, config)?))
    }

    pub fn from_context(context: GraphicsContext) -> Self {
        Driver {
            context,
            generators: None,
        }
    }

    pub fn with_shader_generators(mut self, generators: Box<dyn ShaderGenerators>) -> Self {
        self.generators = Some(generators);
        self
    }

    pub fn context(&self) -> &GraphicsContext {
        &self.context
    }

    pub fn shader_generators(&self) -> Option<&dyn ShaderGenerators> {
        self.generators.as_deref()
    }

    /// Register `resource` with `session`, or with the active session.
    ///
    /// A resource that cannot be tracked is destroyed again.
    fn track<R>(&self, resource: R, session: Option<&Session>) -> Result<R>
    where
        R: Clone + Into<Resource>,
    {
        let session = match session {
            Some(session) => session.clone(),
            None => self.context.active_session()?,
        };

        let handle: Resource = resource.clone().into();
        if let Err(e) = session.track(handle.clone()) {
            handle.destroy()?;
            return Err(e);
        }

        Ok(resource)
    }

    pub fn create_color_buffer(
        &self,
        desc: &ColorBufferDescriptor,
        session: Option<&Session>,
    ) -> Result<ColorBuffer> {
        self.track(ColorBuffer::new(&self.context, desc)?, session)
    }

    pub fn create_depth_buffer(
        &self,
        desc: &DepthBufferDescriptor,
        session: Option<&Session>,
    ) -> Result<DepthBuffer> {
        self.track(DepthBuffer::new(&self.context, desc)?, session)
    }

    pub fn create_cubemap(
        &self,
        desc: &CubemapDescriptor,
        session: Option<&Session>,
    ) -> Result<Cubemap> {
        self.track(Cubemap::new(&self.context, desc)?, session)
    }

    pub fn create_array_texture(
        &self,
        desc: &ArrayTextureDescriptor,
        session: Option<&Session>,
    ) -> Result<ArrayTexture> {
        self.track(ArrayTexture::new(&self.context, desc)?, session)
    }

    pub fn create_array_cubemap(
        &self,
        desc: &CubemapDescriptor,
        layers: u32,
        session: Option<&Session>,
    ) -> Result<ArrayCubemap> {
        self.track(ArrayCubemap::new(&self.context, desc, layers)?, session)
    }

    pub fn create_volume_texture(
        &self,
        desc: &VolumeTextureDescriptor,
        session: Option<&Session>,
    ) -> Result<VolumeTexture> {
        self.track(VolumeTexture::new(&self.context, desc)?, session)
    }

    pub fn create_dynamic_vertex_buffer(
        &self,
        format: &VertexFormat,
        vertex_count: usize,
        session: Option<&Session>,
    ) -> Result<VertexBuffer> {
        self.track(VertexBuffer::new(&self.context, format, vertex_count)?, session)
    }

    pub fn create_dynamic_index_buffer(
        &self,
        ty: IndexType,
        index_count: usize,
        session: Option<&Session>,
    ) -> Result<IndexBuffer> {
        self.track(IndexBuffer::new(&self.context, ty, index_count)?, session)
    }

    pub fn create_shader_storage_buffer(
        &self,
        format: &VertexFormat,
        count: usize,
        session: Option<&Session>,
    ) -> Result<ShaderStorageBuffer> {
        self.track(ShaderStorageBuffer::new(&self.context, format, count)?, session)
    }

    pub fn create_shader(&self, sources: &ShaderSources, session: Option<&Session>) -> Result<Shader> {
        self.track(Shader::new(&self.context, sources)?, session)
    }

    pub fn create_render_target(
        &self,
        desc: &RenderTargetDescriptor,
        session: Option<&Session>,
    ) -> Result<RenderTarget> {
        self.track(RenderTarget::new(&self.context, desc)?, session)
    }

    /// Apply `style`, issuing only what changed since the last call.
    pub fn set_state(&self, style: &DrawStyle) -> Result<()> {
        draw_style::set_state(&self.context, style)
    }

    /// Apply every field of `style`, regardless of the cached state.
    pub fn set_state_forced(&self, style: &DrawStyle) -> Result<()> {
        draw_style::set_state_forced(&self.context, style)
    }

    /// Clear the active render target.
    pub fn clear(&self, color: ColorRGBa) -> Result<()> {
        self.context.active_render_target()?.clear(color)
    }

    pub fn active_render_target(&self) -> Result<RenderTarget> {
        self.context.active_render_target()
    }

    pub fn program_render_target(&self) -> Result<RenderTarget> {
        self.context.program_render_target()
    }

    /// Attribute bindings for every element of `buffers` that `shader` declares.
    fn attribute_bindings(
        &self,
        shader: &Shader,
        buffers: &[VertexBuffer],
        prefix: &str,
        divisor: u32,
    ) -> Vec<VertexAttribute> {
        let mut bindings = Vec::new();

        for buffer in buffers {
            let format = buffer.vertex_format();
            let stride = format.size();

            for item in format.items().iter().filter(|item| !item.is_padding()) {
                let name = format!("{}_{}", prefix, item.attribute);
                let base = match shader.attribute_index(&name) {
                    Some(location) => location,
                    None => continue,
                };

                let columns = item.ty.columns();
                let per_element = columns.unwrap_or(1);
                let components = match columns {
                    Some(columns) => columns,
                    None => item.ty.component_count(),
                };
                let column_size = components * item.ty.scalar().size();

                for element in 0..item.array_size {
                    for column in 0..per_element {
                        bindings.push(VertexAttribute {
                            location: base + element * per_element + column,
                            buffer: buffer.id(),
                            components,
                            scalar: item.ty.scalar(),
                            stride,
                            offset: item.offset
                                + element * item.ty.size_in_bytes()
                                + column * column_size,
                            divisor,
                        });
                    }
                }
            }
        }

        bindings
    }

    /// The cached vertex array for this shader and buffer combination, built on a miss.
    fn vertex_array(
        &self,
        shader: &Shader,
        vertex_buffers: &[VertexBuffer],
        instance_buffers: &[VertexBuffer],
    ) -> Result<VertexArrayId> {
        let description = VertexDescription {
            context: self.context.id(),
            program: shader.program(),
            vertex_buffers: vertex_buffers.iter().map(VertexBuffer::id).collect(),
            instance_buffers: instance_buffers.iter().map(VertexBuffer::id).collect(),
        };

        if let Some(vao) = self.context.vaos().get(&description) {
            return Ok(vao);
        }

        let mut bindings = self.attribute_bindings(shader, vertex_buffers, "a", 0);
        bindings.extend(self.attribute_bindings(shader, instance_buffers, "i", 1));

        if bindings.len() > MAX_VERTEX_ATTRIBUTES as usize {
            return Err(Error::VertexAttributeLimit {
                count: bindings.len(),
                limit: MAX_VERTEX_ATTRIBUTES as usize,
            });
        }

        let vao = self.context.with_backend("create_vertex_array", |b| {
            let vao = b.create_vertex_array()?;
            b.bind_vertex_array(Some(vao));
            for binding in &bindings {
                b.vertex_attribute(binding)?;
            }
            b.bind_vertex_array(None);
            Ok(vao)
        })?;

        log::debug!(
            "created vertex array {:?} with {} attributes for {:?}",
            vao,
            bindings.len(),
            description
        );
        self.context.vaos_mut().insert(description, vao);

        Ok(vao)
    }

    fn check_draw(&self, shader: &Shader, buffers: &[&VertexBuffer]) -> Result<()> {
        self.context.check()?;
        shader.check()?;
        for buffer in buffers {
            buffer.check()?;
        }

        // another shader may have become current since this one began
        shader.begin()?;

        Ok(())
    }

    fn dispatch(&self, vao: VertexArrayId, call: DrawCall, vertices_per_patch: u32) -> Result<()> {
        log::trace!("drawing {:?} with {:?}", call, vao);

        let tessellation = self.context.capabilities().tessellation;
        self.context.with_backend("draw", |b| {
            if call.primitive == DrawPrimitive::Patches && tessellation {
                b.patch_vertices(vertices_per_patch);
            }
            b.bind_vertex_array(Some(vao));
            let drawn = b.draw(&call);
            b.bind_vertex_array(None);
            drawn
        })
    }

    fn require_base_instance(&self, instances: &Range<u32>) -> Result<()> {
        if instances.start != 0 {
            self.context
                .capabilities()
                .require("instance offsets", Requirement::BASE_INSTANCE)?;
        }
        Ok(())
    }

    /// Draw `vertices` of the given vertex buffers.
    ///
    /// `vertices_per_patch` is only used for [`DrawPrimitive::Patches`].
    pub fn draw_vertex_buffer(
        &self,
        shader: &Shader,
        vertex_buffers: &[VertexBuffer],
        primitive: DrawPrimitive,
        vertices: Range<u32>,
        vertices_per_patch: u32,
    ) -> Result<()> {
        let buffers: Vec<&VertexBuffer> = vertex_buffers.iter().collect();
        self.check_draw(shader, &buffers)?;

        let vao = self.vertex_array(shader, vertex_buffers, &[])?;
        self.dispatch(
            vao,
            DrawCall {
                primitive,
                first: vertices.start,
                count: vertices.end.saturating_sub(vertices.start),
                instances: 1,
                base_instance: 0,
                indices: None,
            },
            vertices_per_patch,
        )
    }

    /// Draw `indices` of `index_buffer` over the given vertex buffers.
    pub fn draw_indexed_vertex_buffer(
        &self,
        shader: &Shader,
        index_buffer: &IndexBuffer,
        vertex_buffers: &[VertexBuffer],
        primitive: DrawPrimitive,
        indices: Range<u32>,
        vertices_per_patch: u32,
    ) -> Result<()> {
        let buffers: Vec<&VertexBuffer> = vertex_buffers.iter().collect();
        self.check_draw(shader, &buffers)?;
        index_buffer.check()?;

        let vao = self.vertex_array(shader, vertex_buffers, &[])?;
        self.dispatch(
            vao,
            DrawCall {
                primitive,
                first: indices.start,
                count: indices.end.saturating_sub(indices.start),
                instances: 1,
                base_instance: 0,
                indices: Some(IndexSource {
                    buffer: index_buffer.id(),
                    ty: index_buffer.index_type(),
                }),
            },
            vertices_per_patch,
        )
    }

    /// Draw `vertices` once per instance in `instances`.
    pub fn draw_instances(
        &self,
        shader: &Shader,
        vertex_buffers: &[VertexBuffer],
        instance_buffers: &[VertexBuffer],
        primitive: DrawPrimitive,
        vertices: Range<u32>,
        instances: Range<u32>,
        vertices_per_patch: u32,
    ) -> Result<()> {
        let buffers: Vec<&VertexBuffer> = vertex_buffers.iter().chain(instance_buffers).collect();
        self.check_draw(shader, &buffers)?;
        self.require_base_instance(&instances)?;

        let vao = self.vertex_array(shader, vertex_buffers, instance_buffers)?;
        self.dispatch(
            vao,
            DrawCall {
                primitive,
                first: vertices.start,
                count: vertices.end.saturating_sub(vertices.start),
                instances: instances.end.saturating_sub(instances.start),
                base_instance: instances.start,
                indices: None,
            },
            vertices_per_patch,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn draw_indexed_instances(
        &self,
        shader: &Shader,
        index_buffer: &IndexBuffer,
        vertex_buffers: &[VertexBuffer],
        instance_buffers: &[VertexBuffer],
        primitive: DrawPrimitive,
        indices: Range<u32>,
        instances: Range<u32>,
        vertices_per_patch: u32,
    ) -> Result<()> {
        let buffers: Vec<&VertexBuffer> = vertex_buffers.iter().chain(instance_buffers).collect();
        self.check_draw(shader, &buffers)?;
        index_buffer.check()?;
        self.require_base_instance(&instances)?;

        let vao = self.vertex_array(shader, vertex_buffers, instance_buffers)?;
        self.dispatch(
            vao,
            DrawCall {
                primitive,
                first: indices.start,
                count: indices.end.saturating_sub(indices.start),
                instances: instances.end.saturating_sub(instances.start),
                base_instance: instances.start,
                indices: Some(IndexSource {
                    buffer: index_buffer.id(),
                    ty: index_buffer.index_type(),
                }),
            },
            vertices_per_patch,
        )
    }

    /// Flush and wait for the device.
    pub fn finish(&self) -> Result<()> {
        self.context.check()?;
        let mut backend = self.context.backend();
        backend.flush();
        backend.finish();
        Ok(())
    }

    /// End the root session and release every cached vertex array.
    pub fn destroy_context(&self) -> Result<()> {
        self.context.destroy()
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if let Err(e) = self.context.destroy() {
            log::warn!("failed to destroy context: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftBackend;
    use crate::vertex_format::VertexElementType;

    fn driver() -> Driver {
        Driver::new(Box::new(SoftBackend::new(4, 4)), DriverConfiguration::default()).unwrap()
    }

    const VERTEX: &str = "
        in vec3 a_position;
        in mat4 i_transform;
        in vec4 i_color;
        void main() { gl_Position = vec4(a_position, 1.0); }
    ";

    const FRAGMENT: &str = "
        out vec4 o_color;
        void main() { o_color = vec4(1.0, 0.0, 0.0, 1.0); }
    ";

    #[test]
    fn matrices_take_a_location_per_column() {
        let driver = driver();
        let shader = driver
            .create_shader(&ShaderSources::new("instanced", VERTEX, FRAGMENT), None)
            .unwrap();
        let instances = driver
            .create_dynamic_vertex_buffer(
                &VertexFormat::new()
                    .attribute("transform", VertexElementType::MATRIX44_FLOAT32, 1)
                    .padding(4)
                    .color(4),
                2,
                None,
            )
            .unwrap();

        let bindings = driver.attribute_bindings(&shader, &[instances.clone()], "i", 1);
        assert_eq!(bindings.len(), 5);

        let base = shader.attribute_index("i_transform").unwrap();
        for (column, binding) in bindings[..4].iter().enumerate() {
            assert_eq!(binding.location, base + column as u32);
            assert_eq!(binding.offset, 16 * column as u32);
            assert_eq!(binding.components, 4);
            assert_eq!(binding.divisor, 1);
        }
        // padding is skipped but still moves the offset
        assert_eq!(bindings[4].offset, 64 + 4);
        assert_eq!(bindings[4].stride, instances.vertex_format().size());
    }

    #[test]
    fn undeclared_attributes_are_not_bound() {
        let driver = driver();
        let shader = driver
            .create_shader(&ShaderSources::new("plain", VERTEX, FRAGMENT), None)
            .unwrap();
        let vertices = driver
            .create_dynamic_vertex_buffer(&VertexFormat::new().position(3).normal(3), 3, None)
            .unwrap();

        let bindings = driver.attribute_bindings(&shader, &[vertices], "a", 0);
        assert_eq!(bindings.len(), 1);
    }

    #[test]
    fn instance_offsets_need_base_instance() {
        let driver = Driver::new(
            Box::new(SoftBackend::with_version(4, 4, "OpenGL ES 3.2")),
            DriverConfiguration::default(),
        )
        .unwrap();
        let shader = driver
            .create_shader(&ShaderSources::new("plain", VERTEX, FRAGMENT), None)
            .unwrap();
        let vertices = driver
            .create_dynamic_vertex_buffer(&VertexFormat::new().position(3), 3, None)
            .unwrap();

        let err = driver
            .draw_instances(&shader, &[vertices], &[], DrawPrimitive::Triangles, 0..3, 1..2, 0)
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
        assert_eq!(driver.context().vaos().len(), 0);
    }

    #[test]
    fn resources_land_in_the_requested_session() {
        let driver = driver();
        let root = driver.context().root_session().unwrap();
        let child = root.fork("child").unwrap();

        let a = driver
            .create_color_buffer(&ColorBufferDescriptor::new(2, 2), None)
            .unwrap();
        let b = driver
            .create_color_buffer(&ColorBufferDescriptor::new(2, 2), Some(&child))
            .unwrap();

        assert!(root.is_tracking(&a));
        assert!(child.is_tracking(&b));

        child.end().unwrap();
        assert!(b.is_destroyed());
        assert!(!a.is_destroyed());

        let err = driver
            .create_color_buffer(&ColorBufferDescriptor::new(2, 2), Some(&child))
            .unwrap_err();
        assert!(matches!(err, Error::SessionEnded(_)));
    }
}
