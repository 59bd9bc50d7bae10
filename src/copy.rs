//! Texture copies through a fullscreen draw.
//!
//! Some devices refuse blits between attachments of different numeric types or into multisampled
//! attachments. Those copies are served by drawing a triangle covering the target rectangle with
//! a fragment shader that fetches the matching source texel.

use bytemuck::cast_slice;

use crate::backend::{
    AttachmentPoint, BufferId, BufferKind, BufferUsage, Capability, DrawCall, FramebufferId,
    ImageRef, TextureDescriptor, TextureKind, VertexArrayId, VertexAttribute,
};
use crate::capabilities::DriverType;
use crate::context::GraphicsContext;
use crate::error::{Error, Result};
use crate::format::{ColorSampling, PixelFormat};
use crate::shader::{Shader, ShaderSources};
use crate::texture::IntRectangle;
use crate::uniform::UniformValue;
use crate::vertex_format::{DrawPrimitive, ScalarType};

// unit 0 is reserved for internal draws
const COPY_UNIT: u32 = 0;

const TRIANGLE: [f32; 6] = [-1.0, -1.0, 3.0, -1.0, -1.0, 3.0];

/// Per-context objects of the copy draw, created on first use.
#[derive(Debug)]
pub(crate) struct CopyProgram {
    buffer: BufferId,
    vertex_array: VertexArrayId,
    shaders: Vec<(ColorSampling, Shader)>,
}

impl CopyProgram {
    fn create(context: &GraphicsContext) -> Result<Self> {
        let (buffer, vertex_array) = context.with_backend("create_copy_geometry", |b| {
            let buffer = b.create_buffer(
                BufferKind::Vertex,
                std::mem::size_of_val(&TRIANGLE),
                BufferUsage::Dynamic,
            )?;
            b.write_buffer(buffer, 0, cast_slice(&TRIANGLE))?;

            let vertex_array = b.create_vertex_array()?;
            b.bind_vertex_array(Some(vertex_array));
            b.vertex_attribute(&VertexAttribute {
                location: 0,
                buffer,
                components: 2,
                scalar: ScalarType::F32,
                stride: 8,
                offset: 0,
                divisor: 0,
            })?;
            b.bind_vertex_array(None);

            Ok((buffer, vertex_array))
        })?;

        log::debug!("created copy geometry {:?}", vertex_array);

        Ok(CopyProgram {
            buffer,
            vertex_array,
            shaders: Vec::new(),
        })
    }

    fn shader(&mut self, context: &GraphicsContext, sampling: ColorSampling) -> Result<Shader> {
        if let Some((_, shader)) = self.shaders.iter().find(|(s, _)| *s == sampling) {
            return Ok(shader.clone());
        }

        let shader = Shader::new(context, &copy_sources(context, sampling))?;
        self.shaders.push((sampling, shader.clone()));
        Ok(shader)
    }

    pub(crate) fn destroy(&self, context: &GraphicsContext) {
        for (_, shader) in &self.shaders {
            if let Err(e) = shader.destroy() {
                log::warn!("failed to destroy copy shader: {}", e);
            }
        }

        let mut backend = context.backend();
        backend.delete_vertex_array(self.vertex_array);
        backend.delete_buffer(self.buffer);
    }
}

fn copy_sources(context: &GraphicsContext, sampling: ColorSampling) -> ShaderSources {
    let version = context.capabilities().version;
    let precision = match version.driver_type() {
        DriverType::Gles => "precision highp float;\nprecision highp int;\n",
        DriverType::Gl => "",
    };
    let prefix = match sampling {
        ColorSampling::Normalized => "",
        ColorSampling::UnsignedInteger => "u",
        ColorSampling::SignedInteger => "i",
    };

    let vertex = format!(
        "#version {}\n\
         layout(location = 0) in vec2 a_position;\n\
         void main() {{\n    gl_Position = vec4(a_position, 0.0, 1.0);\n}}\n",
        version.glsl_version()
    );

    let fragment = format!(
        "#version {version}\n\
         {precision}\
         uniform highp {p}sampler2D tex0;\n\
         uniform ivec2 offset;\n\
         uniform int level;\n\
         out {p}vec4 o_color;\n\
         void main() {{\n    o_color = texelFetch(tex0, ivec2(gl_FragCoord.xy) + offset, level);\n}}\n",
        version = version.glsl_version(),
        precision = precision,
        p = prefix,
    );

    ShaderSources::new("copy", &vertex, &fragment)
}

/// Copy `source_rect` of `source` into the equally sized `target_rect` of `target` by drawing.
pub(crate) fn redraw(
    context: &GraphicsContext,
    source: ImageRef,
    source_desc: &TextureDescriptor,
    target: ImageRef,
    target_desc: &TextureDescriptor,
    source_rect: IntRectangle,
    target_rect: IntRectangle,
) -> Result<()> {
    if source_desc.kind != TextureKind::Texture2D || source.layer != 0 {
        return Err(Error::usage(format!(
            "copies between these formats need a 2D source, not {:?}",
            source_desc.kind
        )));
    }

    let sampling = match (source_desc.format, target_desc.format) {
        (PixelFormat::Color(_, s), PixelFormat::Color(_, _)) => s.sampling(),
        _ => return Err(Error::usage("only color textures can be copied by drawing")),
    };

    let (shader, vertex_array) = {
        let mut slot = context.0.copy_program.borrow_mut();
        if slot.is_none() {
            *slot = Some(CopyProgram::create(context)?);
        }
        match slot.as_mut() {
            Some(copy) => (copy.shader(context, sampling)?, copy.vertex_array),
            None => return Err(Error::Destroyed("copy program")),
        }
    };

    log::trace!(
        "copying {:?} {:?} to {:?} {:?} by drawing",
        source,
        source_rect,
        target,
        target_rect
    );

    let framebuffer = context.with_backend("create_framebuffer", |b| b.create_framebuffer())?;
    let drawn = draw_copy(
        context,
        &shader,
        vertex_array,
        framebuffer,
        source,
        target,
        source_rect,
        target_rect,
    );

    let active = context.active_render_target()?;
    let restore = active.framebuffer();
    let (w, h) = active.effective_size();
    context.with_backend("restore_after_copy", |b| {
        b.bind_framebuffer(restore);
        b.viewport(0, 0, w as i32, h as i32);
        b.use_program(None);
        b.bind_vertex_array(None);
        b.bind_texture(COPY_UNIT, None)?;
        b.delete_framebuffer(framebuffer);
        Ok(())
    })?;
    context.mark_dirty();

    drawn
}

#[allow(clippy::too_many_arguments)]
fn draw_copy(
    context: &GraphicsContext,
    shader: &Shader,
    vertex_array: VertexArrayId,
    framebuffer: FramebufferId,
    source: ImageRef,
    target: ImageRef,
    source_rect: IntRectangle,
    target_rect: IntRectangle,
) -> Result<()> {
    context.with_backend("attach", |b| {
        b.attach(framebuffer, AttachmentPoint::Color(0), Some(target))?;
        b.set_draw_buffers(framebuffer, 1)
    })?;

    let status = context.backend().framebuffer_status(framebuffer);
    status.map_err(Error::IncompleteFramebuffer)?;

    context.with_backend("bind_copy_state", |b| {
        b.bind_framebuffer(Some(framebuffer));
        b.viewport(
            target_rect.x,
            target_rect.y,
            target_rect.width,
            target_rect.height,
        );
        for capability in [
            Capability::Blend,
            Capability::DepthTest,
            Capability::CullFace,
            Capability::ScissorTest,
            Capability::StencilTest,
            Capability::SampleAlphaToCoverage,
        ]
        .iter()
        {
            b.set_capability(*capability, false);
        }
        b.color_mask([true; 4]);
        b.bind_texture(COPY_UNIT, Some(source.texture))
    })?;

    shader.begin()?;
    shader.uniform("tex0", UniformValue::Int(COPY_UNIT as i32))?;
    shader.uniform(
        "offset",
        UniformValue::IVec2([source_rect.x - target_rect.x, source_rect.y - target_rect.y]),
    )?;
    shader.uniform("level", UniformValue::Int(source.level as i32))?;

    context.with_backend("draw", |b| {
        b.bind_vertex_array(Some(vertex_array));
        b.draw(&DrawCall {
            primitive: DrawPrimitive::Triangles,
            first: 0,
            count: 3,
            instances: 1,
            base_instance: 0,
            indices: None,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftBackend;
    use crate::color_buffer::{ColorBuffer, ColorBufferDescriptor};
    use crate::config::DriverConfiguration;
    use crate::format::{ColorFormat, ColorType};
    use approx::assert_relative_eq;

    fn context(version: &str) -> GraphicsContext {
        GraphicsContext::new(
            Box::new(SoftBackend::with_version(4, 4, version)),
            DriverConfiguration::default(),
        )
        .unwrap()
    }

    #[test]
    fn sources_follow_the_driver() {
        let gl = copy_sources(&context("4.6.0"), ColorSampling::Normalized);
        assert!(gl.vertex.starts_with("#version 460 core"));
        assert!(!gl.fragment.contains("precision"));

        let gles = copy_sources(&context("OpenGL ES 3.2"), ColorSampling::UnsignedInteger);
        assert!(gles.fragment.starts_with("#version 320 es"));
        assert!(gles.fragment.contains("usampler2D"));
        assert!(gles.fragment.contains("out uvec4 o_color"));
    }

    #[test]
    fn copies_between_numeric_types_by_drawing() {
        let ctx = context("OpenGL ES 3.2");
        let source = ColorBuffer::new(&ctx, &ColorBufferDescriptor::new(4, 4)).unwrap();
        let target = ColorBuffer::new(
            &ctx,
            &ColorBufferDescriptor {
                ty: ColorType::FLOAT32,
                ..ColorBufferDescriptor::new(4, 4)
            },
        )
        .unwrap();

        let texels: Vec<u8> = (0..16).flat_map(|_| vec![255u8, 0, 0, 255]).collect();
        source
            .write(&texels, ColorFormat::RGBa, ColorType::UINT8, 0)
            .unwrap();
        source
            .copy_to(&target, 0, 0, luminance::texture::MagFilter::Nearest)
            .unwrap();

        let mut out = vec![0u8; 4 * 4 * 16];
        target
            .read(&mut out, ColorFormat::RGBa, ColorType::FLOAT32, 0)
            .unwrap();
        let floats: Vec<f32> = out
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_relative_eq!(floats[0], 1.0);
        assert_relative_eq!(floats[1], 0.0);
        assert_relative_eq!(floats[63], 1.0);

        // the draw leaves the program target active
        assert_eq!(ctx.device_state().unwrap().viewport, [0, 0, 4, 4]);
    }
}
