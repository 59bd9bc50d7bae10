//! The glow device.
//!
//! Drives desktop GL 3.3+, GLES 3.0+ and WebGL 2 through [glow]. Handles are kept in per-kind
//! tables and exposed as opaque ids; bindings go through [`GlowState`] so that redundant binding
//! calls are never issued.
//!
//! A few entry points have no counterpart in the glow version this crate builds against
//! (compressed uploads, image unit binding); they fail with [`Error::Backend`]. Multisampled
//! surfaces are renderbuffers and can only be resolved through blits.
//!
//! [glow]: https://github.com/grovesNL/glow

use glow::HasContext;
use luminance::blending::{Equation, Factor};
use luminance::depth_test::DepthComparison;
use luminance::face_culling::{FaceCullingMode, FaceCullingOrder};
use luminance::framebuffer::IncompleteReason;
use luminance::texture::{MagFilter, MinFilter, Wrap};
use std::collections::HashMap;

use super::*;
use crate::capabilities::{parse_version_string, DriverType};
use crate::error::{Error, Result};
use crate::format::{NativeFormat, PixelFormat};
use crate::shader::ShaderStage;
use crate::uniform::{UniformType, UniformValue};
use crate::vertex_format::ScalarType;

mod state;

use self::state::{
    blending_equation_to_glow, blending_factor_to_glow, depth_comparison_to_glow,
    stencil_operation_to_glow, Bind, GlowState,
};

/// Id table for one kind of object.
#[derive(Debug)]
struct Handles<T> {
    next: u32,
    items: HashMap<u32, T>,
}

impl<T> Handles<T> {
    fn new() -> Self {
        Handles {
            next: 1,
            items: HashMap::new(),
        }
    }

    fn insert(&mut self, item: T) -> u32 {
        let id = self.next;
        self.next += 1;
        self.items.insert(id, item);
        id
    }

    fn get(&self, id: u32, what: &'static str) -> Result<&T> {
        self
            .items
            .get(&id)
            .ok_or_else(|| Error::Backend(format!("unknown {} id {}", what, id)))
    }

    fn get_mut(&mut self, id: u32, what: &'static str) -> Result<&mut T> {
        self
            .items
            .get_mut(&id)
            .ok_or_else(|| Error::Backend(format!("unknown {} id {}", what, id)))
    }

    fn remove(&mut self, id: u32) -> Option<T> {
        self.items.remove(&id)
    }
}

#[derive(Debug)]
enum GlowTexture {
    Texture {
        handle: glow::Texture,
        target: u32,
        desc: TextureDescriptor,
    },
    /// Multisampled surfaces.
    Renderbuffer {
        handle: glow::Renderbuffer,
        desc: TextureDescriptor,
    },
}

impl GlowTexture {
    fn desc(&self) -> &TextureDescriptor {
        match self {
            GlowTexture::Texture { desc, .. } | GlowTexture::Renderbuffer { desc, .. } => desc,
        }
    }
}

#[derive(Debug)]
struct GlowBuffer {
    handle: glow::Buffer,
    kind: BufferKind,
    size: usize,
}

#[derive(Debug)]
struct GlowProgram {
    handle: glow::Program,
    // indexed by UniformLocation
    locations: Vec<glow::UniformLocation>,
    names: HashMap<String, u32>,
}

/// A [`Backend`] over a glow context.
#[derive(Debug)]
pub struct GlowBackend {
    state: GlowState,
    gles: bool,
    info: BackendInfo,
    textures: Handles<GlowTexture>,
    buffers: Handles<GlowBuffer>,
    framebuffers: Handles<glow::Framebuffer>,
    shaders: Handles<glow::Shader>,
    programs: Handles<GlowProgram>,
    vertex_arrays: Handles<glow::VertexArray>,
}

impl GlowBackend {
    /// Wrap a current glow context.
    pub fn new(ctx: glow::Context) -> Result<Self> {
        let info = query_info(&ctx);
        let gles = parse_version_string(&info.version)
            .map(|v| v.driver_type() == DriverType::Gles)
            .unwrap_or(false);

        log::info!(
            "glow device: {} ({}, {})",
            info.version,
            info.renderer,
            info.vendor
        );

        Ok(GlowBackend {
            state: GlowState::new(ctx)?,
            gles,
            info,
            textures: Handles::new(),
            buffers: Handles::new(),
            framebuffers: Handles::new(),
            shaders: Handles::new(),
            programs: Handles::new(),
            vertex_arrays: Handles::new(),
        })
    }

    /// Create a backend from a GL function loader.
    ///
    /// # Safety
    ///
    /// The context the loader resolves against must be current on this thread for as long as the
    /// backend lives.
    #[cfg(not(wasm))]
    pub unsafe fn from_loader_function<F>(loader_function: F) -> Result<Self>
    where
        F: FnMut(&str) -> *const std::os::raw::c_void,
    {
        Self::new(glow::Context::from_loader_function(loader_function))
    }

    /// Create a backend from a WebGL 2 context.
    #[cfg(wasm)]
    pub fn from_webgl2_context(ctx: web_sys::WebGl2RenderingContext) -> Result<Self> {
        Self::new(glow::Context::from_webgl2_context(ctx))
    }

    fn texture(&self, texture: TextureId) -> Result<&GlowTexture> {
        self.textures.get(texture.0, "texture")
    }

    fn buffer(&self, buffer: BufferId) -> Result<&GlowBuffer> {
        self.buffers.get(buffer.0, "buffer")
    }

    fn program(&self, program: ProgramId) -> Result<&GlowProgram> {
        self.programs.get(program.0, "program")
    }

    /// Bind a sampled texture on the scratch unit for parameter and transfer calls.
    fn bind_for_update(&mut self, texture: TextureId) -> Result<(glow::Texture, u32, TextureDescriptor)> {
        match *self.texture(texture)? {
            GlowTexture::Texture {
                handle,
                target,
                desc,
            } => {
                self.state.set_texture_unit(0);
                self.state.bind_texture(target, Some(handle));
                Ok((handle, target, desc))
            }
            GlowTexture::Renderbuffer { .. } => Err(Error::Multisampled(
                "multisampled surfaces can only be resolved through blits",
            )),
        }
    }

    /// Attach an image to the framebuffer bound at `target`; `None` detaches.
    fn attach_image(&self, target: u32, attachment: u32, image: Option<ImageRef>) -> Result<()> {
        let ctx = &self.state.ctx;

        let image = match image {
            Some(image) => image,
            None => {
                unsafe { ctx.framebuffer_renderbuffer(target, attachment, glow::RENDERBUFFER, None) };
                return Ok(());
            }
        };

        unsafe {
            match *self.texture(image.texture)? {
                GlowTexture::Renderbuffer { handle, .. } => {
                    ctx.framebuffer_renderbuffer(target, attachment, glow::RENDERBUFFER, Some(handle))
                }

                GlowTexture::Texture { handle, desc, .. } => match desc.kind {
                    TextureKind::Texture2D => ctx.framebuffer_texture_2d(
                        target,
                        attachment,
                        glow::TEXTURE_2D,
                        Some(handle),
                        image.level as i32,
                    ),

                    TextureKind::Cubemap => ctx.framebuffer_texture_2d(
                        target,
                        attachment,
                        glow::TEXTURE_CUBE_MAP_POSITIVE_X + image.layer,
                        Some(handle),
                        image.level as i32,
                    ),

                    _ => ctx.framebuffer_texture_layer(
                        target,
                        attachment,
                        Some(handle),
                        image.level as i32,
                        image.layer as i32,
                    ),
                },
            }
        }

        Ok(())
    }

    /// Attachment point an image of `format` goes to when attached implicitly.
    fn implicit_attachment(format: PixelFormat) -> u32 {
        match format {
            PixelFormat::Color(..) => glow::COLOR_ATTACHMENT0,
            PixelFormat::Depth(depth) if depth.has_depth() && depth.has_stencil() => {
                glow::DEPTH_STENCIL_ATTACHMENT
            }
            PixelFormat::Depth(depth) if depth.has_stencil() => glow::STENCIL_ATTACHMENT,
            PixelFormat::Depth(_) => glow::DEPTH_ATTACHMENT,
        }
    }

    /// Bind a buffer for a data transfer.
    fn bind_for_transfer(&mut self, buffer: BufferId) -> Result<(u32, usize)> {
        let (handle, kind, size) = {
            let b = self.buffer(buffer)?;
            (b.handle, b.kind, b.size)
        };

        let target = match kind {
            BufferKind::Vertex => {
                self.state.bind_array_buffer(Some(handle), Bind::Cached);
                glow::ARRAY_BUFFER
            }

            BufferKind::Index => {
                // the element binding belongs to the bound vertex array
                self.state.bind_vertex_array(None, Bind::Cached);
                self.state
                    .bind_element_array_buffer(Some(handle), Bind::Cached);
                glow::ELEMENT_ARRAY_BUFFER
            }

            BufferKind::ShaderStorage => {
                unsafe {
                    self.state
                        .ctx
                        .bind_buffer(glow::SHADER_STORAGE_BUFFER, Some(handle))
                };
                glow::SHADER_STORAGE_BUFFER
            }
        };

        Ok((target, size))
    }
}

fn query_info(ctx: &glow::Context) -> BackendInfo {
    unsafe {
        let version = ctx.get_parameter_string(glow::VERSION);
        let renderer = ctx.get_parameter_string(glow::RENDERER);
        let vendor = ctx.get_parameter_string(glow::VENDOR);
        let extensions = query_extensions(ctx);

        let get = |pname| ctx.get_parameter_i32(pname).max(0) as u32;
        let has_anisotropy = extensions
            .iter()
            .any(|e| e.ends_with("texture_filter_anisotropic"))
            || parse_version_string(&version)
                .map(|v| v == crate::capabilities::DriverVersion::GL_4_6)
                .unwrap_or(false);

        let max_anisotropy = if has_anisotropy {
            ctx.get_parameter_f32(glow::MAX_TEXTURE_MAX_ANISOTROPY)
        } else {
            1.0
        };

        BackendInfo {
            version,
            renderer,
            vendor,
            extensions,
            limits: Limits {
                max_texture_size: get(glow::MAX_TEXTURE_SIZE),
                max_color_attachments: get(glow::MAX_COLOR_ATTACHMENTS),
                max_samples: get(glow::MAX_SAMPLES),
                max_vertex_attributes: get(glow::MAX_VERTEX_ATTRIBS),
                max_anisotropy,
            },
        }
    }
}

#[cfg(not(wasm))]
fn query_extensions(ctx: &glow::Context) -> Vec<String> {
    unsafe {
        let count = ctx.get_parameter_i32(glow::NUM_EXTENSIONS).max(0) as u32;
        (0..count)
            .map(|i| ctx.get_parameter_indexed_string(glow::EXTENSIONS, i))
            .collect()
    }
}

// WebGL only exposes extensions through getSupportedExtensions; everything this crate gates on
// extensions is optional there.
#[cfg(wasm)]
fn query_extensions(_: &glow::Context) -> Vec<String> {
    Vec::new()
}

impl Backend for GlowBackend {
    fn info(&self) -> BackendInfo {
        self.info.clone()
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId> {
        let ctx = &self.state.ctx;
        let (w, h) = (desc.width as i32, desc.height as i32);

        if desc.multisample.is_multisampled() {
            let handle = unsafe { ctx.create_renderbuffer() }.map_err(Error::Backend)?;

            unsafe {
                ctx.bind_renderbuffer(glow::RENDERBUFFER, Some(handle));
                ctx.renderbuffer_storage_multisample(
                    glow::RENDERBUFFER,
                    desc.multisample.samples() as i32,
                    desc.native.internal_format,
                    w,
                    h,
                );
                ctx.bind_renderbuffer(glow::RENDERBUFFER, None);
            }

            let id = self.textures.insert(GlowTexture::Renderbuffer {
                handle,
                desc: *desc,
            });
            return Ok(TextureId(id));
        }

        if desc.format.is_compressed() && desc.storage == StorageMode::Image {
            return Err(Error::Backend(
                "compressed textures require immutable storage".to_owned(),
            ));
        }

        let target = match desc.kind {
            TextureKind::Texture2D => glow::TEXTURE_2D,
            TextureKind::Cubemap => glow::TEXTURE_CUBE_MAP,
            TextureKind::Array2D => glow::TEXTURE_2D_ARRAY,
            TextureKind::CubemapArray => glow::TEXTURE_CUBE_MAP_ARRAY,
            TextureKind::Volume => glow::TEXTURE_3D,
        };

        let handle = unsafe { ctx.create_texture() }.map_err(Error::Backend)?;
        self.state.set_texture_unit(0);
        self.state.bind_texture(target, Some(handle));

        let ctx = &self.state.ctx;
        let native = desc.native;
        let levels = desc.levels.max(1);

        unsafe {
            ctx.tex_parameter_i32(target, glow::TEXTURE_BASE_LEVEL, 0);
            ctx.tex_parameter_i32(target, glow::TEXTURE_MAX_LEVEL, levels as i32 - 1);

            match desc.storage {
                StorageMode::Storage => match desc.kind {
                    TextureKind::Texture2D | TextureKind::Cubemap => {
                        ctx.tex_storage_2d(target, levels as i32, native.internal_format, w, h)
                    }
                    TextureKind::Array2D | TextureKind::Volume => ctx.tex_storage_3d(
                        target,
                        levels as i32,
                        native.internal_format,
                        w,
                        h,
                        desc.depth as i32,
                    ),
                    TextureKind::CubemapArray => ctx.tex_storage_3d(
                        target,
                        levels as i32,
                        native.internal_format,
                        w,
                        h,
                        desc.depth as i32 * 6,
                    ),
                },

                StorageMode::Image => {
                    for level in 0..levels {
                        let (lw, lh) = desc.level_size(level);
                        let (lw, lh) = (lw as i32, lh as i32);

                        match desc.kind {
                            TextureKind::Texture2D => ctx.tex_image_2d(
                                target,
                                level as i32,
                                native.internal_format as i32,
                                lw,
                                lh,
                                0,
                                native.format,
                                native.ty,
                                None,
                            ),

                            TextureKind::Cubemap => {
                                for face in 0..6 {
                                    ctx.tex_image_2d(
                                        glow::TEXTURE_CUBE_MAP_POSITIVE_X + face,
                                        level as i32,
                                        native.internal_format as i32,
                                        lw,
                                        lh,
                                        0,
                                        native.format,
                                        native.ty,
                                        None,
                                    );
                                }
                            }

                            _ => ctx.tex_image_3d(
                                target,
                                level as i32,
                                native.internal_format as i32,
                                lw,
                                lh,
                                desc.layers(level) as i32,
                                0,
                                native.format,
                                native.ty,
                                None,
                            ),
                        }
                    }
                }
            }
        }

        let id = self.textures.insert(GlowTexture::Texture {
            handle,
            target,
            desc: *desc,
        });

        Ok(TextureId(id))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        match self.textures.remove(texture.0) {
            Some(GlowTexture::Texture { handle, .. }) => {
                self.state.unbind_texture(handle);
                unsafe { self.state.ctx.delete_texture(handle) };
            }
            Some(GlowTexture::Renderbuffer { handle, .. }) => unsafe {
                self.state.ctx.delete_renderbuffer(handle)
            },
            None => (),
        }
    }

    fn set_sampling(&mut self, texture: TextureId, sampling: &Sampling) -> Result<()> {
        let (_, target, _) = self.bind_for_update(texture)?;
        let max_anisotropy = self.info.limits.max_anisotropy;
        let ctx = &self.state.ctx;

        unsafe {
            ctx.tex_parameter_i32(target, glow::TEXTURE_WRAP_S, glow_wrap(sampling.wrap_s) as i32);
            ctx.tex_parameter_i32(target, glow::TEXTURE_WRAP_T, glow_wrap(sampling.wrap_t) as i32);
            ctx.tex_parameter_i32(target, glow::TEXTURE_WRAP_R, glow_wrap(sampling.wrap_r) as i32);
            ctx.tex_parameter_i32(
                target,
                glow::TEXTURE_MIN_FILTER,
                glow_min_filter(sampling.min_filter) as i32,
            );
            ctx.tex_parameter_i32(
                target,
                glow::TEXTURE_MAG_FILTER,
                glow_mag_filter(sampling.mag_filter) as i32,
            );
            ctx.tex_parameter_i32(target, glow::TEXTURE_MAX_LEVEL, sampling.max_level as i32);

            if max_anisotropy > 1.0 {
                ctx.tex_parameter_f32(
                    target,
                    glow::TEXTURE_MAX_ANISOTROPY,
                    sampling.anisotropy.max(1.0).min(max_anisotropy),
                );
            }
        }

        Ok(())
    }

    fn write_texture(
        &mut self,
        texture: TextureId,
        level: u32,
        region: Region,
        format: PixelFormat,
        data: &[u8],
    ) -> Result<()> {
        if format.is_compressed() {
            return Err(Error::Backend(
                "compressed uploads are not available on this device".to_owned(),
            ));
        }

        let required = format.byte_size(region.width, region.height, region.depth);
        if data.len() < required {
            return Err(Error::NotEnoughData {
                operation: "texture upload",
                required,
                available: data.len(),
            });
        }

        let (_, target, desc) = self.bind_for_update(texture)?;
        let native = format.native()?;
        let ctx = &self.state.ctx;
        let (x, y, w, h) = (
            region.x as i32,
            region.y as i32,
            region.width as i32,
            region.height as i32,
        );

        unsafe {
            ctx.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);

            match desc.kind {
                TextureKind::Texture2D => ctx.tex_sub_image_2d(
                    target,
                    level as i32,
                    x,
                    y,
                    w,
                    h,
                    native.format,
                    native.ty,
                    glow::PixelUnpackData::Slice(&data[..required]),
                ),

                TextureKind::Cubemap => {
                    let face_size = format.byte_size(region.width, region.height, 1);

                    for (i, face) in (region.z..region.z + region.depth).enumerate() {
                        ctx.tex_sub_image_2d(
                            glow::TEXTURE_CUBE_MAP_POSITIVE_X + face,
                            level as i32,
                            x,
                            y,
                            w,
                            h,
                            native.format,
                            native.ty,
                            glow::PixelUnpackData::Slice(&data[i * face_size..(i + 1) * face_size]),
                        );
                    }
                }

                _ => ctx.tex_sub_image_3d(
                    target,
                    level as i32,
                    x,
                    y,
                    region.z as i32,
                    w,
                    h,
                    region.depth as i32,
                    native.format,
                    native.ty,
                    glow::PixelUnpackData::Slice(&data[..required]),
                ),
            }
        }

        Ok(())
    }

    fn read_texture(
        &mut self,
        texture: TextureId,
        level: u32,
        region: Region,
        format: PixelFormat,
        out: &mut [u8],
    ) -> Result<()> {
        if format.is_compressed() {
            return Err(Error::Backend(
                "compressed read back is not available on this device".to_owned(),
            ));
        }

        if self.gles && matches!(format, PixelFormat::Depth(_)) {
            return Err(Error::Backend(
                "depth read back is not available on OpenGL ES".to_owned(),
            ));
        }

        let required = format.byte_size(region.width, region.height, region.depth);
        if out.len() < required {
            return Err(Error::NotEnoughData {
                operation: "texture read back",
                required,
                available: out.len(),
            });
        }

        if let GlowTexture::Renderbuffer { .. } = self.texture(texture)? {
            return Err(Error::Multisampled(
                "multisampled surfaces can only be resolved through blits",
            ));
        }

        let native = format.native()?;
        let attachment = Self::implicit_attachment(format);
        let layer_size = format.byte_size(region.width, region.height, 1);

        let fb = self.state.create_or_get_readback_framebuffer()?;
        let previous = self.state.draw_framebuffer();
        self.state.bind_read_framebuffer(Some(fb));

        for (i, layer) in (region.z..region.z + region.depth).enumerate() {
            self.attach_image(
                glow::READ_FRAMEBUFFER,
                attachment,
                Some(ImageRef {
                    texture,
                    level,
                    layer,
                }),
            )?;

            unsafe {
                let ctx = &self.state.ctx;
                ctx.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
                ctx.read_pixels(
                    region.x as i32,
                    region.y as i32,
                    region.width as i32,
                    region.height as i32,
                    native.format,
                    native.ty,
                    glow::PixelPackData::Slice(&mut out[i * layer_size..(i + 1) * layer_size]),
                );
            }
        }

        self.attach_image(glow::READ_FRAMEBUFFER, attachment, None)?;
        self.state.bind_read_framebuffer(previous);

        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: TextureId) -> Result<()> {
        let (_, target, _) = self.bind_for_update(texture)?;
        unsafe { self.state.ctx.generate_mipmap(target) };
        Ok(())
    }

    fn clear_image(&mut self, image: ImageRef, value: ClearValue) -> Result<()> {
        let format = self.texture(image.texture)?.desc().format;
        let attachment = Self::implicit_attachment(format);

        let (_, draw) = self.state.create_or_get_blit_framebuffers()?;
        let previous = self.state.draw_framebuffer();
        self.state.bind_draw_framebuffer(Some(draw));
        self.attach_image(glow::DRAW_FRAMEBUFFER, attachment, Some(image))?;

        let ctx = &self.state.ctx;

        unsafe {
            let scissor = ctx.is_enabled(glow::SCISSOR_TEST);
            let mut mask = [0; 4];
            ctx.get_parameter_i32_slice(glow::COLOR_WRITEMASK, &mut mask);
            let depth_write = ctx.get_parameter_i32(glow::DEPTH_WRITEMASK) != 0;

            ctx.disable(glow::SCISSOR_TEST);
            ctx.color_mask(true, true, true, true);
            ctx.depth_mask(true);

            match (format, value) {
                (PixelFormat::Color(..), value) => {
                    ctx.draw_buffers(&[glow::COLOR_ATTACHMENT0]);
                    match value {
                        ClearValue::Float(mut v) => ctx.clear_buffer_f32_slice(glow::COLOR, 0, &mut v),
                        ClearValue::Int(mut v) => ctx.clear_buffer_i32_slice(glow::COLOR, 0, &mut v),
                        ClearValue::UInt(mut v) => ctx.clear_buffer_u32_slice(glow::COLOR, 0, &mut v),
                    }
                }

                (PixelFormat::Depth(depth), value) => {
                    let (d, s) = match value {
                        ClearValue::Float(v) => (v[0], v[1] as i32),
                        ClearValue::Int(v) => (v[0] as f32, v[1]),
                        ClearValue::UInt(v) => (v[0] as f32, v[1] as i32),
                    };

                    if depth.has_depth() && depth.has_stencil() {
                        ctx.clear_buffer_depth_stencil(glow::DEPTH_STENCIL, 0, d, s);
                    } else if depth.has_stencil() {
                        ctx.clear_buffer_i32_slice(glow::STENCIL, 0, &mut [s]);
                    } else {
                        ctx.clear_buffer_f32_slice(glow::DEPTH, 0, &mut [d]);
                    }
                }
            }

            if scissor {
                ctx.enable(glow::SCISSOR_TEST);
            }
            ctx.color_mask(mask[0] != 0, mask[1] != 0, mask[2] != 0, mask[3] != 0);
            ctx.depth_mask(depth_write);
        }

        self.attach_image(glow::DRAW_FRAMEBUFFER, attachment, None)?;
        self.state.bind_draw_framebuffer(previous);

        Ok(())
    }

    fn copy_image(
        &mut self,
        source: ImageRef,
        target: ImageRef,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let format = self.texture(source.texture)?.desc().format;
        let mask = match format {
            PixelFormat::Color(..) => BlitMask::COLOR,
            PixelFormat::Depth(depth) => BlitMask {
                color: false,
                depth: depth.has_depth(),
                stencil: depth.has_stencil(),
            },
        };

        let bounds = Bounds::new(0, 0, width as i32, height as i32);

        self.blit(&Blit {
            source: Surface::Image(source),
            source_bounds: bounds,
            target: Surface::Image(target),
            target_bounds: bounds,
            mask,
            filter: MagFilter::Nearest,
        })
    }

    fn blit(&mut self, blit: &Blit) -> Result<()> {
        let previous_draw = self.state.draw_framebuffer();
        let (read_fb, draw_fb) = self.state.create_or_get_blit_framebuffers()?;

        let mut bits = 0;
        if blit.mask.color {
            bits |= glow::COLOR_BUFFER_BIT;
        }
        if blit.mask.depth {
            bits |= glow::DEPTH_BUFFER_BIT;
        }
        if blit.mask.stencil {
            bits |= glow::STENCIL_BUFFER_BIT;
        }

        let attachment_for = |this: &Self, surface: &Surface| -> Result<u32> {
            match surface {
                Surface::Image(image) => {
                    Ok(Self::implicit_attachment(this.texture(image.texture)?.desc().format))
                }
                Surface::Framebuffer(_, index) => Ok(glow::COLOR_ATTACHMENT0 + index),
            }
        };

        let read_attachment = attachment_for(self, &blit.source)?;
        let draw_attachment = attachment_for(self, &blit.target)?;

        // source
        match blit.source {
            Surface::Image(image) => {
                self.state.bind_read_framebuffer(Some(read_fb));
                self.attach_image(glow::READ_FRAMEBUFFER, read_attachment, Some(image))?;
            }
            Surface::Framebuffer(fb, _) => {
                let handle = match fb {
                    Some(fb) => Some(*self.framebuffers.get(fb.0, "framebuffer")?),
                    None => None,
                };
                self.state.bind_read_framebuffer(handle);
            }
        }

        // target
        match blit.target {
            Surface::Image(image) => {
                self.state.bind_draw_framebuffer(Some(draw_fb));
                self.attach_image(glow::DRAW_FRAMEBUFFER, draw_attachment, Some(image))?;
            }
            Surface::Framebuffer(fb, _) => {
                let handle = match fb {
                    Some(fb) => Some(*self.framebuffers.get(fb.0, "framebuffer")?),
                    None => None,
                };
                self.state.bind_draw_framebuffer(handle);
            }
        }

        let ctx = &self.state.ctx;
        let (s, t) = (blit.source_bounds, blit.target_bounds);

        unsafe {
            let off_screen = |surface: &Surface| !matches!(surface, Surface::Framebuffer(None, _));

            if blit.mask.color {
                if off_screen(&blit.source) {
                    ctx.read_buffer(read_attachment);
                }
                if off_screen(&blit.target) {
                    ctx.draw_buffers(&[draw_attachment]);
                }
            }

            let scissor = ctx.is_enabled(glow::SCISSOR_TEST);
            ctx.disable(glow::SCISSOR_TEST);

            ctx.blit_framebuffer(
                s.x0,
                s.y0,
                s.x1,
                s.y1,
                t.x0,
                t.y0,
                t.x1,
                t.y1,
                bits,
                glow_mag_filter(blit.filter),
            );

            if scissor {
                ctx.enable(glow::SCISSOR_TEST);
            }
        }

        if let Surface::Image(_) = blit.source {
            self.attach_image(glow::READ_FRAMEBUFFER, read_attachment, None)?;
        }
        if let Surface::Image(_) = blit.target {
            self.attach_image(glow::DRAW_FRAMEBUFFER, draw_attachment, None)?;
        }

        self.state.bind_read_framebuffer(None);
        self.state.bind_draw_framebuffer(previous_draw);

        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) -> Result<()> {
        let binding = match texture {
            Some(texture) => match *self.texture(texture)? {
                GlowTexture::Texture { handle, target, .. } => (target, Some(handle)),
                GlowTexture::Renderbuffer { .. } => {
                    return Err(Error::Multisampled("multisampled surfaces cannot be sampled"))
                }
            },
            None => (glow::TEXTURE_2D, None),
        };

        self.state.set_texture_unit(unit);
        self.state.bind_texture(binding.0, binding.1);

        Ok(())
    }

    fn bind_image_texture(
        &mut self,
        _unit: u32,
        _image: ImageRef,
        _access: ImageAccess,
        _format: NativeFormat,
    ) -> Result<()> {
        Err(Error::Backend(
            "image unit binding is not available on this device".to_owned(),
        ))
    }

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        size: usize,
        usage: BufferUsage,
    ) -> Result<BufferId> {
        let handle = unsafe { self.state.ctx.create_buffer() }.map_err(Error::Backend)?;
        let id = BufferId(self.buffers.insert(GlowBuffer { handle, kind, size }));

        let (target, _) = self.bind_for_transfer(id)?;
        let ctx = &self.state.ctx;

        unsafe {
            match usage {
                BufferUsage::Storage => {
                    ctx.buffer_storage(target, size as i32, None, glow::DYNAMIC_STORAGE_BIT)
                }
                BufferUsage::Dynamic => ctx.buffer_data_size(target, size as i32, glow::DYNAMIC_DRAW),
            }
        }

        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if let Some(b) = self.buffers.remove(buffer.0) {
            self.state.unbind_buffer(b.handle);
            unsafe { self.state.ctx.delete_buffer(b.handle) };
        }
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]) -> Result<()> {
        let (target, size) = self.bind_for_transfer(buffer)?;

        if offset + data.len() > size {
            return Err(Error::NotEnoughData {
                operation: "buffer write",
                required: offset + data.len(),
                available: size,
            });
        }

        unsafe {
            self.state
                .ctx
                .buffer_sub_data_u8_slice(target, offset as i32, data)
        };

        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferId, offset: usize, out: &mut [u8]) -> Result<()> {
        let (target, size) = self.bind_for_transfer(buffer)?;

        if offset + out.len() > size {
            return Err(Error::NotEnoughData {
                operation: "buffer read",
                required: offset + out.len(),
                available: size,
            });
        }

        unsafe {
            self.state
                .ctx
                .get_buffer_sub_data(target, offset as i32, out)
        };

        Ok(())
    }

    fn bind_storage_buffer(&mut self, binding: u32, buffer: Option<BufferId>) -> Result<()> {
        let handle = match buffer {
            Some(buffer) => Some(self.buffer(buffer)?.handle),
            None => None,
        };

        self.state.bind_storage_buffer(binding, handle);
        Ok(())
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferId> {
        let handle = unsafe { self.state.ctx.create_framebuffer() }.map_err(Error::Backend)?;
        Ok(FramebufferId(self.framebuffers.insert(handle)))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if let Some(handle) = self.framebuffers.remove(framebuffer.0) {
            self.state.unbind_framebuffer(handle);
            unsafe { self.state.ctx.delete_framebuffer(handle) };
        }
    }

    fn attach(
        &mut self,
        framebuffer: FramebufferId,
        point: AttachmentPoint,
        image: Option<ImageRef>,
    ) -> Result<()> {
        let handle = *self.framebuffers.get(framebuffer.0, "framebuffer")?;
        let attachment = match point {
            AttachmentPoint::Color(i) => glow::COLOR_ATTACHMENT0 + i,
            AttachmentPoint::Depth => glow::DEPTH_ATTACHMENT,
            AttachmentPoint::Stencil => glow::STENCIL_ATTACHMENT,
            AttachmentPoint::DepthStencil => glow::DEPTH_STENCIL_ATTACHMENT,
        };

        let previous = self.state.draw_framebuffer();
        self.state.bind_draw_framebuffer(Some(handle));
        let attached = self.attach_image(glow::DRAW_FRAMEBUFFER, attachment, image);
        self.state.bind_draw_framebuffer(previous);

        attached
    }

    fn set_draw_buffers(&mut self, framebuffer: FramebufferId, count: u32) -> Result<()> {
        let handle = *self.framebuffers.get(framebuffer.0, "framebuffer")?;
        let buffers: Vec<u32> = (0..count).map(|i| glow::COLOR_ATTACHMENT0 + i).collect();

        let previous = self.state.draw_framebuffer();
        self.state.bind_draw_framebuffer(Some(handle));
        unsafe { self.state.ctx.draw_buffers(&buffers) };
        self.state.bind_draw_framebuffer(previous);

        Ok(())
    }

    fn framebuffer_status(
        &mut self,
        framebuffer: FramebufferId,
    ) -> std::result::Result<(), IncompleteReason> {
        let handle = match self.framebuffers.get(framebuffer.0, "framebuffer") {
            Ok(handle) => *handle,
            Err(_) => return Err(IncompleteReason::Undefined),
        };

        let previous = self.state.draw_framebuffer();
        self.state.bind_draw_framebuffer(Some(handle));
        let status = unsafe { self.state.ctx.check_framebuffer_status(glow::DRAW_FRAMEBUFFER) };
        self.state.bind_draw_framebuffer(previous);

        match status {
            glow::FRAMEBUFFER_COMPLETE => Ok(()),
            glow::FRAMEBUFFER_UNDEFINED => Err(IncompleteReason::Undefined),
            glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT => Err(IncompleteReason::IncompleteAttachment),
            glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => {
                Err(IncompleteReason::MissingAttachment)
            }
            glow::FRAMEBUFFER_INCOMPLETE_DRAW_BUFFER => Err(IncompleteReason::IncompleteDrawBuffer),
            glow::FRAMEBUFFER_INCOMPLETE_READ_BUFFER => Err(IncompleteReason::IncompleteReadBuffer),
            glow::FRAMEBUFFER_UNSUPPORTED => Err(IncompleteReason::Unsupported),
            glow::FRAMEBUFFER_INCOMPLETE_MULTISAMPLE => Err(IncompleteReason::IncompleteMultisample),
            glow::FRAMEBUFFER_INCOMPLETE_LAYER_TARGETS => {
                Err(IncompleteReason::IncompleteLayerTargets)
            }
            _ => Err(IncompleteReason::Undefined),
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        let handle = framebuffer.and_then(|fb| self.framebuffers.get(fb.0, "framebuffer").ok().copied());

        if framebuffer.is_some() && handle.is_none() {
            log::warn!("binding unknown framebuffer {:?}; using the default one", framebuffer);
        }

        self.state.bind_draw_framebuffer(handle);
    }

    fn clear_color(&mut self, draw_buffer: u32, value: ClearValue) -> Result<()> {
        let ctx = &self.state.ctx;

        unsafe {
            match value {
                ClearValue::Float(mut v) => ctx.clear_buffer_f32_slice(glow::COLOR, draw_buffer, &mut v),
                ClearValue::Int(mut v) => ctx.clear_buffer_i32_slice(glow::COLOR, draw_buffer, &mut v),
                ClearValue::UInt(mut v) => ctx.clear_buffer_u32_slice(glow::COLOR, draw_buffer, &mut v),
            }
        }

        Ok(())
    }

    fn clear_depth_stencil(&mut self, depth: Option<f32>, stencil: Option<i32>) -> Result<()> {
        let ctx = &self.state.ctx;

        unsafe {
            match (depth, stencil) {
                (Some(d), Some(s)) => ctx.clear_buffer_depth_stencil(glow::DEPTH_STENCIL, 0, d, s),
                (Some(d), None) => ctx.clear_buffer_f32_slice(glow::DEPTH, 0, &mut [d]),
                (None, Some(s)) => ctx.clear_buffer_i32_slice(glow::STENCIL, 0, &mut [s]),
                (None, None) => (),
            }
        }

        Ok(())
    }

    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
    ) -> std::result::Result<ShaderId, String> {
        let ctx = &self.state.ctx;

        unsafe {
            let handle = ctx.create_shader(stage.native())?;
            ctx.shader_source(handle, source);
            ctx.compile_shader(handle);

            if ctx.get_shader_compile_status(handle) {
                Ok(ShaderId(self.shaders.insert(handle)))
            } else {
                let log = ctx.get_shader_info_log(handle);
                ctx.delete_shader(handle);
                Err(log)
            }
        }
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if let Some(handle) = self.shaders.remove(shader.0) {
            unsafe { self.state.ctx.delete_shader(handle) };
        }
    }

    fn link_program(&mut self, shaders: &[ShaderId]) -> std::result::Result<ProgramId, String> {
        let handles = shaders
            .iter()
            .map(|s| self.shaders.get(s.0, "shader").map(|h| *h))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| e.to_string())?;

        let ctx = &self.state.ctx;

        unsafe {
            let program = ctx.create_program()?;

            for &shader in &handles {
                ctx.attach_shader(program, shader);
            }

            ctx.link_program(program);

            for &shader in &handles {
                ctx.detach_shader(program, shader);
            }

            if !ctx.get_program_link_status(program) {
                let log = ctx.get_program_info_log(program);
                ctx.delete_program(program);
                return Err(log);
            }

            Ok(ProgramId(self.programs.insert(GlowProgram {
                handle: program,
                locations: Vec::new(),
                names: HashMap::new(),
            })))
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        if let Some(p) = self.programs.remove(program.0) {
            if self.state.current_program() == Some(p.handle) {
                self.state.use_program(None);
            }
            unsafe { self.state.ctx.delete_program(p.handle) };
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        let handle = program.and_then(|p| self.programs.get(p.0, "program").ok().map(|p| p.handle));
        self.state.use_program(handle);
    }

    fn active_uniforms(&mut self, program: ProgramId) -> Vec<ActiveUniform> {
        let handle = match self.program(program) {
            Ok(p) => p.handle,
            Err(_) => return Vec::new(),
        };

        let ctx = &self.state.ctx;

        unsafe {
            let count = ctx.get_active_uniforms(handle);

            (0..count)
                .filter_map(|index| ctx.get_active_uniform(handle, index))
                .map(|u| {
                    let name = u.name.strip_suffix("[0]").unwrap_or(&u.name).to_owned();
                    (name, u)
                })
                // uniforms in blocks have no location
                .filter(|(name, _)| ctx.get_uniform_location(handle, name).is_some())
                .map(|(name, u)| ActiveUniform {
                    name,
                    ty: UniformType::from_native(u.utype),
                    size: u.size.max(0) as u32,
                })
                .collect()
        }
    }

    fn active_attributes(&mut self, program: ProgramId) -> Vec<ActiveAttribute> {
        let handle = match self.program(program) {
            Ok(p) => p.handle,
            Err(_) => return Vec::new(),
        };

        let ctx = &self.state.ctx;

        unsafe {
            let count = ctx.get_active_attributes(handle);

            (0..count)
                .filter_map(|index| ctx.get_active_attribute(handle, index))
                .filter_map(|a| {
                    let location = ctx.get_attrib_location(handle, &a.name)?;
                    Some(ActiveAttribute {
                        name: a.name,
                        location,
                        size: a.size.max(0) as u32,
                    })
                })
                .collect()
        }
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let p = self.programs.get_mut(program.0, "program").ok()?;

        if let Some(&index) = p.names.get(name) {
            return Some(UniformLocation(index));
        }

        let location = unsafe { self.state.ctx.get_uniform_location(p.handle, name) }?;
        let index = p.locations.len() as u32;
        p.locations.push(location);
        p.names.insert(name.to_owned(), index);

        Some(UniformLocation(index))
    }

    fn set_uniform(
        &mut self,
        program: ProgramId,
        location: UniformLocation,
        value: &UniformValue,
    ) -> Result<()> {
        let (handle, loc) = {
            let p = self.program(program)?;
            let loc = p.locations.get(location.0 as usize).cloned().ok_or_else(|| {
                Error::Backend(format!("unknown uniform location {}", location.0))
            })?;
            (p.handle, loc)
        };

        // uploads go to the current program; the caller's program is restored afterwards
        let previous = self.state.current_program();
        self.state.use_program(Some(handle));

        let ctx = &self.state.ctx;
        let loc = Some(&loc);

        unsafe {
            match value.resolved() {
                UniformValue::Float(x) => ctx.uniform_1_f32(loc, x),
                UniformValue::Vec2([x, y]) => ctx.uniform_2_f32(loc, x, y),
                UniformValue::Vec3([x, y, z]) => ctx.uniform_3_f32(loc, x, y, z),
                UniformValue::Vec4([x, y, z, w]) => ctx.uniform_4_f32(loc, x, y, z, w),
                UniformValue::Int(x) => ctx.uniform_1_i32(loc, x),
                UniformValue::IVec2([x, y]) => ctx.uniform_2_i32(loc, x, y),
                UniformValue::IVec3([x, y, z]) => ctx.uniform_3_i32(loc, x, y, z),
                UniformValue::IVec4([x, y, z, w]) => ctx.uniform_4_i32(loc, x, y, z, w),
                UniformValue::UInt(x) => ctx.uniform_1_u32(loc, x),
                UniformValue::UVec2([x, y]) => ctx.uniform_2_u32(loc, x, y),
                UniformValue::UVec3([x, y, z]) => ctx.uniform_3_u32(loc, x, y, z),
                UniformValue::UVec4([x, y, z, w]) => ctx.uniform_4_u32(loc, x, y, z, w),
                UniformValue::Bool(b) => ctx.uniform_1_i32(loc, b as i32),
                UniformValue::Mat2(m) => ctx.uniform_matrix_2_f32_slice(loc, false, &m),
                UniformValue::Mat3(m) => ctx.uniform_matrix_3_f32_slice(loc, false, &m),
                UniformValue::Mat4(m) => ctx.uniform_matrix_4_f32_slice(loc, false, &m),
                UniformValue::FloatArray(v) => ctx.uniform_1_f32_slice(loc, v),
                UniformValue::Vec2Array(v) => ctx.uniform_2_f32_slice(loc, bytemuck::cast_slice(v)),
                UniformValue::Vec3Array(v) => ctx.uniform_3_f32_slice(loc, bytemuck::cast_slice(v)),
                UniformValue::Vec4Array(v) => ctx.uniform_4_f32_slice(loc, bytemuck::cast_slice(v)),
                UniformValue::IntArray(v) => ctx.uniform_1_i32_slice(loc, v),
                UniformValue::Mat4Array(v) => {
                    ctx.uniform_matrix_4_f32_slice(loc, false, bytemuck::cast_slice(v))
                }
                // resolved to a vec4 above
                UniformValue::Color(_) => (),
            }
        }

        self.state.use_program(previous);
        Ok(())
    }

    fn attribute_location(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let handle = self.program(program).ok()?.handle;
        unsafe { self.state.ctx.get_attrib_location(handle, name) }
    }

    fn uniform_block_index(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let handle = self.program(program).ok()?.handle;
        unsafe { self.state.ctx.get_uniform_block_index(handle, name) }
    }

    fn uniform_block_binding(&mut self, program: ProgramId, index: u32, binding: u32) {
        if let Ok(p) = self.program(program) {
            unsafe { self.state.ctx.uniform_block_binding(p.handle, index, binding) };
        }
    }

    fn storage_block_index(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let handle = self.program(program).ok()?.handle;
        unsafe { self.state.ctx.get_shader_storage_block_index(handle, name) }
    }

    fn storage_block_binding(&mut self, program: ProgramId, index: u32, binding: u32) {
        if let Ok(p) = self.program(program) {
            unsafe {
                self.state
                    .ctx
                    .shader_storage_block_binding(p.handle, index, binding)
            };
        }
    }

    fn create_vertex_array(&mut self) -> Result<VertexArrayId> {
        let handle = unsafe { self.state.ctx.create_vertex_array() }.map_err(Error::Backend)?;
        Ok(VertexArrayId(self.vertex_arrays.insert(handle)))
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) {
        if let Some(handle) = self.vertex_arrays.remove(vertex_array.0) {
            self.state.unbind_vertex_array(handle);
            unsafe { self.state.ctx.delete_vertex_array(handle) };
        }
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) {
        let handle = vertex_array
            .and_then(|vao| self.vertex_arrays.get(vao.0, "vertex array").ok().copied());
        self.state.bind_vertex_array(handle, Bind::Cached);
    }

    fn vertex_attribute(&mut self, attribute: &VertexAttribute) -> Result<()> {
        let handle = self.buffer(attribute.buffer)?.handle;
        self.state.bind_array_buffer(Some(handle), Bind::Cached);

        let ctx = &self.state.ctx;
        let a = attribute;

        unsafe {
            ctx.enable_vertex_attrib_array(a.location);

            match a.scalar {
                ScalarType::F32 => ctx.vertex_attrib_pointer_f32(
                    a.location,
                    a.components as i32,
                    a.scalar.native(),
                    false,
                    a.stride as i32,
                    a.offset as i32,
                ),
                _ => ctx.vertex_attrib_pointer_i32(
                    a.location,
                    a.components as i32,
                    a.scalar.native(),
                    a.stride as i32,
                    a.offset as i32,
                ),
            }

            ctx.vertex_attrib_divisor(a.location, a.divisor);
        }

        Ok(())
    }

    fn patch_vertices(&mut self, count: u32) {
        unsafe {
            self.state
                .ctx
                .patch_parameter_i32(glow::PATCH_VERTICES, count as i32)
        };
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        let mode = call.primitive.native();

        match call.indices {
            Some(indices) => {
                let handle = self.buffer(indices.buffer)?.handle;
                // forced: the vertex array may have been rebuilt since the last draw
                self.state
                    .bind_element_array_buffer(Some(handle), Bind::Forced);

                let ctx = &self.state.ctx;
                let ty = indices.ty.native();
                let offset = (call.first * indices.ty.size_in_bytes()) as i32;
                let count = call.count as i32;

                unsafe {
                    if call.base_instance > 0 {
                        ctx.draw_elements_instanced_base_vertex_base_instance(
                            mode,
                            count,
                            ty,
                            offset,
                            call.instances as i32,
                            0,
                            call.base_instance,
                        );
                    } else if call.instances != 1 {
                        ctx.draw_elements_instanced(mode, count, ty, offset, call.instances as i32);
                    } else {
                        ctx.draw_elements(mode, count, ty, offset);
                    }
                }
            }

            None => {
                let ctx = &self.state.ctx;
                let (first, count) = (call.first as i32, call.count as i32);

                unsafe {
                    if call.base_instance > 0 {
                        ctx.draw_arrays_instanced_base_instance(
                            mode,
                            first,
                            count,
                            call.instances as i32,
                            call.base_instance,
                        );
                    } else if call.instances != 1 {
                        ctx.draw_arrays_instanced(mode, first, count, call.instances as i32);
                    } else {
                        ctx.draw_arrays(mode, first, count);
                    }
                }
            }
        }

        Ok(())
    }

    fn set_capability(&mut self, capability: Capability, enabled: bool) {
        let cap = match capability {
            Capability::Blend => glow::BLEND,
            Capability::DepthTest => glow::DEPTH_TEST,
            Capability::CullFace => glow::CULL_FACE,
            Capability::ScissorTest => glow::SCISSOR_TEST,
            Capability::StencilTest => glow::STENCIL_TEST,
            Capability::SampleAlphaToCoverage => glow::SAMPLE_ALPHA_TO_COVERAGE,
            Capability::FramebufferSrgb | Capability::ProgramPointSize if self.gles => return,
            Capability::FramebufferSrgb => glow::FRAMEBUFFER_SRGB,
            Capability::ProgramPointSize => glow::PROGRAM_POINT_SIZE,
        };

        unsafe {
            if enabled {
                self.state.ctx.enable(cap);
            } else {
                self.state.ctx.disable(cap);
            }
        }
    }

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.state.set_viewport([x, y, width, height]);
    }

    fn scissor(&mut self, x: i32, y: i32, width: i32, height: i32) {
        unsafe { self.state.ctx.scissor(x, y, width, height) };
    }

    fn color_mask(&mut self, mask: [bool; 4]) {
        unsafe { self.state.ctx.color_mask(mask[0], mask[1], mask[2], mask[3]) };
    }

    fn depth_mask(&mut self, write: bool) {
        unsafe { self.state.ctx.depth_mask(write) };
    }

    fn depth_func(&mut self, func: DepthComparison) {
        unsafe { self.state.ctx.depth_func(depth_comparison_to_glow(func)) };
    }

    fn blend_equation_separate(&mut self, rgb: Equation, alpha: Equation) {
        unsafe {
            self.state.ctx.blend_equation_separate(
                blending_equation_to_glow(rgb),
                blending_equation_to_glow(alpha),
            )
        };
    }

    fn blend_func_separate(
        &mut self,
        src_rgb: Factor,
        dst_rgb: Factor,
        src_alpha: Factor,
        dst_alpha: Factor,
    ) {
        unsafe {
            self.state.ctx.blend_func_separate(
                blending_factor_to_glow(src_rgb),
                blending_factor_to_glow(dst_rgb),
                blending_factor_to_glow(src_alpha),
                blending_factor_to_glow(dst_alpha),
            )
        };
    }

    fn blend_draw_buffer(&mut self, draw_buffer: u32, blend: Option<BlendFunction>) {
        let ctx = &self.state.ctx;

        match blend {
            Some(BlendFunction { equations, factors }) => unsafe {
                ctx.enable_draw_buffer(glow::BLEND, draw_buffer);
                ctx.blend_equation_separate_draw_buffer(
                    draw_buffer,
                    blending_equation_to_glow(equations.0),
                    blending_equation_to_glow(equations.1),
                );
                ctx.blend_func_separate_draw_buffer(
                    draw_buffer,
                    blending_factor_to_glow(factors[0]),
                    blending_factor_to_glow(factors[1]),
                    blending_factor_to_glow(factors[2]),
                    blending_factor_to_glow(factors[3]),
                );
            },

            None => unsafe { ctx.disable_draw_buffer(glow::BLEND, draw_buffer) },
        }
    }

    fn cull_face(&mut self, mode: FaceCullingMode) {
        let mode = match mode {
            FaceCullingMode::Front => glow::FRONT,
            FaceCullingMode::Back => glow::BACK,
            FaceCullingMode::Both => glow::FRONT_AND_BACK,
        };

        unsafe { self.state.ctx.cull_face(mode) };
    }

    fn front_face(&mut self, order: FaceCullingOrder) {
        let order = match order {
            FaceCullingOrder::CW => glow::CW,
            FaceCullingOrder::CCW => glow::CCW,
        };

        unsafe { self.state.ctx.front_face(order) };
    }

    fn stencil_func(&mut self, face: StencilFace, func: DepthComparison, reference: i32, mask: u32) {
        unsafe {
            self.state.ctx.stencil_func_separate(
                glow_face(face),
                depth_comparison_to_glow(func),
                reference,
                mask,
            )
        };
    }

    fn stencil_op(
        &mut self,
        face: StencilFace,
        fail: StencilOperation,
        depth_fail: StencilOperation,
        depth_pass: StencilOperation,
    ) {
        unsafe {
            self.state.ctx.stencil_op_separate(
                glow_face(face),
                stencil_operation_to_glow(fail),
                stencil_operation_to_glow(depth_fail),
                stencil_operation_to_glow(depth_pass),
            )
        };
    }

    fn stencil_mask(&mut self, face: StencilFace, mask: u32) {
        unsafe { self.state.ctx.stencil_mask_separate(glow_face(face), mask) };
    }

    fn device_state(&mut self) -> Result<DeviceState> {
        self.state.device_state()
    }

    fn check_error(&mut self) -> Option<u32> {
        match unsafe { self.state.ctx.get_error() } {
            glow::NO_ERROR => None,
            code => Some(code),
        }
    }

    fn flush(&mut self) {
        unsafe { self.state.ctx.flush() };
    }

    fn finish(&mut self) {
        unsafe { self.state.ctx.finish() };
    }
}

impl Drop for GlowBackend {
    fn drop(&mut self) {
        let ctx = &self.state.ctx;

        unsafe {
            for (_, texture) in self.textures.items.drain() {
                match texture {
                    GlowTexture::Texture { handle, .. } => ctx.delete_texture(handle),
                    GlowTexture::Renderbuffer { handle, .. } => ctx.delete_renderbuffer(handle),
                }
            }
            for (_, b) in self.buffers.items.drain() {
                ctx.delete_buffer(b.handle);
            }
            for (_, fb) in self.framebuffers.items.drain() {
                ctx.delete_framebuffer(fb);
            }
            for (_, shader) in self.shaders.items.drain() {
                ctx.delete_shader(shader);
            }
            for (_, p) in self.programs.items.drain() {
                ctx.delete_program(p.handle);
            }
            for (_, vao) in self.vertex_arrays.items.drain() {
                ctx.delete_vertex_array(vao);
            }
        }
    }
}

fn glow_face(face: StencilFace) -> u32 {
    match face {
        StencilFace::Front => glow::FRONT,
        StencilFace::Back => glow::BACK,
        StencilFace::FrontAndBack => glow::FRONT_AND_BACK,
    }
}

fn glow_wrap(wrap: Wrap) -> u32 {
    match wrap {
        Wrap::ClampToEdge => glow::CLAMP_TO_EDGE,
        Wrap::Repeat => glow::REPEAT,
        Wrap::MirroredRepeat => glow::MIRRORED_REPEAT,
    }
}

fn glow_min_filter(filter: MinFilter) -> u32 {
    match filter {
        MinFilter::Nearest => glow::NEAREST,
        MinFilter::Linear => glow::LINEAR,
        MinFilter::NearestMipmapNearest => glow::NEAREST_MIPMAP_NEAREST,
        MinFilter::NearestMipmapLinear => glow::NEAREST_MIPMAP_LINEAR,
        MinFilter::LinearMipmapNearest => glow::LINEAR_MIPMAP_NEAREST,
        MinFilter::LinearMipmapLinear => glow::LINEAR_MIPMAP_LINEAR,
    }
}

fn glow_mag_filter(filter: MagFilter) -> u32 {
    match filter {
        MagFilter::Nearest => glow::NEAREST,
        MagFilter::Linear => glow::LINEAR,
    }
}
