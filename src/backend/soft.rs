//! Headless device keeping every object in host memory.
//!
//! The soft device honours the same contracts as a GL device for everything this crate relies
//! on: texel storage and conversion, framebuffer completeness, clears (including scissor, colour
//! mask and sRGB encoding), blits, fixed-function state queries and object name reuse. Draws are
//! flat shaded: the position comes from attribute location 0 and the fragment colour from the
//! expression assigned to the fragment output (a `vec4` literal, a `vec4` uniform, one element
//! of a `vec4` uniform array, or a `texelFetch` at the fragment coordinate). There is no depth
//! test.

mod glsl;
mod texel;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use luminance::blending::{Equation, Factor};
use luminance::depth_test::DepthComparison;
use luminance::face_culling::{FaceCullingMode, FaceCullingOrder};
use luminance::framebuffer::IncompleteReason;

use self::glsl::{FragmentExpr, Level, StageInfo};
use self::texel::Texel;
use super::*;
use crate::error::{Error, Result};
use crate::format::{
    linear_to_srgb, srgb_to_linear, BufferMultisample, ColorFormat, ColorType, NativeFormat,
    PixelFormat,
};
use crate::shader::ShaderStage;
use crate::uniform::{UniformType, UniformValue};
use crate::vertex_format::{DrawPrimitive, IndexType, ScalarType};

/// Object table reusing the lowest free name, like GL does.
#[derive(Debug)]
struct Slots<T> {
    items: Vec<Option<T>>,
}

impl<T> Slots<T> {
    fn new() -> Self {
        Slots { items: Vec::new() }
    }

    fn insert(&mut self, item: T) -> u32 {
        match self.items.iter().position(Option::is_none) {
            Some(index) => {
                self.items[index] = Some(item);
                index as u32 + 1
            }
            None => {
                self.items.push(Some(item));
                self.items.len() as u32
            }
        }
    }

    fn get(&self, id: u32) -> Option<&T> {
        self.items.get(id.checked_sub(1)? as usize)?.as_ref()
    }

    fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.items.get_mut(id.checked_sub(1)? as usize)?.as_mut()
    }

    fn remove(&mut self, id: u32) -> Option<T> {
        self.items.get_mut(id.checked_sub(1)? as usize)?.take()
    }

    fn len(&self) -> usize {
        self.items.iter().filter(|i| i.is_some()).count()
    }
}

#[derive(Debug)]
struct SoftTexture {
    desc: TextureDescriptor,
    levels: Vec<Vec<u8>>,
    sampling: Sampling,
}

impl SoftTexture {
    fn new(desc: TextureDescriptor) -> Self {
        let levels = (0..desc.levels.max(1))
            .map(|level| {
                let (w, h) = desc.level_size(level);
                vec![0; desc.format.byte_size(w, h, desc.layers(level))]
            })
            .collect();

        SoftTexture {
            desc,
            levels,
            sampling: Sampling::default(),
        }
    }

    fn texel_offset(&self, level: u32, layer: u32, x: u32, y: u32) -> Option<usize> {
        let size = texel::texel_size(self.desc.format)?;
        let (w, h) = self.desc.level_size(level);
        let layer_stride = (w * h) as usize * size;
        Some(layer as usize * layer_stride + (y * w + x) as usize * size)
    }

    fn texel(&self, level: u32, layer: u32, x: u32, y: u32) -> Option<Texel> {
        let size = texel::texel_size(self.desc.format)?;
        let offset = self.texel_offset(level, layer, x, y)?;
        let bytes = self.levels.get(level as usize)?.get(offset..offset + size)?;
        Some(texel::decode(self.desc.format, bytes))
    }

    fn set_texel(&mut self, level: u32, layer: u32, x: u32, y: u32, value: Texel) {
        let size = match texel::texel_size(self.desc.format) {
            Some(size) => size,
            None => return,
        };
        let format = self.desc.format;
        if let Some(offset) = self.texel_offset(level, layer, x, y) {
            if let Some(bytes) = self
                .levels
                .get_mut(level as usize)
                .and_then(|l| l.get_mut(offset..offset + size))
            {
                texel::encode(format, value, bytes);
            }
        }
    }

    fn is_srgb(&self) -> bool {
        matches!(self.desc.format, PixelFormat::Color(_, ty) if ty.is_srgb())
    }

    fn check_region(&self, level: u32, region: &Region) -> Result<()> {
        if level >= self.desc.levels.max(1) {
            return Err(Error::Backend(format!(
                "level {} out of range (texture has {})",
                level, self.desc.levels
            )));
        }

        let (w, h) = self.desc.level_size(level);
        let layers = self.desc.layers(level);
        if !region.fits(w, h, layers) {
            return Err(Error::Backend(format!(
                "region {:?} exceeds level {} ({}x{}x{})",
                region, level, w, h, layers
            )));
        }

        Ok(())
    }
}

#[derive(Debug)]
struct SoftBuffer {
    storage: Rc<RefCell<Vec<u8>>>,
}

#[derive(Debug, Default)]
struct SoftFramebuffer {
    attachments: BTreeMap<AttachmentKey, ImageRef>,
    draw_buffers: u32,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum AttachmentKey {
    Color(u32),
    Depth,
    Stencil,
}

#[derive(Debug)]
struct SoftShader {
    stage: ShaderStage,
    info: StageInfo,
}

#[derive(Debug)]
struct SoftProgram {
    attributes: BTreeMap<String, (u32, u32)>,
    uniforms: Vec<ActiveUniform>,
    values: HashMap<u32, Vec<f64>>,
    uniform_blocks: Vec<String>,
    block_bindings: HashMap<u32, u32>,
    storage_blocks: Vec<String>,
    storage_bindings: HashMap<u32, u32>,
    output: FragmentExpr,
}

// element locations carry the array index above the uniform index
const ELEMENT_SHIFT: u32 = 16;

fn uniform_components(ty: UniformType) -> usize {
    match ty {
        UniformType::Vec2 | UniformType::IVec2 | UniformType::UVec2 => 2,
        UniformType::Vec3 | UniformType::IVec3 | UniformType::UVec3 => 3,
        UniformType::Vec4 | UniformType::IVec4 | UniformType::UVec4 | UniformType::Mat2 => 4,
        UniformType::Mat3 => 9,
        UniformType::Mat4 => 16,
        _ => 1,
    }
}

impl SoftProgram {
    fn uniform_value(&self, name: &str) -> Option<&[f64]> {
        self.uniform_element(name, 0)
    }

    fn uniform_element(&self, name: &str, element: u32) -> Option<&[f64]> {
        let index = self.uniforms.iter().position(|u| u.name == name)?;
        let uniform = &self.uniforms[index];
        if element >= uniform.size.max(1) {
            return None;
        }

        let start = element as usize * uniform_components(uniform.ty);
        self.values.get(&(index as u32))?.get(start..)
    }
}

#[derive(Debug)]
struct SoftAttribute {
    storage: Rc<RefCell<Vec<u8>>>,
    attribute: VertexAttribute,
}

#[derive(Debug, Default)]
struct SoftVertexArray {
    attributes: BTreeMap<u32, SoftAttribute>,
}

/// An in-memory device.
///
/// ```
/// use draw_glow::backend::{Backend, SoftBackend};
///
/// let backend = SoftBackend::new(640, 480);
/// assert!(backend.info().version.starts_with("4.6"));
/// ```
#[derive(Debug)]
pub struct SoftBackend {
    version: String,
    textures: Slots<SoftTexture>,
    buffers: Slots<SoftBuffer>,
    framebuffers: Slots<SoftFramebuffer>,
    shaders: Slots<SoftShader>,
    programs: Slots<SoftProgram>,
    vertex_arrays: Slots<SoftVertexArray>,
    default_color: TextureId,
    bound_framebuffer: Option<FramebufferId>,
    program: Option<ProgramId>,
    vertex_array: Option<VertexArrayId>,
    texture_units: HashMap<u32, TextureId>,
    storage_bindings: HashMap<u32, BufferId>,
    state: DeviceState,
    draw_buffer_blend: HashMap<u32, Option<BlendFunction>>,
    framebuffer_srgb: bool,
    program_point_size: bool,
    patch_vertices: u32,
    draw_calls: usize,
}

impl SoftBackend {
    /// A desktop GL 4.6 device with an RGBA8 default framebuffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_version(width, height, "4.6.0 soft")
    }

    /// A device reporting `version` as its `GL_VERSION` string.
    pub fn with_version(width: u32, height: u32, version: &str) -> Self {
        let mut textures = Slots::new();
        let default_color = TextureId(textures.insert(SoftTexture::new(default_descriptor(
            width, height,
        ))));

        let (w, h) = (width as i32, height as i32);
        let state = DeviceState {
            blend: false,
            blend_equations: (Equation::Additive, Equation::Additive),
            blend_factors: [Factor::One, Factor::Zero, Factor::One, Factor::Zero],
            depth_test: false,
            depth_func: DepthComparison::Less,
            depth_write: true,
            color_mask: [true; 4],
            scissor_test: false,
            scissor: [0, 0, w, h],
            stencil_test: false,
            stencil_front: StencilFaceState::default(),
            stencil_back: StencilFaceState::default(),
            cull_face: false,
            cull_mode: FaceCullingMode::Back,
            front_face: FaceCullingOrder::CCW,
            alpha_to_coverage: false,
            viewport: [0, 0, w, h],
        };

        SoftBackend {
            version: version.to_owned(),
            textures,
            buffers: Slots::new(),
            framebuffers: Slots::new(),
            shaders: Slots::new(),
            programs: Slots::new(),
            vertex_arrays: Slots::new(),
            default_color,
            bound_framebuffer: None,
            program: None,
            vertex_array: None,
            texture_units: HashMap::new(),
            storage_bindings: HashMap::new(),
            state,
            draw_buffer_blend: HashMap::new(),
            framebuffer_srgb: false,
            program_point_size: false,
            patch_vertices: 3,
            draw_calls: 0,
        }
    }

    /// Resize the default framebuffer; its contents are cleared.
    pub fn resize(&mut self, width: u32, height: u32) {
        if let Some(texture) = self.textures.get_mut(self.default_color.0) {
            *texture = SoftTexture::new(default_descriptor(width, height));
        }
    }

    /// Read an RGBA8 pixel of the default framebuffer.
    pub fn default_framebuffer_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let t = self.textures.get(self.default_color.0)?.texel(0, 0, x, y)?;
        let mut out = [0; 4];
        for (o, c) in out.iter_mut().zip(t.iter()) {
            *o = (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
        Some(out)
    }

    /// Number of live vertex arrays.
    pub fn vertex_array_count(&self) -> usize {
        self.vertex_arrays.len()
    }

    /// Number of live textures, not counting the default framebuffer.
    pub fn texture_count(&self) -> usize {
        self.textures.len() - 1
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Number of draw calls issued so far.
    pub fn draw_calls(&self) -> usize {
        self.draw_calls
    }

    pub fn sampling(&self, texture: TextureId) -> Option<Sampling> {
        self.textures.get(texture.0).map(|t| t.sampling)
    }

    fn texture(&self, id: TextureId) -> Result<&SoftTexture> {
        self.textures
            .get(id.0)
            .ok_or_else(|| Error::Backend(format!("unknown texture {}", id.0)))
    }

    fn texture_mut(&mut self, id: TextureId) -> Result<&mut SoftTexture> {
        self.textures
            .get_mut(id.0)
            .ok_or_else(|| Error::Backend(format!("unknown texture {}", id.0)))
    }

    fn buffer(&self, id: BufferId) -> Result<&SoftBuffer> {
        self.buffers
            .get(id.0)
            .ok_or_else(|| Error::Backend(format!("unknown buffer {}", id.0)))
    }

    fn framebuffer(&self, id: FramebufferId) -> Result<&SoftFramebuffer> {
        self.framebuffers
            .get(id.0)
            .ok_or_else(|| Error::Backend(format!("unknown framebuffer {}", id.0)))
    }

    /// Colour images of the bound framebuffer, by draw buffer.
    fn color_targets(&self) -> Vec<(u32, ImageRef)> {
        match self.bound_framebuffer {
            None => vec![(0, default_image(self.default_color))],
            Some(fb) => match self.framebuffers.get(fb.0) {
                Some(fb) => fb
                    .attachments
                    .iter()
                    .filter_map(|(key, image)| match key {
                        AttachmentKey::Color(i) if *i < fb.draw_buffers.max(1) => {
                            Some((*i, *image))
                        }
                        _ => None,
                    })
                    .collect(),
                None => Vec::new(),
            },
        }
    }

    fn surface_image(&self, surface: Surface) -> Result<ImageRef> {
        match surface {
            Surface::Image(image) => Ok(image),
            Surface::Framebuffer(None, _) => Ok(default_image(self.default_color)),
            Surface::Framebuffer(Some(fb), index) => self
                .framebuffer(fb)?
                .attachments
                .get(&AttachmentKey::Color(index))
                .copied()
                .ok_or_else(|| {
                    Error::Backend(format!("framebuffer {} has no colour attachment {}", fb.0, index))
                }),
        }
    }

    fn scissor_contains(&self, x: i32, y: i32) -> bool {
        if !self.state.scissor_test {
            return true;
        }
        let [sx, sy, sw, sh] = self.state.scissor;
        x >= sx && y >= sy && x < sx + sw && y < sy + sh
    }

    fn write_pixel(
        &mut self,
        image: ImageRef,
        x: u32,
        y: u32,
        color: Texel,
        blend: Option<BlendFunction>,
    ) {
        let mask = self.state.color_mask;
        let srgb_enabled = self.framebuffer_srgb;

        let texture = match self.textures.get_mut(image.texture.0) {
            Some(t) => t,
            None => return,
        };

        let (w, h) = texture.desc.level_size(image.level);
        if x >= w || y >= h {
            return;
        }

        let encode_srgb = srgb_enabled && texture.is_srgb();
        let dst = match texture.texel(image.level, image.layer, x, y) {
            Some(dst) => dst,
            None => return,
        };
        let dst_linear = if encode_srgb { linearize(dst) } else { dst };

        let mut out = match blend {
            Some(f) => blend_texels(color, dst_linear, f.equations, f.factors),
            None => color,
        };
        if encode_srgb {
            out = delinearize(out);
        }

        let mut merged = dst;
        for c in 0..4 {
            if mask[c] {
                merged[c] = out[c];
            }
        }

        texture.set_texel(image.level, image.layer, x, y, merged);
    }

    fn fragment_color(&self, program: &SoftProgram, x: u32, y: u32) -> Texel {
        match &program.output {
            FragmentExpr::Constant(c) => *c,
            FragmentExpr::Uniform(name) => uniform_color(program.uniform_value(name)),
            FragmentExpr::Element(name, index) => {
                uniform_color(program.uniform_element(name, *index))
            }
            FragmentExpr::TexelFetch {
                sampler,
                offset,
                level,
            } => {
                let unit = match program.uniform_value(sampler) {
                    Some(v) => v.first().copied().unwrap_or(0.0) as u32,
                    None => 0,
                };
                let (ox, oy) = match offset.as_deref().and_then(|o| program.uniform_value(o)) {
                    Some(v) => (
                        v.first().copied().unwrap_or(0.0) as i64,
                        v.get(1).copied().unwrap_or(0.0) as i64,
                    ),
                    None => (0, 0),
                };
                let level = match level {
                    Level::Literal(l) => *l,
                    Level::Uniform(name) => program
                        .uniform_value(name)
                        .and_then(|v| v.first().copied())
                        .unwrap_or(0.0) as u32,
                };

                let texture = match self
                    .texture_units
                    .get(&unit)
                    .and_then(|t| self.textures.get(t.0))
                {
                    Some(t) => t,
                    None => return [0.0; 4],
                };

                let (sx, sy) = (x as i64 + ox, y as i64 + oy);
                if sx < 0 || sy < 0 {
                    return [0.0; 4];
                }
                match texture.texel(level, 0, sx as u32, sy as u32) {
                    Some(t) if texture.is_srgb() => linearize(t),
                    Some(t) => t,
                    None => [0.0; 4],
                }
            }
        }
    }

    fn fetch_position(&self, vao: &SoftVertexArray, vertex: u32, instance: u32) -> Option<[f64; 4]> {
        let attr = vao.attributes.get(&0)?;
        let a = &attr.attribute;
        let element = if a.divisor > 0 {
            instance / a.divisor
        } else {
            vertex
        };

        let storage = attr.storage.borrow();
        let base = (a.offset + element * a.stride) as usize;
        let size = a.scalar.size() as usize;
        let mut position = [0.0, 0.0, 0.0, 1.0];

        for (c, p) in position.iter_mut().enumerate().take(a.components.min(4) as usize) {
            let start = base + c * size;
            let bytes = storage.get(start..start + size)?;
            *p = match a.scalar {
                ScalarType::U8 => bytes[0] as f64,
                ScalarType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
                ScalarType::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
                ScalarType::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            };
        }

        Some(position)
    }

    fn to_window(&self, clip: [f64; 4]) -> (f64, f64) {
        let [vx, vy, vw, vh] = self.state.viewport;
        let w = if clip[3] == 0.0 { 1.0 } else { clip[3] };
        let (nx, ny) = (clip[0] / w, clip[1] / w);
        (
            vx as f64 + (nx + 1.0) * 0.5 * vw as f64,
            vy as f64 + (ny + 1.0) * 0.5 * vh as f64,
        )
    }

    fn rasterize_triangle(
        &mut self,
        program: &SoftProgram,
        targets: &[(u32, ImageRef)],
        v: [(f64, f64); 3],
    ) {
        let area = edge(v[0], v[1], v[2]);
        if area == 0.0 {
            return;
        }

        if self.state.cull_face {
            let ccw = area > 0.0;
            let front = match self.state.front_face {
                FaceCullingOrder::CCW => ccw,
                FaceCullingOrder::CW => !ccw,
            };
            let culled = match self.state.cull_mode {
                FaceCullingMode::Front => front,
                FaceCullingMode::Back => !front,
                FaceCullingMode::Both => true,
            };
            if culled {
                return;
            }
        }

        let [vx, vy, vw, vh] = self.state.viewport;
        let min_x = v.iter().map(|p| p.0).fold(f64::MAX, f64::min).floor().max(vx as f64) as i32;
        let max_x = v.iter().map(|p| p.0).fold(f64::MIN, f64::max).ceil().min((vx + vw) as f64) as i32;
        let min_y = v.iter().map(|p| p.1).fold(f64::MAX, f64::min).floor().max(vy as f64) as i32;
        let max_y = v.iter().map(|p| p.1).fold(f64::MIN, f64::max).ceil().min((vy + vh) as f64) as i32;

        for y in min_y.max(0)..max_y {
            for x in min_x.max(0)..max_x {
                let p = (x as f64 + 0.5, y as f64 + 0.5);
                let w0 = edge(v[1], v[2], p) * area.signum();
                let w1 = edge(v[2], v[0], p) * area.signum();
                let w2 = edge(v[0], v[1], p) * area.signum();

                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 || !self.scissor_contains(x, y) {
                    continue;
                }

                self.shade(program, targets, x as u32, y as u32);
            }
        }
    }

    fn shade(&mut self, program: &SoftProgram, targets: &[(u32, ImageRef)], x: u32, y: u32) {
        let color = self.fragment_color(program, x, y);
        let global = BlendFunction {
            equations: self.state.blend_equations,
            factors: self.state.blend_factors,
        };
        let coverage = self.state.alpha_to_coverage;
        let enabled = self.state.blend && !coverage;
        for &(index, image) in targets {
            let blend = match self.draw_buffer_blend.get(&index) {
                Some(over) => over.filter(|_| !coverage),
                None if enabled => Some(global),
                None => None,
            };
            self.write_pixel(image, x, y, color, blend);
        }
    }

    fn vertex_indices(&self, call: &DrawCall) -> Result<Vec<u32>> {
        match call.indices {
            None => Ok((call.first..call.first + call.count).collect()),
            Some(source) => {
                let buffer = self.buffer(source.buffer)?.storage.borrow();
                let size = source.ty.size_in_bytes() as usize;
                (call.first..call.first + call.count)
                    .map(|i| {
                        let start = i as usize * size;
                        let bytes = buffer.get(start..start + size).ok_or_else(|| {
                            Error::Backend(format!("index {} out of range of index buffer", i))
                        })?;
                        Ok(match source.ty {
                            IndexType::INT16 => u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
                            IndexType::INT32 => {
                                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
                            }
                        })
                    })
                    .collect()
            }
        }
    }
}

fn default_descriptor(width: u32, height: u32) -> TextureDescriptor {
    let format = PixelFormat::Color(ColorFormat::RGBa, ColorType::UINT8);
    TextureDescriptor {
        kind: TextureKind::Texture2D,
        width: width.max(1),
        height: height.max(1),
        depth: 1,
        levels: 1,
        format,
        native: NativeFormat {
            internal_format: glow::RGBA8,
            format: glow::RGBA,
            ty: glow::UNSIGNED_BYTE,
        },
        multisample: BufferMultisample::Disabled,
        storage: StorageMode::Storage,
    }
}

fn default_image(texture: TextureId) -> ImageRef {
    ImageRef {
        texture,
        level: 0,
        layer: 0,
    }
}

fn edge(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> f64 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

fn linearize(t: Texel) -> Texel {
    [
        srgb_to_linear(t[0] as f32) as f64,
        srgb_to_linear(t[1] as f32) as f64,
        srgb_to_linear(t[2] as f32) as f64,
        t[3],
    ]
}

fn delinearize(t: Texel) -> Texel {
    [
        linear_to_srgb(t[0] as f32) as f64,
        linear_to_srgb(t[1] as f32) as f64,
        linear_to_srgb(t[2] as f32) as f64,
        t[3],
    ]
}

fn blend_texels(src: Texel, dst: Texel, equations: (Equation, Equation), factors: [Factor; 4]) -> Texel {
    let factor = |f: Factor, c: usize| -> f64 {
        match f {
            Factor::One => 1.0,
            Factor::Zero => 0.0,
            Factor::SrcColor => src[c],
            Factor::SrcColorComplement => 1.0 - src[c],
            Factor::DestColor => dst[c],
            Factor::DestColorComplement => 1.0 - dst[c],
            Factor::SrcAlpha => src[3],
            Factor::SrcAlphaComplement => 1.0 - src[3],
            Factor::DstAlpha => dst[3],
            Factor::DstAlphaComplement => 1.0 - dst[3],
            Factor::SrcAlphaSaturate if c == 3 => 1.0,
            Factor::SrcAlphaSaturate => src[3].min(1.0 - dst[3]),
        }
    };

    let mut out = [0.0; 4];
    for (c, o) in out.iter_mut().enumerate() {
        let (equation, sf, df) = if c < 3 {
            (equations.0, factors[0], factors[1])
        } else {
            (equations.1, factors[2], factors[3])
        };
        let (s, d) = (src[c] * factor(sf, c), dst[c] * factor(df, c));
        *o = match equation {
            Equation::Additive => s + d,
            Equation::Subtract => s - d,
            Equation::ReverseSubtract => d - s,
            Equation::Min => src[c].min(dst[c]),
            Equation::Max => src[c].max(dst[c]),
        };
    }

    out
}

fn uniform_color(value: Option<&[f64]>) -> Texel {
    match value {
        Some(v) => [
            v.first().copied().unwrap_or(0.0),
            v.get(1).copied().unwrap_or(0.0),
            v.get(2).copied().unwrap_or(0.0),
            v.get(3).copied().unwrap_or(1.0),
        ],
        None => [0.0; 4],
    }
}

fn flatten(value: &UniformValue) -> Vec<f64> {
    fn floats(v: &[f32]) -> Vec<f64> {
        v.iter().map(|&x| x as f64).collect()
    }

    match value.resolved() {
        UniformValue::Float(x) => vec![x as f64],
        UniformValue::Vec2(v) => floats(&v),
        UniformValue::Vec3(v) => floats(&v),
        UniformValue::Vec4(v) => floats(&v),
        UniformValue::Int(x) => vec![x as f64],
        UniformValue::IVec2(v) => v.iter().map(|&x| x as f64).collect(),
        UniformValue::IVec3(v) => v.iter().map(|&x| x as f64).collect(),
        UniformValue::IVec4(v) => v.iter().map(|&x| x as f64).collect(),
        UniformValue::UInt(x) => vec![x as f64],
        UniformValue::UVec2(v) => v.iter().map(|&x| x as f64).collect(),
        UniformValue::UVec3(v) => v.iter().map(|&x| x as f64).collect(),
        UniformValue::UVec4(v) => v.iter().map(|&x| x as f64).collect(),
        UniformValue::Bool(b) => vec![if b { 1.0 } else { 0.0 }],
        UniformValue::Mat2(m) => floats(&m),
        UniformValue::Mat3(m) => floats(&m),
        UniformValue::Mat4(m) => floats(&m),
        UniformValue::FloatArray(v) => floats(v),
        UniformValue::Vec2Array(v) => floats(bytemuck::cast_slice(v)),
        UniformValue::Vec3Array(v) => floats(bytemuck::cast_slice(v)),
        UniformValue::Vec4Array(v) => floats(bytemuck::cast_slice(v)),
        UniformValue::IntArray(v) => v.iter().map(|&x| x as f64).collect(),
        UniformValue::Mat4Array(v) => floats(bytemuck::cast_slice(v)),
        UniformValue::Color(c) => floats(&c.to_linear().to_array()),
    }
}

fn clear_texel(value: ClearValue) -> Texel {
    match value {
        ClearValue::Float(v) => [v[0] as f64, v[1] as f64, v[2] as f64, v[3] as f64],
        ClearValue::Int(v) => [v[0] as f64, v[1] as f64, v[2] as f64, v[3] as f64],
        ClearValue::UInt(v) => [v[0] as f64, v[1] as f64, v[2] as f64, v[3] as f64],
    }
}

fn attachment_key(point: AttachmentPoint) -> Vec<AttachmentKey> {
    match point {
        AttachmentPoint::Color(i) => vec![AttachmentKey::Color(i)],
        AttachmentPoint::Depth => vec![AttachmentKey::Depth],
        AttachmentPoint::Stencil => vec![AttachmentKey::Stencil],
        AttachmentPoint::DepthStencil => vec![AttachmentKey::Depth, AttachmentKey::Stencil],
    }
}

impl Backend for SoftBackend {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            version: self.version.clone(),
            renderer: "soft".to_owned(),
            vendor: "draw-glow".to_owned(),
            extensions: vec![
                "GL_EXT_texture_compression_s3tc".to_owned(),
                "GL_EXT_texture_compression_bptc".to_owned(),
                "GL_EXT_color_buffer_float".to_owned(),
            ],
            limits: Limits {
                max_texture_size: 16384,
                max_color_attachments: 8,
                max_samples: 8,
                max_vertex_attributes: 16,
                max_anisotropy: 16.0,
            },
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId> {
        if desc.width == 0 || desc.height == 0 || desc.depth == 0 {
            return Err(Error::Backend(format!(
                "cannot allocate {}x{}x{} texture",
                desc.width, desc.height, desc.depth
            )));
        }

        Ok(TextureId(self.textures.insert(SoftTexture::new(*desc))))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if texture != self.default_color {
            self.textures.remove(texture.0);
            self.texture_units.retain(|_, t| *t != texture);
        }
    }

    fn set_sampling(&mut self, texture: TextureId, sampling: &Sampling) -> Result<()> {
        self.texture_mut(texture)?.sampling = *sampling;
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
        let t = self.texture_mut(texture)?;
        t.check_region(level, &region)?;
        let storage = t.desc.format;

        if storage.is_compressed() || format.is_compressed() {
            let (w, h) = t.desc.level_size(level);
            if storage != format || region.x != 0 || region.y != 0 || region.width != w || region.height != h {
                return Err(Error::Backend(
                    "compressed uploads must cover whole layers in the storage format".to_owned(),
                ));
            }
            let layer_size = storage.byte_size(w, h, 1);
            let start = region.z as usize * layer_size;
            let len = region.depth as usize * layer_size;
            let src = data.get(..len).ok_or_else(|| short(len, data.len()))?;
            t.levels[level as usize][start..start + len].copy_from_slice(src);
            return Ok(());
        }

        texel::check_convertible(format, storage)?;
        let (src_size, dst_size) = match (texel::texel_size(format), texel::texel_size(storage)) {
            (Some(s), Some(d)) => (s, d),
            _ => return Err(Error::Backend("unsized texel format".to_owned())),
        };
        let required = format.byte_size(region.width, region.height, region.depth);
        if data.len() < required {
            return Err(short(required, data.len()));
        }

        let mut src = 0;
        for z in region.z..region.z + region.depth {
            for y in region.y..region.y + region.height {
                for x in region.x..region.x + region.width {
                    if let Some(offset) = t.texel_offset(level, z, x, y) {
                        let dst = &mut t.levels[level as usize][offset..offset + dst_size];
                        texel::convert(format, &data[src..src + src_size], storage, dst);
                    }
                    src += src_size;
                }
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
        let t = self.texture(texture)?;
        t.check_region(level, &region)?;
        let storage = t.desc.format;

        if storage.is_compressed() || format.is_compressed() {
            let (w, h) = t.desc.level_size(level);
            if storage != format || region.width != w || region.height != h {
                return Err(Error::Backend(
                    "compressed downloads must cover whole layers in the storage format".to_owned(),
                ));
            }
            let layer_size = storage.byte_size(w, h, 1);
            let start = region.z as usize * layer_size;
            let len = region.depth as usize * layer_size;
            if out.len() < len {
                return Err(short(len, out.len()));
            }
            out[..len].copy_from_slice(&t.levels[level as usize][start..start + len]);
            return Ok(());
        }

        texel::check_convertible(storage, format)?;
        let (src_size, dst_size) = match (texel::texel_size(storage), texel::texel_size(format)) {
            (Some(s), Some(d)) => (s, d),
            _ => return Err(Error::Backend("unsized texel format".to_owned())),
        };
        let required = format.byte_size(region.width, region.height, region.depth);
        if out.len() < required {
            return Err(short(required, out.len()));
        }

        let mut dst = 0;
        for z in region.z..region.z + region.depth {
            for y in region.y..region.y + region.height {
                for x in region.x..region.x + region.width {
                    if let Some(offset) = t.texel_offset(level, z, x, y) {
                        let src = &t.levels[level as usize][offset..offset + src_size];
                        texel::convert(storage, src, format, &mut out[dst..dst + dst_size]);
                    }
                    dst += dst_size;
                }
            }
        }

        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: TextureId) -> Result<()> {
        let t = self.texture_mut(texture)?;
        if t.desc.format.is_compressed() {
            return Err(Error::Backend("cannot generate mipmaps of compressed textures".to_owned()));
        }

        for level in 1..t.desc.levels {
            let (w, h) = t.desc.level_size(level);
            let (pw, ph) = t.desc.level_size(level - 1);
            for layer in 0..t.desc.layers(level) {
                for y in 0..h {
                    for x in 0..w {
                        let mut sum = [0.0; 4];
                        let mut n = 0.0;
                        for (sx, sy) in [(2 * x, 2 * y), (2 * x + 1, 2 * y), (2 * x, 2 * y + 1), (2 * x + 1, 2 * y + 1)] {
                            if sx < pw && sy < ph {
                                if let Some(p) = t.texel(level - 1, layer, sx, sy) {
                                    for c in 0..4 {
                                        sum[c] += p[c];
                                    }
                                    n += 1.0;
                                }
                            }
                        }
                        if n > 0.0 {
                            t.set_texel(level, layer, x, y, sum.map(|s| s / n));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn clear_image(&mut self, image: ImageRef, value: ClearValue) -> Result<()> {
        let srgb_enabled = self.framebuffer_srgb;
        let t = self.texture_mut(image.texture)?;
        let (w, h) = t.desc.level_size(image.level);
        let mut texel = clear_texel(value);
        if srgb_enabled && t.is_srgb() {
            texel = delinearize(texel);
        }

        for y in 0..h {
            for x in 0..w {
                t.set_texel(image.level, image.layer, x, y, texel);
            }
        }

        Ok(())
    }

    fn copy_image(&mut self, source: ImageRef, target: ImageRef, width: u32, height: u32) -> Result<()> {
        let src = self.texture(source.texture)?;
        let (src_format, src_compressed) = (src.desc.format, src.desc.format.is_compressed());

        if src_compressed {
            let bytes = src.levels[source.level as usize].clone();
            let dst = self.texture_mut(target.texture)?;
            if dst.desc.format != src_format {
                return Err(Error::Backend("compressed copies need identical formats".to_owned()));
            }
            let (w, h) = dst.desc.level_size(target.level);
            let layer_size = src_format.byte_size(w, h, 1);
            let from = source.layer as usize * layer_size;
            let to = target.layer as usize * layer_size;
            dst.levels[target.level as usize][to..to + layer_size]
                .copy_from_slice(&bytes[from..from + layer_size]);
            return Ok(());
        }

        let mut texels = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                texels.push(src.texel(source.level, source.layer, x, y).unwrap_or([0.0; 4]));
            }
        }

        let dst = self.texture_mut(target.texture)?;
        texel::check_convertible(src_format, dst.desc.format)?;
        for y in 0..height {
            for x in 0..width {
                dst.set_texel(target.level, target.layer, x, y, texels[(y * width + x) as usize]);
            }
        }

        Ok(())
    }

    fn blit(&mut self, blit: &Blit) -> Result<()> {
        let source = self.surface_image(blit.source)?;
        let target = self.surface_image(blit.target)?;
        let (sb, tb) = (blit.source_bounds, blit.target_bounds);
        let (tw, th) = (tb.width().max(1), tb.height().max(1));

        let src = self.texture(source.texture)?;
        if src.desc.format.is_compressed() {
            return Err(Error::Backend("cannot blit from a compressed texture".to_owned()));
        }
        let mut samples = Vec::with_capacity((tw * th) as usize);
        for j in 0..th {
            for i in 0..tw {
                // nearest source texel for the centre of target texel (i, j)
                let u = (i as f64 + 0.5) / tw as f64;
                let v = (j as f64 + 0.5) / th as f64;
                let sx = sb.x0 as f64 + u * (sb.x1 - sb.x0) as f64;
                let sy = sb.y0 as f64 + v * (sb.y1 - sb.y0) as f64;
                let texel = if sx < 0.0 || sy < 0.0 {
                    None
                } else {
                    src.texel(source.level, source.layer, sx.floor() as u32, sy.floor() as u32)
                };
                samples.push(texel);
            }
        }

        let dst = self.texture_mut(target.texture)?;
        let x_step = if tb.x1 >= tb.x0 { 1 } else { -1 };
        let y_step = if tb.y1 >= tb.y0 { 1 } else { -1 };
        for j in 0..th {
            for i in 0..tw {
                let x = if x_step > 0 { tb.x0 + i } else { tb.x0 - 1 - i };
                let y = if y_step > 0 { tb.y0 + j } else { tb.y0 - 1 - j };
                if x < 0 || y < 0 {
                    continue;
                }
                if let Some(texel) = samples[(j * tw + i) as usize] {
                    dst.set_texel(target.level, target.layer, x as u32, y as u32, texel);
                }
            }
        }

        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) -> Result<()> {
        match texture {
            Some(t) => {
                self.texture(t)?;
                self.texture_units.insert(unit, t);
            }
            None => {
                self.texture_units.remove(&unit);
            }
        }
        Ok(())
    }

    fn bind_image_texture(
        &mut self,
        _unit: u32,
        image: ImageRef,
        _access: ImageAccess,
        _format: NativeFormat,
    ) -> Result<()> {
        self.texture(image.texture).map(|_| ())
    }

    fn create_buffer(&mut self, _kind: BufferKind, size: usize, _usage: BufferUsage) -> Result<BufferId> {
        Ok(BufferId(self.buffers.insert(SoftBuffer {
            storage: Rc::new(RefCell::new(vec![0; size])),
        })))
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(buffer.0);
        self.storage_bindings.retain(|_, b| *b != buffer);
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]) -> Result<()> {
        let mut storage = self.buffer(buffer)?.storage.borrow_mut();
        let available = storage.len();
        let dst = storage
            .get_mut(offset..offset + data.len())
            .ok_or_else(|| short(offset + data.len(), available))?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferId, offset: usize, out: &mut [u8]) -> Result<()> {
        let storage = self.buffer(buffer)?.storage.borrow();
        let src = storage
            .get(offset..offset + out.len())
            .ok_or_else(|| short(offset + out.len(), storage.len()))?;
        out.copy_from_slice(src);
        Ok(())
    }

    fn bind_storage_buffer(&mut self, binding: u32, buffer: Option<BufferId>) -> Result<()> {
        match buffer {
            Some(b) => {
                self.buffer(b)?;
                self.storage_bindings.insert(binding, b);
            }
            None => {
                self.storage_bindings.remove(&binding);
            }
        }
        Ok(())
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferId> {
        Ok(FramebufferId(self.framebuffers.insert(SoftFramebuffer {
            draw_buffers: 1,
            ..SoftFramebuffer::default()
        })))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(framebuffer.0);
        if self.bound_framebuffer == Some(framebuffer) {
            self.bound_framebuffer = None;
        }
    }

    fn attach(
        &mut self,
        framebuffer: FramebufferId,
        point: AttachmentPoint,
        image: Option<ImageRef>,
    ) -> Result<()> {
        if let Some(image) = image {
            self.texture(image.texture)?;
        }

        let fb = self
            .framebuffers
            .get_mut(framebuffer.0)
            .ok_or_else(|| Error::Backend(format!("unknown framebuffer {}", framebuffer.0)))?;

        for key in attachment_key(point) {
            match image {
                Some(image) => {
                    fb.attachments.insert(key, image);
                }
                None => {
                    fb.attachments.remove(&key);
                }
            }
        }

        Ok(())
    }

    fn set_draw_buffers(&mut self, framebuffer: FramebufferId, count: u32) -> Result<()> {
        let fb = self
            .framebuffers
            .get_mut(framebuffer.0)
            .ok_or_else(|| Error::Backend(format!("unknown framebuffer {}", framebuffer.0)))?;
        fb.draw_buffers = count;
        Ok(())
    }

    fn framebuffer_status(
        &mut self,
        framebuffer: FramebufferId,
    ) -> std::result::Result<(), IncompleteReason> {
        let fb = self
            .framebuffers
            .get(framebuffer.0)
            .ok_or(IncompleteReason::Undefined)?;

        if fb.attachments.is_empty() {
            return Err(IncompleteReason::MissingAttachment);
        }

        let mut samples = None;
        for (key, image) in &fb.attachments {
            let texture = self
                .textures
                .get(image.texture.0)
                .ok_or(IncompleteReason::IncompleteAttachment)?;

            let renderable = match (key, texture.desc.format) {
                (AttachmentKey::Color(_), PixelFormat::Color(_, ty)) => !ty.is_compressed(),
                (AttachmentKey::Depth, PixelFormat::Depth(d)) => d.has_depth(),
                (AttachmentKey::Stencil, PixelFormat::Depth(d)) => d.has_stencil(),
                _ => false,
            };
            if !renderable || image.level >= texture.desc.levels.max(1) {
                return Err(IncompleteReason::IncompleteAttachment);
            }

            let count = texture.desc.multisample.samples();
            match samples {
                None => samples = Some(count),
                Some(s) if s != count => return Err(IncompleteReason::IncompleteMultisample),
                _ => (),
            }
        }

        Ok(())
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.bound_framebuffer = framebuffer;
    }

    fn clear_color(&mut self, draw_buffer: u32, value: ClearValue) -> Result<()> {
        let image = match self
            .color_targets()
            .into_iter()
            .find(|(i, _)| *i == draw_buffer)
        {
            Some((_, image)) => image,
            None => return Ok(()),
        };

        let (w, h) = self.texture(image.texture)?.desc.level_size(image.level);
        let texel = clear_texel(value);
        for y in 0..h {
            for x in 0..w {
                if self.scissor_contains(x as i32, y as i32) {
                    self.write_pixel(image, x, y, texel, None);
                }
            }
        }

        Ok(())
    }

    fn clear_depth_stencil(&mut self, depth: Option<f32>, stencil: Option<i32>) -> Result<()> {
        let fb = match self.bound_framebuffer {
            Some(fb) => self.framebuffer(fb)?,
            None => return Ok(()),
        };
        let images: Vec<ImageRef> = fb
            .attachments
            .iter()
            .filter(|(k, _)| !matches!(k, AttachmentKey::Color(_)))
            .map(|(_, image)| *image)
            .collect();

        for image in images {
            let scissor = (self.state.scissor_test, self.state.scissor);
            let t = self.texture_mut(image.texture)?;
            let (w, h) = t.desc.level_size(image.level);
            for y in 0..h {
                for x in 0..w {
                    let (xi, yi) = (x as i32, y as i32);
                    if scissor.0
                        && !(xi >= scissor.1[0]
                            && yi >= scissor.1[1]
                            && xi < scissor.1[0] + scissor.1[2]
                            && yi < scissor.1[1] + scissor.1[3])
                    {
                        continue;
                    }
                    let mut texel = t.texel(image.level, image.layer, x, y).unwrap_or([0.0; 4]);
                    if let Some(d) = depth {
                        texel[0] = d as f64;
                    }
                    if let Some(s) = stencil {
                        texel[1] = s as f64;
                    }
                    t.set_texel(image.level, image.layer, x, y, texel);
                }
            }
        }

        Ok(())
    }

    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
    ) -> std::result::Result<ShaderId, String> {
        let info = glsl::scan(stage, source)?;
        Ok(ShaderId(self.shaders.insert(SoftShader { stage, info })))
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(shader.0);
    }

    fn link_program(&mut self, shaders: &[ShaderId]) -> std::result::Result<ProgramId, String> {
        let stages: Vec<&SoftShader> = shaders
            .iter()
            .map(|s| self.shaders.get(s.0).ok_or_else(|| format!("unknown shader {}", s.0)))
            .collect::<std::result::Result<_, _>>()?;

        let vertex = stages
            .iter()
            .find(|s| s.stage == ShaderStage::Vertex)
            .ok_or("error: program has no vertex stage")?;
        let fragment = stages
            .iter()
            .find(|s| s.stage == ShaderStage::Fragment)
            .ok_or("error: program has no fragment stage")?;

        let expr = fragment
            .info
            .output_expr
            .as_deref()
            .ok_or("error: fragment stage never writes its output")?;
        let output = glsl::parse_fragment_expr(expr)
            .ok_or_else(|| format!("error: soft device cannot evaluate '{}'", expr))?;

        let mut uniforms: Vec<ActiveUniform> = Vec::new();
        let mut uniform_blocks = Vec::new();
        let mut storage_blocks = Vec::new();
        for stage in &stages {
            for u in &stage.info.uniforms {
                match uniforms.iter().find(|existing| existing.name == u.name) {
                    Some(existing) if existing.ty != u.ty => {
                        return Err(format!("error: uniform '{}' declared with different types", u.name));
                    }
                    Some(_) => (),
                    None => uniforms.push(ActiveUniform {
                        name: u.name.clone(),
                        ty: u.ty,
                        size: u.size,
                    }),
                }
            }
            for b in &stage.info.uniform_blocks {
                if !uniform_blocks.contains(b) {
                    uniform_blocks.push(b.clone());
                }
            }
            for b in &stage.info.storage_blocks {
                if !storage_blocks.contains(b) {
                    storage_blocks.push(b.clone());
                }
            }
        }

        let program = SoftProgram {
            attributes: glsl::assign_locations(&vertex.info.attributes),
            uniforms,
            values: HashMap::new(),
            uniform_blocks,
            block_bindings: HashMap::new(),
            storage_blocks,
            storage_bindings: HashMap::new(),
            output,
        };

        Ok(ProgramId(self.programs.insert(program)))
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(program.0);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.program = program;
    }

    fn active_uniforms(&mut self, program: ProgramId) -> Vec<ActiveUniform> {
        self.programs
            .get(program.0)
            .map(|p| p.uniforms.clone())
            .unwrap_or_default()
    }

    fn active_attributes(&mut self, program: ProgramId) -> Vec<ActiveAttribute> {
        self.programs
            .get(program.0)
            .map(|p| {
                p.attributes
                    .iter()
                    .map(|(name, &(location, size))| ActiveAttribute {
                        name: name.clone(),
                        location,
                        size,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let (name, element) = match name.strip_suffix(']').and_then(|r| r.rsplit_once('[')) {
            Some((base, index)) => (base, index.parse::<u32>().ok()?),
            None => (name, 0),
        };

        let p = self.programs.get(program.0)?;
        let index = p.uniforms.iter().position(|u| u.name == name)?;
        if element >= p.uniforms[index].size.max(1) || element >> (32 - ELEMENT_SHIFT) != 0 {
            return None;
        }

        Some(UniformLocation(index as u32 | element << ELEMENT_SHIFT))
    }

    fn set_uniform(
        &mut self,
        program: ProgramId,
        location: UniformLocation,
        value: &UniformValue,
    ) -> Result<()> {
        let p = self
            .programs
            .get_mut(program.0)
            .ok_or_else(|| Error::Backend(format!("unknown program {}", program.0)))?;

        let index = location.0 & ((1 << ELEMENT_SHIFT) - 1);
        let element = (location.0 >> ELEMENT_SHIFT) as usize;
        let uniform = p
            .uniforms
            .get(index as usize)
            .ok_or_else(|| Error::Backend(format!("unknown uniform location {}", location.0)))?;
        let components = uniform_components(uniform.ty);
        let capacity = uniform.size.max(1) as usize * components;

        // elements past the end of the array are dropped
        let start = element * components;
        let mut flat = flatten(value);
        flat.truncate(capacity.saturating_sub(start));

        let values = p.values.entry(index).or_default();
        if values.len() < start + flat.len() {
            values.resize(start + flat.len(), 0.0);
        }
        values[start..start + flat.len()].copy_from_slice(&flat);
        Ok(())
    }

    fn attribute_location(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        self.programs
            .get(program.0)?
            .attributes
            .get(name)
            .map(|&(location, _)| location)
    }

    fn uniform_block_index(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let p = self.programs.get(program.0)?;
        p.uniform_blocks.iter().position(|b| b == name).map(|i| i as u32)
    }

    fn uniform_block_binding(&mut self, program: ProgramId, index: u32, binding: u32) {
        if let Some(p) = self.programs.get_mut(program.0) {
            p.block_bindings.insert(index, binding);
        }
    }

    fn storage_block_index(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let p = self.programs.get(program.0)?;
        p.storage_blocks.iter().position(|b| b == name).map(|i| i as u32)
    }

    fn storage_block_binding(&mut self, program: ProgramId, index: u32, binding: u32) {
        if let Some(p) = self.programs.get_mut(program.0) {
            p.storage_bindings.insert(index, binding);
        }
    }

    fn create_vertex_array(&mut self) -> Result<VertexArrayId> {
        Ok(VertexArrayId(self.vertex_arrays.insert(SoftVertexArray::default())))
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) {
        self.vertex_arrays.remove(vertex_array.0);
        if self.vertex_array == Some(vertex_array) {
            self.vertex_array = None;
        }
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) {
        self.vertex_array = vertex_array;
    }

    fn vertex_attribute(&mut self, attribute: &VertexAttribute) -> Result<()> {
        let storage = self.buffer(attribute.buffer)?.storage.clone();
        let id = self
            .vertex_array
            .ok_or_else(|| Error::Backend("no vertex array bound".to_owned()))?;
        let vao = self
            .vertex_arrays
            .get_mut(id.0)
            .ok_or_else(|| Error::Backend(format!("unknown vertex array {}", id.0)))?;

        vao.attributes.insert(
            attribute.location,
            SoftAttribute {
                storage,
                attribute: *attribute,
            },
        );
        Ok(())
    }

    fn patch_vertices(&mut self, count: u32) {
        self.patch_vertices = count;
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        self.draw_calls += 1;

        let program_id = self
            .program
            .ok_or_else(|| Error::Backend("draw without a program in use".to_owned()))?;
        let vao_id = self
            .vertex_array
            .ok_or_else(|| Error::Backend("draw without a vertex array bound".to_owned()))?;

        // detach the program so pixels can be written while it is read
        let program = self
            .programs
            .remove(program_id.0)
            .ok_or_else(|| Error::Backend(format!("unknown program {}", program_id.0)))?;
        let result = self.draw_with(&program, vao_id, call);
        self.programs.items[program_id.0 as usize - 1] = Some(program);

        result
    }

    fn set_capability(&mut self, capability: Capability, enabled: bool) {
        match capability {
            Capability::Blend => {
                self.state.blend = enabled;
                self.draw_buffer_blend.clear();
            }
            Capability::DepthTest => self.state.depth_test = enabled,
            Capability::CullFace => self.state.cull_face = enabled,
            Capability::ScissorTest => self.state.scissor_test = enabled,
            Capability::StencilTest => self.state.stencil_test = enabled,
            Capability::SampleAlphaToCoverage => self.state.alpha_to_coverage = enabled,
            Capability::FramebufferSrgb => self.framebuffer_srgb = enabled,
            Capability::ProgramPointSize => self.program_point_size = enabled,
        }
    }

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.state.viewport = [x, y, width, height];
    }

    fn scissor(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.state.scissor = [x, y, width, height];
    }

    fn color_mask(&mut self, mask: [bool; 4]) {
        self.state.color_mask = mask;
    }

    fn depth_mask(&mut self, write: bool) {
        self.state.depth_write = write;
    }

    fn depth_func(&mut self, func: DepthComparison) {
        self.state.depth_func = func;
    }

    fn blend_equation_separate(&mut self, rgb: Equation, alpha: Equation) {
        self.state.blend_equations = (rgb, alpha);
        self.draw_buffer_blend.clear();
    }

    fn blend_func_separate(&mut self, src_rgb: Factor, dst_rgb: Factor, src_alpha: Factor, dst_alpha: Factor) {
        self.state.blend_factors = [src_rgb, dst_rgb, src_alpha, dst_alpha];
        self.draw_buffer_blend.clear();
    }

    fn blend_draw_buffer(&mut self, draw_buffer: u32, blend: Option<BlendFunction>) {
        self.draw_buffer_blend.insert(draw_buffer, blend);
    }

    fn cull_face(&mut self, mode: FaceCullingMode) {
        self.state.cull_mode = mode;
    }

    fn front_face(&mut self, order: FaceCullingOrder) {
        self.state.front_face = order;
    }

    fn stencil_func(&mut self, face: StencilFace, func: DepthComparison, reference: i32, mask: u32) {
        for s in self.stencil_faces(face) {
            s.func = func;
            s.reference = reference;
            s.test_mask = mask;
        }
    }

    fn stencil_op(
        &mut self,
        face: StencilFace,
        fail: StencilOperation,
        depth_fail: StencilOperation,
        depth_pass: StencilOperation,
    ) {
        for s in self.stencil_faces(face) {
            s.fail = fail;
            s.depth_fail = depth_fail;
            s.depth_pass = depth_pass;
        }
    }

    fn stencil_mask(&mut self, face: StencilFace, mask: u32) {
        for s in self.stencil_faces(face) {
            s.write_mask = mask;
        }
    }

    fn device_state(&mut self) -> Result<DeviceState> {
        Ok(self.state)
    }

    fn check_error(&mut self) -> Option<u32> {
        None
    }

    fn flush(&mut self) {}

    fn finish(&mut self) {}
}

impl SoftBackend {
    fn stencil_faces(&mut self, face: StencilFace) -> Vec<&mut StencilFaceState> {
        let state = &mut self.state;
        match face {
            StencilFace::Front => vec![&mut state.stencil_front],
            StencilFace::Back => vec![&mut state.stencil_back],
            StencilFace::FrontAndBack => vec![&mut state.stencil_front, &mut state.stencil_back],
        }
    }

    fn draw_with(&mut self, program: &SoftProgram, vao_id: VertexArrayId, call: &DrawCall) -> Result<()> {
        let indices = self.vertex_indices(call)?;
        let targets = self.color_targets();

        let vao = self
            .vertex_arrays
            .remove(vao_id.0)
            .ok_or_else(|| Error::Backend(format!("unknown vertex array {}", vao_id.0)))?;

        let mut triangles = Vec::new();
        let mut points = Vec::new();
        let mut missing_position = false;

        for instance in call.base_instance..call.base_instance + call.instances.max(1) {
            let window: Vec<(f64, f64)> = indices
                .iter()
                .filter_map(|&i| match self.fetch_position(&vao, i, instance) {
                    Some(p) => Some(self.to_window(p)),
                    None => {
                        missing_position = true;
                        None
                    }
                })
                .collect();

            match call.primitive {
                DrawPrimitive::Triangles => {
                    for t in window.chunks_exact(3) {
                        triangles.push([t[0], t[1], t[2]]);
                    }
                }
                DrawPrimitive::TriangleStrip => {
                    for i in 2..window.len() {
                        if i % 2 == 0 {
                            triangles.push([window[i - 2], window[i - 1], window[i]]);
                        } else {
                            triangles.push([window[i - 1], window[i - 2], window[i]]);
                        }
                    }
                }
                DrawPrimitive::TriangleFan => {
                    for i in 2..window.len() {
                        triangles.push([window[0], window[i - 1], window[i]]);
                    }
                }
                DrawPrimitive::Points => points.extend(window),
                other => log::trace!("soft device skips {:?} primitives", other),
            }
        }

        self.vertex_arrays.items[vao_id.0 as usize - 1] = Some(vao);

        if missing_position {
            return Err(Error::Backend(
                "vertex array has no readable attribute at location 0".to_owned(),
            ));
        }

        for triangle in triangles {
            self.rasterize_triangle(program, &targets, triangle);
        }

        for (x, y) in points {
            let (x, y) = (x.floor() as i32, y.floor() as i32);
            if x >= 0 && y >= 0 && self.scissor_contains(x, y) {
                self.shade(program, &targets, x as u32, y as u32);
            }
        }

        Ok(())
    }
}

fn short(required: usize, available: usize) -> Error {
    Error::NotEnoughData {
        operation: "soft device transfer",
        required,
        available,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba8(width: u32, height: u32) -> TextureDescriptor {
        TextureDescriptor {
            kind: TextureKind::Texture2D,
            width,
            height,
            depth: 1,
            levels: 1,
            format: PixelFormat::Color(ColorFormat::RGBa, ColorType::UINT8),
            native: NativeFormat {
                internal_format: glow::RGBA8,
                format: glow::RGBA,
                ty: glow::UNSIGNED_BYTE,
            },
            multisample: BufferMultisample::Disabled,
            storage: StorageMode::Storage,
        }
    }

    #[test]
    fn names_are_reused() {
        let mut soft = SoftBackend::new(1, 1);
        let a = soft.create_buffer(BufferKind::Vertex, 4, BufferUsage::Dynamic).unwrap();
        let b = soft.create_buffer(BufferKind::Vertex, 4, BufferUsage::Dynamic).unwrap();
        soft.delete_buffer(a);
        let c = soft.create_buffer(BufferKind::Vertex, 4, BufferUsage::Dynamic).unwrap();
        assert_eq!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn empty_framebuffer_is_incomplete() {
        let mut soft = SoftBackend::new(1, 1);
        let fb = soft.create_framebuffer().unwrap();
        assert_eq!(soft.framebuffer_status(fb), Err(IncompleteReason::MissingAttachment));

        let texture = soft.create_texture(&rgba8(2, 2)).unwrap();
        soft.attach(
            fb,
            AttachmentPoint::Color(0),
            Some(ImageRef {
                texture,
                level: 0,
                layer: 0,
            }),
        )
        .unwrap();
        assert_eq!(soft.framebuffer_status(fb), Ok(()));
    }

    #[test]
    fn clears_respect_scissor() {
        let mut soft = SoftBackend::new(4, 4);
        soft.set_capability(Capability::ScissorTest, true);
        soft.scissor(0, 0, 2, 4);
        soft.clear_color(0, ClearValue::Float([1.0, 0.0, 0.0, 1.0])).unwrap();

        assert_eq!(soft.default_framebuffer_pixel(1, 3), Some([255, 0, 0, 255]));
        assert_eq!(soft.default_framebuffer_pixel(2, 3), Some([0, 0, 0, 0]));
    }

    #[test]
    fn flipped_blit() {
        let mut soft = SoftBackend::new(1, 1);
        let src = soft.create_texture(&rgba8(1, 2)).unwrap();
        let dst = soft.create_texture(&rgba8(1, 2)).unwrap();
        soft.write_texture(
            src,
            0,
            Region::rect(0, 0, 1, 2),
            PixelFormat::Color(ColorFormat::RGBa, ColorType::UINT8),
            &[1, 1, 1, 1, 2, 2, 2, 2],
        )
        .unwrap();

        let image = |texture| ImageRef {
            texture,
            level: 0,
            layer: 0,
        };
        soft.blit(&Blit {
            source: Surface::Image(image(src)),
            source_bounds: Bounds::new(0, 0, 1, 2),
            target: Surface::Image(image(dst)),
            target_bounds: Bounds {
                x0: 0,
                y0: 2,
                x1: 1,
                y1: 0,
            },
            mask: BlitMask::COLOR,
            filter: luminance::texture::MagFilter::Nearest,
        })
        .unwrap();

        let mut out = [0; 8];
        soft.read_texture(
            dst,
            0,
            Region::rect(0, 0, 1, 2),
            PixelFormat::Color(ColorFormat::RGBa, ColorType::UINT8),
            &mut out,
        )
        .unwrap();
        assert_eq!(out, [2, 2, 2, 2, 1, 1, 1, 1]);
    }
}
