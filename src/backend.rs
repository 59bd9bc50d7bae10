//! Device backends.
//!
//! A [`Backend`] is the only place where device calls are issued. Resources talk to it through
//! opaque ids; each implementation maps those ids onto its own objects.
//!
//! Two backends are provided:
//!
//! - [`GlowBackend`], which drives a desktop GL, GLES or WebGL 2 context through [glow].
//! - [`SoftBackend`], a headless device keeping everything in host memory.
//!
//! [glow]: https://github.com/grovesNL/glow

use luminance::blending::{Equation, Factor};
use luminance::depth_test::DepthComparison;
use luminance::face_culling::{FaceCullingMode, FaceCullingOrder};
use luminance::framebuffer::IncompleteReason;
use luminance::texture::{MagFilter, MinFilter, Wrap};

use crate::error::Result;
use crate::format::{BufferMultisample, NativeFormat, PixelFormat};
use crate::shader::ShaderStage;
use crate::uniform::{UniformType, UniformValue};
use crate::vertex_format::{DrawPrimitive, IndexType, ScalarType};

mod gl;
mod soft;

pub use self::gl::GlowBackend;
pub use self::soft::SoftBackend;

macro_rules! backend_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// The raw id value.
            pub fn raw(self) -> u32 {
                self.0
            }
        }
    };
}

backend_id!(
    /// A texture or multisample surface.
    TextureId
);
backend_id!(
    /// A device buffer.
    BufferId
);
backend_id!(
    /// An off-screen framebuffer.
    FramebufferId
);
backend_id!(
    /// A compiled shader stage.
    ShaderId
);
backend_id!(
    /// A linked program.
    ProgramId
);
backend_id!(
    /// A vertex array object.
    VertexArrayId
);
backend_id!(
    /// A uniform location of a linked program.
    UniformLocation
);

/// Device identification and limits.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendInfo {
    pub version: String,
    pub renderer: String,
    pub vendor: String,
    pub extensions: Vec<String>,
    pub limits: Limits,
}

/// Device limits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Limits {
    pub max_texture_size: u32,
    pub max_color_attachments: u32,
    pub max_samples: u32,
    pub max_vertex_attributes: u32,
    pub max_anisotropy: f32,
}

/// Shape of a texture.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TextureKind {
    Texture2D,
    Cubemap,
    Array2D,
    CubemapArray,
    Volume,
}

/// How texture storage is allocated.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StorageMode {
    /// One image call per level, storage may be respecified.
    Image,
    /// Immutable storage for all levels at once.
    Storage,
}

/// Everything a backend needs to allocate a texture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureDescriptor {
    pub kind: TextureKind,
    /// Effective (device) width of level 0.
    pub width: u32,
    /// Effective (device) height of level 0.
    pub height: u32,
    /// Depth for volumes, layer count for arrays, `1` otherwise.
    pub depth: u32,
    pub levels: u32,
    pub format: PixelFormat,
    pub native: NativeFormat,
    pub multisample: BufferMultisample,
    pub storage: StorageMode,
}

impl TextureDescriptor {
    /// Number of 2D images per level (faces × layers, or volume slices).
    pub fn layers(&self, level: u32) -> u32 {
        match self.kind {
            TextureKind::Texture2D => 1,
            TextureKind::Cubemap => 6,
            TextureKind::Array2D => self.depth,
            TextureKind::CubemapArray => self.depth * 6,
            TextureKind::Volume => (self.depth >> level).max(1),
        }
    }

    pub fn level_size(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }
}

/// One 2D image of a texture: a level and a layer (cube face, array layer or volume slice).
///
/// For cube map arrays the layer is `array_layer * 6 + face`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ImageRef {
    pub texture: TextureId,
    pub level: u32,
    pub layer: u32,
}

/// A 3D region of a texture level.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Region {
    pub fn rect(x: u32, y: u32, width: u32, height: u32) -> Self {
        Region {
            x,
            y,
            z: 0,
            width,
            height,
            depth: 1,
        }
    }

    /// Whether the region lies inside a `width` x `height` x `layers` image.
    pub fn fits(&self, width: u32, height: u32, layers: u32) -> bool {
        let inside = |offset: u32, extent: u32, limit: u32| {
            offset.checked_add(extent).map_or(false, |end| end <= limit)
        };
        inside(self.x, self.width, width)
            && inside(self.y, self.height, height)
            && inside(self.z, self.depth, layers)
    }
}

/// Corner coordinates of a blit rectangle; `y0 > y1` flips.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Bounds {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl Bounds {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Bounds {
            x0: x,
            y0: y,
            x1: x + width,
            y1: y + height,
        }
    }

    pub fn width(&self) -> i32 {
        (self.x1 - self.x0).abs()
    }

    pub fn height(&self) -> i32 {
        (self.y1 - self.y0).abs()
    }
}

/// Sampling parameters of a texture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sampling {
    pub min_filter: MinFilter,
    pub mag_filter: MagFilter,
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
    pub wrap_r: Wrap,
    pub anisotropy: f32,
    pub max_level: u32,
}

impl Default for Sampling {
    fn default() -> Self {
        Sampling {
            min_filter: MinFilter::Linear,
            mag_filter: MagFilter::Linear,
            wrap_s: Wrap::ClampToEdge,
            wrap_t: Wrap::ClampToEdge,
            wrap_r: Wrap::ClampToEdge,
            anisotropy: 1.0,
            max_level: 0,
        }
    }
}

/// A clear value matching the sampling type of the attachment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Float([f32; 4]),
    Int([i32; 4]),
    UInt([u32; 4]),
}

/// A framebuffer attachment point.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AttachmentPoint {
    Color(u32),
    Depth,
    Stencil,
    DepthStencil,
}

/// One side of a blit.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Surface {
    /// A texture image, attached to a temporary framebuffer by the backend.
    Image(ImageRef),
    /// A colour attachment of a framebuffer; `None` is the default framebuffer.
    Framebuffer(Option<FramebufferId>, u32),
}

/// Which planes a blit copies.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct BlitMask {
    pub color: bool,
    pub depth: bool,
    pub stencil: bool,
}

impl BlitMask {
    pub const COLOR: Self = BlitMask {
        color: true,
        depth: false,
        stencil: false,
    };
}

/// A blit between two surfaces.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Blit {
    pub source: Surface,
    pub source_bounds: Bounds,
    pub target: Surface,
    pub target_bounds: Bounds,
    pub mask: BlitMask,
    pub filter: MagFilter,
}

/// Device buffer binding kind.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BufferKind {
    Vertex,
    Index,
    ShaderStorage,
}

/// How a buffer is allocated.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BufferUsage {
    /// Respecifiable storage with a dynamic usage hint.
    Dynamic,
    /// Immutable storage, writable through sub-data updates.
    Storage,
}

/// One bound attribute location of a vertex array.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct VertexAttribute {
    pub location: u32,
    pub buffer: BufferId,
    pub components: u32,
    pub scalar: ScalarType,
    pub stride: u32,
    pub offset: u32,
    pub divisor: u32,
}

/// Index source of an indexed draw.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct IndexSource {
    pub buffer: BufferId,
    pub ty: IndexType,
}

/// A draw command on the bound vertex array.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DrawCall {
    pub primitive: DrawPrimitive,
    /// First vertex, or first index for indexed draws.
    pub first: u32,
    pub count: u32,
    pub instances: u32,
    pub base_instance: u32,
    pub indices: Option<IndexSource>,
}

/// Blend equations and factors of a single draw buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlendFunction {
    pub equations: (Equation, Equation),
    /// Source RGB, destination RGB, source alpha, destination alpha.
    pub factors: [Factor; 4],
}

/// Togglable device capabilities.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Capability {
    Blend,
    DepthTest,
    CullFace,
    ScissorTest,
    StencilTest,
    SampleAlphaToCoverage,
    FramebufferSrgb,
    ProgramPointSize,
}

/// Stencil face selector.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StencilFace {
    Front,
    Back,
    FrontAndBack,
}

/// Stencil update operation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StencilOperation {
    Keep,
    Zero,
    Replace,
    Increase,
    IncreaseWrap,
    Decrease,
    DecreaseWrap,
    Invert,
}

/// Stencil configuration of one face as reported by the device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StencilFaceState {
    pub func: DepthComparison,
    pub reference: i32,
    pub test_mask: u32,
    pub fail: StencilOperation,
    pub depth_fail: StencilOperation,
    pub depth_pass: StencilOperation,
    pub write_mask: u32,
}

impl Default for StencilFaceState {
    fn default() -> Self {
        StencilFaceState {
            func: DepthComparison::Always,
            reference: 0,
            test_mask: !0,
            fail: StencilOperation::Keep,
            depth_fail: StencilOperation::Keep,
            depth_pass: StencilOperation::Keep,
            write_mask: !0,
        }
    }
}

/// Net fixed-function state of a device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeviceState {
    pub blend: bool,
    pub blend_equations: (Equation, Equation),
    /// Source RGB, destination RGB, source alpha, destination alpha.
    pub blend_factors: [Factor; 4],
    pub depth_test: bool,
    pub depth_func: DepthComparison,
    pub depth_write: bool,
    pub color_mask: [bool; 4],
    pub scissor_test: bool,
    pub scissor: [i32; 4],
    pub stencil_test: bool,
    pub stencil_front: StencilFaceState,
    pub stencil_back: StencilFaceState,
    pub cull_face: bool,
    pub cull_mode: FaceCullingMode,
    pub front_face: FaceCullingOrder,
    pub alpha_to_coverage: bool,
    pub viewport: [i32; 4],
}

/// Image unit access.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ImageAccess {
    Read,
    Write,
    ReadWrite,
}

/// A uniform reported by program reflection.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ActiveUniform {
    /// Name without any trailing `[0]`.
    pub name: String,
    pub ty: UniformType,
    pub size: u32,
}

/// A vertex attribute reported by program reflection.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ActiveAttribute {
    pub name: String,
    pub location: u32,
    pub size: u32,
}

/// The device interface used by every resource of a context.
///
/// Object ids handed out by a backend are only meaningful to that backend. Binding calls may be
/// cached by the implementation; callers never rely on a binding surviving a call to a method
/// that allocates or transfers data.
pub trait Backend {
    /// Identification and limits of the device.
    fn info(&self) -> BackendInfo;

    // textures

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId>;
    fn delete_texture(&mut self, texture: TextureId);
    fn set_sampling(&mut self, texture: TextureId, sampling: &Sampling) -> Result<()>;
    /// Upload `data`, laid out as `format`, into a region of one level.
    fn write_texture(
        &mut self,
        texture: TextureId,
        level: u32,
        region: Region,
        format: PixelFormat,
        data: &[u8],
    ) -> Result<()>;
    /// Download a region of one level, converted to `format`.
    fn read_texture(
        &mut self,
        texture: TextureId,
        level: u32,
        region: Region,
        format: PixelFormat,
        out: &mut [u8],
    ) -> Result<()>;
    fn generate_mipmaps(&mut self, texture: TextureId) -> Result<()>;
    fn clear_image(&mut self, image: ImageRef, value: ClearValue) -> Result<()>;
    /// Same-size copy between two images.
    fn copy_image(&mut self, source: ImageRef, target: ImageRef, width: u32, height: u32)
        -> Result<()>;
    fn blit(&mut self, blit: &Blit) -> Result<()>;
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) -> Result<()>;
    fn bind_image_texture(
        &mut self,
        unit: u32,
        image: ImageRef,
        access: ImageAccess,
        format: NativeFormat,
    ) -> Result<()>;

    // buffers

    fn create_buffer(&mut self, kind: BufferKind, size: usize, usage: BufferUsage)
        -> Result<BufferId>;
    fn delete_buffer(&mut self, buffer: BufferId);
    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]) -> Result<()>;
    fn read_buffer(&mut self, buffer: BufferId, offset: usize, out: &mut [u8]) -> Result<()>;
    fn bind_storage_buffer(&mut self, binding: u32, buffer: Option<BufferId>) -> Result<()>;

    // framebuffers

    fn create_framebuffer(&mut self) -> Result<FramebufferId>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    /// Attach (or detach with `None`) an image; the current binding is left untouched.
    fn attach(
        &mut self,
        framebuffer: FramebufferId,
        point: AttachmentPoint,
        image: Option<ImageRef>,
    ) -> Result<()>;
    fn set_draw_buffers(&mut self, framebuffer: FramebufferId, count: u32) -> Result<()>;
    fn framebuffer_status(
        &mut self,
        framebuffer: FramebufferId,
    ) -> std::result::Result<(), IncompleteReason>;
    /// Bind a framebuffer for drawing; `None` is the default framebuffer.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);
    /// Clear one colour draw buffer of the bound framebuffer.
    fn clear_color(&mut self, draw_buffer: u32, value: ClearValue) -> Result<()>;
    fn clear_depth_stencil(&mut self, depth: Option<f32>, stencil: Option<i32>) -> Result<()>;

    // programs

    /// Compile a stage; the error is the compiler log.
    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
    ) -> std::result::Result<ShaderId, String>;
    fn delete_shader(&mut self, shader: ShaderId);
    /// Link stages into a program; the error is the linker log.
    fn link_program(&mut self, shaders: &[ShaderId]) -> std::result::Result<ProgramId, String>;
    fn delete_program(&mut self, program: ProgramId);
    fn use_program(&mut self, program: Option<ProgramId>);
    fn active_uniforms(&mut self, program: ProgramId) -> Vec<ActiveUniform>;
    fn active_attributes(&mut self, program: ProgramId) -> Vec<ActiveAttribute>;
    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    fn set_uniform(
        &mut self,
        program: ProgramId,
        location: UniformLocation,
        value: &UniformValue,
    ) -> Result<()>;
    fn attribute_location(&mut self, program: ProgramId, name: &str) -> Option<u32>;
    fn uniform_block_index(&mut self, program: ProgramId, name: &str) -> Option<u32>;
    fn uniform_block_binding(&mut self, program: ProgramId, index: u32, binding: u32);
    fn storage_block_index(&mut self, program: ProgramId, name: &str) -> Option<u32>;
    fn storage_block_binding(&mut self, program: ProgramId, index: u32, binding: u32);

    // vertex arrays and draws

    fn create_vertex_array(&mut self) -> Result<VertexArrayId>;
    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId);
    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>);
    /// Configure one attribute location of the bound vertex array.
    fn vertex_attribute(&mut self, attribute: &VertexAttribute) -> Result<()>;
    fn patch_vertices(&mut self, count: u32);
    fn draw(&mut self, call: &DrawCall) -> Result<()>;

    // fixed function state

    fn set_capability(&mut self, capability: Capability, enabled: bool);
    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn scissor(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn color_mask(&mut self, mask: [bool; 4]);
    fn depth_mask(&mut self, write: bool);
    fn depth_func(&mut self, func: DepthComparison);
    fn blend_equation_separate(&mut self, rgb: Equation, alpha: Equation);
    fn blend_func_separate(
        &mut self,
        src_rgb: Factor,
        dst_rgb: Factor,
        src_alpha: Factor,
        dst_alpha: Factor,
    );
    /// Override blending of one draw buffer; `None` disables blending for it.
    ///
    /// Overrides last until the next global blend call.
    fn blend_draw_buffer(&mut self, draw_buffer: u32, blend: Option<BlendFunction>);
    fn cull_face(&mut self, mode: FaceCullingMode);
    fn front_face(&mut self, order: FaceCullingOrder);
    fn stencil_func(&mut self, face: StencilFace, func: DepthComparison, reference: i32, mask: u32);
    fn stencil_op(
        &mut self,
        face: StencilFace,
        fail: StencilOperation,
        depth_fail: StencilOperation,
        depth_pass: StencilOperation,
    );
    fn stencil_mask(&mut self, face: StencilFace, mask: u32);

    /// Query the net fixed-function state from the device.
    fn device_state(&mut self) -> Result<DeviceState>;

    /// Pop the device error flag, if raised.
    fn check_error(&mut self) -> Option<u32>;
    fn flush(&mut self);
    fn finish(&mut self);
}
