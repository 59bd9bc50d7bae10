//! Graphics state of a glow context.

use glow::HasContext;
use luminance::{
    blending::{Equation, Factor},
    depth_test::DepthComparison,
    face_culling::{FaceCullingMode, FaceCullingOrder},
};
use std::marker::PhantomData;

use crate::backend::{DeviceState, StencilFaceState, StencilOperation};
use crate::error::{Error, Result};

/// The graphics state.
///
/// This type represents the current state of a given graphics context. It acts as a forward-gate
/// to the low-level API and adds a small cache layer over it to prevent from issuing the same
/// binding call (with the same parameters) twice.
///
/// Fixed-function state is not cached here: the draw-style diff already skips redundant calls
/// and the device is always queried for the net state.
#[derive(Debug)]
pub(crate) struct GlowState {
    _phantom: PhantomData<*const ()>, // !Send and !Sync

    pub(crate) ctx: glow::Context,

    // viewport
    viewport: [i32; 4],

    // texture
    current_texture_unit: u32,
    bound_textures: Vec<(u32, Option<glow::Texture>)>,

    // shader storage buffers
    bound_storage_buffers: Vec<Option<glow::Buffer>>,

    // array buffer
    bound_array_buffer: Option<glow::Buffer>,
    // element buffer
    bound_element_array_buffer: Option<glow::Buffer>,

    // framebuffer
    bound_draw_framebuffer: Option<glow::Framebuffer>,
    bound_read_framebuffer: Option<glow::Framebuffer>,

    // A special framebuffer used to read textures (GLES and WebGL 2 don’t have glGetTexImage).
    // It is not created until trying to read a texture’s image.
    readback_framebuffer: Option<glow::Framebuffer>,
    // Two framebuffers used to blit between bare texture images.
    blit_framebuffers: Option<(glow::Framebuffer, glow::Framebuffer)>,

    // vertex array
    bound_vertex_array: Option<glow::VertexArray>,
    // shader program
    current_program: Option<glow::Program>,
}

impl GlowState {
    /// Get a `GlowState` from the current context.
    pub(crate) fn new(ctx: glow::Context) -> Result<Self> {
        let viewport = get_ctx_viewport(&ctx);

        Ok(GlowState {
            _phantom: PhantomData,
            ctx,
            viewport,
            current_texture_unit: 0,
            bound_textures: vec![(glow::TEXTURE_2D, None); 48], // 48 is the platform minimal requirement
            bound_storage_buffers: vec![None; 8], // 8 is the platform minimal requirement
            bound_array_buffer: None,
            bound_element_array_buffer: None,
            bound_draw_framebuffer: None,
            bound_read_framebuffer: None,
            readback_framebuffer: None,
            blit_framebuffers: None,
            bound_vertex_array: None,
            current_program: None,
        })
    }

    pub(crate) fn bind_storage_buffer(&mut self, binding: u32, handle: Option<glow::Buffer>) {
        unsafe {
            match self.bound_storage_buffers.get(binding as usize) {
                Some(&handle_) if handle != handle_ => {
                    self.ctx
                        .bind_buffer_base(glow::SHADER_STORAGE_BUFFER, binding, handle);
                    self.bound_storage_buffers[binding as usize] = handle;
                }

                None => {
                    self.ctx
                        .bind_buffer_base(glow::SHADER_STORAGE_BUFFER, binding, handle);

                    // not enough registered buffer bindings; let’s grow a bit more
                    self.bound_storage_buffers.resize(binding as usize + 1, None);
                    self.bound_storage_buffers[binding as usize] = handle;
                }

                _ => (), // cached
            }
        }
    }

    pub(crate) fn bind_array_buffer(&mut self, buffer: Option<glow::Buffer>, bind: Bind) {
        unsafe {
            if bind == Bind::Forced || self.bound_array_buffer != buffer {
                self.ctx.bind_buffer(glow::ARRAY_BUFFER, buffer);
                self.bound_array_buffer = buffer;
            }
        }
    }

    pub(crate) fn bind_element_array_buffer(&mut self, buffer: Option<glow::Buffer>, bind: Bind) {
        unsafe {
            if bind == Bind::Forced || self.bound_element_array_buffer != buffer {
                self.ctx.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, buffer);
                self.bound_element_array_buffer = buffer;
            }
        }
    }

    /// Forget every binding of a buffer about to be deleted.
    pub(crate) fn unbind_buffer(&mut self, buffer: glow::Buffer) {
        if self.bound_array_buffer == Some(buffer) {
            self.bind_array_buffer(None, Bind::Cached);
        }

        if self.bound_element_array_buffer == Some(buffer) {
            self.bound_element_array_buffer = None;
        }

        for handle in self.bound_storage_buffers.iter_mut() {
            if *handle == Some(buffer) {
                *handle = None;
            }
        }
    }

    pub(crate) fn bind_vertex_array(&mut self, vao: Option<glow::VertexArray>, bind: Bind) {
        unsafe {
            if bind == Bind::Forced || self.bound_vertex_array != vao {
                self.ctx.bind_vertex_array(vao);
                self.bound_vertex_array = vao;

                // the element buffer binding is part of the vertex array state
                self.bound_element_array_buffer = None;
            }
        }
    }

    pub(crate) fn unbind_vertex_array(&mut self, vao: glow::VertexArray) {
        if self.bound_vertex_array == Some(vao) {
            self.bind_vertex_array(None, Bind::Cached);
        }
    }

    pub(crate) fn set_texture_unit(&mut self, unit: u32) {
        unsafe {
            if self.current_texture_unit != unit {
                self.ctx.active_texture(glow::TEXTURE0 + unit);
                self.current_texture_unit = unit;
            }
        }
    }

    pub(crate) fn bind_texture(&mut self, target: u32, handle: Option<glow::Texture>) {
        unsafe {
            let unit = self.current_texture_unit as usize;

            match self.bound_textures.get(unit) {
                Some((t, ref h)) if target != *t || handle != *h => {
                    self.ctx.bind_texture(target, handle);
                    self.bound_textures[unit] = (target, handle);
                }

                None => {
                    self.ctx.bind_texture(target, handle);

                    // not enough available texture units; let’s grow a bit more
                    self.bound_textures.resize(unit + 1, (glow::TEXTURE_2D, None));
                    self.bound_textures[unit] = (target, handle);
                }

                _ => (), // cached
            }
        }
    }

    /// Forget every unit a texture about to be deleted is bound to.
    pub(crate) fn unbind_texture(&mut self, texture: glow::Texture) {
        for binding in self.bound_textures.iter_mut() {
            if binding.1 == Some(texture) {
                binding.1 = None;
            }
        }
    }

    pub(crate) fn create_or_get_readback_framebuffer(&mut self) -> Result<glow::Framebuffer> {
        match self.readback_framebuffer {
            Some(fb) => Ok(fb),
            None => {
                let fb = unsafe { self.ctx.create_framebuffer() }.map_err(Error::Backend)?;
                self.readback_framebuffer = Some(fb);
                Ok(fb)
            }
        }
    }

    pub(crate) fn create_or_get_blit_framebuffers(
        &mut self,
    ) -> Result<(glow::Framebuffer, glow::Framebuffer)> {
        match self.blit_framebuffers {
            Some(fbs) => Ok(fbs),
            None => {
                let read = unsafe { self.ctx.create_framebuffer() }.map_err(Error::Backend)?;
                let draw = unsafe { self.ctx.create_framebuffer() }.map_err(Error::Backend)?;
                self.blit_framebuffers = Some((read, draw));
                Ok((read, draw))
            }
        }
    }

    pub(crate) fn draw_framebuffer(&self) -> Option<glow::Framebuffer> {
        self.bound_draw_framebuffer
    }

    pub(crate) fn bind_draw_framebuffer(&mut self, handle: Option<glow::Framebuffer>) {
        unsafe {
            if self.bound_draw_framebuffer != handle {
                self.ctx.bind_framebuffer(glow::DRAW_FRAMEBUFFER, handle);
                self.bound_draw_framebuffer = handle;
            }
        }
    }

    pub(crate) fn bind_read_framebuffer(&mut self, handle: Option<glow::Framebuffer>) {
        unsafe {
            if self.bound_read_framebuffer != handle {
                self.ctx.bind_framebuffer(glow::READ_FRAMEBUFFER, handle);
                self.bound_read_framebuffer = handle;
            }
        }
    }

    pub(crate) fn unbind_framebuffer(&mut self, framebuffer: glow::Framebuffer) {
        if self.bound_draw_framebuffer == Some(framebuffer) {
            self.bind_draw_framebuffer(None);
        }

        if self.bound_read_framebuffer == Some(framebuffer) {
            self.bind_read_framebuffer(None);
        }
    }

    pub(crate) fn use_program(&mut self, handle: Option<glow::Program>) {
        unsafe {
            if self.current_program != handle {
                self.ctx.use_program(handle);
                self.current_program = handle;
            }
        }
    }

    pub(crate) fn current_program(&self) -> Option<glow::Program> {
        self.current_program
    }

    pub(crate) fn set_viewport(&mut self, viewport: [i32; 4]) {
        unsafe {
            if self.viewport != viewport {
                self.ctx
                    .viewport(viewport[0], viewport[1], viewport[2], viewport[3]);
                self.viewport = viewport;
            }
        }
    }

    /// Query the net fixed-function state from the context.
    pub(crate) fn device_state(&self) -> Result<DeviceState> {
        let ctx = &self.ctx;

        unsafe {
            Ok(DeviceState {
                blend: ctx.is_enabled(glow::BLEND),
                blend_equations: get_ctx_blending_equations(ctx)?,
                blend_factors: get_ctx_blending_factors(ctx)?,
                depth_test: ctx.is_enabled(glow::DEPTH_TEST),
                depth_func: get_ctx_depth_comparison(ctx)?,
                depth_write: ctx.get_parameter_i32(glow::DEPTH_WRITEMASK) != 0,
                color_mask: get_ctx_color_mask(ctx),
                scissor_test: ctx.is_enabled(glow::SCISSOR_TEST),
                scissor: get_ctx_scissor_region(ctx),
                stencil_test: ctx.is_enabled(glow::STENCIL_TEST),
                stencil_front: get_ctx_stencil_face(ctx, false)?,
                stencil_back: get_ctx_stencil_face(ctx, true)?,
                cull_face: ctx.is_enabled(glow::CULL_FACE),
                cull_mode: get_ctx_face_culling_mode(ctx)?,
                front_face: get_ctx_face_culling_order(ctx)?,
                alpha_to_coverage: ctx.is_enabled(glow::SAMPLE_ALPHA_TO_COVERAGE),
                viewport: get_ctx_viewport(ctx),
            })
        }
    }
}

impl Drop for GlowState {
    fn drop(&mut self) {
        unsafe {
            // drop the internal framebuffers if they were allocated
            if let Some(fb) = self.readback_framebuffer.take() {
                self.ctx.delete_framebuffer(fb);
            }

            if let Some((read, draw)) = self.blit_framebuffers.take() {
                self.ctx.delete_framebuffer(read);
                self.ctx.delete_framebuffer(draw);
            }
        }
    }
}

fn get_ctx_viewport(ctx: &glow::Context) -> [i32; 4] {
    let mut viewport = [0; 4];

    unsafe { ctx.get_parameter_i32_slice(glow::VIEWPORT, &mut viewport) };

    viewport
}

fn get_ctx_scissor_region(ctx: &glow::Context) -> [i32; 4] {
    let mut region = [0; 4];

    unsafe { ctx.get_parameter_i32_slice(glow::SCISSOR_BOX, &mut region) };

    region
}

fn get_ctx_color_mask(ctx: &glow::Context) -> [bool; 4] {
    let mut mask = [0; 4];

    unsafe { ctx.get_parameter_i32_slice(glow::COLOR_WRITEMASK, &mut mask) };

    [mask[0] != 0, mask[1] != 0, mask[2] != 0, mask[3] != 0]
}

fn get_ctx_blending_equations(ctx: &glow::Context) -> Result<(Equation, Equation)> {
    unsafe {
        let rgb =
            map_enum_to_blending_equation(ctx.get_parameter_i32(glow::BLEND_EQUATION_RGB) as u32)?;

        let alpha = map_enum_to_blending_equation(
            ctx.get_parameter_i32(glow::BLEND_EQUATION_ALPHA) as u32,
        )?;

        Ok((rgb, alpha))
    }
}

#[inline]
fn map_enum_to_blending_equation(data: u32) -> Result<Equation> {
    match data {
        glow::FUNC_ADD => Ok(Equation::Additive),
        glow::FUNC_SUBTRACT => Ok(Equation::Subtract),
        glow::FUNC_REVERSE_SUBTRACT => Ok(Equation::ReverseSubtract),
        glow::MIN => Ok(Equation::Min),
        glow::MAX => Ok(Equation::Max),
        _ => Err(Error::Backend(format!("unknown blending equation: {}", data))),
    }
}

fn get_ctx_blending_factors(ctx: &glow::Context) -> Result<[Factor; 4]> {
    let query = |pname: u32, what: &str| -> Result<Factor> {
        let factor = unsafe { ctx.get_parameter_i32(pname) } as u32;
        from_gl_blending_factor(factor)
            .map_err(|k| Error::Backend(format!("unknown blending {} factor: {}", what, k)))
    };

    Ok([
        query(glow::BLEND_SRC_RGB, "source (RGB)")?,
        query(glow::BLEND_DST_RGB, "destination (RGB)")?,
        query(glow::BLEND_SRC_ALPHA, "source (alpha)")?,
        query(glow::BLEND_DST_ALPHA, "destination (alpha)")?,
    ])
}

#[inline]
fn from_gl_blending_factor(factor: u32) -> std::result::Result<Factor, u32> {
    match factor {
        glow::ONE => Ok(Factor::One),
        glow::ZERO => Ok(Factor::Zero),
        glow::SRC_COLOR => Ok(Factor::SrcColor),
        glow::ONE_MINUS_SRC_COLOR => Ok(Factor::SrcColorComplement),
        glow::DST_COLOR => Ok(Factor::DestColor),
        glow::ONE_MINUS_DST_COLOR => Ok(Factor::DestColorComplement),
        glow::SRC_ALPHA => Ok(Factor::SrcAlpha),
        glow::ONE_MINUS_SRC_ALPHA => Ok(Factor::SrcAlphaComplement),
        glow::DST_ALPHA => Ok(Factor::DstAlpha),
        glow::ONE_MINUS_DST_ALPHA => Ok(Factor::DstAlphaComplement),
        glow::SRC_ALPHA_SATURATE => Ok(Factor::SrcAlphaSaturate),
        _ => Err(factor),
    }
}

fn get_ctx_depth_comparison(ctx: &glow::Context) -> Result<DepthComparison> {
    let func = unsafe { ctx.get_parameter_i32(glow::DEPTH_FUNC) } as u32;
    from_gl_comparison(func).ok_or_else(|| Error::Backend(format!("unknown depth function: {}", func)))
}

fn from_gl_comparison(func: u32) -> Option<DepthComparison> {
    match func {
        glow::NEVER => Some(DepthComparison::Never),
        glow::ALWAYS => Some(DepthComparison::Always),
        glow::EQUAL => Some(DepthComparison::Equal),
        glow::NOTEQUAL => Some(DepthComparison::NotEqual),
        glow::LESS => Some(DepthComparison::Less),
        glow::LEQUAL => Some(DepthComparison::LessOrEqual),
        glow::GREATER => Some(DepthComparison::Greater),
        glow::GEQUAL => Some(DepthComparison::GreaterOrEqual),
        _ => None,
    }
}

fn from_gl_stencil_op(op: u32) -> Option<StencilOperation> {
    match op {
        glow::KEEP => Some(StencilOperation::Keep),
        glow::ZERO => Some(StencilOperation::Zero),
        glow::REPLACE => Some(StencilOperation::Replace),
        glow::INCR => Some(StencilOperation::Increase),
        glow::INCR_WRAP => Some(StencilOperation::IncreaseWrap),
        glow::DECR => Some(StencilOperation::Decrease),
        glow::DECR_WRAP => Some(StencilOperation::DecreaseWrap),
        glow::INVERT => Some(StencilOperation::Invert),
        _ => None,
    }
}

fn get_ctx_stencil_face(ctx: &glow::Context, back: bool) -> Result<StencilFaceState> {
    let pick = |front: u32, back_: u32| if back { back_ } else { front };
    let get = |pname: u32| unsafe { ctx.get_parameter_i32(pname) };
    let op = |pname: u32| {
        let op = get(pname) as u32;
        from_gl_stencil_op(op).ok_or_else(|| Error::Backend(format!("unknown stencil operation: {}", op)))
    };

    let func = get(pick(glow::STENCIL_FUNC, glow::STENCIL_BACK_FUNC)) as u32;

    Ok(StencilFaceState {
        func: from_gl_comparison(func)
            .ok_or_else(|| Error::Backend(format!("unknown stencil function: {}", func)))?,
        reference: get(pick(glow::STENCIL_REF, glow::STENCIL_BACK_REF)),
        test_mask: get(pick(glow::STENCIL_VALUE_MASK, glow::STENCIL_BACK_VALUE_MASK)) as u32,
        fail: op(pick(glow::STENCIL_FAIL, glow::STENCIL_BACK_FAIL))?,
        depth_fail: op(pick(
            glow::STENCIL_PASS_DEPTH_FAIL,
            glow::STENCIL_BACK_PASS_DEPTH_FAIL,
        ))?,
        depth_pass: op(pick(
            glow::STENCIL_PASS_DEPTH_PASS,
            glow::STENCIL_BACK_PASS_DEPTH_PASS,
        ))?,
        write_mask: get(pick(glow::STENCIL_WRITEMASK, glow::STENCIL_BACK_WRITEMASK)) as u32,
    })
}

fn get_ctx_face_culling_order(ctx: &glow::Context) -> Result<FaceCullingOrder> {
    unsafe {
        let order = ctx.get_parameter_i32(glow::FRONT_FACE) as u32;

        match order {
            glow::CCW => Ok(FaceCullingOrder::CCW),
            glow::CW => Ok(FaceCullingOrder::CW),
            _ => Err(Error::Backend("unknown face culling order".to_owned())),
        }
    }
}

fn get_ctx_face_culling_mode(ctx: &glow::Context) -> Result<FaceCullingMode> {
    unsafe {
        let mode = ctx.get_parameter_i32(glow::CULL_FACE_MODE) as u32;

        match mode {
            glow::FRONT => Ok(FaceCullingMode::Front),
            glow::BACK => Ok(FaceCullingMode::Back),
            glow::FRONT_AND_BACK => Ok(FaceCullingMode::Both),
            _ => Err(Error::Backend("unknown face culling mode".to_owned())),
        }
    }
}

/// Should the binding be cached or forced to the provided value?
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) enum Bind {
    Forced,
    Cached,
}

#[inline]
pub(crate) fn depth_comparison_to_glow(dc: DepthComparison) -> u32 {
    match dc {
        DepthComparison::Never => glow::NEVER,
        DepthComparison::Always => glow::ALWAYS,
        DepthComparison::Equal => glow::EQUAL,
        DepthComparison::NotEqual => glow::NOTEQUAL,
        DepthComparison::Less => glow::LESS,
        DepthComparison::LessOrEqual => glow::LEQUAL,
        DepthComparison::Greater => glow::GREATER,
        DepthComparison::GreaterOrEqual => glow::GEQUAL,
    }
}

#[inline]
pub(crate) fn blending_equation_to_glow(equation: Equation) -> u32 {
    match equation {
        Equation::Additive => glow::FUNC_ADD,
        Equation::Subtract => glow::FUNC_SUBTRACT,
        Equation::ReverseSubtract => glow::FUNC_REVERSE_SUBTRACT,
        Equation::Min => glow::MIN,
        Equation::Max => glow::MAX,
    }
}

#[inline]
pub(crate) fn blending_factor_to_glow(factor: Factor) -> u32 {
    match factor {
        Factor::One => glow::ONE,
        Factor::Zero => glow::ZERO,
        Factor::SrcColor => glow::SRC_COLOR,
        Factor::SrcColorComplement => glow::ONE_MINUS_SRC_COLOR,
        Factor::DestColor => glow::DST_COLOR,
        Factor::DestColorComplement => glow::ONE_MINUS_DST_COLOR,
        Factor::SrcAlpha => glow::SRC_ALPHA,
        Factor::SrcAlphaComplement => glow::ONE_MINUS_SRC_ALPHA,
        Factor::DstAlpha => glow::DST_ALPHA,
        Factor::DstAlphaComplement => glow::ONE_MINUS_DST_ALPHA,
        Factor::SrcAlphaSaturate => glow::SRC_ALPHA_SATURATE,
    }
}

#[inline]
pub(crate) fn stencil_operation_to_glow(op: StencilOperation) -> u32 {
    match op {
        StencilOperation::Keep => glow::KEEP,
        StencilOperation::Zero => glow::ZERO,
        StencilOperation::Replace => glow::REPLACE,
        StencilOperation::Increase => glow::INCR,
        StencilOperation::IncreaseWrap => glow::INCR_WRAP,
        StencilOperation::Decrease => glow::DECR,
        StencilOperation::DecreaseWrap => glow::DECR_WRAP,
        StencilOperation::Invert => glow::INVERT,
    }
}
