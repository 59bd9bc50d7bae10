//! Render targets and the per-context bind stack.
//!
//! A [`RenderTarget`] is either the program render target, which draws into the window
//! back-buffer and follows the window metrics, or an off-screen framebuffer with colour and
//! depth attachments. Attachments must have the effective size of the target at the attached
//! level; this is checked before anything reaches the device.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use luminance::texture::MagFilter;

use crate::array_cubemap::ArrayCubemap;
use crate::array_texture::ArrayTexture;
use crate::backend::{AttachmentPoint, Backend, Blit, BlitMask, Bounds, ClearValue, FramebufferId, Surface};
use crate::capabilities::Requirement;
use crate::color_buffer::{ColorBuffer, ColorBufferDescriptor};
use crate::context::{effective_size, GraphicsContext};
use crate::cubemap::{Cubemap, CubemapSide};
use crate::depth_buffer::{DepthBuffer, DepthBufferDescriptor};
use crate::draw_style::{applied_depth_write, BlendMode};
use crate::error::{Error, Result};
use crate::format::{BufferMultisample, ColorFormat, ColorRGBa, ColorType, DepthFormat, PixelFormat};
use crate::session::Lifetime;
use crate::texture::{clear_value, TextureCore};
use crate::volume_texture::VolumeTexture;

/// Parameters of a new off-screen [`RenderTarget`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderTargetDescriptor {
    /// Width in logical pixels.
    pub width: u32,
    /// Height in logical pixels.
    pub height: u32,
    pub content_scale: f64,
    pub multisample: BufferMultisample,
}

impl RenderTargetDescriptor {
    pub fn new(width: u32, height: u32) -> Self {
        RenderTargetDescriptor {
            width,
            height,
            content_scale: 1.0,
            multisample: BufferMultisample::Disabled,
        }
    }
}

/// The image behind one colour attachment.
#[derive(Clone, Debug)]
pub enum ColorAttachment {
    ColorBuffer {
        buffer: ColorBuffer,
        level: u32,
    },
    CubemapFace {
        cubemap: Cubemap,
        side: CubemapSide,
        level: u32,
    },
    ArrayLayer {
        texture: ArrayTexture,
        layer: u32,
        level: u32,
    },
    ArrayCubemapFace {
        cubemap: ArrayCubemap,
        side: CubemapSide,
        layer: u32,
        level: u32,
    },
    VolumeSlice {
        volume: VolumeTexture,
        slice: u32,
        level: u32,
    },
}

impl ColorAttachment {
    fn core(&self) -> &TextureCore {
        match self {
            ColorAttachment::ColorBuffer { buffer, .. } => buffer.core(),
            ColorAttachment::CubemapFace { cubemap, .. } => cubemap.core(),
            ColorAttachment::ArrayLayer { texture, .. } => texture.core(),
            ColorAttachment::ArrayCubemapFace { cubemap, .. } => cubemap.core(),
            ColorAttachment::VolumeSlice { volume, .. } => volume.core(),
        }
    }

    fn level(&self) -> u32 {
        match *self {
            ColorAttachment::ColorBuffer { level, .. }
            | ColorAttachment::CubemapFace { level, .. }
            | ColorAttachment::ArrayLayer { level, .. }
            | ColorAttachment::ArrayCubemapFace { level, .. }
            | ColorAttachment::VolumeSlice { level, .. } => level,
        }
    }

    fn layer(&self) -> u32 {
        match *self {
            ColorAttachment::ColorBuffer { .. } => 0,
            ColorAttachment::CubemapFace { side, .. } => side.index(),
            ColorAttachment::ArrayLayer { layer, .. } => layer,
            ColorAttachment::ArrayCubemapFace { side, layer, .. } => {
                ArrayCubemap::device_layer(side, layer)
            }
            ColorAttachment::VolumeSlice { slice, .. } => slice,
        }
    }

    fn describe(&self) -> String {
        match self {
            ColorAttachment::ColorBuffer { level, .. } => format!("color buffer level {}", level),
            ColorAttachment::CubemapFace { side, level, .. } => {
                format!("cubemap face {:?} level {}", side, level)
            }
            ColorAttachment::ArrayLayer { layer, level, .. } => {
                format!("array texture layer {} level {}", layer, level)
            }
            ColorAttachment::ArrayCubemapFace {
                side, layer, level, ..
            } => format!("array cubemap layer {} face {:?} level {}", layer, side, level),
            ColorAttachment::VolumeSlice { slice, level, .. } => {
                format!("volume slice {} level {}", slice, level)
            }
        }
    }

    fn destroy(&self) -> Result<()> {
        match self {
            ColorAttachment::ColorBuffer { buffer, .. } => buffer.destroy(),
            ColorAttachment::CubemapFace { cubemap, .. } => cubemap.destroy(),
            ColorAttachment::ArrayLayer { texture, .. } => texture.destroy(),
            ColorAttachment::ArrayCubemapFace { cubemap, .. } => cubemap.destroy(),
            ColorAttachment::VolumeSlice { volume, .. } => volume.destroy(),
        }
    }
}

#[derive(Debug)]
struct ColorSlot {
    attachment: ColorAttachment,
    format: PixelFormat,
    owned: bool,
    blend: Option<BlendMode>,
}

#[derive(Debug)]
struct DepthSlot {
    buffer: DepthBuffer,
    owned: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TargetKind {
    Program,
    Framebuffer(FramebufferId),
}

/// Where draws and clears end up.
#[derive(Clone)]
pub struct RenderTarget(Rc<RenderTargetInner>);

struct RenderTargetInner {
    context: GraphicsContext,
    lifetime: Lifetime,
    kind: TargetKind,
    width: u32,
    height: u32,
    content_scale: f64,
    multisample: BufferMultisample,
    colors: RefCell<Vec<ColorSlot>>,
    depth: RefCell<Option<DepthSlot>>,
}

impl fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RenderTarget")
            .field("kind", &self.0.kind)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("color_attachments", &self.0.colors.borrow().len())
            .field("depth", &self.0.depth.borrow().is_some())
            .field("destroyed", &self.0.lifetime.is_destroyed())
            .finish()
    }
}

impl PartialEq for RenderTarget {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl RenderTarget {
    /// The target drawing into the window back-buffer.
    pub(crate) fn program(context: &GraphicsContext) -> Self {
        let metrics = context.window_metrics();
        RenderTarget(Rc::new(RenderTargetInner {
            context: context.clone(),
            lifetime: Lifetime::new(context),
            kind: TargetKind::Program,
            width: metrics.width,
            height: metrics.height,
            content_scale: metrics.content_scale,
            multisample: BufferMultisample::Disabled,
            colors: RefCell::new(Vec::new()),
            depth: RefCell::new(None),
        }))
    }

    pub(crate) fn new(context: &GraphicsContext, desc: &RenderTargetDescriptor) -> Result<Self> {
        context.check()?;

        let (w, h) = effective_size(desc.width, desc.height, desc.content_scale);
        if w == 0 || h == 0 {
            return Err(Error::InvalidDimensions {
                kind: "render target",
                width: desc.width as i64,
                height: desc.height as i64,
                depth: 1,
            });
        }

        let framebuffer = context.with_backend("create_framebuffer", |b| b.create_framebuffer())?;
        log::debug!(
            "created render target {:?} {}x{} (scale {})",
            framebuffer,
            desc.width,
            desc.height,
            desc.content_scale
        );

        Ok(RenderTarget(Rc::new(RenderTargetInner {
            context: context.clone(),
            lifetime: Lifetime::new(context),
            kind: TargetKind::Framebuffer(framebuffer),
            width: desc.width,
            height: desc.height,
            content_scale: desc.content_scale,
            multisample: desc.multisample.capped(context.capabilities().max_samples),
            colors: RefCell::new(Vec::new()),
            depth: RefCell::new(None),
        })))
    }

    pub(crate) fn lifetime(&self) -> &Lifetime {
        &self.0.lifetime
    }

    pub fn is_program_target(&self) -> bool {
        self.0.kind == TargetKind::Program
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.lifetime.is_destroyed()
    }

    fn check(&self) -> Result<()> {
        self.0.context.check()?;
        self.0.lifetime.check("render target")
    }

    pub(crate) fn framebuffer(&self) -> Option<FramebufferId> {
        match self.0.kind {
            TargetKind::Program => None,
            TargetKind::Framebuffer(id) => Some(id),
        }
    }

    /// Width in logical pixels.
    pub fn width(&self) -> u32 {
        match self.0.kind {
            TargetKind::Program => self.0.context.window_metrics().width,
            TargetKind::Framebuffer(_) => self.0.width,
        }
    }

    /// Height in logical pixels.
    pub fn height(&self) -> u32 {
        match self.0.kind {
            TargetKind::Program => self.0.context.window_metrics().height,
            TargetKind::Framebuffer(_) => self.0.height,
        }
    }

    pub fn content_scale(&self) -> f64 {
        match self.0.kind {
            TargetKind::Program => self.0.context.window_metrics().content_scale,
            TargetKind::Framebuffer(_) => self.0.content_scale,
        }
    }

    /// Size in device pixels.
    pub fn effective_size(&self) -> (u32, u32) {
        effective_size(self.width(), self.height(), self.content_scale())
    }

    pub fn multisample(&self) -> BufferMultisample {
        self.0.multisample
    }

    pub fn color_attachment_count(&self) -> usize {
        self.0.colors.borrow().len()
    }

    pub fn color_attachment(&self, index: usize) -> Option<ColorAttachment> {
        self.0
            .colors
            .borrow()
            .get(index)
            .map(|slot| slot.attachment.clone())
    }

    /// The colour buffer attached at `index`.
    pub fn color_buffer(&self, index: usize) -> Result<ColorBuffer> {
        match self.color_attachment(index) {
            Some(ColorAttachment::ColorBuffer { buffer, .. }) => Ok(buffer),
            Some(other) => Err(Error::usage(format!(
                "attachment {} is a {}, not a color buffer",
                index,
                other.describe()
            ))),
            None => Err(Error::usage(format!(
                "render target has no color attachment {}",
                index
            ))),
        }
    }

    pub fn depth_buffer(&self) -> Option<DepthBuffer> {
        self.0.depth.borrow().as_ref().map(|slot| slot.buffer.clone())
    }

    fn framebuffer_for_attach(&self) -> Result<FramebufferId> {
        self.check()?;
        self.framebuffer()
            .ok_or_else(|| Error::usage("cannot attach to the program render target"))
    }

    fn check_attachment(&self, what: String, core: &TextureCore, level: u32) -> Result<()> {
        core.check()?;

        if !core.context.ptr_eq(&self.0.context) {
            return Err(Error::usage(format!("{} belongs to another context", what)));
        }

        if core.desc.multisample != self.0.multisample {
            return Err(Error::usage(format!(
                "{} has multisample mode {:?}, render target has {:?}",
                what, core.desc.multisample, self.0.multisample
            )));
        }

        if level >= core.desc.levels {
            return Err(Error::usage(format!(
                "{} does not exist, texture has {} levels",
                what, core.desc.levels
            )));
        }

        let (expected_width, expected_height) = self.effective_size();
        let (actual_width, actual_height) = core.desc.level_size(level);
        if (actual_width, actual_height) != (expected_width, expected_height) {
            return Err(Error::DimensionMismatch {
                what,
                expected_width,
                expected_height,
                actual_width,
                actual_height,
            });
        }

        Ok(())
    }

    fn check_complete(&self, framebuffer: FramebufferId) -> Result<()> {
        let status = self.0.context.backend().framebuffer_status(framebuffer);
        status.map_err(|reason| {
            log::error!("render target {:?} is incomplete: {:?}", framebuffer, reason);
            Error::IncompleteFramebuffer(reason)
        })
    }

    fn attach_color(&self, attachment: ColorAttachment, owned: bool) -> Result<()> {
        let framebuffer = self.framebuffer_for_attach()?;
        let level = attachment.level();
        let core = attachment.core();
        self.check_attachment(attachment.describe(), core, level)?;

        let index = self.0.colors.borrow().len() as u32;
        let max = self.0.context.capabilities().max_color_attachments;
        if index >= max {
            return Err(Error::usage(format!(
                "render target already has {} color attachments",
                max
            )));
        }

        let image = core.image(level, attachment.layer())?;
        let format = core.desc.format;

        self.0.context.with_backend("attach", |b| {
            b.attach(framebuffer, AttachmentPoint::Color(index), Some(image))?;
            b.set_draw_buffers(framebuffer, index + 1)
        })?;

        if let Err(e) = self.check_complete(framebuffer) {
            self.0.context.with_backend("detach", |b| {
                b.attach(framebuffer, AttachmentPoint::Color(index), None)?;
                b.set_draw_buffers(framebuffer, index)
            })?;
            return Err(e);
        }

        self.0.colors.borrow_mut().push(ColorSlot {
            attachment,
            format,
            owned,
            blend: None,
        });

        Ok(())
    }

    /// Attach a level of a colour buffer as the next colour attachment.
    pub fn attach(&self, buffer: &ColorBuffer, level: u32) -> Result<()> {
        self.attach_color(
            ColorAttachment::ColorBuffer {
                buffer: buffer.clone(),
                level,
            },
            false,
        )
    }

    pub fn attach_cubemap_face(&self, cubemap: &Cubemap, side: CubemapSide, level: u32) -> Result<()> {
        self.attach_color(
            ColorAttachment::CubemapFace {
                cubemap: cubemap.clone(),
                side,
                level,
            },
            false,
        )
    }

    pub fn attach_array_layer(&self, texture: &ArrayTexture, layer: u32, level: u32) -> Result<()> {
        self.attach_color(
            ColorAttachment::ArrayLayer {
                texture: texture.clone(),
                layer,
                level,
            },
            false,
        )
    }

    pub fn attach_array_cubemap_face(
        &self,
        cubemap: &ArrayCubemap,
        side: CubemapSide,
        layer: u32,
        level: u32,
    ) -> Result<()> {
        self.attach_color(
            ColorAttachment::ArrayCubemapFace {
                cubemap: cubemap.clone(),
                side,
                layer,
                level,
            },
            false,
        )
    }

    pub fn attach_volume_slice(&self, volume: &VolumeTexture, slice: u32, level: u32) -> Result<()> {
        self.attach_color(
            ColorAttachment::VolumeSlice {
                volume: volume.clone(),
                slice,
                level,
            },
            false,
        )
    }

    fn attach_depth(&self, buffer: &DepthBuffer, owned: bool) -> Result<()> {
        let framebuffer = self.framebuffer_for_attach()?;
        self.check_attachment("depth buffer".to_owned(), buffer.core(), 0)?;

        if self.0.depth.borrow().is_some() {
            return Err(Error::usage("render target already has a depth buffer"));
        }

        let point = match (buffer.has_depth(), buffer.has_stencil()) {
            (true, true) => AttachmentPoint::DepthStencil,
            (true, false) => AttachmentPoint::Depth,
            _ => AttachmentPoint::Stencil,
        };
        let image = buffer.core().image(0, 0)?;

        self.0
            .context
            .with_backend("attach", |b| b.attach(framebuffer, point, Some(image)))?;

        if let Err(e) = self.check_complete(framebuffer) {
            self.0
                .context
                .with_backend("detach", |b| b.attach(framebuffer, point, None))?;
            return Err(e);
        }

        self.0.depth.replace(Some(DepthSlot {
            buffer: buffer.clone(),
            owned,
        }));

        Ok(())
    }

    pub fn attach_depth_buffer(&self, buffer: &DepthBuffer) -> Result<()> {
        self.attach_depth(buffer, false)
    }

    /// Create a colour buffer matching this target and attach it; it is destroyed with the target.
    pub fn add_color_buffer(&self, format: ColorFormat, ty: ColorType) -> Result<ColorBuffer> {
        self.framebuffer_for_attach()?;

        let buffer = ColorBuffer::new(
            &self.0.context,
            &ColorBufferDescriptor {
                width: self.0.width,
                height: self.0.height,
                content_scale: self.0.content_scale,
                format,
                ty,
                multisample: self.0.multisample,
                levels: 1,
            },
        )?;

        let attached = self.attach_color(
            ColorAttachment::ColorBuffer {
                buffer: buffer.clone(),
                level: 0,
            },
            true,
        );
        if let Err(e) = attached {
            buffer.destroy()?;
            return Err(e);
        }

        Ok(buffer)
    }

    /// Create a depth buffer matching this target and attach it; it is destroyed with the target.
    pub fn add_depth_buffer(&self, format: DepthFormat) -> Result<DepthBuffer> {
        self.framebuffer_for_attach()?;

        let buffer = DepthBuffer::new(
            &self.0.context,
            &DepthBufferDescriptor {
                width: self.0.width,
                height: self.0.height,
                content_scale: self.0.content_scale,
                format,
                multisample: self.0.multisample,
            },
        )?;

        if let Err(e) = self.attach_depth(&buffer, true) {
            buffer.destroy()?;
            return Err(e);
        }

        Ok(buffer)
    }

    /// Detach every colour attachment without destroying it.
    pub fn detach_color_attachments(&self) -> Result<()> {
        let framebuffer = self.framebuffer_for_attach()?;
        let count = self.0.colors.borrow().len() as u32;

        self.0.context.with_backend("detach", |b| {
            for index in 0..count {
                b.attach(framebuffer, AttachmentPoint::Color(index), None)?;
            }
            Ok(())
        })?;

        self.0.colors.borrow_mut().clear();
        Ok(())
    }

    pub fn detach_depth_buffer(&self) -> Result<()> {
        let framebuffer = self.framebuffer_for_attach()?;

        if let Some(slot) = self.0.depth.borrow_mut().take() {
            let point = match (slot.buffer.has_depth(), slot.buffer.has_stencil()) {
                (true, true) => AttachmentPoint::DepthStencil,
                (true, false) => AttachmentPoint::Depth,
                _ => AttachmentPoint::Stencil,
            };
            self.0
                .context
                .with_backend("detach", |b| b.attach(framebuffer, point, None))?;
        }

        Ok(())
    }

    /// Per-attachment blend mode, overriding the draw style blend mode for that attachment.
    pub fn set_blend_mode(&self, index: usize, mode: BlendMode) -> Result<()> {
        self.check()?;
        self.0
            .context
            .capabilities()
            .require("per-attachment blend modes", Requirement::INDEXED_BLEND)?;

        let mut colors = self.0.colors.borrow_mut();
        let slot = colors
            .get_mut(index)
            .ok_or_else(|| Error::usage(format!("render target has no color attachment {}", index)))?;
        slot.blend = Some(mode);
        Ok(())
    }

    pub(crate) fn attachment_blend_modes(&self) -> Vec<(u32, BlendMode)> {
        self.0
            .colors
            .borrow()
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.blend.map(|mode| (i as u32, mode)))
            .collect()
    }

    fn is_bound(&self) -> bool {
        self.0.context.0.bind_stack.borrow().iter().any(|t| t == self)
    }

    /// Make this the active render target.
    pub fn bind(&self) -> Result<()> {
        self.check()?;

        if self.is_bound() {
            return Err(Error::AlreadyBound);
        }

        self.0.context.0.bind_stack.borrow_mut().push(self.clone());
        self.activate()
    }

    /// Restore the previously active render target.
    pub fn unbind(&self) -> Result<()> {
        self.check()?;

        {
            let stack = self.0.context.0.bind_stack.borrow();
            match stack.last() {
                Some(top) if top == self => (),
                _ if stack.iter().any(|t| t == self) => return Err(Error::NotOnTop),
                _ => return Err(Error::NotBound),
            }
        }

        self.0.context.0.bind_stack.borrow_mut().pop();
        self.0.context.active_render_target()?.activate()
    }

    fn activate(&self) -> Result<()> {
        let framebuffer = self.framebuffer();
        let (w, h) = self.effective_size();
        log::trace!("activating render target {:?} ({}x{})", framebuffer, w, h);

        self.0.context.with_backend("bind_framebuffer", |b| {
            b.bind_framebuffer(framebuffer);
            b.viewport(0, 0, w as i32, h as i32);
            Ok(())
        })
    }

    /// Run `f` with this target's framebuffer bound, then restore the active one.
    fn with_bound<T, F>(&self, call: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Backend) -> Result<T>,
    {
        let own = self.framebuffer();
        let restore = self.0.context.active_render_target()?.framebuffer();

        self.0.context.with_backend(call, |b| {
            if own != restore {
                b.bind_framebuffer(own);
            }
            let result = f(b);
            if own != restore {
                b.bind_framebuffer(restore);
            }
            result
        })
    }

    /// Clear one colour attachment.
    pub fn clear_color(&self, index: usize, color: ColorRGBa) -> Result<()> {
        self.check()?;

        let value = match self.0.kind {
            TargetKind::Program if index == 0 => ClearValue::Float(color.to_linear().to_array()),
            TargetKind::Program => {
                return Err(Error::usage("the program render target has one color attachment"))
            }
            TargetKind::Framebuffer(_) => {
                let colors = self.0.colors.borrow();
                let slot = colors.get(index).ok_or_else(|| {
                    Error::usage(format!("render target has no color attachment {}", index))
                })?;
                clear_value(self.0.context.capabilities(), slot.format, color)
            }
        };

        self.with_bound("clear_color", |b| b.clear_color(index as u32, value))
    }

    /// Clear the depth and stencil planes that are present.
    pub fn clear_depth(&self, depth: f32, stencil: i32) -> Result<()> {
        self.check()?;

        let (has_depth, has_stencil) = match self.0.kind {
            TargetKind::Program => (true, true),
            TargetKind::Framebuffer(_) => match self.0.depth.borrow().as_ref() {
                Some(slot) => (slot.buffer.has_depth(), slot.buffer.has_stencil()),
                None => return Ok(()),
            },
        };

        let depth = if has_depth { Some(depth) } else { None };
        let stencil = if has_stencil { Some(stencil) } else { None };
        let write = applied_depth_write(&self.0.context);

        self.with_bound("clear_depth_stencil", |b| {
            if write != Some(true) {
                b.depth_mask(true);
            }
            let result = b.clear_depth_stencil(depth, stencil);
            if write == Some(false) {
                b.depth_mask(false);
            }
            result
        })
    }

    /// Clear every colour attachment to `color`, depth to 1 and stencil to 0.
    pub fn clear(&self, color: ColorRGBa) -> Result<()> {
        let count = match self.0.kind {
            TargetKind::Program => 1,
            TargetKind::Framebuffer(_) => self.color_attachment_count(),
        };

        for index in 0..count {
            self.clear_color(index, color)?;
        }

        self.clear_depth(1.0, 0)
    }

    /// Resolve (or copy) every colour attachment into the attachment of `target` with the same index.
    pub fn resolve_to(&self, target: &RenderTarget) -> Result<()> {
        self.check()?;
        target.check()?;

        if self.effective_size() != target.effective_size() {
            let (expected_width, expected_height) = self.effective_size();
            let (actual_width, actual_height) = target.effective_size();
            return Err(Error::DimensionMismatch {
                what: "resolve target".to_owned(),
                expected_width,
                expected_height,
                actual_width,
                actual_height,
            });
        }

        let (w, h) = self.effective_size();
        let bounds = Bounds::new(0, 0, w as i32, h as i32);
        let count = self.color_attachment_count().min(target.color_attachment_count().max(1));

        for index in 0..count as u32 {
            let blit = Blit {
                source: Surface::Framebuffer(self.framebuffer(), index),
                source_bounds: bounds,
                target: Surface::Framebuffer(target.framebuffer(), index),
                target_bounds: bounds,
                mask: BlitMask::COLOR,
                filter: MagFilter::Nearest,
            };
            self.0.context.with_backend("blit", |b| b.blit(&blit))?;
        }

        Ok(())
    }

    /// Delete the framebuffer and destroy the attachments the target created itself.
    pub fn destroy(&self) -> Result<()> {
        if self.is_program_target() {
            return Err(Error::usage("the program render target cannot be destroyed"));
        }

        if !self.0.lifetime.begin_destroy() {
            return Ok(());
        }

        let was_bound = self.is_bound();
        if was_bound {
            log::warn!("destroying a bound render target");
            self.0
                .context
                .0
                .bind_stack
                .borrow_mut()
                .retain(|t| t != self);
        }

        if let Some(framebuffer) = self.framebuffer() {
            self.0.context.backend().delete_framebuffer(framebuffer);
        }

        let colors: Vec<ColorSlot> = self.0.colors.borrow_mut().drain(..).collect();
        let depth = self.0.depth.borrow_mut().take();

        let mut result = Ok(());
        for slot in colors.into_iter().filter(|slot| slot.owned) {
            let destroyed = slot.attachment.destroy();
            if result.is_ok() {
                result = destroyed;
            }
        }
        if let Some(slot) = depth.filter(|slot| slot.owned) {
            let destroyed = slot.buffer.destroy();
            if result.is_ok() {
                result = destroyed;
            }
        }

        if was_bound && !self.0.context.is_destroyed() {
            self.0.context.active_render_target()?.activate()?;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftBackend;
    use crate::config::DriverConfiguration;

    fn context() -> GraphicsContext {
        GraphicsContext::new(
            Box::new(SoftBackend::new(16, 16)),
            DriverConfiguration::default(),
        )
        .unwrap()
    }

    #[test]
    fn attach_mismatch_reaches_no_device() {
        let ctx = context();
        let rt = RenderTarget::new(&ctx, &RenderTargetDescriptor::new(8, 8)).unwrap();
        let cb = ColorBuffer::new(&ctx, &ColorBufferDescriptor::new(8, 9)).unwrap();

        assert!(matches!(
            rt.attach(&cb, 0),
            Err(Error::DimensionMismatch {
                expected_height: 8,
                actual_height: 9,
                ..
            })
        ));
        assert_eq!(rt.color_attachment_count(), 0);
    }

    #[test]
    fn multisample_modes_must_match() {
        let ctx = context();
        let rt = RenderTarget::new(&ctx, &RenderTargetDescriptor::new(4, 4)).unwrap();
        let cb = ColorBuffer::new(
            &ctx,
            &ColorBufferDescriptor {
                multisample: BufferMultisample::SampleCount(4),
                ..ColorBufferDescriptor::new(4, 4)
            },
        )
        .unwrap();

        assert!(matches!(rt.attach(&cb, 0), Err(Error::Usage(_))));
    }

    #[test]
    fn owned_attachments_die_with_the_target() {
        let ctx = context();
        let rt = RenderTarget::new(&ctx, &RenderTargetDescriptor::new(4, 4)).unwrap();
        let owned = rt.add_color_buffer(ColorFormat::RGBa, ColorType::UINT8).unwrap();
        let depth = rt.add_depth_buffer(DepthFormat::Depth24Stencil8).unwrap();
        let borrowed = ColorBuffer::new(&ctx, &ColorBufferDescriptor::new(4, 4)).unwrap();
        rt.attach(&borrowed, 0).unwrap();

        rt.destroy().unwrap();

        assert!(owned.is_destroyed());
        assert!(depth.is_destroyed());
        assert!(!borrowed.is_destroyed());
    }

    #[test]
    fn program_target_follows_the_window() {
        let ctx = context();
        let program = ctx.program_render_target().unwrap();

        ctx.set_window_metrics(crate::context::WindowMetrics {
            width: 10,
            height: 6,
            content_scale: 2.0,
        });

        assert_eq!(program.effective_size(), (20, 12));
        assert!(matches!(program.destroy(), Err(Error::Usage(_))));
        assert!(program.attach(&ColorBuffer::new(&ctx, &ColorBufferDescriptor::new(10, 6)).unwrap(), 0).is_err());
    }

    #[test]
    fn blend_modes_per_attachment_are_gated() {
        let ctx = GraphicsContext::new(
            Box::new(SoftBackend::with_version(4, 4, "3.3.0")),
            DriverConfiguration::default(),
        )
        .unwrap();
        let rt = RenderTarget::new(&ctx, &RenderTargetDescriptor::new(4, 4)).unwrap();
        rt.add_color_buffer(ColorFormat::RGBa, ColorType::UINT8).unwrap();

        assert!(matches!(
            rt.set_blend_mode(0, BlendMode::Add),
            Err(Error::Unsupported { .. })
        ));
    }
}
