//! Two-dimensional colour textures.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use luminance::texture::MagFilter;

use crate::array_texture::ArrayTexture;
use crate::backend::{Region, TextureKind};
use crate::context::GraphicsContext;
use crate::error::{Error, Result};
use crate::format::{BufferMultisample, ColorFormat, ColorRGBa, ColorType, PixelFormat};
use crate::shadow::ColorBufferShadow;
use crate::texture::{IntRectangle, TextureCore, TextureSpec};

/// Parameters of a new [`ColorBuffer`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorBufferDescriptor {
    /// Width in logical pixels.
    pub width: u32,
    /// Height in logical pixels.
    pub height: u32,
    pub content_scale: f64,
    pub format: ColorFormat,
    pub ty: ColorType,
    pub multisample: BufferMultisample,
    pub levels: u32,
}

impl ColorBufferDescriptor {
    /// An RGBA8 buffer with a single level and no multisampling.
    pub fn new(width: u32, height: u32) -> Self {
        ColorBufferDescriptor {
            width,
            height,
            content_scale: 1.0,
            format: ColorFormat::RGBa,
            ty: ColorType::UINT8,
            multisample: BufferMultisample::Disabled,
            levels: 1,
        }
    }
}

/// A 2D colour texture, optionally multisampled.
#[derive(Clone)]
pub struct ColorBuffer(pub(crate) Rc<ColorBufferInner>);

pub(crate) struct ColorBufferInner {
    core: TextureCore,
    format: ColorFormat,
    ty: ColorType,
    flip_v: Cell<bool>,
    shadow: RefCell<Option<ColorBufferShadow>>,
}

texture_common!(ColorBuffer, "ColorBuffer");

impl ColorBuffer {
    pub(crate) fn new(context: &GraphicsContext, desc: &ColorBufferDescriptor) -> Result<Self> {
        let core = TextureCore::create(
            context,
            TextureSpec {
                kind: TextureKind::Texture2D,
                name: "color buffer",
                width: desc.width,
                height: desc.height,
                depth: 1,
                content_scale: desc.content_scale,
                format: PixelFormat::Color(desc.format, desc.ty),
                multisample: desc.multisample,
                levels: desc.levels,
            },
        )?;

        Ok(ColorBuffer(Rc::new(ColorBufferInner {
            core,
            format: desc.format,
            ty: desc.ty,
            flip_v: Cell::new(false),
            shadow: RefCell::new(None),
        })))
    }

    pub(crate) fn core(&self) -> &TextureCore {
        &self.0.core
    }

    pub fn format(&self) -> ColorFormat {
        self.0.format
    }

    pub fn ty(&self) -> ColorType {
        self.0.ty
    }

    /// Whether rows are stored top to bottom.
    pub fn flip_v(&self) -> bool {
        self.0.flip_v.get()
    }

    pub fn set_flip_v(&self, flip_v: bool) {
        self.0.flip_v.set(flip_v);
    }

    /// Upload a whole level; `format` and `ty` describe the layout of `data`.
    pub fn write(&self, data: &[u8], format: ColorFormat, ty: ColorType, level: u32) -> Result<()> {
        let (w, h) = self.0.core.desc.level_size(level);
        self.write_region(data, format, ty, level, Region::rect(0, 0, w, h))
    }

    pub fn write_region(
        &self,
        data: &[u8],
        format: ColorFormat,
        ty: ColorType,
        level: u32,
        region: Region,
    ) -> Result<()> {
        self.0
            .core
            .write(data, PixelFormat::Color(format, ty), level, region)
    }

    /// Download a whole level, converted to `format` and `ty`.
    pub fn read(&self, out: &mut [u8], format: ColorFormat, ty: ColorType, level: u32) -> Result<()> {
        let (w, h) = self.0.core.desc.level_size(level);
        self.read_region(out, format, ty, level, Region::rect(0, 0, w, h))
    }

    pub fn read_region(
        &self,
        out: &mut [u8],
        format: ColorFormat,
        ty: ColorType,
        level: u32,
        region: Region,
    ) -> Result<()> {
        self.0
            .core
            .read(out, PixelFormat::Color(format, ty), level, region)
    }

    /// Clear one level to `color`.
    pub fn fill(&self, color: ColorRGBa, level: u32) -> Result<()> {
        self.0.core.fill(color, level)
    }

    /// Copy a whole level into `target`, scaling if the sizes differ.
    pub fn copy_to(
        &self,
        target: &ColorBuffer,
        from_level: u32,
        to_level: u32,
        filter: MagFilter,
    ) -> Result<()> {
        let source_rect = full_rect(self.core(), from_level);
        let target_rect = full_rect(target.core(), to_level);
        self.copy_region_to(target, from_level, to_level, source_rect, target_rect, filter)
    }

    /// Copy `source_rect` of this buffer into `target_rect` of `target`.
    ///
    /// Negative rectangle heights flip vertically.
    pub fn copy_region_to(
        &self,
        target: &ColorBuffer,
        from_level: u32,
        to_level: u32,
        source_rect: IntRectangle,
        target_rect: IntRectangle,
        filter: MagFilter,
    ) -> Result<()> {
        self.0.core.copy_to(
            0,
            target.core(),
            0,
            from_level,
            to_level,
            source_rect,
            target_rect,
            filter,
        )
    }

    /// Copy a whole level into one layer of an array texture.
    pub fn copy_to_array_layer(
        &self,
        target: &ArrayTexture,
        layer: u32,
        from_level: u32,
        to_level: u32,
    ) -> Result<()> {
        let source_rect = full_rect(self.core(), from_level);
        let target_rect = full_rect(target.core(), to_level);
        self.0.core.copy_to(
            0,
            target.core(),
            layer,
            from_level,
            to_level,
            source_rect,
            target_rect,
            MagFilter::Nearest,
        )
    }

    /// Host-side mirror of level 0, created on first use.
    pub fn shadow(&self) -> Result<ColorBufferShadow> {
        self.0.core.check()?;

        if self.0.core.is_multisampled() {
            return Err(Error::Multisampled("multisampled color buffers have no shadow"));
        }

        if let Some(shadow) = self.0.shadow.borrow().as_ref() {
            return Ok(shadow.clone());
        }

        let shadow = ColorBufferShadow::new(self)?;
        self.0.shadow.replace(Some(shadow.clone()));
        Ok(shadow)
    }

    /// Free the texture; destroying twice is a no-op.
    pub fn destroy(&self) -> Result<()> {
        if self.0.core.destroy() {
            if let Some(shadow) = self.0.shadow.borrow_mut().take() {
                shadow.invalidate();
            }
        }

        Ok(())
    }
}

pub(crate) fn full_rect(core: &TextureCore, level: u32) -> IntRectangle {
    let (w, h) = core.desc.level_size(level);
    IntRectangle::new(0, 0, w as i32, h as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftBackend;
    use crate::config::DriverConfiguration;

    fn context() -> GraphicsContext {
        GraphicsContext::new(
            Box::new(SoftBackend::new(8, 8)),
            DriverConfiguration::default(),
        )
        .unwrap()
    }

    #[test]
    fn effective_size_follows_content_scale() {
        let ctx = context();
        let cb = ColorBuffer::new(
            &ctx,
            &ColorBufferDescriptor {
                content_scale: 2.0,
                ..ColorBufferDescriptor::new(10, 5)
            },
        )
        .unwrap();

        assert_eq!((cb.width(), cb.height()), (10, 5));
        assert_eq!((cb.effective_width(), cb.effective_height()), (20, 10));
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let ctx = context();
        let err = ColorBuffer::new(&ctx, &ColorBufferDescriptor::new(0, 4)).unwrap_err();
        assert!(matches!(err, Error::InvalidDimensions { width: 0, height: 4, .. }));
    }

    #[test]
    fn unsupported_pair_names_both_values() {
        let ctx = context();
        let err = ColorBuffer::new(
            &ctx,
            &ColorBufferDescriptor {
                format: ColorFormat::BGR,
                ty: ColorType::FLOAT32,
                ..ColorBufferDescriptor::new(4, 4)
            },
        )
        .unwrap_err();

        assert!(matches!(
            err,
            Error::UnsupportedFormat {
                format: ColorFormat::BGR,
                ty: ColorType::FLOAT32
            }
        ));
    }

    #[test]
    fn short_upload_fails_before_the_device() {
        let ctx = context();
        let cb = ColorBuffer::new(&ctx, &ColorBufferDescriptor::new(4, 4)).unwrap();

        let err = cb
            .write(&[0; 63], ColorFormat::RGBa, ColorType::UINT8, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NotEnoughData {
                required: 64,
                available: 63,
                ..
            }
        ));
    }

    #[test]
    fn multisampled_buffers_refuse_transfers() {
        let ctx = context();
        let cb = ColorBuffer::new(
            &ctx,
            &ColorBufferDescriptor {
                multisample: BufferMultisample::SampleCount(4),
                ..ColorBufferDescriptor::new(4, 4)
            },
        )
        .unwrap();

        let mut out = [0; 64];
        assert!(matches!(
            cb.read(&mut out, ColorFormat::RGBa, ColorType::UINT8, 0),
            Err(Error::Multisampled(_))
        ));
        assert!(matches!(cb.shadow(), Err(Error::Multisampled(_))));
        assert!(cb.generate_mipmaps().is_err());
    }

    #[test]
    fn destroyed_buffer_fails() {
        let ctx = context();
        let cb = ColorBuffer::new(&ctx, &ColorBufferDescriptor::new(4, 4)).unwrap();
        cb.destroy().unwrap();
        cb.destroy().unwrap();

        assert!(cb.is_destroyed());
        assert!(matches!(cb.bind(2), Err(Error::Destroyed("color buffer"))));
    }

    #[test]
    fn anisotropy_is_capped() {
        let ctx = context();
        let cb = ColorBuffer::new(&ctx, &ColorBufferDescriptor::new(4, 4)).unwrap();
        cb.set_anisotropy(1000.0).unwrap();

        assert_eq!(
            cb.sampling().anisotropy,
            ctx.capabilities().max_anisotropy
        );
    }
}
