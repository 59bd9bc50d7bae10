//! Shared machinery of the texture-like resources.
//!
//! Every texture-like resource wraps a [`TextureCore`]: descriptor validation, storage
//! allocation, transfers with size checks, sampling parameters and copy planning live here so
//! that each resource kind only adds its own addressing (faces, layers, slices).

use std::cell::Cell;

use luminance::texture::{MagFilter, MinFilter, Wrap};

use crate::backend::{
    Blit, BlitMask, Bounds, ClearValue, ImageRef, Region, Sampling, StorageMode, Surface,
    TextureDescriptor, TextureId, TextureKind,
};
use crate::capabilities::Capabilities;
use crate::context::{effective_size, GraphicsContext};
use crate::error::{Error, Result};
use crate::format::{BufferMultisample, ColorRGBa, ColorSampling, PixelFormat};
use crate::session::Lifetime;

/// An integer rectangle in device pixels; a negative height flips vertically.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct IntRectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl IntRectangle {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        IntRectangle {
            x,
            y,
            width,
            height,
        }
    }

    fn bounds(self) -> Bounds {
        Bounds {
            x0: self.x,
            y0: self.y,
            x1: self.x + self.width,
            y1: self.y + self.height,
        }
    }
}

/// A resource that can be bound to a texture unit for sampling.
pub trait Sampled {
    fn bind_sampled(&self, unit: u32) -> Result<()>;
}

/// How a copy between two texture images is carried out.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CopyPlan {
    /// Same-size device copy.
    Direct,
    /// Scaled or flipped blit between temporary framebuffers.
    Blit,
    /// Render pass sampling the source with the internal copy shader.
    Redraw,
}

/// One side of a planned copy.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CopyEnd<'a> {
    pub desc: &'a TextureDescriptor,
    pub level: u32,
    pub rect: IntRectangle,
}

impl<'a> CopyEnd<'a> {
    fn is_full_extent(&self) -> bool {
        let (w, h) = self.desc.level_size(self.level);
        self.rect == IntRectangle::new(0, 0, w as i32, h as i32)
    }
}

/// Decide how to copy between two images.
pub(crate) fn plan_copy(caps: &Capabilities, source: CopyEnd, target: CopyEnd) -> Result<CopyPlan> {
    let (src_ty, dst_ty) = match (source.desc.format, target.desc.format) {
        (PixelFormat::Color(_, s), PixelFormat::Color(_, t)) => (Some(s), Some(t)),
        (PixelFormat::Depth(s), PixelFormat::Depth(t)) if s == t => (None, None),
        (s, t) => {
            return Err(Error::usage(format!(
                "cannot copy between {:?} and {:?}",
                s, t
            )))
        }
    };

    let same_size = source.rect.width.abs() == target.rect.width.abs()
        && source.rect.height.abs() == target.rect.height.abs();
    let unflipped = source.rect.width > 0
        && source.rect.height > 0
        && target.rect.width > 0
        && target.rect.height > 0;
    let src_ms = source.desc.multisample.is_multisampled();
    let dst_ms = target.desc.multisample.is_multisampled();

    if target.desc.format.is_compressed() || source.desc.format.is_compressed() {
        return if source.is_full_extent() && target.is_full_extent() && same_size {
            Ok(CopyPlan::Direct)
        } else {
            Err(Error::usage(
                "compressed textures can only be copied whole and without scaling",
            ))
        };
    }

    if let (Some(s), Some(t)) = (src_ty, dst_ty) {
        let integer = |ty: crate::format::ColorType| ty.sampling() != ColorSampling::Normalized;
        if integer(s) != integer(t) || (integer(s) && s.sampling() != t.sampling()) {
            return Err(Error::usage(format!(
                "cannot copy between {:?} and {:?} texels",
                s, t
            )));
        }

        let numeric_mismatch = caps.quirks.blit_requires_matching_numeric_type && s.is_float() != t.is_float();
        let into_multisample =
            caps.quirks.blit_into_multisample_unsupported && dst_ms && !src_ms;

        if numeric_mismatch || into_multisample {
            if !(same_size && unflipped) {
                return Err(Error::usage(
                    "this device can only copy between these formats without scaling or flipping",
                ));
            }
            if src_ms {
                return Err(Error::Multisampled(
                    "cannot sample a multisampled texture for a copy",
                ));
            }
            return Ok(CopyPlan::Redraw);
        }
    }

    if source.is_full_extent()
        && target.is_full_extent()
        && same_size
        && src_ms == dst_ms
        && source.desc.native.internal_format == target.desc.native.internal_format
    {
        return Ok(CopyPlan::Direct);
    }

    if (src_ms || dst_ms) && !(same_size && unflipped) {
        return Err(Error::usage(
            "multisampled copies cannot scale or flip",
        ));
    }

    Ok(CopyPlan::Blit)
}

/// Everything needed to allocate a texture-like resource.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TextureSpec {
    pub kind: TextureKind,
    pub name: &'static str,
    /// Logical width.
    pub width: u32,
    /// Logical height.
    pub height: u32,
    pub depth: u32,
    pub content_scale: f64,
    pub format: PixelFormat,
    pub multisample: BufferMultisample,
    pub levels: u32,
}

#[derive(Debug)]
pub(crate) struct TextureCore {
    pub context: GraphicsContext,
    pub lifetime: Lifetime,
    pub id: TextureId,
    pub desc: TextureDescriptor,
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub content_scale: f64,
    sampling: Cell<Sampling>,
}

impl TextureCore {
    pub fn create(context: &GraphicsContext, spec: TextureSpec) -> Result<Self> {
        context.check()?;
        let caps = context.capabilities();

        let invalid = || Error::InvalidDimensions {
            kind: spec.name,
            width: spec.width as i64,
            height: spec.height as i64,
            depth: spec.depth as i64,
        };

        if !(spec.content_scale.is_finite() && spec.content_scale > 0.0) {
            return Err(invalid());
        }

        let (width, height) = effective_size(spec.width, spec.height, spec.content_scale);
        if width == 0 || height == 0 || spec.depth == 0 {
            return Err(invalid());
        }

        let max = caps.max_texture_size;
        if max > 0 && (width > max || height > max) {
            return Err(invalid());
        }

        if spec.levels == 0 {
            return Err(Error::usage(format!("{} needs at least one level", spec.name)));
        }

        let native = spec.format.native()?;
        let multisample = spec.multisample.capped(caps.max_samples);

        if multisample.is_multisampled() {
            if spec.format.is_compressed() {
                return Err(Error::usage(format!(
                    "{} cannot be both compressed and multisampled",
                    spec.name
                )));
            }
            if spec.levels > 1 {
                return Err(Error::usage(format!(
                    "multisampled {} cannot have mipmap levels",
                    spec.name
                )));
            }
        }

        let desc = TextureDescriptor {
            kind: spec.kind,
            width,
            height,
            depth: spec.depth,
            levels: spec.levels,
            format: spec.format,
            native,
            multisample,
            storage: if caps.texture_storage {
                StorageMode::Storage
            } else {
                StorageMode::Image
            },
        };

        let id = context.with_backend("create_texture", |b| b.create_texture(&desc))?;

        let sampling = Sampling {
            max_level: spec.levels - 1,
            ..Sampling::default()
        };

        if !multisample.is_multisampled() {
            context.with_backend("set_sampling", |b| b.set_sampling(id, &sampling))?;
        }

        log::debug!(
            "created {} {}x{}x{} ({:?}, {} levels, {:?})",
            spec.name,
            width,
            height,
            spec.depth,
            spec.format,
            spec.levels,
            multisample
        );

        Ok(TextureCore {
            context: context.clone(),
            lifetime: Lifetime::new(context),
            id,
            desc,
            name: spec.name,
            width: spec.width,
            height: spec.height,
            content_scale: spec.content_scale,
            sampling: Cell::new(sampling),
        })
    }

    pub fn check(&self) -> Result<()> {
        self.lifetime.check(self.name)
    }

    pub fn is_multisampled(&self) -> bool {
        self.desc.multisample.is_multisampled()
    }

    pub fn sampling(&self) -> Sampling {
        self.sampling.get()
    }

    pub fn image(&self, level: u32, layer: u32) -> Result<ImageRef> {
        if level >= self.desc.levels {
            return Err(Error::usage(format!(
                "level {} out of range, {} has {} levels",
                level, self.name, self.desc.levels
            )));
        }

        if layer >= self.desc.layers(level) {
            return Err(Error::usage(format!(
                "layer {} out of range for {}",
                layer, self.name
            )));
        }

        Ok(ImageRef {
            texture: self.id,
            level,
            layer,
        })
    }

    fn check_region(&self, level: u32, region: &Region) -> Result<()> {
        self.image(level, 0)?;
        let (w, h) = self.desc.level_size(level);
        let layers = self.desc.layers(level);

        if !region.fits(w, h, layers) {
            return Err(Error::usage(format!(
                "region {:?} exceeds level {} of {} ({}x{}x{})",
                region, level, self.name, w, h, layers
            )));
        }

        Ok(())
    }

    pub fn write(&self, data: &[u8], format: PixelFormat, level: u32, region: Region) -> Result<()> {
        self.check()?;

        if self.is_multisampled() {
            return Err(Error::Multisampled("cannot write to a multisampled texture"));
        }

        self.check_region(level, &region)?;
        if format.is_compressed() && format != self.desc.format {
            return Err(Error::usage(format!(
                "compressed upload as {:?} into {:?}",
                format, self.desc.format
            )));
        }
        format.native()?;

        let required = format.byte_size(region.width, region.height, region.depth);
        if data.len() < required {
            return Err(Error::NotEnoughData {
                operation: "write",
                required,
                available: data.len(),
            });
        }

        let id = self.id;
        self.context.with_backend("write_texture", |b| {
            b.write_texture(id, level, region, format, &data[..required])
        })
    }

    pub fn read(&self, out: &mut [u8], format: PixelFormat, level: u32, region: Region) -> Result<()> {
        self.check()?;

        if self.is_multisampled() {
            return Err(Error::Multisampled("cannot read from a multisampled texture"));
        }

        self.check_region(level, &region)?;
        format.native()?;

        let required = format.byte_size(region.width, region.height, region.depth);
        if out.len() < required {
            return Err(Error::NotEnoughData {
                operation: "read",
                required,
                available: out.len(),
            });
        }

        let id = self.id;
        self.context.with_backend("read_texture", |b| {
            b.read_texture(id, level, region, format, &mut out[..required])
        })
    }

    /// Region covering all layers of one level.
    pub fn level_region(&self, level: u32) -> Region {
        let (w, h) = self.desc.level_size(level);
        Region {
            x: 0,
            y: 0,
            z: 0,
            width: w,
            height: h,
            depth: self.desc.layers(level),
        }
    }

    pub fn generate_mipmaps(&self) -> Result<()> {
        self.check()?;

        if self.is_multisampled() {
            return Err(Error::Multisampled("cannot generate mipmaps for a multisampled texture"));
        }

        if self.desc.levels == 1 {
            return Ok(());
        }

        let id = self.id;
        self.context
            .with_backend("generate_mipmaps", |b| b.generate_mipmaps(id))
    }

    /// Clear every layer of one level.
    pub fn fill(&self, color: ColorRGBa, level: u32) -> Result<()> {
        self.check()?;
        self.image(level, 0)?;

        let value = clear_value(self.context.capabilities(), self.desc.format, color);
        for layer in 0..self.desc.layers(level) {
            let image = self.image(level, layer)?;
            self.context
                .with_backend("clear_image", |b| b.clear_image(image, value))?;
        }

        Ok(())
    }

    fn update_sampling<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Sampling),
    {
        self.check()?;

        if self.is_multisampled() {
            return Err(Error::Multisampled("multisampled textures have no sampling state"));
        }

        let mut sampling = self.sampling.get();
        f(&mut sampling);

        let id = self.id;
        self.context
            .with_backend("set_sampling", |b| b.set_sampling(id, &sampling))?;
        self.sampling.set(sampling);
        Ok(())
    }

    pub fn set_filter(&self, min: MinFilter, mag: MagFilter) -> Result<()> {
        self.update_sampling(|s| {
            s.min_filter = min;
            s.mag_filter = mag;
        })
    }

    pub fn set_wrap(&self, u: Wrap, v: Wrap) -> Result<()> {
        self.update_sampling(|s| {
            s.wrap_s = u;
            s.wrap_t = v;
        })
    }

    pub fn set_wrap_r(&self, w: Wrap) -> Result<()> {
        self.update_sampling(|s| s.wrap_r = w)
    }

    pub fn set_anisotropy(&self, value: f32) -> Result<()> {
        let max = self.context.capabilities().max_anisotropy;
        if value > max {
            log::debug!("anisotropy {} capped to {}", value, max);
        }

        self.update_sampling(|s| s.anisotropy = value.max(1.0).min(max))
    }

    pub fn bind(&self, unit: u32) -> Result<()> {
        self.check()?;

        let id = self.id;
        self.context
            .with_backend("bind_texture", |b| b.bind_texture(unit, Some(id)))
    }

    /// Copy a rectangle of one image of this texture into an image of `target`.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_to(
        &self,
        layer: u32,
        target: &TextureCore,
        target_layer: u32,
        from_level: u32,
        to_level: u32,
        source_rect: IntRectangle,
        target_rect: IntRectangle,
        filter: MagFilter,
    ) -> Result<()> {
        self.check()?;
        target.check()?;

        if !self.context.ptr_eq(&target.context) {
            return Err(Error::usage("cannot copy between textures of different contexts"));
        }

        let source_image = self.image(from_level, layer)?;
        let target_image = target.image(to_level, target_layer)?;

        let source = CopyEnd {
            desc: &self.desc,
            level: from_level,
            rect: source_rect,
        };
        let destination = CopyEnd {
            desc: &target.desc,
            level: to_level,
            rect: target_rect,
        };

        let plan = plan_copy(self.context.capabilities(), source, destination)?;
        log::trace!(
            "copying {} {:?} to {} {:?} via {:?}",
            self.name,
            source_rect,
            target.name,
            target_rect,
            plan
        );

        match plan {
            CopyPlan::Direct => {
                let (w, h) = (source_rect.width as u32, source_rect.height as u32);
                self.context.with_backend("copy_image", |b| {
                    b.copy_image(source_image, target_image, w, h)
                })
            }

            CopyPlan::Blit => {
                let mask = match self.desc.format {
                    PixelFormat::Color(..) => BlitMask::COLOR,
                    PixelFormat::Depth(depth) => BlitMask {
                        color: false,
                        depth: depth.has_depth(),
                        stencil: depth.has_stencil(),
                    },
                };
                let filter = if mask.color { filter } else { MagFilter::Nearest };

                let blit = Blit {
                    source: Surface::Image(source_image),
                    source_bounds: source_rect.bounds(),
                    target: Surface::Image(target_image),
                    target_bounds: target_rect.bounds(),
                    mask,
                    filter,
                };
                self.context.with_backend("blit", |b| b.blit(&blit))
            }

            CopyPlan::Redraw => crate::copy::redraw(
                &self.context,
                source_image,
                &self.desc,
                target_image,
                &target.desc,
                source_rect,
                target_rect,
            ),
        }
    }

    /// Free the device texture; returns `false` if it was already destroyed.
    pub fn destroy(&self) -> bool {
        if !self.lifetime.begin_destroy() {
            return false;
        }

        let id = self.id;
        self.context.backend().delete_texture(id);
        log::debug!("destroyed {} {:?}", self.name, id);
        true
    }
}

/// The clear value writing `color` into an attachment of `format`.
///
/// Normalized formats receive linear values; drivers that store sRGB clears unconverted get the
/// sRGB value instead.
pub(crate) fn clear_value(caps: &Capabilities, format: PixelFormat, color: ColorRGBa) -> ClearValue {
    match format {
        PixelFormat::Color(_, ty) => match ty.sampling() {
            ColorSampling::UnsignedInteger => {
                let c = color.to_array();
                ClearValue::UInt([c[0] as u32, c[1] as u32, c[2] as u32, c[3] as u32])
            }
            ColorSampling::SignedInteger => {
                let c = color.to_array();
                ClearValue::Int([c[0] as i32, c[1] as i32, c[2] as i32, c[3] as i32])
            }
            ColorSampling::Normalized => {
                let c = if ty.is_srgb() && caps.quirks.clear_ignores_srgb {
                    color.to_srgb()
                } else {
                    color.to_linear()
                };
                ClearValue::Float(c.to_array())
            }
        },
        PixelFormat::Depth(_) => ClearValue::Float(color.to_array()),
    }
}

/// Shared accessors and sampling operations of a texture-like resource with a `core()` method.
macro_rules! texture_common {
    ($ty:ident, $kind:expr) => {
        impl $ty {
            /// Width in logical pixels.
            pub fn width(&self) -> u32 {
                self.core().width
            }

            /// Height in logical pixels.
            pub fn height(&self) -> u32 {
                self.core().height
            }

            pub fn content_scale(&self) -> f64 {
                self.core().content_scale
            }

            /// Width in device pixels.
            pub fn effective_width(&self) -> u32 {
                self.core().desc.width
            }

            /// Height in device pixels.
            pub fn effective_height(&self) -> u32 {
                self.core().desc.height
            }

            pub fn levels(&self) -> u32 {
                self.core().desc.levels
            }

            pub fn multisample(&self) -> crate::format::BufferMultisample {
                self.core().desc.multisample
            }

            pub fn pixel_format(&self) -> crate::format::PixelFormat {
                self.core().desc.format
            }

            pub fn is_destroyed(&self) -> bool {
                self.core().lifetime.is_destroyed()
            }

            pub fn sampling(&self) -> crate::backend::Sampling {
                self.core().sampling()
            }

            /// Bind to a texture unit.
            pub fn bind(&self, unit: u32) -> crate::error::Result<()> {
                self.core().bind(unit)
            }

            pub fn generate_mipmaps(&self) -> crate::error::Result<()> {
                self.core().generate_mipmaps()
            }

            pub fn set_filter(
                &self,
                min: luminance::texture::MinFilter,
                mag: luminance::texture::MagFilter,
            ) -> crate::error::Result<()> {
                self.core().set_filter(min, mag)
            }

            pub fn set_wrap(
                &self,
                u: luminance::texture::Wrap,
                v: luminance::texture::Wrap,
            ) -> crate::error::Result<()> {
                self.core().set_wrap(u, v)
            }

            /// Anisotropic filtering level, capped to what the device supports.
            pub fn set_anisotropy(&self, value: f32) -> crate::error::Result<()> {
                self.core().set_anisotropy(value)
            }

            pub(crate) fn lifetime(&self) -> &crate::session::Lifetime {
                &self.core().lifetime
            }

            pub(crate) fn id(&self) -> crate::backend::TextureId {
                self.core().id
            }
        }

        impl crate::texture::Sampled for $ty {
            fn bind_sampled(&self, unit: u32) -> crate::error::Result<()> {
                self.bind(unit)
            }
        }

        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                std::rc::Rc::ptr_eq(&self.0, &other.0)
            }
        }

        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                let core = self.core();
                f.debug_struct($kind)
                    .field("id", &core.id)
                    .field("width", &core.width)
                    .field("height", &core.height)
                    .field("format", &core.desc.format)
                    .field("destroyed", &core.lifetime.is_destroyed())
                    .finish()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftBackend;
    use crate::config::DriverConfiguration;
    use crate::format::{ColorFormat, ColorType};

    fn caps(version: &str) -> Capabilities {
        let ctx = GraphicsContext::new(
            Box::new(SoftBackend::with_version(1, 1, version)),
            DriverConfiguration::default(),
        )
        .unwrap();
        ctx.capabilities().clone()
    }

    fn desc(ty: ColorType, size: u32, multisample: BufferMultisample) -> TextureDescriptor {
        let format = PixelFormat::Color(ColorFormat::RGBa, ty);
        TextureDescriptor {
            kind: TextureKind::Texture2D,
            width: size,
            height: size,
            depth: 1,
            levels: 1,
            format,
            native: format.native().unwrap(),
            multisample,
            storage: StorageMode::Storage,
        }
    }

    fn end(desc: &TextureDescriptor, rect: IntRectangle) -> CopyEnd {
        CopyEnd {
            desc,
            level: 0,
            rect,
        }
    }

    #[test]
    fn full_copies_are_direct() {
        let caps = caps("4.6.0");
        let a = desc(ColorType::UINT8, 8, BufferMultisample::Disabled);
        let b = desc(ColorType::UINT8, 8, BufferMultisample::Disabled);
        let full = IntRectangle::new(0, 0, 8, 8);

        assert_eq!(plan_copy(&caps, end(&a, full), end(&b, full)).unwrap(), CopyPlan::Direct);
    }

    #[test]
    fn scaled_and_flipped_copies_blit() {
        let caps = caps("4.6.0");
        let a = desc(ColorType::UINT8, 8, BufferMultisample::Disabled);
        let b = desc(ColorType::FLOAT16, 4, BufferMultisample::Disabled);

        let plan = plan_copy(
            &caps,
            end(&a, IntRectangle::new(0, 0, 8, 8)),
            end(&b, IntRectangle::new(0, 4, 4, -4)),
        );
        assert_eq!(plan.unwrap(), CopyPlan::Blit);
    }

    #[test]
    fn gles_redraws_between_numeric_types() {
        let caps = caps("OpenGL ES 3.2");
        let a = desc(ColorType::UINT8, 8, BufferMultisample::Disabled);
        let b = desc(ColorType::FLOAT32, 8, BufferMultisample::Disabled);
        let full = IntRectangle::new(0, 0, 8, 8);

        assert_eq!(plan_copy(&caps, end(&a, full), end(&b, full)).unwrap(), CopyPlan::Redraw);
        // a scaled copy cannot be served by a redraw
        assert!(plan_copy(&caps, end(&a, full), end(&b, IntRectangle::new(0, 0, 4, 4))).is_err());
    }

    #[test]
    fn integer_and_normalized_do_not_mix() {
        let caps = caps("4.6.0");
        let a = desc(ColorType::UINT8_INT, 8, BufferMultisample::Disabled);
        let b = desc(ColorType::UINT8, 8, BufferMultisample::Disabled);
        let full = IntRectangle::new(0, 0, 8, 8);

        assert!(plan_copy(&caps, end(&a, full), end(&b, full)).is_err());
    }

    #[test]
    fn cropped_compressed_copy_is_refused() {
        let caps = caps("4.6.0");
        let a = desc(ColorType::DXT1, 8, BufferMultisample::Disabled);
        let b = desc(ColorType::DXT1, 8, BufferMultisample::Disabled);

        let full = IntRectangle::new(0, 0, 8, 8);
        assert_eq!(plan_copy(&caps, end(&a, full), end(&b, full)).unwrap(), CopyPlan::Direct);

        let cropped = IntRectangle::new(0, 0, 4, 4);
        assert!(matches!(
            plan_copy(&caps, end(&a, cropped), end(&b, cropped)),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn multisample_resolve_blits() {
        let caps = caps("4.6.0");
        let a = desc(ColorType::UINT8, 8, BufferMultisample::SampleCount(4));
        let b = desc(ColorType::UINT8, 8, BufferMultisample::Disabled);
        let full = IntRectangle::new(0, 0, 8, 8);

        assert_eq!(plan_copy(&caps, end(&a, full), end(&b, full)).unwrap(), CopyPlan::Blit);
    }
}
