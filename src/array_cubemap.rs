//! Arrays of cube maps.

use std::rc::Rc;

use luminance::texture::MagFilter;

use crate::backend::{Region, TextureKind};
use crate::capabilities::Requirement;
use crate::color_buffer::full_rect;
use crate::context::GraphicsContext;
use crate::cubemap::{CubemapDescriptor, CubemapSide};
use crate::error::Result;
use crate::format::{BufferMultisample, ColorFormat, ColorRGBa, ColorType, PixelFormat};
use crate::texture::{TextureCore, TextureSpec};

/// An array of cube maps; image `(layer, side)` lives at device layer `layer * 6 + side`.
#[derive(Clone)]
pub struct ArrayCubemap(Rc<ArrayCubemapInner>);

struct ArrayCubemapInner {
    core: TextureCore,
    layers: u32,
    format: ColorFormat,
    ty: ColorType,
}

texture_common!(ArrayCubemap, "ArrayCubemap");

impl ArrayCubemap {
    pub(crate) fn new(
        context: &GraphicsContext,
        desc: &CubemapDescriptor,
        layers: u32,
    ) -> Result<Self> {
        context
            .capabilities()
            .require("array cubemaps", Requirement::CUBEMAP_ARRAYS)?;

        let core = TextureCore::create(
            context,
            TextureSpec {
                kind: TextureKind::CubemapArray,
                name: "array cubemap",
                width: desc.width,
                height: desc.width,
                depth: layers,
                content_scale: 1.0,
                format: PixelFormat::Color(desc.format, desc.ty),
                multisample: BufferMultisample::Disabled,
                levels: desc.levels,
            },
        )?;

        Ok(ArrayCubemap(Rc::new(ArrayCubemapInner {
            core,
            layers,
            format: desc.format,
            ty: desc.ty,
        })))
    }

    pub(crate) fn core(&self) -> &TextureCore {
        &self.0.core
    }

    pub fn layers(&self) -> u32 {
        self.0.layers
    }

    pub fn format(&self) -> ColorFormat {
        self.0.format
    }

    pub fn ty(&self) -> ColorType {
        self.0.ty
    }

    pub(crate) fn device_layer(side: CubemapSide, layer: u32) -> u32 {
        layer * 6 + side.index()
    }

    fn face_region(&self, side: CubemapSide, layer: u32, level: u32) -> Region {
        let (w, h) = self.0.core.desc.level_size(level);
        Region {
            z: Self::device_layer(side, layer),
            ..Region::rect(0, 0, w, h)
        }
    }

    pub fn write(
        &self,
        side: CubemapSide,
        layer: u32,
        data: &[u8],
        format: ColorFormat,
        ty: ColorType,
        level: u32,
    ) -> Result<()> {
        let region = self.face_region(side, layer, level);
        self.0
            .core
            .write(data, PixelFormat::Color(format, ty), level, region)
    }

    pub fn read(
        &self,
        side: CubemapSide,
        layer: u32,
        out: &mut [u8],
        format: ColorFormat,
        ty: ColorType,
        level: u32,
    ) -> Result<()> {
        let region = self.face_region(side, layer, level);
        self.0
            .core
            .read(out, PixelFormat::Color(format, ty), level, region)
    }

    /// Clear every face of every layer of one level.
    pub fn fill(&self, color: ColorRGBa, level: u32) -> Result<()> {
        self.0.core.fill(color, level)
    }

    /// Copy all faces of one layer into a layer of `target`.
    pub fn copy_to(
        &self,
        layer: u32,
        target: &ArrayCubemap,
        target_layer: u32,
        from_level: u32,
        to_level: u32,
    ) -> Result<()> {
        for side in CubemapSide::ALL.iter().copied() {
            self.0.core.copy_to(
                Self::device_layer(side, layer),
                target.core(),
                Self::device_layer(side, target_layer),
                from_level,
                to_level,
                full_rect(self.core(), from_level),
                full_rect(target.core(), to_level),
                MagFilter::Linear,
            )?;
        }

        Ok(())
    }

    /// Free the texture; destroying twice is a no-op.
    pub fn destroy(&self) -> Result<()> {
        self.0.core.destroy();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftBackend;
    use crate::config::DriverConfiguration;
    use crate::error::Error;

    #[test]
    fn gated_on_version() {
        let ctx = GraphicsContext::new(
            Box::new(SoftBackend::with_version(4, 4, "OpenGL ES 3.1")),
            DriverConfiguration::default(),
        )
        .unwrap();

        let err = ArrayCubemap::new(&ctx, &CubemapDescriptor::new(4), 2).unwrap_err();
        assert!(matches!(err, Error::Unsupported { feature: "array cubemaps", .. }));
    }

    #[test]
    fn faces_of_layers() {
        let ctx = GraphicsContext::new(
            Box::new(SoftBackend::new(4, 4)),
            DriverConfiguration::default(),
        )
        .unwrap();
        let cubes = ArrayCubemap::new(&ctx, &CubemapDescriptor::new(1), 2).unwrap();

        cubes
            .write(CubemapSide::NegativeY, 1, &[9, 8, 7, 6], ColorFormat::RGBa, ColorType::UINT8, 0)
            .unwrap();

        let mut out = [0; 4];
        cubes
            .read(CubemapSide::NegativeY, 1, &mut out, ColorFormat::RGBa, ColorType::UINT8, 0)
            .unwrap();
        assert_eq!(out, [9, 8, 7, 6]);
        assert_eq!(ArrayCubemap::device_layer(CubemapSide::NegativeY, 1), 9);
    }
}
