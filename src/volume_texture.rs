//! Three-dimensional textures.

use std::rc::Rc;

use crate::backend::{Region, TextureKind};
use crate::context::GraphicsContext;
use crate::error::Result;
use crate::format::{BufferMultisample, ColorFormat, ColorRGBa, ColorType, PixelFormat};
use crate::texture::{TextureCore, TextureSpec};

/// Parameters of a new [`VolumeTexture`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeTextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: ColorFormat,
    pub ty: ColorType,
    pub levels: u32,
}

impl VolumeTextureDescriptor {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        VolumeTextureDescriptor {
            width,
            height,
            depth,
            format: ColorFormat::RGBa,
            ty: ColorType::UINT8,
            levels: 1,
        }
    }
}

/// A 3D colour texture, written and read slice by slice or whole.
#[derive(Clone)]
pub struct VolumeTexture(Rc<VolumeTextureInner>);

struct VolumeTextureInner {
    core: TextureCore,
    format: ColorFormat,
    ty: ColorType,
}

texture_common!(VolumeTexture, "VolumeTexture");

impl VolumeTexture {
    pub(crate) fn new(context: &GraphicsContext, desc: &VolumeTextureDescriptor) -> Result<Self> {
        let core = TextureCore::create(
            context,
            TextureSpec {
                kind: TextureKind::Volume,
                name: "volume texture",
                width: desc.width,
                height: desc.height,
                depth: desc.depth,
                content_scale: 1.0,
                format: PixelFormat::Color(desc.format, desc.ty),
                multisample: BufferMultisample::Disabled,
                levels: desc.levels,
            },
        )?;

        Ok(VolumeTexture(Rc::new(VolumeTextureInner {
            core,
            format: desc.format,
            ty: desc.ty,
        })))
    }

    pub(crate) fn core(&self) -> &TextureCore {
        &self.0.core
    }

    pub fn depth(&self) -> u32 {
        self.0.core.desc.depth
    }

    pub fn format(&self) -> ColorFormat {
        self.0.format
    }

    pub fn ty(&self) -> ColorType {
        self.0.ty
    }

    fn slice_region(&self, slice: u32, level: u32) -> Region {
        let (w, h) = self.0.core.desc.level_size(level);
        Region {
            z: slice,
            ..Region::rect(0, 0, w, h)
        }
    }

    /// Upload every slice of one level.
    pub fn write(&self, data: &[u8], format: ColorFormat, ty: ColorType, level: u32) -> Result<()> {
        let region = self.0.core.level_region(level);
        self.0
            .core
            .write(data, PixelFormat::Color(format, ty), level, region)
    }

    pub fn write_slice(
        &self,
        slice: u32,
        data: &[u8],
        format: ColorFormat,
        ty: ColorType,
        level: u32,
    ) -> Result<()> {
        let region = self.slice_region(slice, level);
        self.0
            .core
            .write(data, PixelFormat::Color(format, ty), level, region)
    }

    pub fn read(&self, out: &mut [u8], format: ColorFormat, ty: ColorType, level: u32) -> Result<()> {
        let region = self.0.core.level_region(level);
        self.0
            .core
            .read(out, PixelFormat::Color(format, ty), level, region)
    }

    pub fn read_slice(
        &self,
        slice: u32,
        out: &mut [u8],
        format: ColorFormat,
        ty: ColorType,
        level: u32,
    ) -> Result<()> {
        let region = self.slice_region(slice, level);
        self.0
            .core
            .read(out, PixelFormat::Color(format, ty), level, region)
    }

    /// Clear every slice of one level.
    pub fn fill(&self, color: ColorRGBa, level: u32) -> Result<()> {
        self.0.core.fill(color, level)
    }

    pub fn set_wrap_r(&self, wrap: luminance::texture::Wrap) -> Result<()> {
        self.0.core.set_wrap_r(wrap)
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

    #[test]
    fn slices_match_the_whole_volume() {
        let ctx = GraphicsContext::new(
            Box::new(SoftBackend::new(4, 4)),
            DriverConfiguration::default(),
        )
        .unwrap();
        let volume = VolumeTexture::new(
            &ctx,
            &VolumeTextureDescriptor {
                format: ColorFormat::R,
                ..VolumeTextureDescriptor::new(2, 2, 3)
            },
        )
        .unwrap();

        let data: Vec<u8> = (0..12).collect();
        volume.write(&data, ColorFormat::R, ColorType::UINT8, 0).unwrap();

        let mut slice = [0; 4];
        volume
            .read_slice(2, &mut slice, ColorFormat::R, ColorType::UINT8, 0)
            .unwrap();
        assert_eq!(slice, [8, 9, 10, 11]);

        // a whole-volume write needs every slice
        assert!(volume.write(&data[..8], ColorFormat::R, ColorType::UINT8, 0).is_err());
    }
}
