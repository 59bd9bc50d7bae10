//! Layered 2D textures.

use std::rc::Rc;

use luminance::texture::MagFilter;

use crate::backend::{Region, TextureKind};
use crate::color_buffer::{full_rect, ColorBuffer};
use crate::context::GraphicsContext;
use crate::error::Result;
use crate::format::{BufferMultisample, ColorFormat, ColorRGBa, ColorType, PixelFormat};
use crate::texture::{TextureCore, TextureSpec};

/// Parameters of a new [`ArrayTexture`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArrayTextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: ColorFormat,
    pub ty: ColorType,
    pub levels: u32,
}

impl ArrayTextureDescriptor {
    pub fn new(width: u32, height: u32, layers: u32) -> Self {
        ArrayTextureDescriptor {
            width,
            height,
            layers,
            format: ColorFormat::RGBa,
            ty: ColorType::UINT8,
            levels: 1,
        }
    }
}

/// An array of equally sized 2D colour images.
#[derive(Clone)]
pub struct ArrayTexture(Rc<ArrayTextureInner>);

struct ArrayTextureInner {
    core: TextureCore,
    layers: u32,
    format: ColorFormat,
    ty: ColorType,
}

texture_common!(ArrayTexture, "ArrayTexture");

impl ArrayTexture {
    pub(crate) fn new(context: &GraphicsContext, desc: &ArrayTextureDescriptor) -> Result<Self> {
        let core = TextureCore::create(
            context,
            TextureSpec {
                kind: TextureKind::Array2D,
                name: "array texture",
                width: desc.width,
                height: desc.height,
                depth: desc.layers,
                content_scale: 1.0,
                format: PixelFormat::Color(desc.format, desc.ty),
                multisample: BufferMultisample::Disabled,
                levels: desc.levels,
            },
        )?;

        Ok(ArrayTexture(Rc::new(ArrayTextureInner {
            core,
            layers: desc.layers,
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

    fn layer_region(&self, layer: u32, level: u32) -> Region {
        let (w, h) = self.0.core.desc.level_size(level);
        Region {
            z: layer,
            ..Region::rect(0, 0, w, h)
        }
    }

    /// Upload one level of one layer.
    pub fn write(
        &self,
        layer: u32,
        data: &[u8],
        format: ColorFormat,
        ty: ColorType,
        level: u32,
    ) -> Result<()> {
        let region = self.layer_region(layer, level);
        self.0
            .core
            .write(data, PixelFormat::Color(format, ty), level, region)
    }

    pub fn read(
        &self,
        layer: u32,
        out: &mut [u8],
        format: ColorFormat,
        ty: ColorType,
        level: u32,
    ) -> Result<()> {
        let region = self.layer_region(layer, level);
        self.0
            .core
            .read(out, PixelFormat::Color(format, ty), level, region)
    }

    /// Clear every layer of one level.
    pub fn fill(&self, color: ColorRGBa, level: u32) -> Result<()> {
        self.0.core.fill(color, level)
    }

    /// Copy one layer into a layer of another array texture.
    pub fn copy_to(
        &self,
        layer: u32,
        target: &ArrayTexture,
        target_layer: u32,
        from_level: u32,
        to_level: u32,
    ) -> Result<()> {
        self.0.core.copy_to(
            layer,
            target.core(),
            target_layer,
            from_level,
            to_level,
            full_rect(self.core(), from_level),
            full_rect(target.core(), to_level),
            MagFilter::Linear,
        )
    }

    /// Copy one layer into a colour buffer.
    pub fn copy_layer_to(
        &self,
        layer: u32,
        target: &ColorBuffer,
        from_level: u32,
        to_level: u32,
    ) -> Result<()> {
        self.0.core.copy_to(
            layer,
            target.core(),
            0,
            from_level,
            to_level,
            full_rect(self.core(), from_level),
            full_rect(target.core(), to_level),
            MagFilter::Linear,
        )
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
    fn layers_are_addressed_independently() {
        let ctx = GraphicsContext::new(
            Box::new(SoftBackend::new(4, 4)),
            DriverConfiguration::default(),
        )
        .unwrap();
        let array = ArrayTexture::new(&ctx, &ArrayTextureDescriptor::new(2, 2, 3)).unwrap();

        array
            .write(1, &[200; 16], ColorFormat::RGBa, ColorType::UINT8, 0)
            .unwrap();

        let mut out = [0; 16];
        array.read(0, &mut out, ColorFormat::RGBa, ColorType::UINT8, 0).unwrap();
        assert_eq!(out, [0; 16]);
        array.read(1, &mut out, ColorFormat::RGBa, ColorType::UINT8, 0).unwrap();
        assert_eq!(out, [200; 16]);

        assert!(matches!(
            array.read(3, &mut out, ColorFormat::RGBa, ColorType::UINT8, 0),
            Err(Error::Usage(_))
        ));
    }
}
