//! Cube map textures.

use std::rc::Rc;

use luminance::texture::MagFilter;

use crate::backend::{Region, TextureKind};
use crate::color_buffer::{full_rect, ColorBuffer};
use crate::context::GraphicsContext;
use crate::error::Result;
use crate::format::{BufferMultisample, ColorFormat, ColorRGBa, ColorType, PixelFormat};
use crate::texture::{TextureCore, TextureSpec};

/// A face of a cube map, in device layer order.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CubemapSide {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubemapSide {
    pub const ALL: [CubemapSide; 6] = [
        CubemapSide::PositiveX,
        CubemapSide::NegativeX,
        CubemapSide::PositiveY,
        CubemapSide::NegativeY,
        CubemapSide::PositiveZ,
        CubemapSide::NegativeZ,
    ];

    /// Layer index of the face.
    pub fn index(self) -> u32 {
        self as u32
    }
}

/// Parameters of a new [`Cubemap`] or [`ArrayCubemap`](crate::array_cubemap::ArrayCubemap).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CubemapDescriptor {
    /// Edge length of every face.
    pub width: u32,
    pub format: ColorFormat,
    pub ty: ColorType,
    pub levels: u32,
}

impl CubemapDescriptor {
    pub fn new(width: u32) -> Self {
        CubemapDescriptor {
            width,
            format: ColorFormat::RGBa,
            ty: ColorType::UINT8,
            levels: 1,
        }
    }
}

/// Six square colour images sampled by direction.
#[derive(Clone)]
pub struct Cubemap(Rc<CubemapInner>);

struct CubemapInner {
    core: TextureCore,
    format: ColorFormat,
    ty: ColorType,
}

texture_common!(Cubemap, "Cubemap");

impl Cubemap {
    pub(crate) fn new(context: &GraphicsContext, desc: &CubemapDescriptor) -> Result<Self> {
        let core = TextureCore::create(
            context,
            TextureSpec {
                kind: TextureKind::Cubemap,
                name: "cubemap",
                width: desc.width,
                height: desc.width,
                depth: 1,
                content_scale: 1.0,
                format: PixelFormat::Color(desc.format, desc.ty),
                multisample: BufferMultisample::Disabled,
                levels: desc.levels,
            },
        )?;

        Ok(Cubemap(Rc::new(CubemapInner {
            core,
            format: desc.format,
            ty: desc.ty,
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

    fn face_region(&self, side: CubemapSide, level: u32) -> Region {
        let (w, h) = self.0.core.desc.level_size(level);
        Region {
            z: side.index(),
            ..Region::rect(0, 0, w, h)
        }
    }

    /// Upload one level of one face.
    pub fn write(
        &self,
        side: CubemapSide,
        data: &[u8],
        format: ColorFormat,
        ty: ColorType,
        level: u32,
    ) -> Result<()> {
        let region = self.face_region(side, level);
        self.0
            .core
            .write(data, PixelFormat::Color(format, ty), level, region)
    }

    pub fn read(
        &self,
        side: CubemapSide,
        out: &mut [u8],
        format: ColorFormat,
        ty: ColorType,
        level: u32,
    ) -> Result<()> {
        let region = self.face_region(side, level);
        self.0
            .core
            .read(out, PixelFormat::Color(format, ty), level, region)
    }

    /// Clear every face of one level.
    pub fn fill(&self, color: ColorRGBa, level: u32) -> Result<()> {
        self.0.core.fill(color, level)
    }

    /// Copy one level of every face into `target`.
    pub fn copy_to(&self, target: &Cubemap, from_level: u32, to_level: u32) -> Result<()> {
        let source_rect = full_rect(self.core(), from_level);
        let target_rect = full_rect(target.core(), to_level);

        for side in CubemapSide::ALL.iter() {
            self.0.core.copy_to(
                side.index(),
                target.core(),
                side.index(),
                from_level,
                to_level,
                source_rect,
                target_rect,
                MagFilter::Linear,
            )?;
        }

        Ok(())
    }

    /// Copy one face into a colour buffer.
    pub fn copy_face_to(
        &self,
        side: CubemapSide,
        target: &ColorBuffer,
        from_level: u32,
        to_level: u32,
    ) -> Result<()> {
        self.0.core.copy_to(
            side.index(),
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
