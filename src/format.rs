//! Pixel formats, colour values and the backend format table.

use std::fmt;

use crate::error::{Error, Result};

// S3TC / sRGB S3TC / BPTC unsigned float enums, not exposed by glow.
pub(crate) const COMPRESSED_RGB_S3TC_DXT1: u32 = 0x83F0;
pub(crate) const COMPRESSED_RGBA_S3TC_DXT1: u32 = 0x83F1;
pub(crate) const COMPRESSED_RGBA_S3TC_DXT3: u32 = 0x83F2;
pub(crate) const COMPRESSED_RGBA_S3TC_DXT5: u32 = 0x83F3;
pub(crate) const COMPRESSED_SRGB_S3TC_DXT1: u32 = 0x8C4C;
pub(crate) const COMPRESSED_SRGB_ALPHA_S3TC_DXT1: u32 = 0x8C4D;
pub(crate) const COMPRESSED_SRGB_ALPHA_S3TC_DXT3: u32 = 0x8C4E;
pub(crate) const COMPRESSED_SRGB_ALPHA_S3TC_DXT5: u32 = 0x8C4F;
pub(crate) const COMPRESSED_RGB_BPTC_UNSIGNED_FLOAT: u32 = 0x8E8F;

/// Channel layout of a colour resource.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ColorFormat {
    R,
    RG,
    RGB,
    BGR,
    RGBa,
    BGRa,
}

impl ColorFormat {
    pub fn component_count(self) -> usize {
        match self {
            ColorFormat::R => 1,
            ColorFormat::RG => 2,
            ColorFormat::RGB | ColorFormat::BGR => 3,
            ColorFormat::RGBa | ColorFormat::BGRa => 4,
        }
    }

    /// The pixel transfer format of this layout.
    pub fn native(self) -> u32 {
        match self {
            ColorFormat::R => glow::RED,
            ColorFormat::RG => glow::RG,
            ColorFormat::RGB => glow::RGB,
            ColorFormat::BGR => glow::BGR,
            ColorFormat::RGBa => glow::RGBA,
            ColorFormat::BGRa => glow::BGRA,
        }
    }
}

/// How a shader sees the texels of a resource.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ColorSampling {
    Normalized,
    UnsignedInteger,
    SignedInteger,
}

/// Storage type of each channel.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ColorType {
    UINT8,
    UINT8_SRGB,
    UINT16,
    UINT8_INT,
    UINT16_INT,
    UINT32_INT,
    SINT8_INT,
    SINT16_INT,
    SINT32_INT,
    FLOAT16,
    FLOAT32,
    DXT1,
    DXT3,
    DXT5,
    DXT1_SRGB,
    DXT3_SRGB,
    DXT5_SRGB,
    BPTC_UNORM,
    BPTC_UNORM_SRGB,
    BPTC_FLOAT,
    BPTC_UFLOAT,
}

impl ColorType {
    /// Bytes per channel; `None` for block-compressed types.
    pub fn component_size(self) -> Option<usize> {
        match self {
            ColorType::UINT8 | ColorType::UINT8_SRGB | ColorType::UINT8_INT | ColorType::SINT8_INT => {
                Some(1)
            }
            ColorType::UINT16
            | ColorType::UINT16_INT
            | ColorType::SINT16_INT
            | ColorType::FLOAT16 => Some(2),
            ColorType::UINT32_INT | ColorType::SINT32_INT | ColorType::FLOAT32 => Some(4),
            _ => None,
        }
    }

    pub fn is_compressed(self) -> bool {
        self.component_size().is_none()
    }

    /// Bytes per 4×4 block for compressed types.
    pub fn block_size(self) -> Option<usize> {
        match self {
            ColorType::DXT1 | ColorType::DXT1_SRGB => Some(8),
            ColorType::DXT3
            | ColorType::DXT5
            | ColorType::DXT3_SRGB
            | ColorType::DXT5_SRGB
            | ColorType::BPTC_UNORM
            | ColorType::BPTC_UNORM_SRGB
            | ColorType::BPTC_FLOAT
            | ColorType::BPTC_UFLOAT => Some(16),
            _ => None,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            ColorType::FLOAT16 | ColorType::FLOAT32 | ColorType::BPTC_FLOAT | ColorType::BPTC_UFLOAT
        )
    }

    pub fn is_srgb(self) -> bool {
        matches!(
            self,
            ColorType::UINT8_SRGB
                | ColorType::DXT1_SRGB
                | ColorType::DXT3_SRGB
                | ColorType::DXT5_SRGB
                | ColorType::BPTC_UNORM_SRGB
        )
    }

    pub fn sampling(self) -> ColorSampling {
        match self {
            ColorType::UINT8_INT | ColorType::UINT16_INT | ColorType::UINT32_INT => {
                ColorSampling::UnsignedInteger
            }
            ColorType::SINT8_INT | ColorType::SINT16_INT | ColorType::SINT32_INT => {
                ColorSampling::SignedInteger
            }
            _ => ColorSampling::Normalized,
        }
    }

    /// The pixel transfer type; `None` for compressed types.
    pub fn native(self) -> Option<u32> {
        let ty = match self {
            ColorType::UINT8 | ColorType::UINT8_SRGB | ColorType::UINT8_INT => glow::UNSIGNED_BYTE,
            ColorType::SINT8_INT => glow::BYTE,
            ColorType::UINT16 | ColorType::UINT16_INT => glow::UNSIGNED_SHORT,
            ColorType::SINT16_INT => glow::SHORT,
            ColorType::UINT32_INT => glow::UNSIGNED_INT,
            ColorType::SINT32_INT => glow::INT,
            ColorType::FLOAT16 => glow::HALF_FLOAT,
            ColorType::FLOAT32 => glow::FLOAT,
            _ => return None,
        };

        Some(ty)
    }
}

/// Depth and stencil storage formats.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DepthFormat {
    Depth16,
    Depth24,
    Depth32F,
    Depth24Stencil8,
    Depth32FStencil8,
    Stencil8,
    DepthStencil,
}

impl DepthFormat {
    pub fn has_depth(self) -> bool {
        !matches!(self, DepthFormat::Stencil8)
    }

    pub fn has_stencil(self) -> bool {
        matches!(
            self,
            DepthFormat::Depth24Stencil8
                | DepthFormat::Depth32FStencil8
                | DepthFormat::Stencil8
                | DepthFormat::DepthStencil
        )
    }

    /// Bytes per texel as transferred by read/write.
    pub fn texel_size(self) -> usize {
        match self {
            DepthFormat::Depth16 => 2,
            DepthFormat::Stencil8 => 1,
            DepthFormat::Depth32FStencil8 => 8,
            _ => 4,
        }
    }

    pub fn native(self) -> NativeFormat {
        let (internal_format, format, ty) = match self {
            DepthFormat::Depth16 => (
                glow::DEPTH_COMPONENT16,
                glow::DEPTH_COMPONENT,
                glow::UNSIGNED_SHORT,
            ),
            DepthFormat::Depth24 => (
                glow::DEPTH_COMPONENT24,
                glow::DEPTH_COMPONENT,
                glow::UNSIGNED_INT,
            ),
            DepthFormat::Depth32F => (glow::DEPTH_COMPONENT32F, glow::DEPTH_COMPONENT, glow::FLOAT),
            DepthFormat::Depth24Stencil8 | DepthFormat::DepthStencil => (
                glow::DEPTH24_STENCIL8,
                glow::DEPTH_STENCIL,
                glow::UNSIGNED_INT_24_8,
            ),
            DepthFormat::Depth32FStencil8 => (
                glow::DEPTH32F_STENCIL8,
                glow::DEPTH_STENCIL,
                glow::FLOAT_32_UNSIGNED_INT_24_8_REV,
            ),
            DepthFormat::Stencil8 => (glow::STENCIL_INDEX8, glow::STENCIL_INDEX, glow::UNSIGNED_BYTE),
        };

        NativeFormat {
            internal_format,
            format,
            ty,
        }
    }
}

/// Multisample mode of a texture-like resource.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BufferMultisample {
    Disabled,
    SampleCount(u32),
}

impl BufferMultisample {
    pub fn is_multisampled(self) -> bool {
        matches!(self, BufferMultisample::SampleCount(n) if n > 0)
    }

    pub fn samples(self) -> u32 {
        match self {
            BufferMultisample::Disabled => 0,
            BufferMultisample::SampleCount(n) => n,
        }
    }

    /// Cap the sample count to what the device supports.
    pub fn capped(self, max_samples: u32) -> Self {
        match self {
            BufferMultisample::SampleCount(n) if n > max_samples => {
                log::warn!(
                    "requested {} samples, device supports {}; capping",
                    n,
                    max_samples
                );
                BufferMultisample::SampleCount(max_samples)
            }
            BufferMultisample::SampleCount(0) => BufferMultisample::Disabled,
            other => other,
        }
    }
}

/// A resolved backend format triple.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct NativeFormat {
    pub internal_format: u32,
    pub format: u32,
    /// Pixel transfer type, `0` for compressed formats.
    pub ty: u32,
}

/// The logical format of a texture-like resource.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PixelFormat {
    Color(ColorFormat, ColorType),
    Depth(DepthFormat),
}

impl PixelFormat {
    /// Bytes needed for a `width × height × depth` region.
    pub fn byte_size(self, width: u32, height: u32, depth: u32) -> usize {
        let (w, h, d) = (width as usize, height as usize, depth as usize);

        match self {
            PixelFormat::Color(format, ty) => match (ty.component_size(), ty.block_size()) {
                (Some(size), _) => format.component_count() * size * w * h * d,
                (None, Some(block)) => ((w + 3) / 4) * ((h + 3) / 4) * block * d,
                (None, None) => 0,
            },
            PixelFormat::Depth(depth_format) => depth_format.texel_size() * w * h * d,
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(self, PixelFormat::Color(_, ty) if ty.is_compressed())
    }

    pub fn native(self) -> Result<NativeFormat> {
        match self {
            PixelFormat::Color(format, ty) => internal_format(format, ty),
            PixelFormat::Depth(depth) => Ok(depth.native()),
        }
    }
}

/// Resolve a (format, type) pair through the backend format table.
pub fn internal_format(format: ColorFormat, ty: ColorType) -> Result<NativeFormat> {
    use ColorFormat::*;
    use ColorType::*;

    let (internal_format, native_format) = match (format, ty) {
        (R, UINT8) => (glow::R8, glow::RED),
        (R, UINT8_INT) => (glow::R8UI, glow::RED_INTEGER),
        (R, SINT8_INT) => (glow::R8I, glow::RED_INTEGER),
        (R, UINT16) => (glow::R16, glow::RED),
        (R, UINT16_INT) => (glow::R16UI, glow::RED_INTEGER),
        (R, SINT16_INT) => (glow::R16I, glow::RED_INTEGER),
        (R, UINT32_INT) => (glow::R32UI, glow::RED_INTEGER),
        (R, SINT32_INT) => (glow::R32I, glow::RED_INTEGER),
        (R, FLOAT16) => (glow::R16F, glow::RED),
        (R, FLOAT32) => (glow::R32F, glow::RED),

        (RG, UINT8) => (glow::RG8, glow::RG),
        (RG, UINT8_INT) => (glow::RG8UI, glow::RG_INTEGER),
        (RG, SINT16_INT) => (glow::RG16I, glow::RG_INTEGER),
        (RG, SINT32_INT) => (glow::RG32I, glow::RG_INTEGER),
        (RG, UINT16) => (glow::RG16, glow::RG),
        (RG, UINT16_INT) => (glow::RG16UI, glow::RG_INTEGER),
        (RG, UINT32_INT) => (glow::RG32UI, glow::RG_INTEGER),
        (RG, FLOAT16) => (glow::RG16F, glow::RG),
        (RG, FLOAT32) => (glow::RG32F, glow::RG),

        (RGB, UINT8) => (glow::RGB8, glow::RGB),
        (RGB, UINT8_INT) => (glow::RGB8UI, glow::RGB_INTEGER),
        (RGB, UINT16) => (glow::RGB16, glow::RGB),
        (RGB, UINT16_INT) => (glow::RGB16UI, glow::RGB_INTEGER),
        (RGB, UINT32_INT) => (glow::RGB32UI, glow::RGB_INTEGER),
        (RGB, SINT16_INT) => (glow::RGB16I, glow::RGB_INTEGER),
        (RGB, SINT32_INT) => (glow::RGB32I, glow::RGB_INTEGER),
        (RGB, FLOAT16) => (glow::RGB16F, glow::RGB),
        (RGB, FLOAT32) => (glow::RGB32F, glow::RGB),

        (BGR, UINT8) => (glow::RGB8, glow::BGR),

        (RGBa, UINT8) => (glow::RGBA8, glow::RGBA),
        (RGBa, UINT8_INT) => (glow::RGBA8UI, glow::RGBA_INTEGER),
        (RGBa, UINT16) => (glow::RGBA16, glow::RGBA),
        (RGBa, UINT16_INT) => (glow::RGBA16UI, glow::RGBA_INTEGER),
        (RGBa, SINT16_INT) => (glow::RGBA16I, glow::RGBA_INTEGER),
        (RGBa, UINT32_INT) => (glow::RGBA32UI, glow::RGBA_INTEGER),
        (RGBa, SINT32_INT) => (glow::RGBA32I, glow::RGBA_INTEGER),
        (RGBa, FLOAT16) => (glow::RGBA16F, glow::RGBA),
        (RGBa, FLOAT32) => (glow::RGBA32F, glow::RGBA),

        (RGB, UINT8_SRGB) => (glow::SRGB8, glow::RGB),
        (RGBa, UINT8_SRGB) => (glow::SRGB8_ALPHA8, glow::RGBA),

        (RGBa, DXT1) => (COMPRESSED_RGBA_S3TC_DXT1, glow::RGBA),
        (RGBa, DXT3) => (COMPRESSED_RGBA_S3TC_DXT3, glow::RGBA),
        (RGBa, DXT5) => (COMPRESSED_RGBA_S3TC_DXT5, glow::RGBA),
        (RGBa, DXT1_SRGB) => (COMPRESSED_SRGB_ALPHA_S3TC_DXT1, glow::RGBA),
        (RGBa, DXT3_SRGB) => (COMPRESSED_SRGB_ALPHA_S3TC_DXT3, glow::RGBA),
        (RGBa, DXT5_SRGB) => (COMPRESSED_SRGB_ALPHA_S3TC_DXT5, glow::RGBA),
        (RGBa, BPTC_UNORM) => (glow::COMPRESSED_RGBA_BPTC_UNORM, glow::RGBA),
        (RGBa, BPTC_UNORM_SRGB) => (glow::COMPRESSED_SRGB_ALPHA_BPTC_UNORM, glow::RGBA),

        (RGB, DXT1) => (COMPRESSED_RGB_S3TC_DXT1, glow::RGBA),
        (RGB, DXT1_SRGB) => (COMPRESSED_SRGB_S3TC_DXT1, glow::RGBA),
        (RGB, BPTC_FLOAT) => (glow::COMPRESSED_RGB_BPTC_SIGNED_FLOAT, glow::RGBA),
        (RGB, BPTC_UFLOAT) => (COMPRESSED_RGB_BPTC_UNSIGNED_FLOAT, glow::RGBA),

        _ => return Err(Error::UnsupportedFormat { format, ty }),
    };

    Ok(NativeFormat {
        internal_format,
        format: native_format,
        ty: ty.native().unwrap_or(0),
    })
}

/// Colour space of a [`ColorRGBa`] value.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Linearity {
    Linear,
    Srgb,
}

/// A colour with its colour space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorRGBa {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
    pub linearity: Linearity,
}

impl ColorRGBa {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    pub const RED: Self = Self::new(1.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    /// A colour in sRGB space.
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        ColorRGBa {
            r,
            g,
            b,
            a,
            linearity: Linearity::Srgb,
        }
    }

    /// A colour in linear space.
    pub const fn linear(r: f32, g: f32, b: f32, a: f32) -> Self {
        ColorRGBa {
            r,
            g,
            b,
            a,
            linearity: Linearity::Linear,
        }
    }

    pub fn to_linear(self) -> Self {
        match self.linearity {
            Linearity::Linear => self,
            Linearity::Srgb => ColorRGBa::linear(
                srgb_to_linear(self.r),
                srgb_to_linear(self.g),
                srgb_to_linear(self.b),
                self.a,
            ),
        }
    }

    pub fn to_srgb(self) -> Self {
        match self.linearity {
            Linearity::Srgb => self,
            Linearity::Linear => ColorRGBa::new(
                linear_to_srgb(self.r),
                linear_to_srgb(self.g),
                linear_to_srgb(self.b),
                self.a,
            ),
        }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl fmt::Display for ColorRGBa {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "rgba({}, {}, {}, {}, {:?})",
            self.r, self.g, self.b, self.a, self.linearity
        )
    }
}

pub fn srgb_to_linear(x: f32) -> f32 {
    if x <= 0.04045 {
        x / 12.92
    } else {
        ((x + 0.055) / 1.055).powf(2.4)
    }
}

pub fn linear_to_srgb(x: f32) -> f32 {
    if x <= 0.003_130_8 {
        12.92 * x
    } else {
        1.055 * x.powf(1.0 / 2.4) - 0.055
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const FORMATS: [ColorFormat; 6] = [
        ColorFormat::R,
        ColorFormat::RG,
        ColorFormat::RGB,
        ColorFormat::BGR,
        ColorFormat::RGBa,
        ColorFormat::BGRa,
    ];

    #[test]
    fn table_entries() {
        let rgba8 = internal_format(ColorFormat::RGBa, ColorType::UINT8).unwrap();
        assert_eq!(rgba8.internal_format, glow::RGBA8);
        assert_eq!(rgba8.format, glow::RGBA);
        assert_eq!(rgba8.ty, glow::UNSIGNED_BYTE);

        let r32ui = internal_format(ColorFormat::R, ColorType::UINT32_INT).unwrap();
        assert_eq!(r32ui.format, glow::RED_INTEGER);

        let dxt5 = internal_format(ColorFormat::RGBa, ColorType::DXT5).unwrap();
        assert_eq!(dxt5.internal_format, COMPRESSED_RGBA_S3TC_DXT5);
        assert_eq!(dxt5.ty, 0);
    }

    #[test]
    fn missing_entries_name_both_values() {
        let err = internal_format(ColorFormat::BGRa, ColorType::FLOAT32).unwrap_err();
        assert_eq!(err.to_string(), "no conversion entry for BGRa/FLOAT32");

        assert!(internal_format(ColorFormat::RG, ColorType::SINT8_INT).is_err());
        assert!(internal_format(ColorFormat::R, ColorType::UINT8_SRGB).is_err());
    }

    #[test]
    fn resolved_types_match_component_sizes() {
        for &format in &FORMATS {
            for &ty in &[
                ColorType::UINT8,
                ColorType::UINT16,
                ColorType::FLOAT16,
                ColorType::FLOAT32,
            ] {
                if let Ok(native) = internal_format(format, ty) {
                    assert_eq!(Some(native.ty), ty.native());
                }
            }
        }
    }

    #[test]
    fn byte_sizes() {
        let rgba8 = PixelFormat::Color(ColorFormat::RGBa, ColorType::UINT8);
        assert_eq!(rgba8.byte_size(4, 4, 1), 64);

        let rgb32f = PixelFormat::Color(ColorFormat::RGB, ColorType::FLOAT32);
        assert_eq!(rgb32f.byte_size(3, 2, 1), 72);

        let dxt1 = PixelFormat::Color(ColorFormat::RGBa, ColorType::DXT1);
        assert_eq!(dxt1.byte_size(5, 4, 1), 16);

        let depth = PixelFormat::Depth(DepthFormat::Depth24Stencil8);
        assert_eq!(depth.byte_size(2, 2, 1), 16);
    }

    #[test]
    fn srgb_conversion() {
        let grey = ColorRGBa::new(0.5, 0.5, 0.5, 1.0).to_linear();
        assert_relative_eq!(grey.r, 0.214_041, epsilon = 1e-5);
        assert_eq!(grey.linearity, Linearity::Linear);

        let back = grey.to_srgb();
        assert_relative_eq!(back.r, 0.5, epsilon = 1e-5);

        let red = ColorRGBa::RED.to_linear();
        assert_eq!(red.to_array(), [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn multisample_capping() {
        assert_eq!(
            BufferMultisample::SampleCount(16).capped(4),
            BufferMultisample::SampleCount(4)
        );
        assert_eq!(
            BufferMultisample::SampleCount(0).capped(4),
            BufferMultisample::Disabled
        );
        assert!(!BufferMultisample::Disabled.is_multisampled());
    }
}
