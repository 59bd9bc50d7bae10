//! Texel encoding of the soft device.
//!
//! Texels decode to four `f64` channels: normalized types in `0..=1`, integer types as raw
//! values, depth formats as `[depth, stencil, 0, 1]`. sRGB types decode to their stored
//! (non-linear) value.

use half::f16;

use crate::error::{Error, Result};
use crate::format::{ColorFormat, ColorType, DepthFormat, PixelFormat};

pub(super) type Texel = [f64; 4];

/// Bytes per texel; `None` for block-compressed formats.
pub(super) fn texel_size(format: PixelFormat) -> Option<usize> {
    match format {
        PixelFormat::Color(layout, ty) => ty.component_size().map(|s| s * layout.component_count()),
        PixelFormat::Depth(depth) => Some(depth.texel_size()),
    }
}

pub(super) fn decode(format: PixelFormat, bytes: &[u8]) -> Texel {
    match format {
        PixelFormat::Color(layout, ty) => decode_color(layout, ty, bytes),
        PixelFormat::Depth(depth) => decode_depth(depth, bytes),
    }
}

pub(super) fn encode(format: PixelFormat, texel: Texel, out: &mut [u8]) {
    match format {
        PixelFormat::Color(layout, ty) => encode_color(layout, ty, texel, out),
        PixelFormat::Depth(depth) => encode_depth(depth, texel, out),
    }
}

/// Copy one texel between formats.
pub(super) fn convert(from: PixelFormat, src: &[u8], to: PixelFormat, dst: &mut [u8]) {
    if from == to {
        dst.copy_from_slice(src);
    } else {
        encode(to, decode(from, src), dst);
    }
}

/// Formats that can be converted into each other texel by texel.
pub(super) fn check_convertible(from: PixelFormat, to: PixelFormat) -> Result<()> {
    let convertible = match (from, to) {
        _ if from == to => true,
        (PixelFormat::Color(_, a), PixelFormat::Color(_, b)) => {
            !a.is_compressed() && !b.is_compressed()
        }
        (PixelFormat::Depth(_), PixelFormat::Depth(_)) => true,
        _ => false,
    };

    if convertible {
        Ok(())
    } else {
        Err(Error::Backend(format!(
            "soft device cannot convert {:?} texels to {:?}",
            from, to
        )))
    }
}

fn channel_order(layout: ColorFormat) -> [usize; 4] {
    match layout {
        ColorFormat::BGR | ColorFormat::BGRa => [2, 1, 0, 3],
        _ => [0, 1, 2, 3],
    }
}

fn decode_color(layout: ColorFormat, ty: ColorType, bytes: &[u8]) -> Texel {
    let mut texel = [0.0, 0.0, 0.0, 1.0];
    let size = ty.component_size().unwrap_or(1);
    let order = channel_order(layout);

    for c in 0..layout.component_count() {
        let raw = &bytes[c * size..(c + 1) * size];
        texel[order[c]] = decode_component(ty, raw);
    }

    texel
}

fn encode_color(layout: ColorFormat, ty: ColorType, texel: Texel, out: &mut [u8]) {
    let size = ty.component_size().unwrap_or(1);
    let order = channel_order(layout);

    for c in 0..layout.component_count() {
        encode_component(ty, texel[order[c]], &mut out[c * size..(c + 1) * size]);
    }
}

fn decode_component(ty: ColorType, raw: &[u8]) -> f64 {
    match ty {
        ColorType::UINT8 | ColorType::UINT8_SRGB => raw[0] as f64 / 255.0,
        ColorType::UINT8_INT => raw[0] as f64,
        ColorType::SINT8_INT => raw[0] as i8 as f64,
        ColorType::UINT16 => u16::from_le_bytes([raw[0], raw[1]]) as f64 / 65535.0,
        ColorType::UINT16_INT => u16::from_le_bytes([raw[0], raw[1]]) as f64,
        ColorType::SINT16_INT => i16::from_le_bytes([raw[0], raw[1]]) as f64,
        ColorType::UINT32_INT => u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
        ColorType::SINT32_INT => i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
        ColorType::FLOAT16 => f16::from_le_bytes([raw[0], raw[1]]).to_f64(),
        ColorType::FLOAT32 => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
        _ => 0.0,
    }
}

fn encode_component(ty: ColorType, value: f64, out: &mut [u8]) {
    match ty {
        ColorType::UINT8 | ColorType::UINT8_SRGB => out[0] = unorm(value, 255.0) as u8,
        ColorType::UINT8_INT => out[0] = value.round().clamp(0.0, 255.0) as u8,
        ColorType::SINT8_INT => out[0] = value.round().clamp(-128.0, 127.0) as i8 as u8,
        ColorType::UINT16 => out.copy_from_slice(&(unorm(value, 65535.0) as u16).to_le_bytes()),
        ColorType::UINT16_INT => {
            out.copy_from_slice(&(value.round().clamp(0.0, 65535.0) as u16).to_le_bytes())
        }
        ColorType::SINT16_INT => out.copy_from_slice(
            &(value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16).to_le_bytes(),
        ),
        ColorType::UINT32_INT => out.copy_from_slice(
            &(value.round().clamp(0.0, u32::MAX as f64) as u32).to_le_bytes(),
        ),
        ColorType::SINT32_INT => out.copy_from_slice(
            &(value.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32).to_le_bytes(),
        ),
        ColorType::FLOAT16 => out.copy_from_slice(&f16::from_f64(value).to_le_bytes()),
        ColorType::FLOAT32 => out.copy_from_slice(&(value as f32).to_le_bytes()),
        _ => (),
    }
}

fn unorm(value: f64, max: f64) -> f64 {
    (value.clamp(0.0, 1.0) * max).round()
}

fn decode_depth(format: DepthFormat, raw: &[u8]) -> Texel {
    let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);

    let (depth, stencil) = match format {
        DepthFormat::Depth16 => (u16::from_le_bytes([raw[0], raw[1]]) as f64 / 65535.0, 0.0),
        DepthFormat::Depth24 => (word(0) as f64 / u32::MAX as f64, 0.0),
        DepthFormat::Depth32F => (f32::from_bits(word(0)) as f64, 0.0),
        DepthFormat::Depth24Stencil8 | DepthFormat::DepthStencil => {
            let packed = word(0);
            ((packed >> 8) as f64 / 16_777_215.0, (packed & 0xff) as f64)
        }
        DepthFormat::Depth32FStencil8 => (f32::from_bits(word(0)) as f64, (word(4) & 0xff) as f64),
        DepthFormat::Stencil8 => (0.0, raw[0] as f64),
    };

    [depth, stencil, 0.0, 1.0]
}

fn encode_depth(format: DepthFormat, texel: Texel, out: &mut [u8]) {
    let depth = texel[0].clamp(0.0, 1.0);
    let stencil = texel[1].round().clamp(0.0, 255.0) as u32;

    match format {
        DepthFormat::Depth16 => out.copy_from_slice(&((depth * 65535.0).round() as u16).to_le_bytes()),
        DepthFormat::Depth24 => {
            out.copy_from_slice(&((depth * u32::MAX as f64).round() as u32).to_le_bytes())
        }
        DepthFormat::Depth32F => out.copy_from_slice(&(depth as f32).to_le_bytes()),
        DepthFormat::Depth24Stencil8 | DepthFormat::DepthStencil => {
            let packed = (((depth * 16_777_215.0).round() as u32) << 8) | stencil;
            out.copy_from_slice(&packed.to_le_bytes());
        }
        DepthFormat::Depth32FStencil8 => {
            out[..4].copy_from_slice(&(depth as f32).to_le_bytes());
            out[4..8].copy_from_slice(&stencil.to_le_bytes());
        }
        DepthFormat::Stencil8 => out[0] = stencil as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swizzled_layouts() {
        let bgra = PixelFormat::Color(ColorFormat::BGRa, ColorType::UINT8);
        let rgba = PixelFormat::Color(ColorFormat::RGBa, ColorType::UINT8);

        let mut out = [0; 4];
        convert(bgra, &[0, 128, 255, 255], rgba, &mut out);
        assert_eq!(out, [255, 128, 0, 255]);
    }

    #[test]
    fn missing_channels() {
        let r = PixelFormat::Color(ColorFormat::R, ColorType::FLOAT32);
        let texel = decode(r, &0.25f32.to_le_bytes());
        assert_eq!(texel, [0.25, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn packed_depth_stencil() {
        let format = PixelFormat::Depth(DepthFormat::Depth24Stencil8);
        let mut out = [0; 4];
        encode(format, [1.0, 7.0, 0.0, 1.0], &mut out);
        assert_eq!(decode(format, &out), [1.0, 7.0, 0.0, 1.0]);
    }
}
