//! Host-side mirror of a colour buffer.
//!
//! A [`ColorBufferShadow`] holds the texels of level 0 in the buffer's own format. Pixels are
//! addressed with y pointing down unless the owner is flipped, matching how images are usually
//! authored on the host.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use half::f16;

use crate::color_buffer::{ColorBuffer, ColorBufferInner};
use crate::error::{Error, Result};
use crate::format::{ColorFormat, ColorRGBa, ColorType};

/// Host copy of level 0 of a [`ColorBuffer`].
#[derive(Clone)]
pub struct ColorBufferShadow(Rc<ShadowInner>);

struct ShadowInner {
    owner: Weak<ColorBufferInner>,
    format: ColorFormat,
    ty: ColorType,
    width: u32,
    height: u32,
    data: RefCell<Vec<u8>>,
    valid: Cell<bool>,
}

impl fmt::Debug for ColorBufferShadow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ColorBufferShadow")
            .field("format", &self.0.format)
            .field("ty", &self.0.ty)
            .field("width", &self.0.width)
            .field("height", &self.0.height)
            .field("valid", &self.0.valid.get())
            .finish()
    }
}

fn element_size(format: ColorFormat, ty: ColorType) -> Result<usize> {
    match ty {
        ColorType::UINT8 | ColorType::UINT16 | ColorType::FLOAT16 | ColorType::FLOAT32 => {
            Ok(format.component_count() * ty.component_size().unwrap_or(0))
        }
        other => Err(Error::usage(format!(
            "shadows of {:?} color buffers are not supported",
            other
        ))),
    }
}

fn channel_order(format: ColorFormat) -> [usize; 4] {
    match format {
        ColorFormat::BGR | ColorFormat::BGRa => [2, 1, 0, 3],
        _ => [0, 1, 2, 3],
    }
}

impl ColorBufferShadow {
    pub(crate) fn new(owner: &ColorBuffer) -> Result<Self> {
        let (format, ty) = (owner.format(), owner.ty());
        let size = element_size(format, ty)?;
        let (width, height) = (owner.effective_width(), owner.effective_height());

        Ok(ColorBufferShadow(Rc::new(ShadowInner {
            owner: Rc::downgrade(&owner.0),
            format,
            ty,
            width,
            height,
            data: RefCell::new(vec![0; width as usize * height as usize * size]),
            valid: Cell::new(true),
        })))
    }

    pub(crate) fn invalidate(&self) {
        self.0.valid.set(false);
    }

    fn owner(&self) -> Result<ColorBuffer> {
        let owner = self
            .0
            .owner
            .upgrade()
            .filter(|_| self.0.valid.get())
            .ok_or(Error::Destroyed("color buffer shadow"))?;
        Ok(ColorBuffer(owner))
    }

    pub fn width(&self) -> u32 {
        self.0.width
    }

    pub fn height(&self) -> u32 {
        self.0.height
    }

    /// Refresh the mirror from the device.
    pub fn download(&self) -> Result<()> {
        let owner = self.owner()?;
        let mut data = self.0.data.borrow_mut();
        owner.read(&mut data, self.0.format, self.0.ty, 0)
    }

    /// Write the mirror back to the device.
    pub fn upload(&self) -> Result<()> {
        let owner = self.owner()?;
        let data = self.0.data.borrow();
        owner.write(&data, self.0.format, self.0.ty, 0)
    }

    fn offset(&self, owner: &ColorBuffer, x: u32, y: u32) -> Result<usize> {
        if x >= self.0.width || y >= self.0.height {
            return Err(Error::usage(format!(
                "pixel ({}, {}) outside of {}x{} shadow",
                x, y, self.0.width, self.0.height
            )));
        }

        let row = if owner.flip_v() {
            y
        } else {
            self.0.height - 1 - y
        };
        let size = element_size(self.0.format, self.0.ty)?;
        Ok((row as usize * self.0.width as usize + x as usize) * size)
    }

    /// Read one pixel; missing channels read 0 and a missing alpha reads 1.
    pub fn read(&self, x: u32, y: u32) -> Result<ColorRGBa> {
        let owner = self.owner()?;
        let offset = self.offset(&owner, x, y)?;
        let data = self.0.data.borrow();

        let mut channels = [0.0, 0.0, 0.0, 1.0];
        let component = self.0.ty.component_size().unwrap_or(1);
        let order = channel_order(self.0.format);

        for c in 0..self.0.format.component_count() {
            let start = offset + c * component;
            channels[order[c]] = decode(self.0.ty, &data[start..start + component]);
        }

        Ok(ColorRGBa::new(channels[0], channels[1], channels[2], channels[3]))
    }

    /// Write one pixel; values are stored as given, clamped for normalized types.
    pub fn write(&self, x: u32, y: u32, color: ColorRGBa) -> Result<()> {
        let owner = self.owner()?;
        let offset = self.offset(&owner, x, y)?;
        let mut data = self.0.data.borrow_mut();

        let channels = color.to_array();
        let component = self.0.ty.component_size().unwrap_or(1);
        let order = channel_order(self.0.format);

        for c in 0..self.0.format.component_count() {
            let start = offset + c * component;
            encode(
                self.0.ty,
                channels[order[c]],
                &mut data[start..start + component],
            );
        }

        Ok(())
    }
}

fn decode(ty: ColorType, bytes: &[u8]) -> f32 {
    match ty {
        ColorType::UINT8 => bytes[0] as f32 / 255.0,
        ColorType::UINT16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 65535.0,
        ColorType::FLOAT16 => f16::from_le_bytes([bytes[0], bytes[1]]).to_f32(),
        _ => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

fn encode(ty: ColorType, value: f32, out: &mut [u8]) {
    match ty {
        ColorType::UINT8 => out[0] = (value.max(0.0).min(1.0) * 255.0).round() as u8,
        ColorType::UINT16 => {
            let v = (value.max(0.0).min(1.0) * 65535.0).round() as u16;
            out.copy_from_slice(&v.to_le_bytes());
        }
        ColorType::FLOAT16 => out.copy_from_slice(&f16::from_f32(value).to_le_bytes()),
        _ => out.copy_from_slice(&value.to_le_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftBackend;
    use crate::color_buffer::ColorBufferDescriptor;
    use crate::config::DriverConfiguration;
    use crate::context::GraphicsContext;
    use approx::assert_relative_eq;

    fn color_buffer(format: ColorFormat, ty: ColorType) -> (GraphicsContext, ColorBuffer) {
        let ctx = GraphicsContext::new(
            Box::new(SoftBackend::new(4, 4)),
            DriverConfiguration::default(),
        )
        .unwrap();
        let cb = ColorBuffer::new(
            &ctx,
            &ColorBufferDescriptor {
                format,
                ty,
                ..ColorBufferDescriptor::new(4, 2)
            },
        )
        .unwrap();
        (ctx, cb)
    }

    #[test]
    fn rows_are_flipped_unless_the_owner_is() {
        let (_ctx, cb) = color_buffer(ColorFormat::R, ColorType::UINT8);
        let shadow = cb.shadow().unwrap();

        shadow.write(1, 0, ColorRGBa::WHITE).unwrap();
        // y = 0 is the last stored row
        assert_eq!(shadow.0.data.borrow()[4 + 1], 255);

        cb.set_flip_v(true);
        shadow.write(2, 0, ColorRGBa::WHITE).unwrap();
        assert_eq!(shadow.0.data.borrow()[2], 255);
    }

    #[test]
    fn missing_channels() {
        let (_ctx, cb) = color_buffer(ColorFormat::RG, ColorType::FLOAT16);
        let shadow = cb.shadow().unwrap();

        shadow.write(0, 0, ColorRGBa::new(0.25, 0.5, 0.75, 0.0)).unwrap();
        let c = shadow.read(0, 0).unwrap();

        assert_relative_eq!(c.r, 0.25);
        assert_relative_eq!(c.g, 0.5);
        assert_eq!(c.b, 0.0);
        assert_eq!(c.a, 1.0);
    }

    #[test]
    fn normalized_values_clamp() {
        let (_ctx, cb) = color_buffer(ColorFormat::RGBa, ColorType::UINT16);
        let shadow = cb.shadow().unwrap();

        shadow.write(3, 1, ColorRGBa::new(2.0, -1.0, 0.5, 1.0)).unwrap();
        let c = shadow.read(3, 1).unwrap();

        assert_eq!(c.r, 1.0);
        assert_eq!(c.g, 0.0);
        assert_relative_eq!(c.b, 0.5, epsilon = 1e-4);
    }

    #[test]
    fn out_of_bounds_and_unsupported() {
        let (_ctx, cb) = color_buffer(ColorFormat::RGBa, ColorType::UINT8);
        let shadow = cb.shadow().unwrap();
        assert!(shadow.read(4, 0).is_err());
        assert!(shadow.write(0, 2, ColorRGBa::RED).is_err());

        let (_ctx, cb) = color_buffer(ColorFormat::RGBa, ColorType::UINT8_INT);
        assert!(matches!(cb.shadow(), Err(Error::Usage(_))));
    }

    #[test]
    fn destroying_the_owner_invalidates() {
        let (_ctx, cb) = color_buffer(ColorFormat::RGBa, ColorType::UINT8);
        let shadow = cb.shadow().unwrap();
        cb.destroy().unwrap();

        assert!(matches!(shadow.download(), Err(Error::Destroyed(_))));
        assert!(matches!(shadow.read(0, 0), Err(Error::Destroyed(_))));
    }
}
