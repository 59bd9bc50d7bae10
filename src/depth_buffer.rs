//! Depth and stencil textures.

use std::rc::Rc;

use crate::backend::TextureKind;
use crate::context::GraphicsContext;
use crate::error::Result;
use crate::format::{BufferMultisample, DepthFormat, PixelFormat};
use crate::texture::{IntRectangle, TextureCore, TextureSpec};

/// Parameters of a new [`DepthBuffer`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthBufferDescriptor {
    pub width: u32,
    pub height: u32,
    pub content_scale: f64,
    pub format: DepthFormat,
    pub multisample: BufferMultisample,
}

impl DepthBufferDescriptor {
    /// A 24-bit depth, 8-bit stencil buffer without multisampling.
    pub fn new(width: u32, height: u32) -> Self {
        DepthBufferDescriptor {
            width,
            height,
            content_scale: 1.0,
            format: DepthFormat::Depth24Stencil8,
            multisample: BufferMultisample::Disabled,
        }
    }
}

/// A depth, stencil or depth-stencil texture.
#[derive(Clone)]
pub struct DepthBuffer(Rc<DepthBufferInner>);

struct DepthBufferInner {
    core: TextureCore,
    format: DepthFormat,
}

texture_common!(DepthBuffer, "DepthBuffer");

impl DepthBuffer {
    pub(crate) fn new(context: &GraphicsContext, desc: &DepthBufferDescriptor) -> Result<Self> {
        let core = TextureCore::create(
            context,
            TextureSpec {
                kind: TextureKind::Texture2D,
                name: "depth buffer",
                width: desc.width,
                height: desc.height,
                depth: 1,
                content_scale: desc.content_scale,
                format: PixelFormat::Depth(desc.format),
                multisample: desc.multisample,
                levels: 1,
            },
        )?;

        Ok(DepthBuffer(Rc::new(DepthBufferInner {
            core,
            format: desc.format,
        })))
    }

    pub(crate) fn core(&self) -> &TextureCore {
        &self.0.core
    }

    pub fn format(&self) -> DepthFormat {
        self.0.format
    }

    pub fn has_depth(&self) -> bool {
        self.0.format.has_depth()
    }

    pub fn has_stencil(&self) -> bool {
        self.0.format.has_stencil()
    }

    /// Copy into `target`, resolving multisampled contents.
    ///
    /// Both buffers must have the same format and size.
    pub fn copy_to(&self, target: &DepthBuffer) -> Result<()> {
        let rect = IntRectangle::new(
            0,
            0,
            self.effective_width() as i32,
            self.effective_height() as i32,
        );
        let target_rect = IntRectangle::new(
            0,
            0,
            target.effective_width() as i32,
            target.effective_height() as i32,
        );

        self.0.core.copy_to(
            0,
            target.core(),
            0,
            0,
            0,
            rect,
            target_rect,
            luminance::texture::MagFilter::Nearest,
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
    fn depth_buffers_copy_between_equal_formats_only() {
        let ctx = GraphicsContext::new(
            Box::new(SoftBackend::new(4, 4)),
            DriverConfiguration::default(),
        )
        .unwrap();

        let a = DepthBuffer::new(&ctx, &DepthBufferDescriptor::new(4, 4)).unwrap();
        let b = DepthBuffer::new(&ctx, &DepthBufferDescriptor::new(4, 4)).unwrap();
        let c = DepthBuffer::new(
            &ctx,
            &DepthBufferDescriptor {
                format: DepthFormat::Depth32F,
                ..DepthBufferDescriptor::new(4, 4)
            },
        )
        .unwrap();

        assert!(a.has_stencil());
        a.copy_to(&b).unwrap();
        assert!(matches!(a.copy_to(&c), Err(Error::Usage(_))));
    }
}
