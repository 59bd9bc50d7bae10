//! Shader storage buffers.

use std::rc::Rc;

use crate::backend::BufferKind;
use crate::buffer::BufferCore;
use crate::capabilities::Requirement;
use crate::context::GraphicsContext;
use crate::error::{Error, Result};
use crate::vertex_format::VertexFormat;

/// A buffer of `std430` structs bound to a storage block.
#[derive(Clone)]
pub struct ShaderStorageBuffer(Rc<ShaderStorageBufferInner>);

struct ShaderStorageBufferInner {
    core: Rc<BufferCore>,
    format: VertexFormat,
    count: usize,
}

buffer_common!(ShaderStorageBuffer, "ShaderStorageBuffer");

impl ShaderStorageBuffer {
    pub(crate) fn new(context: &GraphicsContext, format: &VertexFormat, count: usize) -> Result<Self> {
        context
            .capabilities()
            .require("shader storage buffers", Requirement::STORAGE_BUFFERS)?;

        if !format.is_in_std430_layout() {
            return Err(Error::usage(format!(
                "shader storage format is not in std430 layout: {}",
                format
            )));
        }

        let core = BufferCore::create(
            context,
            BufferKind::ShaderStorage,
            "shader storage buffer",
            format.size() as usize,
            count,
        )?;

        Ok(ShaderStorageBuffer(Rc::new(ShaderStorageBufferInner {
            core,
            format: format.clone(),
            count,
        })))
    }

    pub fn format(&self) -> &VertexFormat {
        &self.0.format
    }

    /// Number of structs.
    pub fn count(&self) -> usize {
        self.0.count
    }
}
