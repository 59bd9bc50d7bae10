//! Vertex buffers.

use std::rc::Rc;

use crate::backend::BufferKind;
use crate::buffer::BufferCore;
use crate::context::GraphicsContext;
use crate::error::Result;
use crate::vertex_format::VertexFormat;

/// A buffer of vertices (or instances) laid out as a [`VertexFormat`].
#[derive(Clone)]
pub struct VertexBuffer(Rc<VertexBufferInner>);

struct VertexBufferInner {
    core: Rc<BufferCore>,
    format: VertexFormat,
    vertex_count: usize,
}

buffer_common!(VertexBuffer, "VertexBuffer");

impl VertexBuffer {
    pub(crate) fn new(
        context: &GraphicsContext,
        format: &VertexFormat,
        vertex_count: usize,
    ) -> Result<Self> {
        let core = BufferCore::create(
            context,
            BufferKind::Vertex,
            "vertex buffer",
            format.size() as usize,
            vertex_count,
        )?;

        Ok(VertexBuffer(Rc::new(VertexBufferInner {
            core,
            format: format.clone(),
            vertex_count,
        })))
    }

    pub fn vertex_format(&self) -> &VertexFormat {
        &self.0.format
    }

    pub fn vertex_count(&self) -> usize {
        self.0.vertex_count
    }
}
