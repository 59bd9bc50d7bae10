//! Index buffers.

use std::rc::Rc;

use crate::backend::BufferKind;
use crate::buffer::BufferCore;
use crate::context::GraphicsContext;
use crate::error::Result;
use crate::vertex_format::IndexType;

/// A buffer of 16 or 32 bit vertex indices.
#[derive(Clone)]
pub struct IndexBuffer(Rc<IndexBufferInner>);

struct IndexBufferInner {
    core: Rc<BufferCore>,
    ty: IndexType,
    index_count: usize,
}

buffer_common!(IndexBuffer, "IndexBuffer");

impl IndexBuffer {
    pub(crate) fn new(context: &GraphicsContext, ty: IndexType, index_count: usize) -> Result<Self> {
        let core = BufferCore::create(
            context,
            BufferKind::Index,
            "index buffer",
            ty.size_in_bytes() as usize,
            index_count,
        )?;

        Ok(IndexBuffer(Rc::new(IndexBufferInner {
            core,
            ty,
            index_count,
        })))
    }

    pub fn index_type(&self) -> IndexType {
        self.0.ty
    }

    pub fn index_count(&self) -> usize {
        self.0.index_count
    }
}
