//! Device buffers and their host mirrors.
//!
//! [`BufferCore`] carries what every buffer kind shares: allocation, range-checked transfers and
//! destruction with vertex array eviction. [`BufferShadow`] is a byte mirror of a whole buffer.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use bytemuck::Pod;

use crate::backend::{BufferId, BufferKind, BufferUsage};
use crate::context::GraphicsContext;
use crate::error::{Error, Result};
use crate::session::Lifetime;

#[derive(Debug)]
pub(crate) struct BufferCore {
    pub context: GraphicsContext,
    pub lifetime: Lifetime,
    pub id: BufferId,
    pub kind: BufferKind,
    pub name: &'static str,
    /// Size in bytes.
    pub size: usize,
    shadow: RefCell<Option<BufferShadow>>,
}

impl BufferCore {
    /// Allocate `element_size × count` bytes, at least one.
    pub fn create(
        context: &GraphicsContext,
        kind: BufferKind,
        name: &'static str,
        element_size: usize,
        count: usize,
    ) -> Result<Rc<Self>> {
        context.check()?;

        let size = (element_size * count).max(1);
        let usage = if context.capabilities().buffer_storage {
            BufferUsage::Storage
        } else {
            BufferUsage::Dynamic
        };

        let id = context.with_backend("create_buffer", |b| b.create_buffer(kind, size, usage))?;
        log::debug!("created {} {:?} of {} bytes ({:?})", name, id, size, usage);

        Ok(Rc::new(BufferCore {
            context: context.clone(),
            lifetime: Lifetime::new(context),
            id,
            kind,
            name,
            size,
            shadow: RefCell::new(None),
        }))
    }

    pub fn check(&self) -> Result<()> {
        self.lifetime.check(self.name)
    }

    fn check_range(&self, operation: &'static str, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(Error::NotEnoughData {
                operation,
                required: offset.saturating_add(len),
                available: self.size,
            }),
        }
    }

    pub fn write(&self, data: &[u8], offset: usize) -> Result<()> {
        self.check()?;
        self.check_range("buffer write", offset, data.len())?;

        let id = self.id;
        self.context
            .with_backend("write_buffer", |b| b.write_buffer(id, offset, data))
    }

    pub fn read(&self, out: &mut [u8], offset: usize) -> Result<()> {
        self.check()?;
        self.check_range("buffer read", offset, out.len())?;

        let id = self.id;
        self.context
            .with_backend("read_buffer", |b| b.read_buffer(id, offset, out))
    }

    pub fn shadow(self: &Rc<Self>) -> Result<BufferShadow> {
        self.check()?;

        if let Some(shadow) = self.shadow.borrow().as_ref() {
            return Ok(shadow.clone());
        }

        let shadow = BufferShadow(Rc::new(ShadowInner {
            owner: Rc::downgrade(self),
            data: RefCell::new(vec![0; self.size]),
        }));
        self.shadow.replace(Some(shadow.clone()));
        Ok(shadow)
    }

    /// Free the buffer and every cached vertex array reading from it.
    pub fn destroy(&self) -> Result<()> {
        if !self.lifetime.begin_destroy() {
            return Ok(());
        }

        self.shadow.replace(None);
        self.context.evict_buffer(self.id);
        self.context.backend().delete_buffer(self.id);
        log::debug!("destroyed {} {:?}", self.name, self.id);
        Ok(())
    }
}

/// Host mirror of a whole buffer.
///
/// Edits stay on the host until [`upload`](BufferShadow::upload) is called.
#[derive(Clone)]
pub struct BufferShadow(Rc<ShadowInner>);

struct ShadowInner {
    owner: Weak<BufferCore>,
    data: RefCell<Vec<u8>>,
}

impl fmt::Debug for BufferShadow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferShadow")
            .field("size", &self.0.data.borrow().len())
            .finish()
    }
}

impl BufferShadow {
    fn owner(&self) -> Result<Rc<BufferCore>> {
        self.0
            .owner
            .upgrade()
            .filter(|owner| !owner.lifetime.is_destroyed())
            .ok_or(Error::Destroyed("buffer shadow"))
    }

    pub fn size(&self) -> usize {
        self.0.data.borrow().len()
    }

    /// Copy the whole mirror to the device.
    pub fn upload(&self) -> Result<()> {
        let owner = self.owner()?;
        owner.write(&self.0.data.borrow(), 0)
    }

    /// Copy `len` bytes starting at `offset` to the device.
    pub fn upload_range(&self, offset: usize, len: usize) -> Result<()> {
        let owner = self.owner()?;
        let data = self.0.data.borrow();
        let range = data.get(offset..offset.saturating_add(len)).ok_or(Error::NotEnoughData {
            operation: "shadow upload",
            required: offset.saturating_add(len),
            available: data.len(),
        })?;
        owner.write(range, offset)
    }

    /// Refresh the mirror from the device.
    pub fn download(&self) -> Result<()> {
        let owner = self.owner()?;
        owner.read(&mut self.0.data.borrow_mut(), 0)
    }

    /// Write `values` at byte `offset` of the mirror.
    pub fn write<T: Pod>(&self, offset: usize, values: &[T]) -> Result<()> {
        self.owner()?;

        let bytes: &[u8] = bytemuck::cast_slice(values);
        let mut data = self.0.data.borrow_mut();
        let available = data.len();
        let target = data
            .get_mut(offset..offset.saturating_add(bytes.len()))
            .ok_or(Error::NotEnoughData {
                operation: "shadow write",
                required: offset.saturating_add(bytes.len()),
                available,
            })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    /// Read `count` values starting at byte `offset` of the mirror.
    pub fn read<T: Pod>(&self, offset: usize, count: usize) -> Result<Vec<T>> {
        self.owner()?;

        let size = std::mem::size_of::<T>();
        let data = self.0.data.borrow();
        let bytes = data
            .get(offset..offset.saturating_add(size * count))
            .ok_or(Error::NotEnoughData {
                operation: "shadow read",
                required: offset.saturating_add(size * count),
                available: data.len(),
            })?;

        Ok(bytes
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}

/// Public surface shared by the buffer kinds wrapping an `Rc<BufferCore>` at field `core`.
macro_rules! buffer_common {
    ($ty:ident, $kind:expr) => {
        impl $ty {
            pub(crate) fn core(&self) -> &crate::buffer::BufferCore {
                &self.0.core
            }

            pub(crate) fn lifetime(&self) -> &crate::session::Lifetime {
                &self.0.core.lifetime
            }

            pub(crate) fn id(&self) -> crate::backend::BufferId {
                self.0.core.id
            }

            pub(crate) fn check(&self) -> crate::error::Result<()> {
                self.0.core.check()
            }

            /// Size in bytes.
            pub fn size(&self) -> usize {
                self.0.core.size
            }

            pub fn is_destroyed(&self) -> bool {
                self.0.core.lifetime.is_destroyed()
            }

            /// Write raw bytes at a byte offset.
            pub fn write(&self, data: &[u8], offset: usize) -> crate::error::Result<()> {
                self.0.core.write(data, offset)
            }

            /// Write typed values at a byte offset.
            pub fn write_elements<T: bytemuck::Pod>(
                &self,
                values: &[T],
                offset: usize,
            ) -> crate::error::Result<()> {
                self.0.core.write(bytemuck::cast_slice(values), offset)
            }

            pub fn read(&self, out: &mut [u8], offset: usize) -> crate::error::Result<()> {
                self.0.core.read(out, offset)
            }

            /// Host mirror of the buffer, created on first use.
            pub fn shadow(&self) -> crate::error::Result<crate::buffer::BufferShadow> {
                self.0.core.shadow()
            }

            /// Free the buffer; destroying twice is a no-op.
            pub fn destroy(&self) -> crate::error::Result<()> {
                self.0.core.destroy()
            }
        }

        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                std::rc::Rc::ptr_eq(&self.0, &other.0)
            }
        }

        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.debug_struct($kind)
                    .field("id", &self.0.core.id)
                    .field("size", &self.0.core.size)
                    .field("destroyed", &self.0.core.lifetime.is_destroyed())
                    .finish()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftBackend;
    use crate::config::DriverConfiguration;

    fn buffer(size: usize) -> (GraphicsContext, Rc<BufferCore>) {
        let ctx = GraphicsContext::new(
            Box::new(SoftBackend::new(1, 1)),
            DriverConfiguration::default(),
        )
        .unwrap();
        let core = BufferCore::create(&ctx, BufferKind::Vertex, "vertex buffer", 1, size).unwrap();
        (ctx, core)
    }

    #[test]
    fn empty_buffers_hold_one_byte() {
        let (_ctx, core) = buffer(0);
        assert_eq!(core.size, 1);
    }

    #[test]
    fn transfers_are_range_checked() {
        let (_ctx, core) = buffer(8);

        core.write(&[1, 2, 3, 4], 4).unwrap();
        assert!(matches!(
            core.write(&[1, 2, 3, 4], 5),
            Err(Error::NotEnoughData {
                required: 9,
                available: 8,
                ..
            })
        ));

        let mut out = [0; 4];
        core.read(&mut out, 4).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn shadow_round_trip() {
        let (_ctx, core) = buffer(16);
        let shadow = core.shadow().unwrap();

        shadow.write(4, &[1.5f32, -2.0]).unwrap();
        shadow.upload_range(4, 8).unwrap();

        let other = core.shadow().unwrap();
        other.download().unwrap();
        assert_eq!(other.read::<f32>(4, 2).unwrap(), vec![1.5, -2.0]);
        assert!(shadow.write(12, &[0u64]).is_err());
    }

    #[test]
    fn shadow_dies_with_its_buffer() {
        let (_ctx, core) = buffer(4);
        let shadow = core.shadow().unwrap();
        core.destroy().unwrap();
        core.destroy().unwrap();

        assert!(matches!(shadow.upload(), Err(Error::Destroyed(_))));
        assert!(matches!(core.write(&[0], 0), Err(Error::Destroyed("vertex buffer"))));
    }
}
