//! The graphics context.
//!
//! A [`GraphicsContext`] owns the device and every piece of per-context bookkeeping: the
//! capability set, the draw-state cache, the render-target bind stack, the session stack and the
//! vertex array cache. It is reference counted and not thread safe; every resource keeps a handle
//! to the context it was created in.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{Backend, BufferId, Capability, DeviceState, ProgramId, VertexArrayId};
use crate::capabilities::Capabilities;
use crate::config::DriverConfiguration;
use crate::copy::CopyProgram;
use crate::draw_style::AppliedStyle;
use crate::error::{Error, Result};
use crate::render_target::RenderTarget;
use crate::session::{ResourceId, Session};
use crate::vao::VaoCache;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a context.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ContextId(u64);

/// Size of the window back-buffer, as reported by the windowing collaborator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowMetrics {
    /// Width in logical pixels.
    pub width: u32,
    /// Height in logical pixels.
    pub height: u32,
    /// Device pixels per logical pixel.
    pub content_scale: f64,
}

/// Handle to a graphics context.
#[derive(Clone)]
pub struct GraphicsContext(pub(crate) Rc<ContextInner>);

pub(crate) struct ContextInner {
    id: ContextId,
    caps: Capabilities,
    config: DriverConfiguration,
    backend: RefCell<Box<dyn Backend>>,
    pub(crate) applied_style: RefCell<Option<AppliedStyle>>,
    pub(crate) bind_stack: RefCell<Vec<RenderTarget>>,
    program_target: RefCell<Option<RenderTarget>>,
    pub(crate) sessions: RefCell<Vec<Session>>,
    vaos: RefCell<VaoCache>,
    pub(crate) copy_program: RefCell<Option<CopyProgram>>,
    window: Cell<WindowMetrics>,
    next_resource: Cell<u64>,
    destroyed: Cell<bool>,
}

impl fmt::Debug for GraphicsContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("GraphicsContext")
            .field("id", &self.0.id)
            .field("version", &self.0.caps.version)
            .field("window", &self.0.window.get())
            .field("bound_targets", &self.0.bind_stack.borrow().len())
            .field("destroyed", &self.0.destroyed.get())
            .finish()
    }
}

impl GraphicsContext {
    /// Take ownership of a device and probe its capabilities.
    ///
    /// The window metrics start out as the device viewport with a content scale of 1.
    pub fn new(mut backend: Box<dyn Backend>, config: DriverConfiguration) -> Result<Self> {
        let caps = Capabilities::probe(backend.as_mut(), &config)?;
        let viewport = backend.device_state()?.viewport;

        // sRGB attachments are written with conversion; point sizes come from the shader
        backend.set_capability(Capability::FramebufferSrgb, true);
        backend.set_capability(Capability::ProgramPointSize, true);

        let window = WindowMetrics {
            width: viewport[2].max(0) as u32,
            height: viewport[3].max(0) as u32,
            content_scale: 1.0,
        };

        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        log::debug!("created context {:?} for {}", id, caps.version);

        let context = GraphicsContext(Rc::new(ContextInner {
            id,
            caps,
            config,
            backend: RefCell::new(backend),
            applied_style: RefCell::new(None),
            bind_stack: RefCell::new(Vec::new()),
            program_target: RefCell::new(None),
            sessions: RefCell::new(Vec::new()),
            vaos: RefCell::new(VaoCache::default()),
            copy_program: RefCell::new(None),
            window: Cell::new(window),
            next_resource: Cell::new(1),
            destroyed: Cell::new(false),
        }));

        let root = Session::root_of(&context);
        context.0.sessions.borrow_mut().push(root);
        let program_target = RenderTarget::program(&context);
        context.0.program_target.replace(Some(program_target));

        Ok(context)
    }

    pub fn id(&self) -> ContextId {
        self.0.id
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.0.caps
    }

    pub fn configuration(&self) -> &DriverConfiguration {
        &self.0.config
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(Error::Destroyed("graphics context"))
        } else {
            Ok(())
        }
    }

    pub(crate) fn ptr_eq(&self, other: &GraphicsContext) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Direct access to the device.
    ///
    /// # Panics
    ///
    /// Panics if the device is already borrowed.
    pub fn backend(&self) -> RefMut<'_, Box<dyn Backend>> {
        self.0.backend.borrow_mut()
    }

    /// Run `f` on the device; debug contexts check the device error flag afterwards.
    pub(crate) fn with_backend<T, F>(&self, call: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Backend) -> Result<T>,
    {
        let mut backend = self.0.backend.borrow_mut();
        let value = f(backend.as_mut())?;

        if self.0.config.debug {
            if let Some(code) = backend.check_error() {
                log::error!("device error 0x{:04x} after {}", code, call);
                return Err(Error::Device { call, code });
            }
        }

        Ok(value)
    }

    /// The net fixed-function state of the device.
    pub fn device_state(&self) -> Result<DeviceState> {
        self.0.backend.borrow_mut().device_state()
    }

    /// Forget the last applied draw style; the next `set_state` applies everything.
    pub fn mark_dirty(&self) {
        self.0.applied_style.replace(None);
    }

    pub(crate) fn next_resource_id(&self) -> ResourceId {
        let id = self.0.next_resource.get();
        self.0.next_resource.set(id + 1);
        ResourceId(id)
    }

    pub fn window_metrics(&self) -> WindowMetrics {
        self.0.window.get()
    }

    /// Report a new window size; the program render target follows it.
    pub fn set_window_metrics(&self, metrics: WindowMetrics) {
        log::debug!("window metrics changed to {:?}", metrics);
        self.0.window.set(metrics);

        // the viewport of the program target is stale if it is the active one
        if self.0.bind_stack.borrow().is_empty() {
            let (w, h) = effective_size(metrics.width, metrics.height, metrics.content_scale);
            self.backend().viewport(0, 0, w as i32, h as i32);
            self.mark_dirty();
        }
    }

    /// The session new resources are registered with by default.
    pub fn active_session(&self) -> Result<Session> {
        self.0
            .sessions
            .borrow()
            .last()
            .cloned()
            .ok_or(Error::Destroyed("graphics context"))
    }

    /// The session living as long as the context.
    pub fn root_session(&self) -> Result<Session> {
        self.0
            .sessions
            .borrow()
            .first()
            .cloned()
            .ok_or(Error::Destroyed("graphics context"))
    }

    /// The render target on top of the bind stack, or the program render target.
    pub fn active_render_target(&self) -> Result<RenderTarget> {
        if let Some(top) = self.0.bind_stack.borrow().last() {
            return Ok(top.clone());
        }

        self.program_render_target()
    }

    /// The render target wrapping the window back-buffer.
    pub fn program_render_target(&self) -> Result<RenderTarget> {
        self.0
            .program_target
            .borrow()
            .clone()
            .ok_or(Error::Destroyed("graphics context"))
    }

    /// Number of vertex arrays in the cache.
    pub fn cached_vertex_arrays(&self) -> usize {
        self.vaos().len()
    }

    pub(crate) fn vaos(&self) -> Ref<'_, VaoCache> {
        self.0.vaos.borrow()
    }

    pub(crate) fn vaos_mut(&self) -> RefMut<'_, VaoCache> {
        self.0.vaos.borrow_mut()
    }

    fn delete_vertex_arrays(&self, vertex_arrays: Vec<VertexArrayId>) {
        if vertex_arrays.is_empty() {
            return;
        }

        log::debug!("deleting {} cached vertex arrays", vertex_arrays.len());
        let mut backend = self.backend();
        for vao in vertex_arrays {
            backend.delete_vertex_array(vao);
        }
    }

    /// Drop every cached vertex array that reads from `buffer`.
    pub(crate) fn evict_buffer(&self, buffer: BufferId) {
        let evicted = self.vaos_mut().evict_buffer(buffer);
        self.delete_vertex_arrays(evicted);
    }

    /// Drop every cached vertex array built for `program`.
    pub(crate) fn evict_program(&self, program: ProgramId) {
        let evicted = self.vaos_mut().evict_program(program);
        self.delete_vertex_arrays(evicted);
    }

    /// End the root session, delete every cached vertex array and release internal objects.
    ///
    /// The context is unusable afterwards.
    pub fn destroy(&self) -> Result<()> {
        if self.0.destroyed.get() {
            return Ok(());
        }

        log::debug!("destroying context {:?}", self.0.id);

        let bound: Vec<RenderTarget> = self.0.bind_stack.borrow_mut().drain(..).collect();
        drop(bound);

        let root = self.root_session();
        let result = match root {
            Ok(root) => root.finish(),
            Err(_) => Ok(()),
        };

        if let Some(copy) = self.0.copy_program.borrow_mut().take() {
            copy.destroy(self);
        }

        let vaos = self.vaos_mut().clear();
        self.delete_vertex_arrays(vaos);

        self.0.sessions.borrow_mut().clear();
        self.0.program_target.replace(None);
        self.0.applied_style.replace(None);
        self.0.destroyed.set(true);

        result
    }
}

/// Device pixel size of a logical size.
pub(crate) fn effective_size(width: u32, height: u32, content_scale: f64) -> (u32, u32) {
    (
        (width as f64 * content_scale) as u32,
        (height as f64 * content_scale) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftBackend;

    fn context() -> GraphicsContext {
        GraphicsContext::new(
            Box::new(SoftBackend::new(64, 32)),
            DriverConfiguration::default(),
        )
        .unwrap()
    }

    #[test]
    fn window_metrics_follow_the_viewport() {
        let ctx = context();
        let metrics = ctx.window_metrics();

        assert_eq!((metrics.width, metrics.height), (64, 32));
        assert_eq!(metrics.content_scale, 1.0);
    }

    #[test]
    fn contexts_have_distinct_ids() {
        assert_ne!(context().id(), context().id());
    }

    #[test]
    fn destroyed_context_has_no_sessions() {
        let ctx = context();
        ctx.destroy().unwrap();

        assert!(ctx.is_destroyed());
        assert!(ctx.active_session().is_err());
        assert!(ctx.program_render_target().is_err());
        // a second destroy is a no-op
        ctx.destroy().unwrap();
    }
}
