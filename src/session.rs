//! Sessions: scoped ownership of GPU resources.
//!
//! There is no automatic reclamation of device memory. Instead every resource is registered with
//! at most one [`Session`], and ending a session destroys what it still tracks. Sessions nest:
//! [`Session::fork`] creates a child that is ended together with its parent, and a per-context
//! stack ([`Session::push`] / [`Session::pop`]) decides which session receives resources created
//! without an explicit one.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::array_cubemap::ArrayCubemap;
use crate::array_texture::ArrayTexture;
use crate::color_buffer::ColorBuffer;
use crate::context::{ContextInner, GraphicsContext};
use crate::cubemap::Cubemap;
use crate::depth_buffer::DepthBuffer;
use crate::error::{Error, Result};
use crate::index_buffer::IndexBuffer;
use crate::render_target::RenderTarget;
use crate::shader::Shader;
use crate::shader_storage_buffer::ShaderStorageBuffer;
use crate::vertex_buffer::VertexBuffer;
use crate::volume_texture::VolumeTexture;

/// Context-unique identity of a resource.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResourceId(pub(crate) u64);

/// Destroyed flag and session membership of one resource.
#[derive(Debug)]
pub(crate) struct Lifetime {
    id: ResourceId,
    session: RefCell<Weak<SessionInner>>,
    destroyed: Cell<bool>,
}

impl Lifetime {
    pub(crate) fn new(context: &GraphicsContext) -> Self {
        Lifetime {
            id: context.next_resource_id(),
            session: RefCell::new(Weak::new()),
            destroyed: Cell::new(false),
        }
    }

    pub(crate) fn id(&self) -> ResourceId {
        self.id
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Fail with [`Error::Destroyed`] naming `kind` once destroyed.
    pub(crate) fn check(&self, kind: &'static str) -> Result<()> {
        if self.destroyed.get() {
            Err(Error::Destroyed(kind))
        } else {
            Ok(())
        }
    }

    /// Mark as destroyed and leave the owning session.
    ///
    /// Returns `false` if the resource was already destroyed, in which case nothing must be
    /// released.
    pub(crate) fn begin_destroy(&self) -> bool {
        if self.destroyed.replace(true) {
            return false;
        }

        if let Some(session) = self.session.replace(Weak::new()).upgrade() {
            session.remove(self.id);
        }

        true
    }
}

/// Kind of a tracked resource.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ResourceKind {
    ColorBuffer,
    DepthBuffer,
    Cubemap,
    ArrayTexture,
    ArrayCubemap,
    VolumeTexture,
    VertexBuffer,
    IndexBuffer,
    ShaderStorageBuffer,
    Shader,
    RenderTarget,
}

/// Any resource a session can track.
#[derive(Clone, Debug)]
pub enum Resource {
    ColorBuffer(ColorBuffer),
    DepthBuffer(DepthBuffer),
    Cubemap(Cubemap),
    ArrayTexture(ArrayTexture),
    ArrayCubemap(ArrayCubemap),
    VolumeTexture(VolumeTexture),
    VertexBuffer(VertexBuffer),
    IndexBuffer(IndexBuffer),
    ShaderStorageBuffer(ShaderStorageBuffer),
    Shader(Shader),
    RenderTarget(RenderTarget),
}

macro_rules! resource_conversions {
    ($($kind:ident),* $(,)?) => {
        $(
            impl From<$kind> for Resource {
                fn from(resource: $kind) -> Self {
                    Resource::$kind(resource)
                }
            }

            impl<'a> From<&'a $kind> for Resource {
                fn from(resource: &'a $kind) -> Self {
                    Resource::$kind(resource.clone())
                }
            }
        )*

        impl Resource {
            pub fn kind(&self) -> ResourceKind {
                match self {
                    $(Resource::$kind(_) => ResourceKind::$kind,)*
                }
            }

            pub(crate) fn lifetime(&self) -> &Lifetime {
                match self {
                    $(Resource::$kind(r) => r.lifetime(),)*
                }
            }

            /// Destroy the wrapped resource.
            pub fn destroy(&self) -> Result<()> {
                match self {
                    $(Resource::$kind(r) => r.destroy(),)*
                }
            }
        }
    };
}

resource_conversions!(
    ColorBuffer,
    DepthBuffer,
    Cubemap,
    ArrayTexture,
    ArrayCubemap,
    VolumeTexture,
    VertexBuffer,
    IndexBuffer,
    ShaderStorageBuffer,
    Shader,
    RenderTarget,
);

impl Resource {
    pub fn is_destroyed(&self) -> bool {
        self.lifetime().is_destroyed()
    }
}

/// Number of tracked resources per kind.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SessionStatistics {
    pub color_buffers: usize,
    pub depth_buffers: usize,
    pub cubemaps: usize,
    pub array_textures: usize,
    pub array_cubemaps: usize,
    pub volume_textures: usize,
    pub vertex_buffers: usize,
    pub index_buffers: usize,
    pub shader_storage_buffers: usize,
    pub shaders: usize,
    pub render_targets: usize,
}

impl SessionStatistics {
    pub fn total(&self) -> usize {
        self.color_buffers
            + self.depth_buffers
            + self.cubemaps
            + self.array_textures
            + self.array_cubemaps
            + self.volume_textures
            + self.vertex_buffers
            + self.index_buffers
            + self.shader_storage_buffers
            + self.shaders
            + self.render_targets
    }

    fn count(&mut self, kind: ResourceKind) {
        let counter = match kind {
            ResourceKind::ColorBuffer => &mut self.color_buffers,
            ResourceKind::DepthBuffer => &mut self.depth_buffers,
            ResourceKind::Cubemap => &mut self.cubemaps,
            ResourceKind::ArrayTexture => &mut self.array_textures,
            ResourceKind::ArrayCubemap => &mut self.array_cubemaps,
            ResourceKind::VolumeTexture => &mut self.volume_textures,
            ResourceKind::VertexBuffer => &mut self.vertex_buffers,
            ResourceKind::IndexBuffer => &mut self.index_buffers,
            ResourceKind::ShaderStorageBuffer => &mut self.shader_storage_buffers,
            ResourceKind::Shader => &mut self.shaders,
            ResourceKind::RenderTarget => &mut self.render_targets,
        };

        *counter += 1;
    }
}

/// A named scope owning GPU resources.
///
/// Cloning a `Session` yields another handle to the same scope.
#[derive(Clone)]
pub struct Session(Rc<SessionInner>);

pub(crate) struct SessionInner {
    name: String,
    context: Weak<ContextInner>,
    parent: Option<Weak<SessionInner>>,
    children: RefCell<Vec<Session>>,
    // insertion ordered
    resources: RefCell<Vec<(ResourceId, Resource)>>,
    ended: Cell<bool>,
}

impl SessionInner {
    fn remove(&self, id: ResourceId) -> Option<Resource> {
        let mut resources = self.resources.borrow_mut();
        let index = resources.iter().position(|(r, _)| *r == id)?;
        Some(resources.remove(index).1)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.0.name)
            .field("resources", &self.0.resources.borrow().len())
            .field("children", &self.0.children.borrow().len())
            .field("ended", &self.0.ended.get())
            .finish()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Session {
    pub(crate) fn root_of(context: &GraphicsContext) -> Self {
        Session(Rc::new(SessionInner {
            name: "root".to_owned(),
            context: Rc::downgrade(&context.0),
            parent: None,
            children: RefCell::new(Vec::new()),
            resources: RefCell::new(Vec::new()),
            ended: Cell::new(false),
        }))
    }

    /// The root session of `context`.
    pub fn root(context: &GraphicsContext) -> Result<Self> {
        context.root_session()
    }

    /// The session currently receiving new resources in `context`.
    pub fn active(context: &GraphicsContext) -> Result<Self> {
        context.active_session()
    }

    /// Run `f` with the root session active, so that what it creates outlives the current
    /// session.
    pub fn persistent<T, F>(context: &GraphicsContext, f: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        let root = context.root_session()?;
        context.0.sessions.borrow_mut().push(root.clone());
        let value = f();

        let mut sessions = context.0.sessions.borrow_mut();
        if sessions.last() == Some(&root) && sessions.len() > 1 {
            sessions.pop();
        }

        Ok(value)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_root(&self) -> bool {
        self.0.parent.is_none()
    }

    pub fn has_ended(&self) -> bool {
        self.0.ended.get()
    }

    pub fn parent(&self) -> Option<Session> {
        self.0.parent.as_ref()?.upgrade().map(Session)
    }

    fn context(&self) -> Result<GraphicsContext> {
        self.0
            .context
            .upgrade()
            .map(GraphicsContext)
            .ok_or(Error::Destroyed("graphics context"))
    }

    fn check(&self) -> Result<()> {
        if self.0.ended.get() {
            Err(Error::SessionEnded(self.0.name.clone()))
        } else {
            Ok(())
        }
    }

    /// Create a child session; it is ended when this session ends.
    pub fn fork(&self, name: &str) -> Result<Session> {
        self.check()?;

        let child = Session(Rc::new(SessionInner {
            name: name.to_owned(),
            context: self.0.context.clone(),
            parent: Some(Rc::downgrade(&self.0)),
            children: RefCell::new(Vec::new()),
            resources: RefCell::new(Vec::new()),
            ended: Cell::new(false),
        }));

        self.0.children.borrow_mut().push(child.clone());
        Ok(child)
    }

    /// Make this session the active one of its context.
    pub fn push(&self) -> Result<()> {
        self.check()?;
        let context = self.context()?;
        context.0.sessions.borrow_mut().push(self.clone());
        Ok(())
    }

    /// Deactivate this session; it must be the active one.
    pub fn pop(&self) -> Result<()> {
        let context = self.context()?;
        let mut sessions = context.0.sessions.borrow_mut();

        if sessions.last() != Some(self) {
            return Err(Error::usage(format!(
                "session '{}' is not the active session",
                self.0.name
            )));
        }

        if sessions.len() == 1 {
            return Err(Error::usage("the root session cannot be popped"));
        }

        sessions.pop();
        Ok(())
    }

    /// Register a resource; it is moved out of any session it was tracked by.
    pub fn track(&self, resource: impl Into<Resource>) -> Result<()> {
        self.check()?;

        let resource = resource.into();
        let lifetime = resource.lifetime();

        if lifetime.is_destroyed() {
            return Err(Error::usage(format!(
                "cannot track destroyed {:?}",
                resource.kind()
            )));
        }

        let previous = lifetime.session.replace(Rc::downgrade(&self.0)).upgrade();
        if let Some(previous) = previous {
            if Rc::ptr_eq(&previous, &self.0) {
                return Ok(());
            }
            previous.remove(lifetime.id());
        }

        let id = lifetime.id();
        self.0.resources.borrow_mut().push((id, resource));
        Ok(())
    }

    /// Stop tracking a resource without destroying it. Untracking twice is a no-op.
    pub fn untrack(&self, resource: impl Into<Resource>) {
        let resource = resource.into();
        let lifetime = resource.lifetime();

        if self.0.remove(lifetime.id()).is_some() {
            lifetime.session.replace(Weak::new());
        }
    }

    pub fn is_tracking(&self, resource: impl Into<Resource>) -> bool {
        let id = resource.into().lifetime().id();
        self.0.resources.borrow().iter().any(|(r, _)| *r == id)
    }

    /// Counts of the tracked resources.
    pub fn statistics(&self) -> SessionStatistics {
        let mut stats = SessionStatistics::default();
        for (_, resource) in self.0.resources.borrow().iter() {
            stats.count(resource.kind());
        }
        stats
    }

    /// Destroy every tracked resource and end every child session.
    ///
    /// The root session ends with its context only.
    pub fn end(&self) -> Result<()> {
        if self.is_root() {
            return Err(Error::usage("the root session ends with its context"));
        }

        let result = self.finish();

        if let Some(parent) = self.0.parent.as_ref().and_then(Weak::upgrade) {
            parent
                .children
                .borrow_mut()
                .retain(|child| !Rc::ptr_eq(&child.0, &self.0));
        }

        result
    }

    /// End without the root check; the first error is returned after everything was destroyed.
    pub(crate) fn finish(&self) -> Result<()> {
        if self.0.ended.replace(true) {
            return Ok(());
        }

        // ended sessions never stay active, children included; the context clears the root
        if !self.is_root() {
            if let Ok(context) = self.context() {
                context
                    .0
                    .sessions
                    .borrow_mut()
                    .retain(|session| session != self);
            }
        }

        let mut result = Ok(());

        let children: Vec<Session> = self.0.children.borrow_mut().drain(..).collect();
        for child in children {
            let ended = child.finish();
            if result.is_ok() {
                result = ended;
            }
        }

        let resources = std::mem::take(&mut *self.0.resources.borrow_mut());
        log::debug!(
            "ending session '{}' with {} resources",
            self.0.name,
            resources.len()
        );

        for (_, resource) in resources {
            resource.lifetime().session.replace(Weak::new());
            let destroyed = resource.destroy();
            if result.is_ok() {
                result = destroyed;
            }
        }

        result
    }
}
