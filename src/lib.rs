//! GPU resource and state management over OpenGL, OpenGL ES and WebGL 2
//!
//! This crate sits between a drawing API and a [glow] device. It negotiates capabilities, tracks
//! the lifetime of textures, buffers, shaders and render targets in [sessions](session::Session),
//! keeps the render-target bind stack and only issues the fixed-function state that changed
//! between draws.
//!
//! Everything hangs off a [`GraphicsContext`], which owns a [`Backend`]. [`GlowBackend`] drives a
//! real device; [`SoftBackend`] is an in-memory device for headless use and tests.
//!
//! ```
//! use draw_glow::{ColorBufferDescriptor, ColorRGBa, Driver, DriverConfiguration, SoftBackend};
//!
//! let driver = Driver::new(Box::new(SoftBackend::new(4, 4)), DriverConfiguration::default())?;
//! let target = driver.create_color_buffer(&ColorBufferDescriptor::new(4, 4), None)?;
//! target.fill(ColorRGBa::RED, 0)?;
//! # Ok::<(), draw_glow::Error>(())
//! ```
//!
//! [glow]: https://github.com/grovesNL/glow

#[macro_use]
pub mod texture;
#[macro_use]
pub mod buffer;

pub mod array_cubemap;
pub mod array_texture;
pub mod backend;
pub mod capabilities;
pub mod color_buffer;
pub mod config;
pub mod context;
mod copy;
pub mod cubemap;
pub mod depth_buffer;
pub mod draw_style;
pub mod driver;
mod error;
pub mod format;
pub mod index_buffer;
pub mod render_target;
pub mod session;
pub mod shader;
pub mod shader_storage_buffer;
pub mod shadow;
pub mod uniform;
mod vao;
pub mod vertex_buffer;
pub mod vertex_format;
pub mod volume_texture;

pub use array_cubemap::ArrayCubemap;
pub use array_texture::{ArrayTexture, ArrayTextureDescriptor};
pub use backend::{Backend, GlowBackend, SoftBackend};
pub use buffer::BufferShadow;
pub use capabilities::{Capabilities, DriverType, DriverVersion};
pub use color_buffer::{ColorBuffer, ColorBufferDescriptor};
pub use config::DriverConfiguration;
pub use context::{GraphicsContext, WindowMetrics};
pub use cubemap::{Cubemap, CubemapDescriptor, CubemapSide};
pub use depth_buffer::{DepthBuffer, DepthBufferDescriptor};
pub use draw_style::{BlendMode, DrawStyle};
pub use driver::{Driver, ShaderGenerators};
pub use error::{Error, Result};
pub use format::{BufferMultisample, ColorFormat, ColorRGBa, ColorType, DepthFormat};
pub use index_buffer::IndexBuffer;
pub use render_target::{ColorAttachment, RenderTarget, RenderTargetDescriptor};
pub use session::{Resource, Session, SessionStatistics};
pub use shader::{Shader, ShaderSources};
pub use shader_storage_buffer::ShaderStorageBuffer;
pub use shadow::ColorBufferShadow;
pub use texture::IntRectangle;
pub use vertex_buffer::VertexBuffer;
pub use vertex_format::{DrawPrimitive, IndexType, VertexElementType, VertexFormat};
pub use volume_texture::{VolumeTexture, VolumeTextureDescriptor};

// fixed-function vocabulary
pub use luminance::depth_test::DepthComparison;
pub use luminance::framebuffer::IncompleteReason;
pub use luminance::texture::{MagFilter, MinFilter, Wrap};
