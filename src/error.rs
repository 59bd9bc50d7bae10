//! Errors.
//!
//! Every error in this crate is fatal for the operation that raised it: nothing is recovered
//! locally. The message of each variant carries the offending values so that a failure can be
//! diagnosed from the log alone.

use luminance::framebuffer::IncompleteReason;
use thiserror::Error;

use crate::capabilities::DriverVersion;
use crate::format::{ColorFormat, ColorType};
use crate::shader::ShaderStage;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the drawing core.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// A (format, type) pair has no entry in the backend format table.
    #[error("no conversion entry for {format:?}/{ty:?}")]
    UnsupportedFormat { format: ColorFormat, ty: ColorType },

    /// A descriptor carries non-positive or out-of-range dimensions.
    #[error("cannot create {kind} with dimensions: {width}x{height}x{depth}")]
    InvalidDimensions {
        kind: &'static str,
        width: i64,
        height: i64,
        depth: i64,
    },

    /// An attachment does not have the effective size of its render target.
    #[error(
        "dimension mismatch: {what} is {actual_width}x{actual_height}, render target is {expected_width}x{expected_height}"
    )]
    DimensionMismatch {
        what: String,
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// A driver configuration value could not be understood.
    #[error("invalid configuration value for {key}: {value:?}")]
    Configuration { key: &'static str, value: String },

    /// Operation on a resource that has already been destroyed.
    #[error("{0} is destroyed")]
    Destroyed(&'static str),

    /// Upload or download slice is too small.
    #[error("{operation} requires {required} bytes, buffer only has {available} bytes left")]
    NotEnoughData {
        operation: &'static str,
        required: usize,
        available: usize,
    },

    /// Operation refused on a multisampled resource.
    #[error("{0}")]
    Multisampled(&'static str),

    /// A render target is bound twice.
    #[error("render target is already bound")]
    AlreadyBound,

    /// A render target is unbound while not bound.
    #[error("render target is not bound")]
    NotBound,

    /// A render target is unbound while another one sits on top of the bind stack.
    #[error("render target is not the active render target")]
    NotOnTop,

    /// Tracking a resource in a session that has ended.
    #[error("session '{0}' has ended")]
    SessionEnded(String),

    /// Shader stage compilation failed.
    #[error("{stage} shader compilation failed: {log}\n{shader_source}")]
    Compile {
        stage: ShaderStage,
        shader_source: String,
        log: String,
    },

    /// Shader program linking failed.
    #[error("shader '{name}' link failed: {log}")]
    Link { name: String, log: String },

    /// Setting a uniform with a value of the wrong type.
    #[error("uniform '{name}' is declared as {declared} but was set as {requested}")]
    UniformTypeMismatch {
        name: String,
        declared: String,
        requested: String,
    },

    /// Vertex + instance formats need more attribute locations than available.
    #[error("Maximum vertex attributes exceeded {count} (limit is {limit})")]
    VertexAttributeLimit { count: usize, limit: usize },

    /// Operation requires a newer or different backend.
    #[error("{feature} requires {required} (current config: {current})")]
    Unsupported {
        feature: &'static str,
        required: String,
        current: DriverVersion,
    },

    /// Framebuffer is not complete.
    #[error("incomplete framebuffer: {0}")]
    IncompleteFramebuffer(IncompleteReason),

    /// The backend error flag was raised after a call (debug contexts only).
    #[error("device error 0x{code:04x} after {call}")]
    Device { call: &'static str, code: u32 },

    /// The backend could not allocate an object.
    #[error("backend error: {0}")]
    Backend(String),

    /// No candidate version could create a context.
    #[error("no OpenGL context could be created (tried {0})")]
    NoContext(String),

    /// Any other protocol violation.
    #[error("{0}")]
    Usage(String),
}

impl Error {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }
}

impl From<IncompleteReason> for Error {
    fn from(reason: IncompleteReason) -> Self {
        Error::IncompleteFramebuffer(reason)
    }
}
