//! Driver versions and capability sets.
//!
//! A [`Capabilities`] value is computed once per context from what the device reports and never
//! changes afterwards. Other modules query it before acting and turn gaps into
//! [`Error::Unsupported`].

use std::fmt;

use crate::backend::{
    AttachmentPoint, Backend, BackendInfo, Capability, ClearValue, ImageRef, Region, StorageMode,
    TextureDescriptor, TextureKind,
};
use crate::config::DriverConfiguration;
use crate::error::{Error, Result};
use crate::format::{BufferMultisample, ColorFormat, ColorType, PixelFormat};

/// Hard limit on simultaneously bound vertex attribute locations.
pub const MAX_VERTEX_ATTRIBUTES: u32 = 16;

/// Family of the underlying API.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DriverType {
    /// Desktop OpenGL, core profile.
    Gl,
    /// OpenGL ES, including WebGL 2.
    Gles,
}

/// A context version the driver knows how to use.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DriverVersion {
    ty: DriverType,
    major: u8,
    minor: u8,
}

impl DriverVersion {
    pub const GL_3_3: Self = Self::gl(3, 3);
    pub const GL_4_1: Self = Self::gl(4, 1);
    pub const GL_4_2: Self = Self::gl(4, 2);
    pub const GL_4_3: Self = Self::gl(4, 3);
    pub const GL_4_4: Self = Self::gl(4, 4);
    pub const GL_4_5: Self = Self::gl(4, 5);
    pub const GL_4_6: Self = Self::gl(4, 6);
    pub const GLES_3_0: Self = Self::gles(3, 0);
    pub const GLES_3_1: Self = Self::gles(3, 1);
    pub const GLES_3_2: Self = Self::gles(3, 2);

    /// Every supported version, lowest first within each type.
    pub const CANDIDATES: [DriverVersion; 10] = [
        Self::GL_3_3,
        Self::GL_4_1,
        Self::GL_4_2,
        Self::GL_4_3,
        Self::GL_4_4,
        Self::GL_4_5,
        Self::GL_4_6,
        Self::GLES_3_0,
        Self::GLES_3_1,
        Self::GLES_3_2,
    ];

    const fn gl(major: u8, minor: u8) -> Self {
        DriverVersion {
            ty: DriverType::Gl,
            major,
            minor,
        }
    }

    const fn gles(major: u8, minor: u8) -> Self {
        DriverVersion {
            ty: DriverType::Gles,
            major,
            minor,
        }
    }

    pub fn driver_type(&self) -> DriverType {
        self.ty
    }

    pub fn major(&self) -> u8 {
        self.major
    }

    pub fn minor(&self) -> u8 {
        self.minor
    }

    /// `major.minor`, as used by configuration overrides.
    pub fn number(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    /// The `#version` directive matching this context.
    pub fn glsl_version(&self) -> String {
        match self.ty {
            DriverType::Gl => format!("{}{}0 core", self.major, self.minor),
            DriverType::Gles => format!("{}{}0 es", self.major, self.minor),
        }
    }

    /// Whether this version reaches the threshold of its own type.
    pub fn is_at_least(&self, req: Requirement) -> bool {
        let threshold = match self.ty {
            DriverType::Gl => req.gl,
            DriverType::Gles => req.gles,
        };

        match threshold {
            Some(t) => (self.major, self.minor) >= (t.major, t.minor),
            None => false,
        }
    }

    /// Fail with [`Error::Unsupported`] unless the requirement is met.
    pub fn require(&self, feature: &'static str, req: Requirement) -> Result<()> {
        if self.is_at_least(req) {
            Ok(())
        } else {
            Err(Error::Unsupported {
                feature,
                required: req.to_string(),
                current: *self,
            })
        }
    }
}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.ty {
            DriverType::Gl => write!(f, "OpenGL {}.{}", self.major, self.minor),
            DriverType::Gles => write!(f, "OpenGL ES {}.{}", self.major, self.minor),
        }
    }
}

/// Minimum versions for a feature; `None` means the type never supports it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Requirement {
    pub gl: Option<DriverVersion>,
    pub gles: Option<DriverVersion>,
}

impl Requirement {
    pub const fn new(gl: DriverVersion, gles: DriverVersion) -> Self {
        Requirement {
            gl: Some(gl),
            gles: Some(gles),
        }
    }

    pub const fn gl_only(gl: DriverVersion) -> Self {
        Requirement {
            gl: Some(gl),
            gles: None,
        }
    }

    pub const PROGRAM_UNIFORM: Self = Self::new(DriverVersion::GL_4_1, DriverVersion::GLES_3_1);
    pub const TEXTURE_STORAGE: Self = Self::new(DriverVersion::GL_4_1, DriverVersion::GLES_3_0);
    pub const TEXTURE_MULTISAMPLE_STORAGE: Self =
        Self::new(DriverVersion::GL_4_3, DriverVersion::GLES_3_1);
    pub const COMPUTE: Self = Self::new(DriverVersion::GL_4_3, DriverVersion::GLES_3_1);
    pub const STORAGE_BUFFERS: Self = Self::new(DriverVersion::GL_4_3, DriverVersion::GLES_3_1);
    pub const IMAGE_LOAD_STORE: Self = Self::new(DriverVersion::GL_4_2, DriverVersion::GLES_3_1);
    pub const BUFFER_STORAGE: Self = Self::gl_only(DriverVersion::GL_4_4);
    pub const CLEAR_TEXTURE: Self = Self::gl_only(DriverVersion::GL_4_4);
    pub const BASE_INSTANCE: Self = Self::gl_only(DriverVersion::GL_4_2);
    pub const TESSELLATION: Self = Self::new(DriverVersion::GL_4_1, DriverVersion::GLES_3_2);
    pub const GEOMETRY_SHADERS: Self = Self::new(DriverVersion::GL_3_3, DriverVersion::GLES_3_2);
    pub const CUBEMAP_ARRAYS: Self = Self::new(DriverVersion::GL_4_1, DriverVersion::GLES_3_2);
    pub const INDEXED_BLEND: Self = Self::new(DriverVersion::GL_4_1, DriverVersion::GLES_3_2);
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.gl, self.gles) {
            (Some(gl), Some(gles)) => write!(f, "{} or {}", gl, gles),
            (Some(gl), None) => write!(f, "{}", gl),
            (None, Some(gles)) => write!(f, "{}", gles),
            (None, None) => f.write_str("an unavailable version"),
        }
    }
}

/// Candidate versions for a driver type, highest first.
///
/// A pinned version in the configuration yields a single candidate.
pub fn candidate_versions(config: &DriverConfiguration) -> Vec<DriverVersion> {
    if let Some(v) = config.version {
        return vec![v];
    }

    let ty = config.driver_type();
    DriverVersion::CANDIDATES
        .iter()
        .rev()
        .copied()
        .filter(|v| v.driver_type() == ty)
        .collect()
}

/// Select the highest candidate version for which `probe` manages to create a context.
pub fn negotiate<F>(config: &DriverConfiguration, mut probe: F) -> Result<DriverVersion>
where
    F: FnMut(DriverVersion) -> bool,
{
    let candidates = candidate_versions(config);

    for &version in &candidates {
        if probe(version) {
            log::debug!("negotiated {} ({})", version, version.glsl_version());
            return Ok(version);
        }

        log::debug!("could not create a context for {}", version);
    }

    let tried: Vec<String> = candidates.iter().map(|v| v.to_string()).collect();
    Err(Error::NoContext(tried.join(", ")))
}

/// Parse a `GL_VERSION` string into the closest candidate at or below it.
///
/// Accepts desktop strings (`"4.6.0 NVIDIA 535.54"`), GLES strings (`"OpenGL ES 3.2 Mesa"`) and
/// WebGL strings (`"WebGL 2.0"`).
pub fn parse_version_string(version: &str) -> Option<DriverVersion> {
    let version = version.trim();

    let (ty, rest) = if let Some(rest) = version.strip_prefix("OpenGL ES") {
        (DriverType::Gles, rest.trim_start())
    } else if let Some(rest) = version.strip_prefix("WebGL") {
        // WebGL 2 is specified against GLES 3.0
        let major = parse_major_minor(rest.trim_start())?.0;
        return if major >= 2 {
            Some(DriverVersion::GLES_3_0)
        } else {
            None
        };
    } else {
        (DriverType::Gl, version)
    };

    let (major, minor) = parse_major_minor(rest)?;

    DriverVersion::CANDIDATES
        .iter()
        .rev()
        .copied()
        .find(|c| c.driver_type() == ty && (c.major, c.minor) <= (major, minor))
}

fn parse_major_minor(s: &str) -> Option<(u8, u8)> {
    let number = s.split_whitespace().next()?;
    let mut parts = number.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()
        .and_then(|m| {
            let digits: String = m.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        })
        .unwrap_or(0);

    Some((major, minor))
}

/// Driver-specific behaviour that cannot be derived from the version alone.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Quirks {
    /// Clears of sRGB attachments are stored without the linear to sRGB conversion.
    pub clear_ignores_srgb: bool,
    /// Blits between integer and floating point attachments are rejected.
    pub blit_requires_matching_numeric_type: bool,
    /// Blits from single-sampled into multisampled attachments are rejected.
    pub blit_into_multisample_unsupported: bool,
}

/// What the negotiated context can do.
#[derive(Clone, Debug, PartialEq)]
pub struct Capabilities {
    pub version: DriverVersion,
    pub renderer: String,
    pub program_uniform: bool,
    pub texture_storage: bool,
    pub texture_multisample_storage: bool,
    pub compute: bool,
    pub storage_buffers: bool,
    pub image_load_store: bool,
    pub buffer_storage: bool,
    pub clear_texture: bool,
    pub instancing: bool,
    pub base_instance: bool,
    pub tessellation: bool,
    pub geometry_shaders: bool,
    pub uniform_blocks: bool,
    pub cubemap_arrays: bool,
    pub float_textures: bool,
    pub texture_compression_s3tc: bool,
    pub texture_compression_bptc: bool,
    pub max_texture_size: u32,
    pub max_color_attachments: u32,
    pub max_samples: u32,
    pub max_vertex_attributes: u32,
    pub max_anisotropy: f32,
    pub quirks: Quirks,
}

impl Capabilities {
    /// Derive the capability set from what a device reports.
    pub fn from_info(info: &BackendInfo, config: &DriverConfiguration) -> Result<Self> {
        let reported = parse_version_string(&info.version)
            .ok_or_else(|| Error::NoContext(format!("unsupported version \"{}\"", info.version)))?;

        // a pinned version caps what the device reports
        let version = match config.version {
            Some(pinned)
                if pinned.driver_type() == reported.driver_type()
                    && (pinned.major, pinned.minor) < (reported.major, reported.minor) =>
            {
                pinned
            }
            _ => reported,
        };

        let has_ext = |name: &str| info.extensions.iter().any(|e| e == name);
        let gles = version.driver_type() == DriverType::Gles;

        let caps = Capabilities {
            version,
            renderer: info.renderer.clone(),
            program_uniform: version.is_at_least(Requirement::PROGRAM_UNIFORM),
            texture_storage: version.is_at_least(Requirement::TEXTURE_STORAGE),
            texture_multisample_storage: version
                .is_at_least(Requirement::TEXTURE_MULTISAMPLE_STORAGE),
            compute: version.is_at_least(Requirement::COMPUTE),
            storage_buffers: version.is_at_least(Requirement::STORAGE_BUFFERS),
            image_load_store: version.is_at_least(Requirement::IMAGE_LOAD_STORE),
            buffer_storage: version.is_at_least(Requirement::BUFFER_STORAGE),
            clear_texture: version.is_at_least(Requirement::CLEAR_TEXTURE),
            instancing: true,
            base_instance: version.is_at_least(Requirement::BASE_INSTANCE),
            tessellation: version.is_at_least(Requirement::TESSELLATION),
            geometry_shaders: version.is_at_least(Requirement::GEOMETRY_SHADERS),
            uniform_blocks: true,
            cubemap_arrays: version.is_at_least(Requirement::CUBEMAP_ARRAYS),
            float_textures: !gles
                || has_ext("GL_EXT_color_buffer_float")
                || has_ext("EXT_color_buffer_float"),
            texture_compression_s3tc: has_ext("GL_EXT_texture_compression_s3tc")
                || has_ext("WEBGL_compressed_texture_s3tc"),
            texture_compression_bptc: !gles
                || has_ext("GL_EXT_texture_compression_bptc")
                || has_ext("EXT_texture_compression_bptc"),
            max_texture_size: info.limits.max_texture_size,
            max_color_attachments: info.limits.max_color_attachments.max(1),
            max_samples: if gles {
                info.limits.max_samples.min(4)
            } else {
                info.limits.max_samples
            },
            max_vertex_attributes: info
                .limits
                .max_vertex_attributes
                .min(MAX_VERTEX_ATTRIBUTES),
            max_anisotropy: info.limits.max_anisotropy.max(1.0),
            quirks: Quirks {
                clear_ignores_srgb: false,
                blit_requires_matching_numeric_type: gles,
                blit_into_multisample_unsupported: gles,
            },
        };

        log::debug!("capabilities for {} on {}: {:?}", version, info.renderer, caps);
        Ok(caps)
    }

    /// Derive the capability set of a live device and probe its quirks.
    ///
    /// The probe leaves the default framebuffer bound.
    pub fn probe(backend: &mut dyn Backend, config: &DriverConfiguration) -> Result<Self> {
        let mut caps = Self::from_info(&backend.info(), config)?;

        match probe_clear_ignores_srgb(backend) {
            Ok(true) => {
                log::warn!("quirk: clear ignores sRGB setting");
                caps.quirks.clear_ignores_srgb = true;
            }
            Ok(false) => (),
            Err(e) => log::debug!("sRGB clear probe failed: {}", e),
        }

        Ok(caps)
    }

    pub fn driver_type(&self) -> DriverType {
        self.version.driver_type()
    }

    pub fn require(&self, feature: &'static str, req: Requirement) -> Result<()> {
        self.version.require(feature, req)
    }
}

/// Clear a 1×1 sRGB image to 0.5 grey with sRGB conversion enabled and look at what was stored.
fn probe_clear_ignores_srgb(backend: &mut dyn Backend) -> Result<bool> {
    let format = PixelFormat::Color(ColorFormat::RGBa, ColorType::UINT8_SRGB);
    let desc = TextureDescriptor {
        kind: TextureKind::Texture2D,
        width: 1,
        height: 1,
        depth: 1,
        levels: 1,
        format,
        native: format.native()?,
        multisample: BufferMultisample::Disabled,
        storage: StorageMode::Image,
    };

    let texture = backend.create_texture(&desc)?;
    let framebuffer = match backend.create_framebuffer() {
        Ok(fb) => fb,
        Err(e) => {
            backend.delete_texture(texture);
            return Err(e);
        }
    };

    let image = ImageRef {
        texture,
        level: 0,
        layer: 0,
    };
    let mut texel = [0u8; 4];
    let result = backend
        .attach(framebuffer, AttachmentPoint::Color(0), Some(image))
        .and_then(|_| {
            backend.bind_framebuffer(Some(framebuffer));
            backend.set_capability(Capability::FramebufferSrgb, true);
            let cleared = backend.clear_color(0, ClearValue::Float([0.5, 0.5, 0.5, 1.0]));
            backend.set_capability(Capability::FramebufferSrgb, false);
            backend.bind_framebuffer(None);
            cleared
        })
        .and_then(|_| backend.read_texture(texture, 0, Region::rect(0, 0, 1, 1), format, &mut texel));

    backend.delete_framebuffer(framebuffer);
    backend.delete_texture(texture);

    result.map(|_| texel[0] == 0x7f || texel[0] == 0x80)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Limits;
    use crate::config::Platform;

    fn info(version: &str) -> BackendInfo {
        BackendInfo {
            version: version.to_owned(),
            renderer: "test".to_owned(),
            vendor: "test".to_owned(),
            extensions: Vec::new(),
            limits: Limits {
                max_texture_size: 4096,
                max_color_attachments: 8,
                max_samples: 8,
                max_vertex_attributes: 32,
                max_anisotropy: 16.0,
            },
        }
    }

    fn linux() -> DriverConfiguration {
        DriverConfiguration {
            platform: Platform {
                os: "linux",
                arch: "x86_64",
            },
            ..DriverConfiguration::default()
        }
    }

    #[test]
    fn parse_versions() {
        assert_eq!(
            parse_version_string("4.6.0 NVIDIA 535.54"),
            Some(DriverVersion::GL_4_6)
        );
        assert_eq!(
            parse_version_string("4.0 Mesa"),
            Some(DriverVersion::GL_3_3)
        );
        assert_eq!(
            parse_version_string("OpenGL ES 3.2 Mesa 23.0"),
            Some(DriverVersion::GLES_3_2)
        );
        assert_eq!(
            parse_version_string("WebGL 2.0 (OpenGL ES 3.0 Chromium)"),
            Some(DriverVersion::GLES_3_0)
        );
        assert_eq!(parse_version_string("WebGL 1.0"), None);
        assert_eq!(parse_version_string("2.1 Mesa"), None);
    }

    #[test]
    fn thresholds_are_per_type() {
        assert!(DriverVersion::GL_4_3.is_at_least(Requirement::COMPUTE));
        assert!(!DriverVersion::GL_4_2.is_at_least(Requirement::COMPUTE));
        assert!(DriverVersion::GLES_3_1.is_at_least(Requirement::COMPUTE));
        assert!(!DriverVersion::GLES_3_2.is_at_least(Requirement::BASE_INSTANCE));
    }

    #[test]
    fn require_names_both_versions() {
        let err = DriverVersion::GL_3_3
            .require("non-zero instance offsets", Requirement::BASE_INSTANCE)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "non-zero instance offsets requires OpenGL 4.2 (current config: OpenGL 3.3)"
        );
    }

    #[test]
    fn negotiation_picks_highest_working_candidate() {
        let config = linux();
        let version = negotiate(&config, |v| v.minor() <= 3 && v.major() == 4).unwrap();
        assert_eq!(version, DriverVersion::GL_4_3);
    }

    #[test]
    fn negotiation_respects_pinned_version() {
        let config = DriverConfiguration {
            version: Some(DriverVersion::GL_4_1),
            ..linux()
        };
        assert_eq!(candidate_versions(&config), vec![DriverVersion::GL_4_1]);
    }

    #[test]
    fn negotiation_fails_without_context() {
        let err = negotiate(&linux(), |_| false).unwrap_err();
        assert!(matches!(err, Error::NoContext(_)));
    }

    #[test]
    fn capabilities_follow_version() {
        let caps = Capabilities::from_info(&info("4.6.0"), &linux()).unwrap();
        assert!(caps.texture_storage && caps.compute && caps.base_instance);
        assert_eq!(caps.max_vertex_attributes, MAX_VERTEX_ATTRIBUTES);

        let pinned = DriverConfiguration {
            version: Some(DriverVersion::GL_3_3),
            ..linux()
        };
        let caps = Capabilities::from_info(&info("4.6.0"), &pinned).unwrap();
        assert_eq!(caps.version, DriverVersion::GL_3_3);
        assert!(!caps.texture_storage);

        let caps = Capabilities::from_info(&info("OpenGL ES 3.0"), &linux()).unwrap();
        assert!(caps.quirks.blit_requires_matching_numeric_type);
        assert!(!caps.float_textures);
        assert_eq!(caps.max_samples, 4);
    }

    #[test]
    fn probe_keeps_srgb_clears_converted() {
        let mut soft = crate::backend::SoftBackend::new(4, 4);
        let caps = Capabilities::probe(&mut soft, &linux()).unwrap();
        assert!(!caps.quirks.clear_ignores_srgb);
        assert_eq!(soft.texture_count(), 0);
    }
}
