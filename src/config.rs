//! Driver configuration.
//!
//! The configuration is read once when a context is created. Every value can be overridden from
//! the environment; absent values fall back to a per-platform default.

use std::env;

use crate::capabilities::{DriverType, DriverVersion};
use crate::error::{Error, Result};

/// Environment variable selecting the driver type (`gl` or `gles`).
pub const ENV_GL_TYPE: &str = "DRAW_GLOW_GL_TYPE";
/// Environment variable selecting the GLES implementation (`angle` or `system`).
pub const ENV_GLES_BACKEND: &str = "DRAW_GLOW_GLES_BACKEND";
/// Environment variable pinning the context version (`4.3`, `3.0`, …).
pub const ENV_GL_VERSION: &str = "DRAW_GLOW_GL_VERSION";
/// Environment variable enabling debug contexts (`true` or `false`).
pub const ENV_DEBUG: &str = "DRAW_GLOW_DEBUG";

/// Which GLES implementation to load.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum GlesBackend {
    /// ANGLE translation layer (macOS only).
    Angle,
    /// The system GLES driver.
    System,
}

/// The platform a context is created on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    /// The platform this crate was compiled for.
    pub fn current() -> Self {
        Platform {
            os: env::consts::OS,
            arch: env::consts::ARCH,
        }
    }

    fn is_mac(&self) -> bool {
        self.os == "macos"
    }
}

/// Settings used to negotiate and create a graphics context.
#[derive(Clone, Debug, PartialEq)]
pub struct DriverConfiguration {
    /// Explicit driver type, when requested.
    pub driver_type_hint: Option<DriverType>,
    /// Explicit GLES implementation, when requested.
    pub gles_backend_hint: Option<GlesBackend>,
    /// Pinned context version; `None` tries every candidate.
    pub version: Option<DriverVersion>,
    /// Check the device error flag after every state-mutating call.
    pub debug: bool,
    /// Platform used for the defaults.
    pub platform: Platform,
}

impl Default for DriverConfiguration {
    fn default() -> Self {
        DriverConfiguration {
            driver_type_hint: None,
            gles_backend_hint: None,
            version: None,
            debug: false,
            platform: Platform::current(),
        }
    }
}

impl DriverConfiguration {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(Platform::current(), |key| env::var(key).ok())
    }

    /// Read the configuration through a lookup function.
    pub fn from_lookup<F>(platform: Platform, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let driver_type_hint = match lookup(ENV_GL_TYPE).as_deref() {
            None | Some("") => None,
            Some("gl") => Some(DriverType::Gl),
            Some("gles") => Some(DriverType::Gles),
            Some(other) => return Err(invalid(ENV_GL_TYPE, other)),
        };

        let gles_backend_hint = match lookup(ENV_GLES_BACKEND).as_deref() {
            None | Some("") => None,
            Some("system") => Some(GlesBackend::System),
            Some("angle") if platform.is_mac() => Some(GlesBackend::Angle),
            Some(other) => return Err(invalid(ENV_GLES_BACKEND, other)),
        };

        let version = match lookup(ENV_GL_VERSION).as_deref() {
            None | Some("") | Some("all") => None,
            Some(v) => {
                let ty = driver_type_hint.unwrap_or_else(|| default_driver_type(&platform));
                let found = DriverVersion::CANDIDATES
                    .iter()
                    .copied()
                    .find(|c| c.driver_type() == ty && c.number() == v);
                Some(found.ok_or_else(|| invalid(ENV_GL_VERSION, v))?)
            }
        };

        let debug = match lookup(ENV_DEBUG).as_deref() {
            None | Some("") | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(other) => return Err(invalid(ENV_DEBUG, other)),
        };

        Ok(DriverConfiguration {
            driver_type_hint,
            gles_backend_hint,
            version,
            debug,
            platform,
        })
    }

    /// The driver type to negotiate.
    pub fn driver_type(&self) -> DriverType {
        self.driver_type_hint
            .unwrap_or_else(|| default_driver_type(&self.platform))
    }

    /// The GLES implementation to load when the driver type is GLES.
    pub fn gles_backend(&self) -> GlesBackend {
        self.gles_backend_hint.unwrap_or(if self.platform.is_mac() {
            GlesBackend::Angle
        } else {
            GlesBackend::System
        })
    }
}

// ARM64 macOS only has a usable GL through a GLES translation layer.
fn default_driver_type(platform: &Platform) -> DriverType {
    if platform.is_mac() && platform.arch == "aarch64" {
        DriverType::Gles
    } else {
        DriverType::Gl
    }
}

fn invalid(key: &'static str, value: &str) -> Error {
    Error::Configuration {
        key,
        value: value.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const LINUX: Platform = Platform {
        os: "linux",
        arch: "x86_64",
    };
    const MAC_ARM: Platform = Platform {
        os: "macos",
        arch: "aarch64",
    };

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn platform_defaults() {
        let linux = DriverConfiguration::from_lookup(LINUX, lookup(&[])).unwrap();
        assert_eq!(linux.driver_type(), DriverType::Gl);
        assert_eq!(linux.gles_backend(), GlesBackend::System);
        assert!(!linux.debug);

        let mac = DriverConfiguration::from_lookup(MAC_ARM, lookup(&[])).unwrap();
        assert_eq!(mac.driver_type(), DriverType::Gles);
        assert_eq!(mac.gles_backend(), GlesBackend::Angle);
    }

    #[test]
    fn overrides() {
        let config = DriverConfiguration::from_lookup(
            LINUX,
            lookup(&[
                (ENV_GL_TYPE, "gles"),
                (ENV_GL_VERSION, "3.1"),
                (ENV_DEBUG, "true"),
            ]),
        )
        .unwrap();

        assert_eq!(config.driver_type(), DriverType::Gles);
        assert_eq!(config.version, Some(DriverVersion::GLES_3_1));
        assert!(config.debug);
    }

    #[test]
    fn angle_is_mac_only() {
        let err = DriverConfiguration::from_lookup(LINUX, lookup(&[(ENV_GLES_BACKEND, "angle")]))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { key, .. } if key == ENV_GLES_BACKEND));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let err =
            DriverConfiguration::from_lookup(LINUX, lookup(&[(ENV_GL_VERSION, "5.0")])).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
