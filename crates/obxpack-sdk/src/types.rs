//! Core types for obxpack-sdk.
//!
//! This module defines the fundamental types used throughout the SDK:
//!
//! - [`PackError`] - Error types for build, staging and test operations
//! - [`TargetOs`] - Operating system family the library is built for
//! - [`TargetDescriptor`] - OS, architecture and optional cross toolchain

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Error types for obxpack-sdk operations.
///
/// Every variant is fatal for the pipeline. Failing test binaries are not
/// errors; they are recorded in a [`crate::TestReport`].
///
/// # Example
///
/// ```ignore
/// use obxpack_sdk::{PackError, Pipeline};
///
/// match pipeline.run() {
///     Ok(report) => println!("tests exit code {}", report.exit_code()),
///     Err(PackError::MissingArtifact { path }) => {
///         eprintln!("build did not produce {}", path.display());
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    /// The external build process exited with a non-zero status.
    ///
    /// Captured output is carried verbatim so callers can surface it.
    #[error("build command `{command}` failed.\n\nExit status: {status}\n\nStdout:\n{stdout}\n\nStderr:\n{stderr}")]
    BuildFailed {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    /// An expected output file does not exist.
    ///
    /// Raised before any file is copied into the package tree.
    #[error("missing artifact: {}\n\nThe build reported success but did not produce this file. Check the build output location for the target.", .path.display())]
    MissingArtifact { path: PathBuf },

    /// A child process exceeded its time budget and was killed.
    #[error("`{command}` timed out after {}s and was killed", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    /// A child process could not be started.
    #[error("failed to start `{command}`: {source}. Ensure the tool is installed and the path is executable")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A filesystem operation failed.
    #[error("failed to {action} {}: {source}", .path.display())]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unknown or unsupported operating system.
    #[error("unsupported target: {0}. Supported: linux, macos, windows")]
    UnsupportedTarget(String),

    /// Invalid configuration, such as a missing library root.
    #[error("configuration error: {0}")]
    Config(String),

    /// A report could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PackError {
    pub(crate) fn fs(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PackError::Filesystem {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Operating system family of the packaged library.
///
/// # Example
///
/// ```
/// use obxpack_sdk::TargetOs;
///
/// let os: TargetOs = "windows".parse().unwrap();
/// assert_eq!(os, TargetOs::Windows);
/// assert_eq!(os.as_str(), "windows");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    /// Linux (shared object, `.so`).
    Linux,
    /// macOS (dynamic library, `.dylib`).
    Macos,
    /// Windows (DLL built with the Visual Studio toolchain).
    Windows,
}

impl TargetOs {
    /// Returns the string representation of the OS.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetOs::Linux => "linux",
            TargetOs::Macos => "macos",
            TargetOs::Windows => "windows",
        }
    }

    /// Returns the OS this process is running on.
    pub fn host() -> Result<Self, PackError> {
        std::env::consts::OS.parse()
    }

    /// Whether the OS is a Unix-like system served by the shell build script.
    pub fn is_unix(&self) -> bool {
        !matches!(self, TargetOs::Windows)
    }
}

impl FromStr for TargetOs {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(TargetOs::Linux),
            "macos" | "darwin" => Ok(TargetOs::Macos),
            "windows" => Ok(TargetOs::Windows),
            other => Err(PackError::UnsupportedTarget(other.to_string())),
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target a package is produced for.
///
/// Constructed once per invocation and never mutated. An empty cross toolchain
/// identifier is treated as a native build.
///
/// # Example
///
/// ```
/// use obxpack_sdk::{TargetDescriptor, TargetOs};
///
/// let native = TargetDescriptor::new(TargetOs::Linux, "x86_64", Some(String::new()));
/// assert!(!native.is_cross_compiling());
///
/// let cross = TargetDescriptor::new(TargetOs::Linux, "armv7", Some("arm-toolchain".into()));
/// assert_eq!(cross.cross_toolchain(), Some("arm-toolchain"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDescriptor {
    os: TargetOs,
    arch: String,
    cross_toolchain: Option<String>,
}

impl TargetDescriptor {
    pub fn new(os: TargetOs, arch: impl Into<String>, cross_toolchain: Option<String>) -> Self {
        let cross_toolchain = cross_toolchain
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Self {
            os,
            arch: arch.into(),
            cross_toolchain,
        }
    }

    /// Descriptor for the machine this process runs on, without cross toolchain.
    pub fn host() -> Result<Self, PackError> {
        Ok(Self::new(TargetOs::host()?, std::env::consts::ARCH, None))
    }

    pub fn os(&self) -> TargetOs {
        self.os
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn cross_toolchain(&self) -> Option<&str> {
        self.cross_toolchain.as_deref()
    }

    pub fn is_cross_compiling(&self) -> bool {
        self.cross_toolchain.is_some()
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)?;
        if let Some(toolchain) = &self.cross_toolchain {
            write!(f, " (cross: {})", toolchain)?;
        }
        Ok(())
    }
}

/// Why a pipeline stage did not run. Skips are informational, never failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// A cross toolchain is configured; the build happens elsewhere.
    CrossCompilation,
    /// No test execution path exists for this OS.
    UnsupportedPlatform(TargetOs),
    /// Disabled by the caller (e.g. `--skip-tests`).
    Disabled,
    /// Dry-run mode; nothing is executed.
    DryRun,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::CrossCompilation => f.write_str("cross-compilation"),
            SkipReason::UnsupportedPlatform(os) => write!(f, "unsupported platform: {}", os),
            SkipReason::Disabled => f.write_str("disabled"),
            SkipReason::DryRun => f.write_str("dry run"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(SkipReason::CrossCompilation.to_string(), "cross-compilation");
        assert_eq!(
            SkipReason::UnsupportedPlatform(TargetOs::Windows).to_string(),
            "unsupported platform: windows"
        );
    }

    #[test]
    fn test_target_os_parse() {
        assert_eq!("linux".parse::<TargetOs>().unwrap(), TargetOs::Linux);
        assert_eq!("Darwin".parse::<TargetOs>().unwrap(), TargetOs::Macos);
        assert_eq!("WINDOWS".parse::<TargetOs>().unwrap(), TargetOs::Windows);

        let err = "plan9".parse::<TargetOs>().unwrap_err();
        assert!(format!("{}", err).contains("plan9"));
    }

    #[test]
    fn test_empty_toolchain_is_native() {
        let target = TargetDescriptor::new(TargetOs::Linux, "x86_64", Some("  ".to_string()));
        assert!(!target.is_cross_compiling());
        assert_eq!(target.cross_toolchain(), None);
    }

    #[test]
    fn test_descriptor_display() {
        let target = TargetDescriptor::new(TargetOs::Linux, "aarch64", Some("arm-toolchain".into()));
        assert_eq!(target.to_string(), "linux-aarch64 (cross: arm-toolchain)");
    }

    #[test]
    fn test_missing_artifact_names_path() {
        let err = PackError::MissingArtifact {
            path: PathBuf::from("visual-studio/x64/Release/objectbox-c.dll"),
        };
        assert!(err.to_string().contains("visual-studio/x64/Release/objectbox-c.dll"));
    }
}
