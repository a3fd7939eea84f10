//! Build output layout of the native library.
//!
//! Everything here is a pure function of a [`TargetDescriptor`]: no I/O, no
//! environment lookups. All returned paths are relative to the library root
//! (the directory holding `build.sh` / `build.bat`).
//!
//! | Target | Location |
//! |--------|----------|
//! | Windows | `visual-studio/{arch alias}/Release` |
//! | Linux / macOS | `cbuild/Release/objectbox-c` |
//! | Linux / macOS, cross | `cbuild/{toolchain}/Release/objectbox-c` |

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::types::{TargetDescriptor, TargetOs};

/// Name of the library build target, also the last directory of Unix outputs.
pub const LIBRARY_TARGET: &str = "objectbox-c";

/// Build configuration passed to the external build.
pub const BUILD_CONFIGURATION: &str = "Release";

const UNIX_BUILD_ROOT: &str = "cbuild";
const WINDOWS_BUILD_ROOT: &str = "visual-studio";

/// Directory (relative to the library root) where the public headers live.
pub const HEADER_DIR: &str = "include";

/// Directory where a build is expected to deposit its artifacts.
///
/// Always relative to the library root; use [`BuildOutputLocation::under`]
/// to get an absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BuildOutputLocation(PathBuf);

impl BuildOutputLocation {
    pub fn relative(&self) -> &Path {
        &self.0
    }

    /// Joins the location onto a library root.
    pub fn under(&self, library_root: &Path) -> PathBuf {
        library_root.join(&self.0)
    }
}

impl fmt::Display for BuildOutputLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Maps an architecture to the name the Visual Studio toolchain uses.
///
/// ```
/// use obxpack_sdk::layout::arch_alias;
///
/// assert_eq!(arch_alias("x86_64"), "x64");
/// assert_eq!(arch_alias("x86"), "x86");
/// ```
pub fn arch_alias(arch: &str) -> &str {
    match arch {
        "x86_64" => "x64",
        other => other,
    }
}

/// Resolves the build output location for a target.
pub fn resolve(target: &TargetDescriptor) -> BuildOutputLocation {
    match target.os() {
        TargetOs::Windows => windows_location(target.arch()),
        TargetOs::Linux | TargetOs::Macos => unix_location(target.cross_toolchain()),
    }
}

pub(crate) fn windows_location(arch: &str) -> BuildOutputLocation {
    BuildOutputLocation(
        PathBuf::from(WINDOWS_BUILD_ROOT)
            .join(arch_alias(arch))
            .join(BUILD_CONFIGURATION),
    )
}

pub(crate) fn unix_location(cross_toolchain: Option<&str>) -> BuildOutputLocation {
    let mut path = PathBuf::from(UNIX_BUILD_ROOT);
    if let Some(toolchain) = cross_toolchain {
        path.push(toolchain);
    }
    path.push(BUILD_CONFIGURATION);
    path.push(LIBRARY_TARGET);
    BuildOutputLocation(path)
}

/// Kind of compiled artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    SharedLibrary,
    Dll,
}

/// One file the build must produce, and the name it gets in the package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSpec {
    pub kind: ArtifactKind,
    /// File name the toolchain writes into the build output location.
    pub source_name: &'static str,
    /// File name under the package's `lib/` directory.
    pub packaged_name: &'static str,
}

impl ArtifactSpec {
    /// Whether the packaged name differs from the toolchain's name.
    pub fn needs_rename(&self) -> bool {
        self.source_name != self.packaged_name
    }
}

/// Artifacts expected for an OS. Exactly one shared library per platform.
pub fn expected_artifacts(os: TargetOs) -> Vec<ArtifactSpec> {
    let spec = match os {
        TargetOs::Windows => ArtifactSpec {
            kind: ArtifactKind::Dll,
            source_name: "objectbox-c.dll",
            packaged_name: "objectbox.dll",
        },
        TargetOs::Linux => ArtifactSpec {
            kind: ArtifactKind::SharedLibrary,
            source_name: "libobjectbox.so",
            packaged_name: "libobjectbox.so",
        },
        TargetOs::Macos => ArtifactSpec {
            kind: ArtifactKind::SharedLibrary,
            source_name: "libobjectbox.dylib",
            packaged_name: "libobjectbox.dylib",
        },
    };
    vec![spec]
}

/// A test executable produced by the native build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TestBinary {
    pub name: &'static str,
    /// Path relative to the build output location.
    pub relative_path: &'static str,
}

/// Test suites run after a native Unix build, in execution order.
pub fn test_binaries() -> [TestBinary; 2] {
    [
        TestBinary {
            name: "objectbox-c-test",
            relative_path: "objectbox-c-test",
        },
        TestBinary {
            name: "objectbox-c-gen-test",
            relative_path: "src-test-gen/objectbox-c-gen-test",
        },
    ]
}
