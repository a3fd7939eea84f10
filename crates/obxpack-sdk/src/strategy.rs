//! Per-platform build strategies.
//!
//! The pipeline never branches on the target OS itself. It asks a
//! [`TargetStrategy`] where outputs land, how to build, which artifacts to
//! expect and whether tests can run.
//!
//! | Strategy | Build | Tests |
//! |----------|-------|-------|
//! | [`WindowsStrategy`] | `cmd /c build.bat {arch} Release objectbox-c` | unsupported |
//! | [`UnixStrategy`] | `./build.sh release` | run natively |
//! | [`UnixStrategy`], cross | skipped | skipped |

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

use crate::layout::{self, ArtifactSpec, BuildOutputLocation, BUILD_CONFIGURATION, LIBRARY_TARGET};
use crate::types::{SkipReason, TargetDescriptor, TargetOs};

/// An external build command, bound to the directory it runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl BuildCommand {
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&self.cwd);
        cmd
    }
}

impl fmt::Display for BuildCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// What the build stage should do for a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildPlan {
    Run(BuildCommand),
    Skip(SkipReason),
}

/// Platform-specific decisions of the pipeline.
pub trait TargetStrategy {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Where the build deposits its artifacts, relative to the library root.
    fn resolve_location(&self) -> BuildOutputLocation;

    /// How to invoke the build from `library_root`.
    fn build_plan(&self, library_root: &Path) -> BuildPlan;

    /// Files the build must produce.
    fn expected_artifacts(&self) -> Vec<ArtifactSpec>;

    /// `Some` when test binaries cannot be executed for this target.
    fn test_skip_reason(&self) -> Option<SkipReason>;
}

/// Visual Studio build via `build.bat`.
#[derive(Debug, Clone)]
pub struct WindowsStrategy {
    arch: String,
}

impl WindowsStrategy {
    pub fn new(arch: impl Into<String>) -> Self {
        Self { arch: arch.into() }
    }
}

impl TargetStrategy for WindowsStrategy {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn resolve_location(&self) -> BuildOutputLocation {
        layout::windows_location(&self.arch)
    }

    fn build_plan(&self, library_root: &Path) -> BuildPlan {
        BuildPlan::Run(BuildCommand {
            program: PathBuf::from("cmd"),
            args: vec![
                "/c".to_string(),
                "build.bat".to_string(),
                layout::arch_alias(&self.arch).to_string(),
                BUILD_CONFIGURATION.to_string(),
                LIBRARY_TARGET.to_string(),
            ],
            cwd: library_root.to_path_buf(),
        })
    }

    fn expected_artifacts(&self) -> Vec<ArtifactSpec> {
        layout::expected_artifacts(TargetOs::Windows)
    }

    fn test_skip_reason(&self) -> Option<SkipReason> {
        Some(SkipReason::UnsupportedPlatform(TargetOs::Windows))
    }
}

/// Linux and macOS build via `build.sh`, optionally cross-compiled.
#[derive(Debug, Clone)]
pub struct UnixStrategy {
    os: TargetOs,
    cross_toolchain: Option<String>,
}

impl UnixStrategy {
    pub fn new(os: TargetOs, cross_toolchain: Option<String>) -> Self {
        Self { os, cross_toolchain }
    }
}

impl TargetStrategy for UnixStrategy {
    fn name(&self) -> &'static str {
        self.os.as_str()
    }

    fn resolve_location(&self) -> BuildOutputLocation {
        layout::unix_location(self.cross_toolchain.as_deref())
    }

    fn build_plan(&self, library_root: &Path) -> BuildPlan {
        if self.cross_toolchain.is_some() {
            return BuildPlan::Skip(SkipReason::CrossCompilation);
        }
        BuildPlan::Run(BuildCommand {
            program: library_root.join("build.sh"),
            args: vec![BUILD_CONFIGURATION.to_ascii_lowercase()],
            cwd: library_root.to_path_buf(),
        })
    }

    fn expected_artifacts(&self) -> Vec<ArtifactSpec> {
        layout::expected_artifacts(self.os)
    }

    fn test_skip_reason(&self) -> Option<SkipReason> {
        self.cross_toolchain
            .as_ref()
            .map(|_| SkipReason::CrossCompilation)
    }
}

/// Picks the strategy for a target.
pub fn strategy_for(target: &TargetDescriptor) -> Box<dyn TargetStrategy> {
    match target.os() {
        TargetOs::Windows => Box::new(WindowsStrategy::new(target.arch())),
        os @ (TargetOs::Linux | TargetOs::Macos) => Box::new(UnixStrategy::new(
            os,
            target.cross_toolchain().map(str::to_string),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_location_matches_resolver() {
        let targets = [
            TargetDescriptor::new(TargetOs::Windows, "x86_64", None),
            TargetDescriptor::new(TargetOs::Linux, "x86_64", None),
            TargetDescriptor::new(TargetOs::Macos, "aarch64", Some("ios".into())),
        ];
        for target in &targets {
            assert_eq!(strategy_for(target).resolve_location(), layout::resolve(target));
        }
    }

    #[test]
    fn test_windows_build_command() {
        let strategy = WindowsStrategy::new("x86_64");
        let BuildPlan::Run(cmd) = strategy.build_plan(Path::new("C:/src/objectbox-c")) else {
            panic!("windows builds are never skipped");
        };
        assert_eq!(cmd.program, PathBuf::from("cmd"));
        assert_eq!(cmd.args, ["/c", "build.bat", "x64", "Release", "objectbox-c"]);
        assert_eq!(cmd.cwd, PathBuf::from("C:/src/objectbox-c"));
        assert_eq!(cmd.to_string(), "cmd /c build.bat x64 Release objectbox-c");
    }

    #[test]
    fn test_unix_build_command() {
        let strategy = UnixStrategy::new(TargetOs::Linux, None);
        let BuildPlan::Run(cmd) = strategy.build_plan(Path::new("/src/objectbox-c")) else {
            panic!("native unix builds run the build script");
        };
        assert_eq!(cmd.program, PathBuf::from("/src/objectbox-c/build.sh"));
        assert_eq!(cmd.args, ["release"]);
        assert_eq!(cmd.cwd, PathBuf::from("/src/objectbox-c"));
    }

    #[test]
    fn test_unix_cross_skips_build_and_tests() {
        let strategy = UnixStrategy::new(TargetOs::Linux, Some("arm-toolchain".into()));
        assert_eq!(
            strategy.build_plan(Path::new("/src")),
            BuildPlan::Skip(SkipReason::CrossCompilation)
        );
        assert_eq!(strategy.test_skip_reason(), Some(SkipReason::CrossCompilation));
    }

    #[test]
    fn test_windows_tests_unsupported() {
        let strategy = WindowsStrategy::new("x86_64");
        assert_eq!(
            strategy.test_skip_reason(),
            Some(SkipReason::UnsupportedPlatform(TargetOs::Windows))
        );
        assert_eq!(UnixStrategy::new(TargetOs::Macos, None).test_skip_reason(), None);
    }
}
