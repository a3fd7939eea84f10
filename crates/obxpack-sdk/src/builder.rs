//! Build invocation
//!
//! Runs the native library's own build (`build.sh` or `build.bat`) from the
//! library root and waits for it. Only the exit code matters; output is
//! captured so it can be attached to a [`PackError::BuildFailed`].

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::process;
use crate::strategy::{strategy_for, BuildPlan, TargetStrategy};
use crate::types::{PackError, SkipReason, TargetDescriptor};

/// Default time budget for the external build.
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Result of the build stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildOutcome {
    /// The build command ran and exited with status 0.
    Built { command: String, duration_ms: u64 },
    /// The build was intentionally not run.
    Skipped { skip: SkipReason },
    /// Dry run: the command that would have run.
    DryRun { command: String },
}

impl BuildOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, BuildOutcome::Skipped { .. })
    }
}

/// Checks that the library root is an existing directory and makes it absolute.
pub fn validate_library_root(library_root: &Path) -> Result<PathBuf, PackError> {
    if !library_root.exists() {
        return Err(PackError::Config(format!(
            "Library root does not exist: {}\n\n\
             Run from the packaging directory or pass --library-root.",
            library_root.display()
        )));
    }
    if !library_root.is_dir() {
        return Err(PackError::Config(format!(
            "Library root is not a directory: {}",
            library_root.display()
        )));
    }
    std::path::absolute(library_root).map_err(|e| PackError::fs("resolve", library_root, e))
}

/// Runs the platform build for a target.
pub struct BuildInvoker {
    /// Directory containing `build.sh` / `build.bat`
    library_root: PathBuf,
    timeout: Duration,
    dry_run: bool,
}

impl BuildInvoker {
    /// Creates a new invoker
    ///
    /// # Arguments
    ///
    /// * `library_root` - Root of the native library checkout
    pub fn new(library_root: impl Into<PathBuf>) -> Self {
        Self {
            library_root: library_root.into(),
            timeout: DEFAULT_BUILD_TIMEOUT,
            dry_run: false,
        }
    }

    /// Sets the time budget for the build process
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Logs the build command instead of running it
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Builds the library for `target`.
    ///
    /// Cross-compiled Unix targets are skipped: the artifacts are expected to
    /// have been produced by the cross toolchain already.
    ///
    /// # Returns
    ///
    /// * `Ok(BuildOutcome)` if the build succeeded or was skipped
    /// * `Err(PackError)` if the build failed, timed out or could not start
    pub fn invoke(&self, target: &TargetDescriptor) -> Result<BuildOutcome, PackError> {
        self.invoke_with(strategy_for(target).as_ref())
    }

    /// Same as [`BuildInvoker::invoke`] with an explicit strategy.
    pub fn invoke_with(&self, strategy: &dyn TargetStrategy) -> Result<BuildOutcome, PackError> {
        let library_root = validate_library_root(&self.library_root)?;

        let command = match strategy.build_plan(&library_root) {
            BuildPlan::Skip(skip) => {
                tracing::info!(strategy = strategy.name(), reason = %skip, "skipping native build");
                return Ok(BuildOutcome::Skipped { skip });
            }
            BuildPlan::Run(command) => command,
        };

        if self.dry_run {
            tracing::info!(command = %command, cwd = %command.cwd.display(), "dry run: not building");
            return Ok(BuildOutcome::DryRun {
                command: command.to_string(),
            });
        }

        tracing::info!(command = %command, cwd = %command.cwd.display(), "building native library");
        let output = process::run_captured(command.to_command(), self.timeout)?.ensure_success()?;
        tracing::debug!(stdout = %output.stdout, "build output");

        Ok(BuildOutcome::Built {
            command: command.to_string(),
            duration_ms: output.elapsed.as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetOs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_library_root() {
        let invoker = BuildInvoker::new("/nonexistent/objectbox-c");
        let target = TargetDescriptor::new(TargetOs::Linux, "x86_64", None);
        let err = invoker.invoke(&target).unwrap_err();
        assert!(matches!(err, PackError::Config(_)));
        assert!(err.to_string().contains("/nonexistent/objectbox-c"));
    }

    #[test]
    fn test_cross_compilation_skips_build() {
        let root = TempDir::new().unwrap();
        let target = TargetDescriptor::new(TargetOs::Linux, "armv7", Some("arm-toolchain".into()));
        let outcome = BuildInvoker::new(root.path()).invoke(&target).unwrap();
        assert_eq!(
            outcome,
            BuildOutcome::Skipped {
                skip: SkipReason::CrossCompilation
            }
        );
    }

    #[test]
    fn test_dry_run_does_not_execute() {
        let root = TempDir::new().unwrap();
        // No build.sh exists, so executing would fail to spawn.
        let target = TargetDescriptor::new(TargetOs::Linux, "x86_64", None);
        let outcome = BuildInvoker::new(root.path())
            .dry_run(true)
            .invoke(&target)
            .unwrap();
        let BuildOutcome::DryRun { command } = outcome else {
            panic!("expected dry run outcome");
        };
        assert!(command.ends_with("build.sh release"));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::test_support::write_script;

        #[test]
        fn test_successful_build_runs_in_library_root() {
            let root = TempDir::new().unwrap();
            write_script(&root.path().join("build.sh"), "echo \"$1\" > build-arg.txt");

            let target = TargetDescriptor::new(TargetOs::Linux, "x86_64", None);
            let outcome = BuildInvoker::new(root.path()).invoke(&target).unwrap();

            assert!(matches!(outcome, BuildOutcome::Built { .. }));
            let arg = std::fs::read_to_string(root.path().join("build-arg.txt")).unwrap();
            assert_eq!(arg.trim(), "release");
        }

        #[test]
        fn test_failed_build_carries_output() {
            let root = TempDir::new().unwrap();
            write_script(
                &root.path().join("build.sh"),
                "echo 'cmake: compiler not found' >&2\nexit 2",
            );

            let target = TargetDescriptor::new(TargetOs::Macos, "aarch64", None);
            let err = BuildInvoker::new(root.path()).invoke(&target).unwrap_err();

            let PackError::BuildFailed { stderr, status, .. } = &err else {
                panic!("expected BuildFailed, got {err:?}");
            };
            assert!(stderr.contains("compiler not found"));
            assert!(status.contains('2'));
        }

        #[test]
        fn test_cross_compilation_never_runs_script() {
            let root = TempDir::new().unwrap();
            write_script(&root.path().join("build.sh"), "touch ran.txt");

            let target =
                TargetDescriptor::new(TargetOs::Linux, "aarch64", Some("arm-toolchain".into()));
            let outcome = BuildInvoker::new(root.path()).invoke(&target).unwrap();

            assert!(outcome.is_skipped());
            assert!(!root.path().join("ran.txt").exists());
        }

        #[test]
        fn test_build_timeout() {
            let root = TempDir::new().unwrap();
            write_script(&root.path().join("build.sh"), "exec sleep 30");

            let target = TargetDescriptor::new(TargetOs::Linux, "x86_64", None);
            let err = BuildInvoker::new(root.path())
                .timeout(Duration::from_millis(200))
                .invoke(&target)
                .unwrap_err();
            assert!(matches!(err, PackError::Timeout { .. }));
        }
    }
}
