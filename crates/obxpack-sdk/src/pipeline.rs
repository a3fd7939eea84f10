//! The resolve → build → stage → test sequence.
//!
//! Stages run strictly one after another; each depends on the filesystem
//! state left by the previous one. The first fatal error stops the pipeline.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::builder::{validate_library_root, BuildInvoker, BuildOutcome, DEFAULT_BUILD_TIMEOUT};
use crate::layout::BuildOutputLocation;
use crate::stage::{ArtifactStager, StageReport};
use crate::strategy::{strategy_for, TargetStrategy};
use crate::testing::{TestReport, TestRunner, DEFAULT_TEST_TIMEOUT};
use crate::types::{PackError, SkipReason, TargetDescriptor};

/// Everything a pipeline run did.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub target: TargetDescriptor,
    pub location: BuildOutputLocation,
    pub build: BuildOutcome,
    /// `None` in dry-run mode.
    pub stage: Option<StageReport>,
    pub tests: TestReport,
}

impl PipelineReport {
    /// Process exit code: 0 unless a test binary failed.
    pub fn exit_code(&self) -> i32 {
        if self.tests.is_success() { 0 } else { 1 }
    }

    pub fn to_json(&self) -> Result<String, PackError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Packages the native library for one target.
///
/// # Example
///
/// ```ignore
/// use obxpack_sdk::{Pipeline, TargetDescriptor};
///
/// let report = Pipeline::new(TargetDescriptor::host()?, "..", "package")
///     .skip_tests(false)
///     .run()?;
/// std::process::exit(report.exit_code());
/// ```
pub struct Pipeline {
    target: TargetDescriptor,
    library_root: PathBuf,
    package_dir: PathBuf,
    header_extensions: Vec<String>,
    build_timeout: Duration,
    test_timeout: Duration,
    skip_tests: bool,
    dry_run: bool,
    strategy: Option<Box<dyn TargetStrategy>>,
}

impl Pipeline {
    pub fn new(
        target: TargetDescriptor,
        library_root: impl Into<PathBuf>,
        package_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            target,
            library_root: library_root.into(),
            package_dir: package_dir.into(),
            header_extensions: vec!["h".to_string()],
            build_timeout: DEFAULT_BUILD_TIMEOUT,
            test_timeout: DEFAULT_TEST_TIMEOUT,
            skip_tests: false,
            dry_run: false,
            strategy: None,
        }
    }

    /// Replaces the strategy normally chosen from the target OS.
    pub fn strategy(mut self, strategy: Box<dyn TargetStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn header_extensions(mut self, extensions: Vec<String>) -> Self {
        self.header_extensions = extensions;
        self
    }

    pub fn build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = timeout;
        self
    }

    pub fn test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    pub fn skip_tests(mut self, skip: bool) -> Self {
        self.skip_tests = skip;
        self
    }

    /// Resolve and print the build command only; nothing is written.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn run(&self) -> Result<PipelineReport, PackError> {
        let library_root = validate_library_root(&self.library_root)?;
        let default_strategy;
        let strategy: &dyn TargetStrategy = match &self.strategy {
            Some(strategy) => strategy.as_ref(),
            None => {
                default_strategy = strategy_for(&self.target);
                default_strategy.as_ref()
            }
        };

        let location = strategy.resolve_location();
        tracing::info!(platform = %self.target, location = %location, "resolved build output location");

        let build = BuildInvoker::new(&library_root)
            .timeout(self.build_timeout)
            .dry_run(self.dry_run)
            .invoke_with(strategy)?;

        if self.dry_run {
            return Ok(PipelineReport {
                target: self.target.clone(),
                location,
                build,
                stage: None,
                tests: TestReport::skipped(SkipReason::DryRun),
            });
        }

        let stage = ArtifactStager::new(&library_root, &self.package_dir)
            .header_extensions(self.header_extensions.clone())
            .stage_artifacts(&location, &strategy.expected_artifacts())?;
        tracing::info!(
            libraries = stage.libraries.len(),
            headers = stage.headers.len(),
            "package staged"
        );

        let tests = if self.skip_tests {
            TestReport::skipped(SkipReason::Disabled)
        } else {
            TestRunner::new(&library_root)
                .timeout(self.test_timeout)
                .run_tests_with(&location, strategy, self.target.is_cross_compiling())?
        };

        Ok(PipelineReport {
            target: self.target.clone(),
            location,
            build,
            stage: Some(stage),
            tests,
        })
    }
}
