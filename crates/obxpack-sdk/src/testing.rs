//! Execution of the native test suites.
//!
//! Each test binary runs in its own freshly created working directory below
//! the build output location. The directory is owned by a [`TestJob`] and is
//! removed when the job ends, whatever the binary did.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::layout::{test_binaries, BuildOutputLocation, TestBinary};
use crate::process;
use crate::strategy::{strategy_for, TargetStrategy};
use crate::types::{PackError, SkipReason, TargetDescriptor};

/// Default time budget per test binary.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const WORKDIR_PREFIX: &str = "test-run-";

/// Outcome of a single test binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    /// Non-zero exit or killed by a signal (`code` is `None` then).
    Failed { code: Option<i32>, detail: String },
    TimedOut,
    /// The binary could not be executed at all.
    Error { message: String },
}

impl TestStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, TestStatus::Passed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub name: String,
    pub executable: PathBuf,
    #[serde(flatten)]
    pub status: TestStatus,
    pub duration_ms: u64,
}

/// Aggregated result of the test stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TestReport {
    Skipped { skip: SkipReason },
    Ran {
        started_at: String,
        results: Vec<TestResult>,
    },
}

impl TestReport {
    pub fn skipped(skip: SkipReason) -> Self {
        TestReport::Skipped { skip }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TestReport::Skipped { .. })
    }

    /// `false` if any executed binary did not pass. Skipped reports succeed.
    pub fn is_success(&self) -> bool {
        match self {
            TestReport::Skipped { .. } => true,
            TestReport::Ran { results, .. } => results.iter().all(|r| r.status.is_passed()),
        }
    }

    pub fn results(&self) -> &[TestResult] {
        match self {
            TestReport::Skipped { .. } => &[],
            TestReport::Ran { results, .. } => results,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestResult> {
        self.results().iter().filter(|r| !r.status.is_passed())
    }
}

/// One test binary bound to an isolated working directory.
///
/// The directory is removed when the job is dropped.
#[derive(Debug)]
pub struct TestJob {
    name: String,
    executable: PathBuf,
    workdir: TempDir,
}

impl TestJob {
    /// Creates a uniquely named working directory under `parent`.
    pub fn create(
        name: impl Into<String>,
        executable: impl Into<PathBuf>,
        parent: &Path,
    ) -> Result<Self, PackError> {
        let workdir = tempfile::Builder::new()
            .prefix(WORKDIR_PREFIX)
            .tempdir_in(parent)
            .map_err(|e| PackError::fs("create test directory in", parent, e))?;
        Ok(Self {
            name: name.into(),
            executable: executable.into(),
            workdir,
        })
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Runs the binary with no arguments and removes the working directory.
    pub fn run(self, timeout: Duration) -> TestResult {
        let mut cmd = std::process::Command::new(&self.executable);
        cmd.current_dir(self.workdir.path());

        tracing::info!(test = %self.name, workdir = %self.workdir.path().display(), "running test binary");
        let started = std::time::Instant::now();
        let status = match process::run_captured(cmd, timeout) {
            Ok(output) if output.success() => TestStatus::Passed,
            Ok(output) => {
                tracing::warn!(
                    test = %self.name,
                    status = %output.status,
                    stderr = %output.stderr,
                    "test binary failed"
                );
                TestStatus::Failed {
                    code: output.status.code(),
                    detail: output.status.to_string(),
                }
            }
            Err(PackError::Timeout { .. }) => {
                tracing::warn!(test = %self.name, timeout_secs = timeout.as_secs(), "test binary timed out");
                TestStatus::TimedOut
            }
            Err(e) => {
                tracing::warn!(test = %self.name, error = %e, "test binary could not run");
                TestStatus::Error {
                    message: e.to_string(),
                }
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let workdir = self.workdir.path().to_path_buf();
        if let Err(e) = self.workdir.close() {
            tracing::warn!(dir = %workdir.display(), error = %e, "failed to remove test directory");
        }

        TestResult {
            name: self.name,
            executable: self.executable,
            status,
            duration_ms,
        }
    }
}

/// Runs the native test suites for a target.
pub struct TestRunner {
    library_root: PathBuf,
    timeout: Duration,
}

impl TestRunner {
    pub fn new(library_root: impl Into<PathBuf>) -> Self {
        Self {
            library_root: library_root.into(),
            timeout: DEFAULT_TEST_TIMEOUT,
        }
    }

    /// Sets the time budget for each test binary
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs every test binary found at `location`.
    ///
    /// Skipped when `cross_compiling` is set or the target has no test
    /// execution path (Windows). A failing binary does not stop the others.
    ///
    /// # Errors
    ///
    /// [`PackError::MissingArtifact`] when a test binary does not exist.
    pub fn run_tests(
        &self,
        location: &BuildOutputLocation,
        target: &TargetDescriptor,
        cross_compiling: bool,
    ) -> Result<TestReport, PackError> {
        self.run_tests_with(location, strategy_for(target).as_ref(), cross_compiling)
    }

    /// Same as [`TestRunner::run_tests`] with an explicit strategy.
    pub fn run_tests_with(
        &self,
        location: &BuildOutputLocation,
        strategy: &dyn TargetStrategy,
        cross_compiling: bool,
    ) -> Result<TestReport, PackError> {
        if cross_compiling {
            tracing::info!("skipping tests: cross-compilation");
            return Ok(TestReport::skipped(SkipReason::CrossCompilation));
        }
        if let Some(skip) = strategy.test_skip_reason() {
            tracing::info!(strategy = strategy.name(), reason = %skip, "skipping tests");
            return Ok(TestReport::skipped(skip));
        }

        let build_dir = std::path::absolute(location.under(&self.library_root))
            .map_err(|e| PackError::fs("resolve", location.relative(), e))?;
        let started_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();

        let mut results = Vec::new();
        for binary in test_binaries() {
            results.push(self.run_one(&build_dir, binary)?);
        }

        Ok(TestReport::Ran {
            started_at,
            results,
        })
    }

    fn run_one(&self, build_dir: &Path, binary: TestBinary) -> Result<TestResult, PackError> {
        let executable = build_dir.join(binary.relative_path);
        if !executable.is_file() {
            return Err(PackError::MissingArtifact { path: executable });
        }
        let job = TestJob::create(binary.name, executable, build_dir)?;
        Ok(job.run(self.timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::resolve;
    use crate::types::TargetOs;

    #[test]
    fn test_cross_compiling_is_skipped_without_binaries() {
        let root = TempDir::new().unwrap();
        let target = TargetDescriptor::new(TargetOs::Linux, "armv7", Some("arm-toolchain".into()));
        let report = TestRunner::new(root.path())
            .run_tests(&resolve(&target), &target, target.is_cross_compiling())
            .unwrap();
        assert_eq!(report, TestReport::skipped(SkipReason::CrossCompilation));
        assert!(report.is_success());
    }

    #[test]
    fn test_cross_flag_wins_over_native_descriptor() {
        let root = TempDir::new().unwrap();
        let target = TargetDescriptor::new(TargetOs::Linux, "x86_64", None);
        let report = TestRunner::new(root.path())
            .run_tests(&resolve(&target), &target, true)
            .unwrap();
        assert!(report.is_skipped());
    }

    #[test]
    fn test_windows_is_skipped() {
        let root = TempDir::new().unwrap();
        let target = TargetDescriptor::new(TargetOs::Windows, "x86_64", None);
        let report = TestRunner::new(root.path())
            .run_tests(&resolve(&target), &target, false)
            .unwrap();
        assert_eq!(
            report,
            TestReport::skipped(SkipReason::UnsupportedPlatform(TargetOs::Windows))
        );
    }

    #[test]
    fn test_explicit_strategy_decides_skip() {
        struct NoTests(crate::strategy::UnixStrategy);

        impl TargetStrategy for NoTests {
            fn name(&self) -> &'static str {
                "no-tests"
            }
            fn resolve_location(&self) -> BuildOutputLocation {
                self.0.resolve_location()
            }
            fn build_plan(&self, library_root: &Path) -> crate::strategy::BuildPlan {
                self.0.build_plan(library_root)
            }
            fn expected_artifacts(&self) -> Vec<crate::layout::ArtifactSpec> {
                self.0.expected_artifacts()
            }
            fn test_skip_reason(&self) -> Option<SkipReason> {
                Some(SkipReason::Disabled)
            }
        }

        // No test binaries exist, so running them would fail with MissingArtifact.
        let root = TempDir::new().unwrap();
        let strategy = NoTests(crate::strategy::UnixStrategy::new(TargetOs::Linux, None));
        let report = TestRunner::new(root.path())
            .run_tests_with(&strategy.resolve_location(), &strategy, false)
            .unwrap();
        assert_eq!(report, TestReport::skipped(SkipReason::Disabled));
    }

    #[test]
    fn test_missing_binary() {
        let root = TempDir::new().unwrap();
        let target = TargetDescriptor::new(TargetOs::Linux, "x86_64", None);
        let location = resolve(&target);
        std::fs::create_dir_all(location.under(root.path())).unwrap();

        let err = TestRunner::new(root.path())
            .run_tests(&location, &target, false)
            .unwrap_err();
        assert!(matches!(err, PackError::MissingArtifact { ref path } if path.ends_with("objectbox-c-test")));
    }

    #[test]
    fn test_job_removes_workdir_when_binary_cannot_start() {
        let root = TempDir::new().unwrap();
        let job = TestJob::create("ghost", root.path().join("does-not-exist"), root.path()).unwrap();
        let workdir = job.workdir().to_path_buf();
        assert!(workdir.is_dir());

        let result = job.run(Duration::from_secs(5));
        assert!(matches!(result.status, TestStatus::Error { .. }));
        assert!(!workdir.exists());
    }

    #[test]
    fn test_report_serializes_outcome() {
        let report = TestReport::skipped(SkipReason::CrossCompilation);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"outcome\":\"skipped\""));
        assert!(json.contains("cross_compilation"));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::test_support::write_script;
        use std::fs;

        fn setup(first: &str, second: &str) -> (TempDir, TargetDescriptor, BuildOutputLocation) {
            let root = TempDir::new().unwrap();
            let target = TargetDescriptor::new(TargetOs::Linux, "x86_64", None);
            let location = resolve(&target);
            let dir = location.under(root.path());
            write_script(&dir.join("objectbox-c-test"), first);
            write_script(&dir.join("src-test-gen/objectbox-c-gen-test"), second);
            (root, target, location)
        }

        fn leftover_workdirs(dir: &Path) -> usize {
            fs::read_dir(dir)
                .unwrap()
                .filter(|e| {
                    e.as_ref()
                        .unwrap()
                        .file_name()
                        .to_string_lossy()
                        .starts_with(WORKDIR_PREFIX)
                })
                .count()
        }

        #[test]
        fn test_all_passing() {
            let (root, target, location) = setup("exit 0", "exit 0");
            let report = TestRunner::new(root.path())
                .run_tests(&location, &target, false)
                .unwrap();
            assert!(report.is_success());
            assert_eq!(report.results().len(), 2);
            assert_eq!(report.results()[0].name, "objectbox-c-test");
            assert_eq!(report.results()[1].name, "objectbox-c-gen-test");
        }

        #[test]
        fn test_runs_in_fresh_isolated_directory() {
            let marker_dir = TempDir::new().unwrap();
            let record = marker_dir.path().join("cwd.txt");
            let script = format!(
                "test -z \"$(ls -A)\" || exit 9\ntouch objectbox.mdb\npwd > '{}'",
                record.display()
            );
            let (root, target, location) = setup(&script, &script);

            let report = TestRunner::new(root.path())
                .run_tests(&location, &target, false)
                .unwrap();
            assert!(report.is_success(), "{report:?}");

            let cwd = PathBuf::from(fs::read_to_string(&record).unwrap().trim());
            assert!(cwd.starts_with(fs::canonicalize(location.under(root.path())).unwrap()));
            assert!(!cwd.exists());
        }

        #[test]
        fn test_failures_do_not_stop_later_binaries() {
            let (root, target, location) = setup("exit 1", "exit 0");
            let report = TestRunner::new(root.path())
                .run_tests(&location, &target, false)
                .unwrap();

            assert!(!report.is_success());
            let results = report.results();
            assert!(matches!(results[0].status, TestStatus::Failed { code: Some(1), .. }));
            assert!(results[1].status.is_passed());
            assert_eq!(report.failures().count(), 1);
        }

        #[test]
        fn test_crashing_binary_still_cleans_up() {
            let (root, target, location) = setup("touch core\nkill -s SEGV $$", "kill -s ABRT $$");
            let report = TestRunner::new(root.path())
                .run_tests(&location, &target, false)
                .unwrap();

            assert!(!report.is_success());
            for result in report.results() {
                assert!(matches!(result.status, TestStatus::Failed { code: None, .. }));
            }
            assert_eq!(leftover_workdirs(&location.under(root.path())), 0);
        }

        #[test]
        fn test_hanging_binary_times_out_and_cleans_up() {
            let (root, target, location) = setup("exec sleep 30", "exit 0");
            let report = TestRunner::new(root.path())
                .timeout(Duration::from_millis(300))
                .run_tests(&location, &target, false)
                .unwrap();

            assert_eq!(report.results()[0].status, TestStatus::TimedOut);
            assert!(report.results()[1].status.is_passed());
            assert_eq!(leftover_workdirs(&location.under(root.path())), 0);
        }
    }
}
