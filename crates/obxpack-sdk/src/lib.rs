//! Packaging SDK for the ObjectBox C library
//!
//! `obxpack-sdk` drives the native library's own build, checks that the
//! expected binaries were produced, assembles a package tree and runs the
//! native test suites. Compilation itself is left to `build.sh` /
//! `build.bat`; this crate only decides what to run and where to look.
//!
//! # Architecture
//!
//! - **Layout**: pure mapping from target to build output paths ([`layout`])
//! - **Strategies**: per-platform decisions behind [`TargetStrategy`]
//! - **Builder**: runs the external build ([`BuildInvoker`])
//! - **Stage**: validates artifacts and writes `include/` + `lib/` ([`ArtifactStager`])
//! - **Testing**: runs test binaries in isolated directories ([`TestRunner`])
//! - **Pipeline**: sequences all of the above ([`Pipeline`])
//!
//! # Example
//!
//! ```ignore
//! use obxpack_sdk::{Pipeline, TargetDescriptor, TargetOs};
//!
//! fn main() -> Result<(), obxpack_sdk::PackError> {
//!     let target = TargetDescriptor::new(TargetOs::Linux, "x86_64", None);
//!     let report = Pipeline::new(target, "..", "package").run()?;
//!
//!     for lib in &report.stage.as_ref().unwrap().libraries {
//!         println!("packaged {}", lib.display());
//!     }
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod builder;
pub mod layout;
pub mod pipeline;
pub mod process;
pub mod stage;
pub mod strategy;
pub mod testing;
pub mod types;

pub use builder::{BuildInvoker, BuildOutcome};
pub use layout::{ArtifactKind, ArtifactSpec, BuildOutputLocation, TestBinary, resolve};
pub use pipeline::{Pipeline, PipelineReport};
pub use stage::{ArtifactStager, PackageLayout, StageReport};
pub use strategy::{BuildCommand, BuildPlan, TargetStrategy, UnixStrategy, WindowsStrategy, strategy_for};
pub use testing::{TestJob, TestReport, TestResult, TestRunner, TestStatus};
pub use types::{PackError, SkipReason, TargetDescriptor, TargetOs};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(all(test, unix))]
pub(crate) mod test_support {
    use std::path::Path;

    /// Writes an executable `#!/bin/sh` script, creating parent directories.
    pub fn write_script(path: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}
