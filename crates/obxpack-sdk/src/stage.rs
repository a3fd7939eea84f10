//! Packaging of build artifacts and headers.
//!
//! The package tree has two subtrees:
//!
//! ```text
//! <package>/
//! ├── include/   # headers, relative paths preserved
//! └── lib/       # libraries under their canonical names
//! ```
//!
//! All inputs are validated before the tree is touched, and the new tree is
//! assembled in a scratch directory next to `include/` and `lib/` before it is
//! moved into place. A failed stage leaves the previous package as it was.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::layout::{ArtifactSpec, BuildOutputLocation, HEADER_DIR};
use crate::strategy::strategy_for;
use crate::types::{PackError, TargetDescriptor};

const STAGING_PREFIX: &str = ".obxpack-stage-";
const SCRATCH_PREFIX: &str = ".obxpack-package-";

/// The `include/` + `lib/` output tree.
#[derive(Debug, Clone)]
pub struct PackageLayout {
    root: PathBuf,
}

impl PackageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn include_dir(&self) -> PathBuf {
        self.root.join("include")
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.root.join("lib")
    }

    fn subtrees(&self) -> [PathBuf; 2] {
        [self.include_dir(), self.lib_dir()]
    }

    /// Moves the subtrees of `staged` into place, replacing those of a
    /// previous run. Replaced subtrees are parked in `trash`.
    ///
    /// Both layouts must live on the same filesystem so each move is a rename.
    fn replace_with(&self, staged: &PackageLayout, trash: &Path) -> Result<(), PackError> {
        for (dest, source) in self.subtrees().into_iter().zip(staged.subtrees()) {
            if dest.exists() {
                let parked = trash.join(dest.file_name().unwrap_or_default());
                fs::rename(&dest, &parked).map_err(|e| PackError::fs("move aside", &dest, e))?;
            }
            fs::rename(&source, &dest).map_err(|e| PackError::fs("move into place", &source, e))?;
        }
        Ok(())
    }
}

/// Files written by a stage operation, relative to the package root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub package_dir: PathBuf,
    pub libraries: Vec<PathBuf>,
    pub headers: Vec<PathBuf>,
}

/// Copies validated artifacts and headers into a [`PackageLayout`].
pub struct ArtifactStager {
    library_root: PathBuf,
    package: PackageLayout,
    header_extensions: Vec<String>,
    staging_root: Option<PathBuf>,
}

impl ArtifactStager {
    /// Creates a stager reading from `library_root` and writing to `package_dir`.
    pub fn new(library_root: impl Into<PathBuf>, package_dir: impl Into<PathBuf>) -> Self {
        Self {
            library_root: library_root.into(),
            package: PackageLayout::new(package_dir),
            header_extensions: vec!["h".to_string()],
            staging_root: None,
        }
    }

    /// File extensions (without dot) treated as public headers. Default: `["h"]`.
    pub fn header_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Parent directory for the throwaway rename directory.
    ///
    /// Defaults to the system temp directory.
    pub fn staging_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(dir.into());
        self
    }

    pub fn package(&self) -> &PackageLayout {
        &self.package
    }

    /// Stages the artifacts expected for `target` from `location`.
    pub fn stage(
        &self,
        location: &BuildOutputLocation,
        target: &TargetDescriptor,
    ) -> Result<StageReport, PackError> {
        let artifacts = strategy_for(target).expected_artifacts();
        self.stage_artifacts(location, &artifacts)
    }

    /// Stages an explicit artifact set.
    ///
    /// # Errors
    ///
    /// [`PackError::MissingArtifact`] if any artifact or the header directory
    /// is absent. Nothing is written in that case.
    pub fn stage_artifacts(
        &self,
        location: &BuildOutputLocation,
        artifacts: &[ArtifactSpec],
    ) -> Result<StageReport, PackError> {
        let build_dir = location.under(&self.library_root);

        let mut sources = Vec::with_capacity(artifacts.len());
        for spec in artifacts {
            let source = build_dir.join(spec.source_name);
            if !source.is_file() {
                return Err(PackError::MissingArtifact { path: source });
            }
            sources.push((spec, source));
        }

        let header_dir = self.library_root.join(HEADER_DIR);
        if !header_dir.is_dir() {
            return Err(PackError::MissingArtifact { path: header_dir });
        }
        let headers = self.collect_headers(&header_dir)?;

        tracing::info!(package = %self.package.root().display(), "staging package");
        let root = self.package.root();
        fs::create_dir_all(root).map_err(|e| PackError::fs("create", root, e))?;
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(root)
            .map_err(|e| PackError::fs("create scratch directory in", root, e))?;
        let staged = PackageLayout::new(scratch.path().join("new"));
        let trash = scratch.path().join("old");
        for dir in staged.subtrees().iter().chain([&trash]) {
            fs::create_dir_all(dir).map_err(|e| PackError::fs("create", dir, e))?;
        }

        let mut report = StageReport {
            package_dir: root.to_path_buf(),
            ..StageReport::default()
        };

        let lib_dir = staged.lib_dir();
        for (spec, source) in sources {
            let dest = lib_dir.join(spec.packaged_name);
            if spec.needs_rename() {
                self.copy_renamed(&source, spec.packaged_name, &dest)?;
            } else {
                copy_file(&source, &dest)?;
            }
            report.libraries.push(Path::new("lib").join(spec.packaged_name));
        }

        let include_dir = staged.include_dir();
        for relative in headers {
            let dest = include_dir.join(&relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| PackError::fs("create", parent, e))?;
            }
            copy_file(&header_dir.join(&relative), &dest)?;
            report.headers.push(Path::new("include").join(relative));
        }

        self.package.replace_with(&staged, &trash)?;
        let scratch_path = scratch.path().to_path_buf();
        scratch
            .close()
            .map_err(|e| PackError::fs("remove", scratch_path, e))?;

        report.libraries.sort();
        Ok(report)
    }

    /// Routes a file through a scratch directory so it only ever appears in
    /// the package under its canonical name.
    fn copy_renamed(&self, source: &Path, canonical: &str, dest: &Path) -> Result<(), PackError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_PREFIX);
        let staging = match &self.staging_root {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
        .map_err(|e| {
            PackError::fs(
                "create staging directory in",
                self.staging_root.clone().unwrap_or_else(std::env::temp_dir),
                e,
            )
        })?;

        let renamed = staging.path().join(canonical);
        copy_file(source, &renamed)?;
        copy_file(&renamed, dest)?;

        let staging_path = staging.path().to_path_buf();
        staging
            .close()
            .map_err(|e| PackError::fs("remove", staging_path, e))
    }

    /// Header paths relative to `header_dir`, in a stable order.
    fn collect_headers(&self, header_dir: &Path) -> Result<Vec<PathBuf>, PackError> {
        let mut headers = Vec::new();
        for entry in WalkDir::new(header_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(header_dir).to_path_buf();
                PackError::fs("read", path, e.into())
            })?;
            if !entry.file_type().is_file() || !self.is_header(entry.path()) {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(header_dir) {
                headers.push(relative.to_path_buf());
            }
        }
        Ok(headers)
    }

    fn is_header(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.header_extensions.iter().any(|h| h == ext))
    }
}

fn copy_file(source: &Path, dest: &Path) -> Result<(), PackError> {
    fs::copy(source, dest).map_err(|e| PackError::fs("copy", source, e))?;
    tracing::debug!(from = %source.display(), to = %dest.display(), "copied");
    Ok(())
}
