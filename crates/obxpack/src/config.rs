//! Configuration file support for obxpack.
//!
//! Settings that rarely change between invocations (where the library lives,
//! where the package goes, timeouts) can be kept in an `obxpack.toml` instead
//! of being passed as flags every time.
//!
//! ## Configuration File Location
//!
//! The configuration file is searched for in the following order:
//! 1. Current working directory (`./obxpack.toml`)
//! 2. Parent directories (up to the repository root or filesystem root)
//!
//! ## Example Configuration
//!
//! ```toml
//! [library]
//! root = ".."
//!
//! [package]
//! output_dir = "package"
//!
//! [headers]
//! extensions = ["h"]
//!
//! [build]
//! timeout_secs = 3600
//!
//! [test]
//! timeout_secs = 1800
//! enabled = true
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The default configuration file name.
pub const CONFIG_FILE_NAME: &str = "obxpack.toml";

/// Library root used when neither CLI nor config provide one: the packaging
/// directory sits one level below the library checkout.
pub const DEFAULT_LIBRARY_ROOT: &str = "..";

/// Package directory used when neither CLI nor config provide one.
pub const DEFAULT_OUTPUT_DIR: &str = "package";

/// Root configuration structure for `obxpack.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObxpackConfig {
    pub library: LibraryConfig,
    pub package: PackageConfig,
    pub headers: HeadersConfig,
    pub build: BuildConfig,
    pub test: TestConfig,
}

/// Location of the native library checkout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Library root. Relative paths are resolved against the directory
    /// containing the config file.
    pub root: Option<PathBuf>,
}

/// Package output settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Where the `include/` + `lib/` tree is written.
    ///
    /// Defaults to `package/` in the current directory.
    pub output_dir: Option<PathBuf>,
}

/// Header selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadersConfig {
    /// Extensions (without dot) copied from `include/`.
    ///
    /// Defaults to `["h"]`.
    pub extensions: Vec<String>,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["h".to_string()],
        }
    }
}

/// Native build settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Seconds before the build process is killed. Defaults to 3600.
    pub timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            timeout_secs: obxpack_sdk::builder::DEFAULT_BUILD_TIMEOUT.as_secs(),
        }
    }
}

/// Native test settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Seconds before a test binary is killed. Defaults to 1800.
    pub timeout_secs: u64,

    /// Set to `false` to never run the test binaries.
    pub enabled: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: obxpack_sdk::testing::DEFAULT_TEST_TIMEOUT.as_secs(),
            enabled: true,
        }
    }
}

impl ObxpackConfig {
    /// Loads configuration from the specified file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: ObxpackConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Attempts to find and load configuration from the current directory
    /// or any parent directory.
    ///
    /// # Returns
    ///
    /// * `Ok(Some((config, path)))` - Found and loaded configuration with its path
    /// * `Ok(None)` - No configuration file found
    /// * `Err` - If a config file was found but couldn't be parsed
    pub fn discover() -> Result<Option<(Self, PathBuf)>> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&cwd)
    }

    /// Attempts to find and load configuration starting from the specified directory.
    pub fn discover_from(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.is_file() {
                let config = Self::load_from_file(&config_path)?;
                return Ok(Some((config, config_path)));
            }

            // Stop at repository root or filesystem root
            if current.join(".git").exists() || !current.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Generates a starter configuration file as a formatted TOML string.
    pub fn generate_starter_toml() -> String {
        let defaults = Self::default();
        format!(
            r#"# obxpack configuration file
# CLI flags override these settings when provided.

[library]
# Root of the objectbox-c checkout (contains build.sh / build.bat),
# relative to this file.
root = "{library_root}"

[package]
# Output directory for the include/ + lib/ package tree (default: package)
# output_dir = "package"

[headers]
# Header file extensions copied from include/
extensions = ["h"]

[build]
# Seconds before the native build is killed
timeout_secs = {build_timeout}

[test]
# Seconds before a test binary is killed
timeout_secs = {test_timeout}

# Run the native test binaries after packaging (Linux and macOS only)
enabled = true
"#,
            library_root = DEFAULT_LIBRARY_ROOT,
            build_timeout = defaults.build.timeout_secs,
            test_timeout = defaults.test.timeout_secs,
        )
    }
}

/// Configuration resolver that merges config file values with CLI arguments.
///
/// CLI arguments always take precedence over config file values.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    /// Loaded configuration, if any.
    pub config: Option<ObxpackConfig>,

    /// Path to the loaded config file, if any.
    pub config_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// Creates a new resolver by discovering and loading configuration.
    pub fn new() -> Result<Self> {
        match ObxpackConfig::discover()? {
            Some((config, path)) => Ok(Self {
                config: Some(config),
                config_path: Some(path),
            }),
            None => Ok(Self::default()),
        }
    }

    fn config(&self) -> ObxpackConfig {
        self.config.clone().unwrap_or_default()
    }

    /// Library root: CLI, then config (relative to the config file), then `..`.
    pub fn library_root(&self, cli: Option<PathBuf>) -> PathBuf {
        cli.or_else(|| {
            let root = self.config.as_ref()?.library.root.clone()?;
            let base = self.config_path.as_deref().and_then(Path::parent);
            Some(match base {
                Some(base) if root.is_relative() => base.join(root),
                _ => root,
            })
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LIBRARY_ROOT))
    }

    /// Package directory: CLI, then config, then `package`.
    pub fn output_dir(&self, cli: Option<PathBuf>) -> PathBuf {
        cli.or_else(|| self.config.as_ref()?.package.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    pub fn header_extensions(&self) -> Vec<String> {
        self.config().headers.extensions
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.config().build.timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.config().test.timeout_secs)
    }

    pub fn tests_enabled(&self) -> bool {
        self.config().test.enabled
    }
}
