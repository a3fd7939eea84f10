//! # obxpack
//!
//! Command-line packager for the ObjectBox C library.
//!
//! ## Overview
//!
//! `obxpack` is the front end of [`obxpack_sdk`]. It handles:
//!
//! - **Building** - Runs `build.sh release` or `build.bat` for the target
//! - **Packaging** - Copies the shared library and headers into `include/` + `lib/`
//! - **Testing** - Runs the native test suites in throwaway directories
//!
//! ## Quick Start
//!
//! ```bash
//! # Package for the host platform (library checkout one level up)
//! obxpack package
//!
//! # Package artifacts produced by a cross toolchain
//! OBX_CMAKE_TOOLCHAIN=arm-toolchain obxpack package --arch armv7
//!
//! # Show where a target's outputs are expected
//! obxpack resolve --os windows --arch x86_64
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `package` | Build, stage and test |
//! | `resolve` | Print build output location, artifacts and test binaries |
//! | `test` | Run only the native test binaries |
//! | `init` | Write a starter `obxpack.toml` |
//!
//! ## Environment
//!
//! - `OBX_CMAKE_TOOLCHAIN` - cross toolchain identifier (same as `--cross-toolchain`)
//! - `RUST_LOG` - log filter, overrides `--verbose`
//!
//! Variables from `.env.local` in the current directory are loaded first.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use obxpack_sdk::{
    BuildOutcome, Pipeline, PipelineReport, TargetDescriptor, TargetOs, TestReport, TestRunner,
    TestStatus, layout, resolve,
};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

pub mod config;

/// Environment key naming the cross toolchain.
pub const CROSS_TOOLCHAIN_ENV: &str = "OBX_CMAKE_TOOLCHAIN";

/// Builds, stages and tests the ObjectBox C native library.
#[derive(Parser, Debug)]
#[command(name = "obxpack", author, version, about = "ObjectBox C library packager", long_about = None)]
struct Cli {
    /// Print what would be done without actually doing it
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print verbose output including all commands
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the library, stage the package tree and run the native tests.
    Package {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long, help = "Root of the objectbox-c checkout (default: ..)")]
        library_root: Option<PathBuf>,
        #[arg(long, help = "Package output directory (default: package)")]
        output_dir: Option<PathBuf>,
        #[arg(long, help = "Do not run the native test binaries")]
        skip_tests: bool,
        #[arg(long, help = "Write a JSON report to this path")]
        report: Option<PathBuf>,
    },
    /// Print the build output location and expected files for a target.
    Resolve {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long, help = "Print as JSON")]
        json: bool,
    },
    /// Run the native test binaries of an existing build.
    Test {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long, help = "Root of the objectbox-c checkout (default: ..)")]
        library_root: Option<PathBuf>,
        #[arg(long, help = "Write a JSON report to this path")]
        report: Option<PathBuf>,
    },
    /// Scaffold a starter obxpack.toml.
    Init {
        #[arg(long, default_value = config::CONFIG_FILE_NAME)]
        output: PathBuf,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct TargetArgs {
    #[arg(long, value_enum, help = "Target operating system (default: host)")]
    os: Option<OsArg>,
    #[arg(long, help = "Target architecture, e.g. x86_64 (default: host)")]
    arch: Option<String>,
    #[arg(long, help = "Cross toolchain identifier (default: $OBX_CMAKE_TOOLCHAIN)")]
    cross_toolchain: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
#[value(rename_all = "lowercase")]
enum OsArg {
    Linux,
    Macos,
    Windows,
}

impl From<OsArg> for TargetOs {
    fn from(os: OsArg) -> Self {
        match os {
            OsArg::Linux => TargetOs::Linux,
            OsArg::Macos => TargetOs::Macos,
            OsArg::Windows => TargetOs::Windows,
        }
    }
}

/// Parses the command line and runs it. Returns the process exit code.
pub fn run() -> Result<i32> {
    load_dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Package {
            target,
            library_root,
            output_dir,
            skip_tests,
            report,
        } => cmd_package(
            &target,
            library_root,
            output_dir,
            skip_tests,
            report.as_deref(),
            cli.dry_run,
        ),
        Command::Resolve { target, json } => cmd_resolve(&target, json).map(|_| 0),
        Command::Test {
            target,
            library_root,
            report,
        } => cmd_test(&target, library_root, report.as_deref(), cli.dry_run),
        Command::Init { output } => cmd_init(&output).map(|_| 0),
    }
}

fn load_dotenv() {
    let _ = dotenvy::from_path(".env.local");
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

/// Builds the target descriptor once, reading the environment through `env`.
fn resolve_target<F>(args: &TargetArgs, env: F) -> Result<TargetDescriptor>
where
    F: Fn(&str) -> Option<String>,
{
    let os = match args.os {
        Some(os) => os.into(),
        None => TargetOs::host().context("cannot default --os to the host platform")?,
    };
    let arch = args
        .arch
        .clone()
        .unwrap_or_else(|| std::env::consts::ARCH.to_string());
    let cross_toolchain = args
        .cross_toolchain
        .clone()
        .or_else(|| env(CROSS_TOOLCHAIN_ENV));
    Ok(TargetDescriptor::new(os, arch, cross_toolchain))
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn cmd_package(
    target_args: &TargetArgs,
    library_root: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    skip_tests: bool,
    report_path: Option<&Path>,
    dry_run: bool,
) -> Result<i32> {
    let config_resolver = config::ConfigResolver::new()?;
    if let Some(config_path) = &config_resolver.config_path {
        println!("Using config file: {:?}", config_path);
    }

    let target = resolve_target(target_args, process_env)?;
    let library_root = config_resolver.library_root(library_root);
    let output_dir = config_resolver.output_dir(output_dir);
    let skip_tests = skip_tests || !config_resolver.tests_enabled();

    println!("Packaging objectbox-c...");
    println!("  Target: {}", target);
    println!("  Library root: {:?}", library_root);
    println!("  Output: {:?}", output_dir);
    if dry_run {
        println!("  Mode: dry-run (no changes will be made)");
    }

    let report = Pipeline::new(target, &library_root, &output_dir)
        .header_extensions(config_resolver.header_extensions())
        .build_timeout(config_resolver.build_timeout())
        .test_timeout(config_resolver.test_timeout())
        .skip_tests(skip_tests)
        .dry_run(dry_run)
        .run()
        .context("Packaging failed")?;

    print_pipeline_report(&report);
    if let Some(path) = report_path {
        write_json(path, &report)?;
        println!("Report written to {:?}", path);
    }
    Ok(report.exit_code())
}

fn cmd_test(
    target_args: &TargetArgs,
    library_root: Option<PathBuf>,
    report_path: Option<&Path>,
    dry_run: bool,
) -> Result<i32> {
    let config_resolver = config::ConfigResolver::new()?;
    let target = resolve_target(target_args, process_env)?;
    let library_root = config_resolver.library_root(library_root);
    let location = resolve(&target);

    if dry_run {
        println!("Would run test binaries in {:?}", location.under(&library_root));
        return Ok(0);
    }

    let report = TestRunner::new(&library_root)
        .timeout(config_resolver.test_timeout())
        .run_tests(&location, &target, target.is_cross_compiling())
        .context("Running native tests failed")?;

    print_test_report(&report);
    if let Some(path) = report_path {
        write_json(path, &report)?;
        println!("Report written to {:?}", path);
    }
    Ok(if report.is_success() { 0 } else { 1 })
}

fn cmd_resolve(target_args: &TargetArgs, as_json: bool) -> Result<()> {
    let target = resolve_target(target_args, process_env)?;
    let strategy = obxpack_sdk::strategy_for(&target);
    let location = strategy.resolve_location();
    let artifacts = strategy.expected_artifacts();
    let test_binaries = match strategy.test_skip_reason() {
        Some(_) => Vec::new(),
        None => layout::test_binaries().to_vec(),
    };

    if as_json {
        let payload = json!({
            "target": target,
            "location": location,
            "artifacts": artifacts,
            "test_binaries": test_binaries,
            "tests_skipped": strategy.test_skip_reason().map(|r| r.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("Target: {}", target);
    println!("Build output: {}", location);
    for artifact in &artifacts {
        let note = if artifact.needs_rename() { " (renamed)" } else { "" };
        println!(
            "  {} -> lib/{}{}",
            artifact.source_name, artifact.packaged_name, note
        );
    }
    match strategy.test_skip_reason() {
        Some(reason) => println!("Tests: skipped ({})", reason),
        None => {
            println!("Tests:");
            for binary in &test_binaries {
                println!("  {}", binary.relative_path);
            }
        }
    }
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    ensure_can_write(output)?;
    fs::write(output, config::ObxpackConfig::generate_starter_toml())
        .with_context(|| format!("writing file {:?}", output))?;
    println!("Wrote {:?}", output);
    Ok(())
}

fn print_pipeline_report(report: &PipelineReport) {
    println!();
    match &report.build {
        BuildOutcome::Built {
            command,
            duration_ms,
        } => println!("Build: ok ({}, {} ms)", command, duration_ms),
        BuildOutcome::Skipped { skip } => println!("Build: skipped ({})", skip),
        BuildOutcome::DryRun { command } => println!("Build: would run `{}`", command),
    }
    if let Some(stage) = &report.stage {
        println!("Package: {:?}", stage.package_dir);
        for lib in &stage.libraries {
            println!("  {}", lib.display());
        }
        println!("  {} header(s)", stage.headers.len());
    }
    print_test_report(&report.tests);
}

fn print_test_report(report: &TestReport) {
    match report {
        TestReport::Skipped { skip } => println!("Tests: skipped ({})", skip),
        TestReport::Ran { results, .. } => {
            println!("Tests:");
            for result in results {
                let verdict = match &result.status {
                    TestStatus::Passed => "PASS".to_string(),
                    TestStatus::Failed { detail, .. } => format!("FAIL ({})", detail),
                    TestStatus::TimedOut => "FAIL (timed out)".to_string(),
                    TestStatus::Error { message } => format!("ERROR ({})", message),
                };
                println!("  [{}] {} ({} ms)", verdict, result.name, result.duration_ms);
            }
            if report.is_success() {
                println!("All tests passed.");
            } else {
                println!("{} test binary(ies) failed.", report.failures().count());
            }
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating parent directory {:?}", parent))?;
    }
    let contents = serde_json::to_string_pretty(value).context("serializing report")?;
    fs::write(path, contents).with_context(|| format!("writing file {:?}", path))
}

fn ensure_can_write(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("refusing to overwrite existing file: {:?}", path);
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating parent directory {:?}", parent))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_package_command() {
        let cli = Cli::try_parse_from([
            "obxpack",
            "package",
            "--os",
            "windows",
            "--arch",
            "x86_64",
            "--skip-tests",
            "--dry-run",
        ])
        .unwrap();
        assert!(cli.dry_run);
        let Command::Package {
            target, skip_tests, ..
        } = cli.command
        else {
            panic!("expected package command");
        };
        assert_eq!(target.os, Some(OsArg::Windows));
        assert_eq!(target.arch.as_deref(), Some("x86_64"));
        assert!(skip_tests);
    }

    #[test]
    fn cross_toolchain_comes_from_env_when_flag_missing() {
        let args = TargetArgs {
            os: Some(OsArg::Linux),
            arch: Some("armv7".into()),
            cross_toolchain: None,
        };
        let target = resolve_target(&args, |key| {
            (key == CROSS_TOOLCHAIN_ENV).then(|| "arm-toolchain".to_string())
        })
        .unwrap();
        assert_eq!(target.cross_toolchain(), Some("arm-toolchain"));
    }

    #[test]
    fn cross_toolchain_flag_overrides_env() {
        let args = TargetArgs {
            os: Some(OsArg::Linux),
            arch: Some("aarch64".into()),
            cross_toolchain: Some("aarch64-toolchain".into()),
        };
        let target = resolve_target(&args, |_| Some("arm-toolchain".to_string())).unwrap();
        assert_eq!(target.cross_toolchain(), Some("aarch64-toolchain"));
    }

    #[test]
    fn empty_env_toolchain_means_native() {
        let args = TargetArgs {
            os: Some(OsArg::Macos),
            arch: Some("aarch64".into()),
            cross_toolchain: None,
        };
        let target = resolve_target(&args, |_| Some(String::new())).unwrap();
        assert!(!target.is_cross_compiling());
    }

    #[test]
    fn arch_defaults_to_host() {
        let args = TargetArgs {
            os: Some(OsArg::Windows),
            ..TargetArgs::default()
        };
        let target = resolve_target(&args, no_env).unwrap();
        assert_eq!(target.arch(), std::env::consts::ARCH);
        assert_eq!(target.os(), TargetOs::Windows);
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(config::CONFIG_FILE_NAME);
        cmd_init(&path).unwrap();
        assert!(path.is_file());

        let err = cmd_init(&path).unwrap_err();
        assert!(err.to_string().contains("refusing to overwrite"));
    }

    #[test]
    fn writes_json_report_with_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports/tests.json");
        let report = TestReport::skipped(obxpack_sdk::SkipReason::CrossCompilation);

        write_json(&path, &report).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["outcome"], "skipped");
    }
}
