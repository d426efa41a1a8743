//! Implementation of the `rootforge build` command.
//!
//! Reads a definition (JSON, as produced by the definition parser), applies
//! header overrides from the command line and runs the build pipeline. Ctrl-C
//! cancels the running build; the partial bundle is removed unless `--keep`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use clap::Args;
use serde::Serialize;
use tracing::{debug, warn};

use rootforge_lib::platform::Arch;
use rootforge_lib::{BuildConfig, BuildContext, BuildFailure, Bundle, Definition, ErrorKind, build};

use crate::output::{
  OutputFormat, format_duration, print_error, print_info, print_json, print_stat, print_success, print_warning,
};

const EXIT_FATAL: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_TRANSIENT: u8 = 3;
const EXIT_CANCELLED: u8 = 130;

#[derive(Args, Debug)]
pub struct BuildArgs {
  /// Path to the definition (JSON with `header` and `sections`)
  pub definition: PathBuf,

  /// Set or override a header entry (repeatable)
  #[arg(short = 'H', long = "header", value_name = "KEY=VALUE", value_parser = parse_header)]
  pub headers: Vec<(String, String)>,

  /// Parent directory for the bundle
  #[arg(long)]
  pub tmp_dir: Option<PathBuf>,

  /// Target architecture (amd64, arm64)
  #[arg(long)]
  pub arch: Option<String>,

  /// Give up after this long (e.g., "90s", "20m")
  #[arg(long, value_parser = humantime::parse_duration)]
  pub timeout: Option<Duration>,

  /// Keep the bundle of a failed build for inspection
  #[arg(long)]
  pub keep: bool,

  /// Configuration file (default: $XDG_CONFIG_HOME/rootforge/config.toml)
  #[arg(long)]
  pub config: Option<PathBuf>,

  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text")]
  pub output: OutputFormat,
}

fn parse_header(value: &str) -> Result<(String, String), String> {
  match value.split_once('=') {
    Some((key, value)) if !key.trim().is_empty() => Ok((key.to_string(), value.to_string())),
    _ => Err(format!("expected KEY=VALUE, got {:?}", value)),
  }
}

#[derive(Debug, Serialize)]
struct BuildReport {
  status: &'static str,
  source: Option<String>,
  bundle: Option<PathBuf>,
  rootfs: Option<PathBuf>,
  metadata: Option<PathBuf>,
  duration_ms: u128,
  #[serde(skip_serializing_if = "Option::is_none")]
  phase: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  kind: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  error: Option<String>,
}

pub fn exit_code(kind: ErrorKind) -> u8 {
  match kind {
    ErrorKind::Config => EXIT_CONFIG,
    ErrorKind::Transient => EXIT_TRANSIENT,
    ErrorKind::Cancelled => EXIT_CANCELLED,
    ErrorKind::Fatal => EXIT_FATAL,
  }
}

/// Execute the build command.
pub fn cmd_build(args: BuildArgs) -> Result<ExitCode> {
  let (definition, config) = match prepare(&args) {
    Ok(prepared) => prepared,
    Err(e) => {
      print_error(&format!("{:#}", e));
      return Ok(ExitCode::from(EXIT_CONFIG));
    }
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let started = Instant::now();
  let result = rt.block_on(run(definition, &config, args.timeout));
  let elapsed = started.elapsed();

  match result {
    Ok(bundle) => {
      report_success(&bundle, elapsed, args.output)?;
      Ok(ExitCode::SUCCESS)
    }
    Err(failure) => {
      let code = exit_code(failure.kind());
      report_failure(failure, elapsed, args.keep || config.keep_on_failure, args.output)?;
      Ok(ExitCode::from(code))
    }
  }
}

/// Load the definition and layer config file, then flags.
fn prepare(args: &BuildArgs) -> Result<(Definition, BuildConfig)> {
  let raw = std::fs::read_to_string(&args.definition)
    .with_context(|| format!("Failed to read definition {}", args.definition.display()))?;
  let mut definition =
    Definition::from_json(&raw).with_context(|| format!("Failed to parse definition {}", args.definition.display()))?;
  for (key, value) in &args.headers {
    definition = definition.with_header(key, value);
  }

  let mut config = match &args.config {
    Some(path) => BuildConfig::from_file(path)?,
    None => BuildConfig::load_default()?,
  };
  if let Some(tmp_dir) = &args.tmp_dir {
    config.tmp_dir = tmp_dir.clone();
  }
  if let Some(arch) = &args.arch {
    let arch = Arch::parse(arch).ok_or_else(|| anyhow!("Unsupported architecture: {}", arch))?;
    config.arch = arch.oci_name().to_string();
  }
  config.keep_on_failure |= args.keep;

  debug!(tmp_dir = ?config.tmp_dir, arch = %config.arch, "build configuration");
  Ok((definition, config))
}

async fn run(definition: Definition, config: &BuildConfig, timeout: Option<Duration>) -> Result<Bundle, BuildFailure> {
  let ctx = match timeout {
    Some(timeout) => BuildContext::new().with_timeout(timeout),
    None => BuildContext::new(),
  };

  let interrupt = ctx.clone();
  let signal = tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupted, cancelling build");
      interrupt.cancel();
    }
  });

  let result = build(&ctx, definition, config).await;
  signal.abort();
  result
}

fn source_of(bundle: &Bundle) -> Option<String> {
  bundle.definition().get("bootstrap").map(str::to_string)
}

fn report_success(bundle: &Bundle, elapsed: Duration, output: OutputFormat) -> Result<()> {
  if output.is_json() {
    return print_json(&BuildReport {
      status: "ok",
      source: source_of(bundle),
      bundle: Some(bundle.path().to_path_buf()),
      rootfs: Some(bundle.rootfs_path().to_path_buf()),
      metadata: Some(bundle.metadata_path().to_path_buf()),
      duration_ms: elapsed.as_millis(),
      phase: None,
      kind: None,
      error: None,
    });
  }

  print_success(&format!("Build complete in {}", format_duration(elapsed)));
  if let Some(source) = source_of(bundle) {
    print_stat("Source", &source);
  }
  print_stat("Rootfs", &bundle.rootfs_path().display().to_string());
  print_stat("Metadata", &bundle.metadata_path().display().to_string());
  Ok(())
}

fn report_failure(mut failure: BuildFailure, elapsed: Duration, keep: bool, output: OutputFormat) -> Result<()> {
  let kept = match failure.take_bundle() {
    Some(bundle) if keep => Some(bundle),
    Some(bundle) => {
      let path = bundle.path().to_path_buf();
      if let Err(e) = bundle.remove() {
        print_warning(&format!("Failed to remove bundle {}: {}", path.display(), e));
      }
      None
    }
    None => None,
  };

  if output.is_json() {
    return print_json(&BuildReport {
      status: "error",
      source: failure.backend.as_ref().map(|kind| kind.to_string()),
      bundle: kept.as_ref().map(|b| b.path().to_path_buf()),
      rootfs: kept.as_ref().map(|b| b.rootfs_path().to_path_buf()),
      metadata: kept.as_ref().map(|b| b.metadata_path().to_path_buf()),
      duration_ms: elapsed.as_millis(),
      phase: Some(failure.phase.to_string()),
      kind: Some(failure.kind().to_string()),
      error: Some(failure.error.to_string()),
    });
  }

  print_error(&format!("Build failed during {}: {}", failure.phase, failure.error));
  if failure.is_retryable() {
    print_info("The failure looks transient; retrying may succeed");
  }
  if let Some(bundle) = &kept {
    print_stat("Bundle kept", &bundle.path().display().to_string());
  }
  Ok(())
}
