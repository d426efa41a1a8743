//! Running external bootstrap tools.
//!
//! Tools run with a pinned locale and `SOURCE_DATE_EPOCH`, stdin closed and
//! output captured. The child is killed when the surrounding future is
//! dropped, so cancelling the build context stops it.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::consts::SOURCE_DATE_EPOCH;
use crate::context::BuildContext;
use crate::dispatch::SourceKind;
use crate::error::BuildError;

/// Run `program` with `args` under `ctx` and return its trimmed stdout.
///
/// A non-zero exit is a transient failure of `backend`: package mirrors and
/// registries flake, and the caller may retry the whole build.
pub(crate) async fn run_tool(
  ctx: &BuildContext,
  backend: &SourceKind,
  program: &Path,
  args: &[OsString],
  env: &[(&str, &str)],
) -> Result<String, BuildError> {
  let cmd = render_command(program, args);
  info!(source = %backend, cmd = %cmd, "running tool");

  let mut command = Command::new(program);
  command
    .args(args)
    .env("LANG", "C")
    .env("LC_ALL", "C")
    .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
  for (key, value) in env {
    command.env(key, value);
  }

  let child = command.spawn().map_err(|e| match e.kind() {
    std::io::ErrorKind::NotFound => BuildError::ToolNotFound {
      backend: backend.clone(),
      tool: program.display().to_string(),
    },
    _ => BuildError::Io(e),
  })?;

  let output = ctx
    .run(async { child.wait_with_output().await.map_err(BuildError::from) })
    .await?;

  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
  let stderr = String::from_utf8_lossy(&output.stderr);

  if !output.status.success() {
    if !stderr.is_empty() {
      warn!(source = %backend, stderr = %stderr.trim(), "tool stderr");
    }
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "tool stdout");
    }
    return Err(BuildError::CmdFailed {
      backend: backend.clone(),
      cmd,
      code: output.status.code(),
    });
  }

  if !stdout.is_empty() {
    debug!(stdout = %stdout, "tool output");
  }
  Ok(stdout)
}

fn render_command(program: &Path, args: &[OsString]) -> String {
  let mut cmd = program.display().to_string();
  for arg in args {
    cmd.push(' ');
    cmd.push_str(&arg.to_string_lossy());
  }
  cmd
}
