//! Drives one build: dispatch, bundle creation, fetch, pack.
//!
//! The orchestrator never retries and adds no timeout of its own; whatever
//! deadline the caller put on the [`BuildContext`] applies to both phases.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::ConveyorPacker;
use crate::bundle::Bundle;
use crate::config::BuildConfig;
use crate::context::BuildContext;
use crate::definition::Definition;
use crate::dispatch::{SourceKind, select_backend};
use crate::error::{BuildError, ErrorKind};

/// The step a build failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildPhase {
  Dispatch,
  Workspace,
  Fetch,
  Pack,
}

impl fmt::Display for BuildPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      BuildPhase::Dispatch => "dispatch",
      BuildPhase::Workspace => "workspace",
      BuildPhase::Fetch => "fetch",
      BuildPhase::Pack => "pack",
    };
    f.write_str(name)
  }
}

/// A failed build.
///
/// Carries the bundle when one had been created, already marked unusable.
/// Removing it is up to the caller.
#[derive(Debug, Error)]
#[error("{phase} failed: {error}")]
pub struct BuildFailure {
  pub phase: BuildPhase,
  pub backend: Option<SourceKind>,
  #[source]
  pub error: BuildError,
  pub bundle: Option<Bundle>,
}

impl BuildFailure {
  pub fn kind(&self) -> ErrorKind {
    self.error.kind()
  }

  pub fn is_retryable(&self) -> bool {
    self.error.is_retryable()
  }

  pub fn is_cancelled(&self) -> bool {
    self.error.is_cancelled()
  }

  /// Take the partial bundle out, e.g. to remove it.
  pub fn take_bundle(&mut self) -> Option<Bundle> {
    self.bundle.take()
  }
}

/// Build `definition` into a fresh bundle under `config.tmp_dir`.
pub async fn build(ctx: &BuildContext, definition: Definition, config: &BuildConfig) -> Result<Bundle, BuildFailure> {
  let mut cp = select_backend(&definition).map_err(|error| BuildFailure {
    phase: BuildPhase::Dispatch,
    backend: None,
    error,
    bundle: None,
  })?;
  let kind = cp.kind().clone();
  info!(source = %kind, "build started");

  let bundle = Bundle::create(definition, config).map_err(|error| BuildFailure {
    phase: BuildPhase::Workspace,
    backend: Some(kind.clone()),
    error,
    bundle: None,
  })?;
  debug!(path = ?bundle.path(), "created bundle");

  if let Err(error) = cp.fetch(ctx, bundle).await {
    return Err(fail(BuildPhase::Fetch, &kind, error, &mut cp));
  }

  match cp.pack(ctx).await {
    Ok(bundle) => {
      info!(source = %kind, rootfs = ?bundle.rootfs_path(), "build complete");
      Ok(bundle)
    }
    Err(error) => Err(fail(BuildPhase::Pack, &kind, error, &mut cp)),
  }
}

fn fail(phase: BuildPhase, kind: &SourceKind, error: BuildError, cp: &mut ConveyorPacker) -> BuildFailure {
  warn!(source = %kind, %phase, error_kind = %error.kind(), error = %error, "build failed");
  BuildFailure {
    phase,
    backend: Some(kind.clone()),
    error,
    bundle: cp.take_bundle(),
  }
}
