//! Backends and the two-phase fetch/pack contract.
//!
//! Every backend implements [`Conveyor`] (acquire external content into the
//! bundle) and [`Packer`] (turn staged content into the final root filesystem).
//! [`ConveyorPacker`] wraps one backend together with the bundle it is bound
//! to and enforces the phase order:
//!
//! ```text
//! Unbound -> Fetching -> Fetched -> Packing -> Packed
//!               \                      \
//!                +-------> Failed <-----+
//! ```
//!
//! The set of backends is closed: adding one means adding a [`SourceKind`]
//! variant, a `Backend` variant and one arm in each `match` below.

mod archlinux;
mod busybox;
mod debootstrap;
mod download;
mod image;
mod layers;
mod library;
mod local;
mod oci;
mod oras;
mod registry;
mod scratch;
mod shub;
mod sif;
mod tool;
mod yum;
mod zypper;

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::bundle::Bundle;
use crate::context::BuildContext;
use crate::dispatch::SourceKind;
use crate::error::BuildError;

use archlinux::ArchConveyorPacker;
use busybox::BusyBoxConveyorPacker;
use debootstrap::DebootstrapConveyorPacker;
use library::LibraryConveyorPacker;
use local::LocalConveyorPacker;
use oci::OciConveyorPacker;
use oras::OrasConveyorPacker;
use scratch::ScratchConveyorPacker;
use shub::ShubConveyorPacker;
use yum::YumConveyorPacker;
use zypper::ZypperConveyorPacker;

/// Where a [`ConveyorPacker`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendState {
  Unbound,
  Fetching,
  Fetched,
  Packing,
  Packed,
  Failed,
}

impl fmt::Display for BackendState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      BackendState::Unbound => "unbound",
      BackendState::Fetching => "fetching",
      BackendState::Fetched => "fetched",
      BackendState::Packing => "packing",
      BackendState::Packed => "packed",
      BackendState::Failed => "failed",
    };
    f.write_str(name)
  }
}

/// Acquires whatever external content a backend needs.
pub(crate) trait Conveyor {
  async fn fetch(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError>;
}

/// Installs staged content into the bundle's root filesystem.
pub(crate) trait Packer {
  async fn pack(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError>;
}

#[derive(Debug)]
enum Backend {
  Library(LibraryConveyorPacker),
  Oras(OrasConveyorPacker),
  Shub(ShubConveyorPacker),
  Oci(OciConveyorPacker),
  BusyBox(BusyBoxConveyorPacker),
  Debootstrap(DebootstrapConveyorPacker),
  Arch(ArchConveyorPacker),
  LocalImage(LocalConveyorPacker),
  Yum(YumConveyorPacker),
  Zypper(ZypperConveyorPacker),
  Scratch(ScratchConveyorPacker),
}

impl Backend {
  fn for_kind(kind: &SourceKind) -> Self {
    match kind {
      SourceKind::Library => Backend::Library(LibraryConveyorPacker::default()),
      SourceKind::Oras => Backend::Oras(OrasConveyorPacker::default()),
      SourceKind::Shub => Backend::Shub(ShubConveyorPacker::default()),
      SourceKind::Oci(transport) => Backend::Oci(OciConveyorPacker::new(*transport)),
      SourceKind::BusyBox => Backend::BusyBox(BusyBoxConveyorPacker),
      SourceKind::Debootstrap => Backend::Debootstrap(DebootstrapConveyorPacker),
      SourceKind::Arch => Backend::Arch(ArchConveyorPacker),
      SourceKind::LocalImage => Backend::LocalImage(LocalConveyorPacker::default()),
      SourceKind::Yum => Backend::Yum(YumConveyorPacker),
      SourceKind::Zypper => Backend::Zypper(ZypperConveyorPacker),
      SourceKind::Scratch => Backend::Scratch(ScratchConveyorPacker),
    }
  }

  async fn fetch(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    match self {
      Backend::Library(b) => b.fetch(ctx, bundle).await,
      Backend::Oras(b) => b.fetch(ctx, bundle).await,
      Backend::Shub(b) => b.fetch(ctx, bundle).await,
      Backend::Oci(b) => b.fetch(ctx, bundle).await,
      Backend::BusyBox(b) => b.fetch(ctx, bundle).await,
      Backend::Debootstrap(b) => b.fetch(ctx, bundle).await,
      Backend::Arch(b) => b.fetch(ctx, bundle).await,
      Backend::LocalImage(b) => b.fetch(ctx, bundle).await,
      Backend::Yum(b) => b.fetch(ctx, bundle).await,
      Backend::Zypper(b) => b.fetch(ctx, bundle).await,
      Backend::Scratch(b) => b.fetch(ctx, bundle).await,
    }
  }

  async fn pack(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    match self {
      Backend::Library(b) => b.pack(ctx, bundle).await,
      Backend::Oras(b) => b.pack(ctx, bundle).await,
      Backend::Shub(b) => b.pack(ctx, bundle).await,
      Backend::Oci(b) => b.pack(ctx, bundle).await,
      Backend::BusyBox(b) => b.pack(ctx, bundle).await,
      Backend::Debootstrap(b) => b.pack(ctx, bundle).await,
      Backend::Arch(b) => b.pack(ctx, bundle).await,
      Backend::LocalImage(b) => b.pack(ctx, bundle).await,
      Backend::Yum(b) => b.pack(ctx, bundle).await,
      Backend::Zypper(b) => b.pack(ctx, bundle).await,
      Backend::Scratch(b) => b.pack(ctx, bundle).await,
    }
  }
}

/// One backend bound (after `fetch`) to exactly one bundle.
///
/// The bundle is owned by the `ConveyorPacker` between `fetch` and `pack`, so
/// nothing else can write to it while a phase runs.
#[derive(Debug)]
pub struct ConveyorPacker {
  kind: SourceKind,
  backend: Backend,
  state: BackendState,
  bundle: Option<Bundle>,
}

impl ConveyorPacker {
  pub(crate) fn new(kind: SourceKind) -> Self {
    Self {
      backend: Backend::for_kind(&kind),
      kind,
      state: BackendState::Unbound,
      bundle: None,
    }
  }

  pub fn kind(&self) -> &SourceKind {
    &self.kind
  }

  pub fn state(&self) -> BackendState {
    self.state
  }

  /// The bound bundle, if any.
  pub fn bundle(&self) -> Option<&Bundle> {
    self.bundle.as_ref()
  }

  /// Hand the bound bundle back, e.g. to clean it up after a failure.
  pub fn take_bundle(&mut self) -> Option<Bundle> {
    self.bundle.take()
  }

  /// Bind `bundle` and acquire the backend's content into it.
  ///
  /// Only valid on an unbound instance. The context is checked before any
  /// work starts and raced against the whole phase; on success the bundle's
  /// root filesystem directory exists. A bundle passed to a rejected call is
  /// dropped without touching its directories.
  pub async fn fetch(&mut self, ctx: &BuildContext, bundle: Bundle) -> Result<(), BuildError> {
    if self.state != BackendState::Unbound {
      return Err(self.invalid_state("fetch"));
    }

    let Self {
      kind,
      backend,
      state,
      bundle: slot,
    } = self;
    *state = BackendState::Fetching;
    let bundle = slot.insert(bundle);
    info!(source = %kind, bundle = ?bundle.path(), "fetch started");

    let result = ctx
      .run(async {
        backend.fetch(ctx, bundle).await?;
        tokio::fs::create_dir_all(bundle.rootfs_path()).await?;
        Ok(())
      })
      .await;

    match result {
      Ok(()) => {
        *state = BackendState::Fetched;
        info!(source = %kind, "fetch complete");
        Ok(())
      }
      Err(err) => {
        bundle.settle().await;
        bundle.mark_unusable();
        *state = BackendState::Failed;
        warn!(source = %kind, error = %err, "fetch failed");
        Err(err)
      }
    }
  }

  /// Install the fetched content and hand back the finished bundle.
  ///
  /// Only valid right after a successful [`ConveyorPacker::fetch`]; any other
  /// call fails without touching the bundle. A failed pack returns only after
  /// every blocking writer into the bundle has stopped.
  pub async fn pack(&mut self, ctx: &BuildContext) -> Result<Bundle, BuildError> {
    if self.state != BackendState::Fetched || self.bundle.is_none() {
      return Err(self.invalid_state("pack"));
    }

    let Self {
      kind,
      backend,
      state,
      bundle: slot,
    } = self;
    let Some(bundle) = slot.as_mut() else {
      return Err(BuildError::InvalidState {
        backend: kind.clone(),
        operation: "pack",
        state: *state,
      });
    };
    *state = BackendState::Packing;
    info!(source = %kind, bundle = ?bundle.path(), "pack started");

    let result = ctx
      .run(async {
        backend.pack(ctx, bundle).await?;
        bundle.write_metadata(kind).await
      })
      .await;

    match result {
      Ok(()) => {
        *state = BackendState::Packed;
        info!(source = %kind, "pack complete");
        slot.take().ok_or(BuildError::InvalidState {
          backend: kind.clone(),
          operation: "pack",
          state: BackendState::Packed,
        })
      }
      Err(err) => {
        bundle.settle().await;
        bundle.mark_unusable();
        *state = BackendState::Failed;
        warn!(source = %kind, error = %err, "pack failed");
        Err(err)
      }
    }
  }

  fn invalid_state(&self, operation: &'static str) -> BuildError {
    BuildError::InvalidState {
      backend: self.kind.clone(),
      operation,
      state: self.state,
    }
  }
}

/// Read a header value a backend cannot work without.
pub(crate) fn require_header(bundle: &Bundle, key: &'static str, backend: &SourceKind) -> Result<String, BuildError> {
  bundle
    .definition()
    .get_non_empty(key)
    .map(str::to_string)
    .ok_or_else(|| BuildError::MissingHeader {
      backend: backend.clone(),
      key,
    })
}

/// Replace `%{OSVERSION}` in mirror URLs with the declared OS version.
pub(crate) fn expand_osversion(url: &str, osversion: Option<&str>) -> Result<String, BuildError> {
  match (url.contains("%{OSVERSION}"), osversion) {
    (false, _) => Ok(url.to_string()),
    (true, Some(version)) => Ok(url.replace("%{OSVERSION}", version)),
    (true, None) => Err(BuildError::InvalidHeader {
      key: "mirrorurl",
      value: url.to_string(),
      message: "uses %{OSVERSION} but header key \"osversion\" is not set".to_string(),
    }),
  }
}
