//! Source-kind dispatch.
//!
//! Maps the `bootstrap` header of a [`Definition`] to a backend in two tiers:
//! an exact table of literal names first, then a pure predicate that accepts
//! any supported OCI transport scheme. Dispatch has no side effects beyond
//! building an unbound [`ConveyorPacker`].

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::backend::ConveyorPacker;
use crate::consts::BOOTSTRAP_KEY;
use crate::definition::Definition;
use crate::error::{BuildError, MissingReason};

/// OCI transport schemes accepted as source kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OciTransport {
  /// Pull from a registry.
  Docker,
  /// A tarball produced by `docker save`.
  DockerArchive,
  /// An image held by the local docker daemon.
  DockerDaemon,
  /// An OCI image layout directory.
  Oci,
  /// A tarball of an OCI image layout.
  OciArchive,
}

impl OciTransport {
  pub const ALL: [OciTransport; 5] = [
    OciTransport::Docker,
    OciTransport::DockerArchive,
    OciTransport::DockerDaemon,
    OciTransport::Oci,
    OciTransport::OciArchive,
  ];

  pub fn parse(value: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|t| t.as_str() == value)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      OciTransport::Docker => "docker",
      OciTransport::DockerArchive => "docker-archive",
      OciTransport::DockerDaemon => "docker-daemon",
      OciTransport::Oci => "oci",
      OciTransport::OciArchive => "oci-archive",
    }
  }
}

/// Whether `value` names a supported OCI transport scheme.
pub fn is_supported_transport(value: &str) -> bool {
  OciTransport::parse(value).is_some()
}

/// Whether retrying a failed fetch is safe without cleaning up first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchRetry {
  /// Fetch only stages into the bundle's private tmp directory (or does
  /// nothing); running it again on a fresh bundle repeats no host mutation.
  Safe,
  /// Fetch writes into the root filesystem (package installs). The partial
  /// bundle must be removed before the build is retried.
  AfterCleanup,
}

/// The closed set of backends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
  /// Container library (`library://`).
  Library,
  /// SIF artifact stored in an OCI registry (`oras://`).
  Oras,
  /// Legacy hub (`shub://`).
  Shub,
  /// Any supported OCI transport.
  Oci(OciTransport),
  /// Minimal busybox base.
  BusyBox,
  /// Debian-family bootstrap.
  Debootstrap,
  /// Arch Linux bootstrap.
  Arch,
  /// Import of an image already on this host.
  LocalImage,
  /// RPM bootstrap through dnf or yum.
  Yum,
  /// RPM bootstrap through zypper.
  Zypper,
  /// Empty root filesystem.
  Scratch,
}

impl SourceKind {
  /// Literal source names, in dispatch priority order. `dnf` is an alias of `yum`.
  pub const LITERALS: [&'static str; 11] = [
    "library",
    "oras",
    "shub",
    "busybox",
    "debootstrap",
    "arch",
    "localimage",
    "yum",
    "dnf",
    "zypper",
    "scratch",
  ];

  /// Resolve a `bootstrap` value. Exact literals win over transport schemes.
  pub fn parse(value: &str) -> Option<SourceKind> {
    let kind = match value {
      "library" => SourceKind::Library,
      "oras" => SourceKind::Oras,
      "shub" => SourceKind::Shub,
      "busybox" => SourceKind::BusyBox,
      "debootstrap" => SourceKind::Debootstrap,
      "arch" => SourceKind::Arch,
      "localimage" => SourceKind::LocalImage,
      "yum" | "dnf" => SourceKind::Yum,
      "zypper" => SourceKind::Zypper,
      "scratch" => SourceKind::Scratch,
      other => return OciTransport::parse(other).map(SourceKind::Oci),
    };
    Some(kind)
  }

  /// Every value accepted in the `bootstrap` header.
  pub fn accepted_names() -> Vec<&'static str> {
    let mut names = Self::LITERALS.to_vec();
    names.extend(OciTransport::ALL.iter().map(OciTransport::as_str));
    names
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      SourceKind::Library => "library",
      SourceKind::Oras => "oras",
      SourceKind::Shub => "shub",
      SourceKind::Oci(transport) => transport.as_str(),
      SourceKind::BusyBox => "busybox",
      SourceKind::Debootstrap => "debootstrap",
      SourceKind::Arch => "arch",
      SourceKind::LocalImage => "localimage",
      SourceKind::Yum => "yum",
      SourceKind::Zypper => "zypper",
      SourceKind::Scratch => "scratch",
    }
  }

  pub fn fetch_retry(&self) -> FetchRetry {
    match self {
      SourceKind::Debootstrap | SourceKind::Arch | SourceKind::Yum | SourceKind::Zypper => FetchRetry::AfterCleanup,
      SourceKind::Library
      | SourceKind::Oras
      | SourceKind::Shub
      | SourceKind::Oci(_)
      | SourceKind::BusyBox
      | SourceKind::LocalImage
      | SourceKind::Scratch => FetchRetry::Safe,
    }
  }
}

impl fmt::Display for SourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Select the backend declared by `definition`.
///
/// Fails with a configuration error when `bootstrap` is absent, empty, or not
/// a known source kind.
pub fn select_backend(definition: &Definition) -> Result<ConveyorPacker, BuildError> {
  let value = match definition.get(BOOTSTRAP_KEY) {
    None => {
      return Err(BuildError::MissingSource {
        reason: MissingReason::Absent,
      });
    }
    Some("") => {
      return Err(BuildError::MissingSource {
        reason: MissingReason::Empty,
      });
    }
    Some(value) => value,
  };

  let kind = SourceKind::parse(value).ok_or_else(|| BuildError::UnsupportedSource(value.to_string()))?;
  debug!(bootstrap = %value, source = %kind, "selected backend");
  Ok(ConveyorPacker::new(kind))
}
