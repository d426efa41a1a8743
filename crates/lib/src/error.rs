//! Error types for the build pipeline.
//!
//! Every failure a phase can report is one [`BuildError`]. Callers decide what
//! to do with it through [`BuildError::kind`], which sorts errors into the four
//! categories of [`ErrorKind`].

use serde::Serialize;
use thiserror::Error;

use crate::dispatch::SourceKind;

/// Coarse classification used by callers to pick a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
  /// The definition is wrong; fix it and try again.
  Config,
  /// A network, registry or package-manager failure; the whole build may be retried.
  Transient,
  /// The build context was cancelled or its deadline elapsed.
  Cancelled,
  /// The build host is broken (I/O, permissions, missing tools) or a contract was violated.
  Fatal,
}

impl std::fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      ErrorKind::Config => "config",
      ErrorKind::Transient => "transient",
      ErrorKind::Cancelled => "cancelled",
      ErrorKind::Fatal => "fatal",
    };
    f.write_str(name)
  }
}

/// How the `bootstrap` header was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReason {
  Absent,
  Empty,
}

impl std::fmt::Display for MissingReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      MissingReason::Absent => f.write_str("absent"),
      MissingReason::Empty => f.write_str("empty"),
    }
  }
}

/// Errors produced by dispatch, bundle creation, fetch and pack.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The definition does not declare a source kind.
  #[error("missing source specification: header key \"bootstrap\" is {reason}")]
  MissingSource { reason: MissingReason },

  /// The declared source kind is not one of the known backends.
  #[error("unsupported source kind \"{0}\" in header key \"bootstrap\"")]
  UnsupportedSource(String),

  /// A backend needs a header key the definition does not set.
  #[error("{backend} source requires header key \"{key}\"")]
  MissingHeader { backend: SourceKind, key: &'static str },

  /// A header value is present but unusable.
  #[error("invalid value {value:?} for header key \"{key}\": {message}")]
  InvalidHeader {
    key: &'static str,
    value: String,
    message: String,
  },

  /// The remote side says the requested content does not exist or is not ours to read.
  #[error("{backend}: {reference} not available: {message}")]
  NotFound {
    backend: SourceKind,
    reference: String,
    message: String,
  },

  /// Network, registry or package-manager failure.
  #[error("{backend}: {message}")]
  Transient { backend: SourceKind, message: String },

  /// A downloaded blob does not match its advertised digest.
  #[error("{backend}: digest mismatch for {url}: expected {expected}, got {actual}")]
  DigestMismatch {
    backend: SourceKind,
    url: String,
    expected: String,
    actual: String,
  },

  /// An external tool exited unsuccessfully.
  #[error("{backend}: command failed with exit code {code:?}: {cmd}")]
  CmdFailed {
    backend: SourceKind,
    cmd: String,
    code: Option<i32>,
  },

  /// An external tool needed by the backend is not installed.
  #[error("{backend}: required tool {tool} not found on this host")]
  ToolNotFound { backend: SourceKind, tool: String },

  /// Content on disk is not in a format the backend understands.
  #[error("{backend}: unrecognized image {path}: {message}")]
  UnrecognizedImage {
    backend: SourceKind,
    path: String,
    message: String,
  },

  /// A backend operation was invoked in the wrong state.
  #[error("{backend}: cannot {operation} while {state}")]
  InvalidState {
    backend: SourceKind,
    operation: &'static str,
    state: crate::backend::BackendState,
  },

  /// The build context was cancelled.
  #[error("build cancelled")]
  Cancelled,

  /// The build context deadline elapsed.
  #[error("build deadline exceeded")]
  DeadlineExceeded,

  /// I/O error on the build host.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// JSON encoding or decoding failed on data we produced or staged.
  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

impl BuildError {
  /// Classify the error.
  pub fn kind(&self) -> ErrorKind {
    match self {
      BuildError::MissingSource { .. }
      | BuildError::UnsupportedSource(_)
      | BuildError::MissingHeader { .. }
      | BuildError::InvalidHeader { .. }
      | BuildError::NotFound { .. } => ErrorKind::Config,
      BuildError::Transient { .. } | BuildError::DigestMismatch { .. } | BuildError::CmdFailed { .. } => {
        ErrorKind::Transient
      }
      BuildError::Cancelled | BuildError::DeadlineExceeded => ErrorKind::Cancelled,
      BuildError::ToolNotFound { .. }
      | BuildError::UnrecognizedImage { .. }
      | BuildError::InvalidState { .. }
      | BuildError::Io(_)
      | BuildError::Json(_) => ErrorKind::Fatal,
    }
  }

  /// Only transient failures are worth retrying, and only by the caller.
  pub fn is_retryable(&self) -> bool {
    self.kind() == ErrorKind::Transient
  }

  pub fn is_cancelled(&self) -> bool {
    self.kind() == ErrorKind::Cancelled
  }

  pub(crate) fn transient(backend: SourceKind, message: impl std::fmt::Display) -> Self {
    BuildError::Transient {
      backend,
      message: message.to_string(),
    }
  }
}
