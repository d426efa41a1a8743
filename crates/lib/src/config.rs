//! Build configuration.
//!
//! Everything a backend needs from its environment comes through
//! [`BuildConfig`]. It is built by the caller (usually from
//! `~/.config/rootforge/config.toml` plus CLI flags) and handed to
//! [`crate::build`]; the library never reads globals on its own.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::dispatch::SourceKind;
use crate::error::BuildError;
use crate::platform::{self, Arch};

pub const DEFAULT_LIBRARY_URL: &str = "https://library.sylabs.io";
pub const DEFAULT_SHUB_URL: &str = "https://singularity-hub.org";

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

/// External programs a backend may shell out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
  Debootstrap,
  Pacstrap,
  Dnf,
  Yum,
  Zypper,
  Docker,
  Unsquashfs,
}

impl Tool {
  pub fn program(&self) -> &'static str {
    match self {
      Tool::Debootstrap => "debootstrap",
      Tool::Pacstrap => "pacstrap",
      Tool::Dnf => "dnf",
      Tool::Yum => "yum",
      Tool::Zypper => "zypper",
      Tool::Docker => "docker",
      Tool::Unsquashfs => "unsquashfs",
    }
  }
}

/// Explicit paths for external tools. Unset entries are looked up on `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
  pub debootstrap: Option<PathBuf>,
  pub pacstrap: Option<PathBuf>,
  pub dnf: Option<PathBuf>,
  pub yum: Option<PathBuf>,
  pub zypper: Option<PathBuf>,
  pub docker: Option<PathBuf>,
  pub unsquashfs: Option<PathBuf>,
}

impl ToolPaths {
  fn configured(&self, tool: Tool) -> Option<&PathBuf> {
    match tool {
      Tool::Debootstrap => self.debootstrap.as_ref(),
      Tool::Pacstrap => self.pacstrap.as_ref(),
      Tool::Dnf => self.dnf.as_ref(),
      Tool::Yum => self.yum.as_ref(),
      Tool::Zypper => self.zypper.as_ref(),
      Tool::Docker => self.docker.as_ref(),
      Tool::Unsquashfs => self.unsquashfs.as_ref(),
    }
  }

  /// Find `tool`, preferring the configured path over a `PATH` lookup.
  pub fn find(&self, tool: Tool) -> Option<PathBuf> {
    if let Some(path) = self.configured(tool) {
      return Some(path.clone());
    }
    which::which(tool.program()).ok()
  }

  /// Like [`ToolPaths::find`], but reports a missing tool as an error of `backend`.
  pub fn resolve(&self, tool: Tool, backend: &SourceKind) -> Result<PathBuf, BuildError> {
    let path = self.find(tool).ok_or_else(|| BuildError::ToolNotFound {
      backend: backend.clone(),
      tool: tool.program().to_string(),
    })?;
    debug!(tool = tool.program(), path = ?path, "resolved tool");
    Ok(path)
  }
}

/// Configuration for a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
  /// Parent directory under which each bundle gets its own directory.
  pub tmp_dir: PathBuf,

  /// Base URL of the container library API.
  pub library_url: String,

  /// Bearer token for the container library.
  pub library_token: Option<String>,

  /// Base URL of the legacy hub API.
  pub shub_url: String,

  /// Target architecture (`amd64`, `arm64`, ...). Defaults to the host's.
  pub arch: String,

  /// Registries contacted over plain HTTP instead of HTTPS.
  pub insecure_registries: Vec<String>,

  pub tools: ToolPaths,

  /// Leave the bundle of a failed build on disk. Honoured by callers that
  /// dispose of bundles; the library itself never removes one.
  pub keep_on_failure: bool,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      tmp_dir: platform::paths::default_tmp_dir(),
      library_url: DEFAULT_LIBRARY_URL.to_string(),
      library_token: None,
      shub_url: DEFAULT_SHUB_URL.to_string(),
      arch: Arch::current().unwrap_or(Arch::X86_64).oci_name().to_string(),
      insecure_registries: Vec::new(),
      tools: ToolPaths::default(),
      keep_on_failure: false,
    }
  }
}

impl BuildConfig {
  /// Parse a TOML configuration file. Missing keys keep their defaults.
  pub fn from_file(path: &Path) -> Result<Self, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigFileError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load the user's config file if it exists, defaults otherwise.
  pub fn load_default() -> Result<Self, ConfigFileError> {
    let path = platform::paths::config_file();
    if path.exists() {
      debug!(path = ?path, "loading config");
      Self::from_file(&path)
    } else {
      Ok(Self::default())
    }
  }

  pub fn with_tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
    self.tmp_dir = tmp_dir.into();
    self
  }

  pub fn is_insecure_registry(&self, registry: &str) -> bool {
    self.insecure_registries.iter().any(|r| r == registry)
  }
}
