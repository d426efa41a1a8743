//! The mutable build workspace.
//!
//! A bundle is one directory holding:
//! - `rootfs/`: the future container root filesystem
//! - `metadata/`: provenance and environment written during pack
//! - `tmp/`: staging space threaded from fetch to pack
//!
//! Dropping a [`Bundle`] never deletes anything; disposal is the caller's job
//! ([`Bundle::remove`]).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::fs;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::config::BuildConfig;
use crate::consts::{
  BUNDLE_PREFIX, DEFINITION_FILE, ENV_FILE, ENVIRONMENT_SECTION, LABELS_SECTION, METADATA_DIR, PROVENANCE_FILE,
  ROOTFS_DIR, TMP_DIR,
};
use crate::context::BuildContext;
use crate::definition::Definition;
use crate::dispatch::SourceKind;
use crate::error::BuildError;
use crate::util::hash::{ContentHash, DirHashError, hash_directory};

/// Provenance record written to `metadata/provenance.json`.
#[derive(Debug, Serialize)]
pub struct Provenance<'a> {
  pub source: &'a str,
  pub created: u64,
  pub builder: &'a str,
  pub annotations: &'a BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct Bundle {
  root: PathBuf,
  rootfs_path: PathBuf,
  metadata_path: PathBuf,
  tmp_path: PathBuf,
  definition: Definition,
  config: BuildConfig,
  usable: bool,
  writers: TaskTracker,

  /// Environment recorded for the image (`KEY=value` pairs from image configs).
  pub build_env: BTreeMap<String, String>,

  /// Backend-written facts threaded from fetch to pack: resolved references,
  /// digests, staged file paths.
  pub annotations: BTreeMap<String, String>,
}

impl Bundle {
  /// Allocate a fresh bundle directory under `config.tmp_dir`.
  ///
  /// Each call gets a unique directory, so concurrent builds never share one.
  pub fn create(definition: Definition, config: &BuildConfig) -> Result<Self, BuildError> {
    let root = allocate(&config.tmp_dir, &[ROOTFS_DIR, METADATA_DIR, TMP_DIR])?;

    let bundle = Self {
      rootfs_path: root.join(ROOTFS_DIR),
      metadata_path: root.join(METADATA_DIR),
      tmp_path: root.join(TMP_DIR),
      root,
      definition,
      config: config.clone(),
      usable: true,
      writers: TaskTracker::new(),
      build_env: BTreeMap::new(),
      annotations: BTreeMap::new(),
    };

    debug!(path = ?bundle.root, "created bundle");
    Ok(bundle)
  }

  /// The bundle's top-level directory.
  pub fn path(&self) -> &Path {
    &self.root
  }

  pub fn rootfs_path(&self) -> &Path {
    &self.rootfs_path
  }

  pub fn metadata_path(&self) -> &Path {
    &self.metadata_path
  }

  pub fn tmp_path(&self) -> &Path {
    &self.tmp_path
  }

  pub fn definition(&self) -> &Definition {
    &self.definition
  }

  pub fn config(&self) -> &BuildConfig {
    &self.config
  }

  /// False once a phase has failed on this bundle.
  pub fn is_usable(&self) -> bool {
    self.usable
  }

  pub(crate) fn mark_unusable(&mut self) {
    self.usable = false;
  }

  /// Whether the root filesystem directory exists and contains nothing.
  pub fn rootfs_is_empty(&self) -> std::io::Result<bool> {
    Ok(std::fs::read_dir(&self.rootfs_path)?.next().is_none())
  }

  /// Deterministic digest of the root filesystem contents.
  pub fn content_hash(&self) -> Result<ContentHash, DirHashError> {
    hash_directory(&self.rootfs_path, &[])
  }

  /// Run blocking filesystem work for this bundle on the blocking pool.
  ///
  /// `work` receives the context and should poll it between entries. The
  /// task is tracked by the bundle, so [`Bundle::settle`] can wait it out even
  /// when the future awaiting it is dropped.
  pub(crate) async fn blocking<T, F>(&self, ctx: &BuildContext, work: F) -> Result<T, BuildError>
  where
    F: FnOnce(&BuildContext) -> Result<T, BuildError> + Send + 'static,
    T: Send + 'static,
  {
    ctx.check()?;
    let task_ctx = ctx.clone();
    let result = self
      .writers
      .spawn_blocking(move || work(&task_ctx))
      .await
      .map_err(|e| BuildError::Io(std::io::Error::other(e)))?;

    // work cut short by the context reports the context's error
    match (result, ctx.err()) {
      (Err(_), Some(err)) => Err(err),
      (result, _) => result,
    }
  }

  /// Wait until no blocking task is writing into the bundle.
  pub(crate) async fn settle(&self) {
    self.writers.close();
    self.writers.wait().await;
    self.writers.reopen();
  }

  /// Delete the bundle directory and everything in it.
  pub fn remove(self) -> std::io::Result<()> {
    debug!(path = ?self.root, "removing bundle");
    std::fs::remove_dir_all(&self.root)
  }

  /// Write `definition.json`, `provenance.json` and `env` into the metadata directory.
  pub(crate) async fn write_metadata(&self, source: &SourceKind) -> Result<(), BuildError> {
    fs::create_dir_all(&self.metadata_path).await?;

    let definition = serde_json::to_string_pretty(&self.definition)?;
    fs::write(self.metadata_path.join(DEFINITION_FILE), format!("{}\n", definition)).await?;

    let created = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or_default();
    let mut annotations = self.annotations.clone();
    if let Some(labels) = self.definition.section(LABELS_SECTION) {
      annotations.extend(parse_labels(&labels.body));
    }
    let provenance = Provenance {
      source: source.as_str(),
      created,
      builder: crate::consts::USER_AGENT,
      annotations: &annotations,
    };
    let provenance = serde_json::to_string_pretty(&provenance)?;
    fs::write(self.metadata_path.join(PROVENANCE_FILE), format!("{}\n", provenance)).await?;

    let mut env = render_env(&self.build_env);
    if let Some(section) = self.definition.section(ENVIRONMENT_SECTION) {
      let body = section.body.trim();
      if !body.is_empty() {
        env.push_str(body);
        env.push('\n');
      }
    }
    fs::write(self.metadata_path.join(ENV_FILE), env).await?;

    debug!(path = ?self.metadata_path, "wrote bundle metadata");
    Ok(())
  }
}

/// Create a unique directory under `parent` holding `layout`. The directory is
/// only kept once the whole layout exists.
fn allocate(parent: &Path, layout: &[&str]) -> std::io::Result<PathBuf> {
  std::fs::create_dir_all(parent)?;
  let dir = tempfile::Builder::new().prefix(BUNDLE_PREFIX).tempdir_in(parent)?;
  for name in layout {
    std::fs::create_dir_all(dir.path().join(name))?;
  }
  Ok(dir.keep())
}

/// `label.<key>` annotations from a `labels` section of `key value` lines.
fn parse_labels(body: &str) -> impl Iterator<Item = (String, String)> + '_ {
  body
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty() && !line.starts_with('#'))
    .map(|line| match line.split_once(char::is_whitespace) {
      Some((key, value)) => (format!("label.{}", key), value.trim().to_string()),
      None => (format!("label.{}", line), String::new()),
    })
}

/// Render environment variables as a POSIX shell snippet.
fn render_env(env: &BTreeMap<String, String>) -> String {
  let mut out = String::new();
  for (key, value) in env {
    let quoted = value.replace('\'', "'\\''");
    out.push_str(&format!("export {}='{}'\n", key, quoted));
  }
  out
}
