//! Shared helpers for pipeline integration tests.

use std::path::{Path, PathBuf};

use rootforge_lib::BuildConfig;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

/// Isolated build environment: every bundle lands under its own temp dir.
pub struct TestEnv {
  pub temp: TempDir,
  pub config: BuildConfig,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let config = BuildConfig::default().with_tmp_dir(temp.path().join("bundles"));
    Self { temp, config }
  }

  pub fn path(&self, relative: &str) -> PathBuf {
    self.temp.path().join(relative)
  }

  /// Number of bundle directories created so far.
  pub fn bundle_count(&self) -> usize {
    match std::fs::read_dir(&self.config.tmp_dir) {
      Ok(entries) => entries.count(),
      Err(_) => 0,
    }
  }
}

/// Write an executable shell script.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
  use std::os::unix::fs::PermissionsExt;

  let path = dir.join(name);
  std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
  std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
  path
}

/// A stand-in for dnf/yum: populates `--installroot=` with a deterministic
/// tree derived only from the requested packages.
#[cfg(unix)]
pub fn fake_rpm_installer(dir: &Path, name: &str) -> PathBuf {
  write_script(
    dir,
    name,
    r#"root=""
pkgs=""
installing=0
for arg in "$@"; do
  case "$arg" in
    --installroot=*) root="${arg#--installroot=}" ;;
    install) installing=1 ;;
    -*) ;;
    *) [ "$installing" = 1 ] && pkgs="$pkgs $arg" ;;
  esac
done
[ -n "$root" ] || exit 2
mkdir -p "$root/etc" "$root/var/lib/rpm"
echo "ID=fake" > "$root/etc/os-release"
for p in $pkgs; do echo "$p" > "$root/var/lib/rpm/$p"; done"#,
  )
}

/// Number of entries below `dir`, not counting `dir` itself.
pub fn count_entries(dir: &Path) -> usize {
  walkdir::WalkDir::new(dir)
    .min_depth(1)
    .into_iter()
    .filter_map(Result::ok)
    .count()
}

pub fn sha256_hex(data: &[u8]) -> String {
  hex::encode(Sha256::digest(data))
}

pub enum Entry<'a> {
  Dir(&'a str),
  File(&'a str, &'a [u8]),
}

/// An uncompressed tar archive of `entries`.
pub fn tar_of(entries: &[Entry<'_>]) -> Vec<u8> {
  let mut builder = tar::Builder::new(Vec::new());
  for entry in entries {
    let mut header = tar::Header::new_ustar();
    match entry {
      Entry::Dir(path) => {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        header.set_cksum();
        builder.append_data(&mut header, path, std::io::empty()).unwrap();
      }
      Entry::File(path, data) => {
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
      }
    }
  }
  builder.into_inner().unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
  use std::io::Write;

  let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
  encoder.write_all(data).unwrap();
  encoder.finish().unwrap()
}

/// Write an OCI image layout at `dir` holding one manifest named `name`.
pub fn write_oci_layout(dir: &Path, name: &str, config: &str, layers: &[Vec<u8>]) {
  let blobs = dir.join("blobs/sha256");
  std::fs::create_dir_all(&blobs).unwrap();
  let put = |data: &[u8]| {
    let hex = sha256_hex(data);
    std::fs::write(blobs.join(&hex), data).unwrap();
    format!(r#"{{"digest": "sha256:{}", "size": {}"#, hex, data.len())
  };

  let config_desc = put(config.as_bytes());
  let layer_descs: Vec<String> = layers
    .iter()
    .map(|layer| {
      format!(
        r#"{}, "mediaType": "application/vnd.oci.image.layer.v1.tar"}}"#,
        put(layer)
      )
    })
    .collect();
  let manifest = format!(
    r#"{{"schemaVersion": 2, "mediaType": "application/vnd.oci.image.manifest.v1+json",
      "config": {}, "mediaType": "application/vnd.oci.image.config.v1+json"}},
      "layers": [{}]}}"#,
    config_desc,
    layer_descs.join(", ")
  );
  let manifest_desc = put(manifest.as_bytes());

  std::fs::write(dir.join("oci-layout"), r#"{"imageLayoutVersion": "1.0.0"}"#).unwrap();
  std::fs::write(
    dir.join("index.json"),
    format!(
      r#"{{"schemaVersion": 2, "manifests": [{}, "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "annotations": {{"org.opencontainers.image.ref.name": "{}"}}}}]}}"#,
      manifest_desc, name
    ),
  )
  .unwrap();
}
