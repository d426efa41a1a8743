//! Applying image layers (plain or gzipped tarballs) onto a root filesystem.
//!
//! Layers are applied in order. Whiteouts follow the OCI image spec:
//! `.wh.<name>` deletes `<name>` from lower layers, and `.wh..wh..opq` empties
//! its directory of lower-layer content before the layer's own entries land.
//!
//! Lower layers may plant symlinks anywhere in the tree, so every removal is
//! resolved against the canonical root first and skipped if it would land
//! outside it.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, warn};

use crate::bundle::Bundle;
use crate::context::BuildContext;
use crate::dispatch::SourceKind;
use crate::error::BuildError;

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Apply `layers` to the bundle's root filesystem in order.
pub(crate) async fn apply_layers(
  ctx: &BuildContext,
  backend: &SourceKind,
  layers: &[PathBuf],
  bundle: &Bundle,
) -> Result<(), BuildError> {
  for (index, layer) in layers.iter().enumerate() {
    debug!(source = %backend, layer = ?layer, index, "applying layer");
    apply_layer_to(ctx, backend, layer, bundle).await?;
  }
  Ok(())
}

/// Apply a single layer or rootfs tarball to the bundle's root filesystem.
pub(crate) async fn apply_layer_to(
  ctx: &BuildContext,
  backend: &SourceKind,
  layer: &Path,
  bundle: &Bundle,
) -> Result<(), BuildError> {
  let layer_path = layer.to_path_buf();
  let rootfs = bundle.rootfs_path().to_path_buf();
  let backend = backend.clone();
  bundle
    .blocking(ctx, move |ctx| {
      apply_layer(ctx, &layer_path, &rootfs).map_err(|e| match e.kind() {
        io::ErrorKind::InvalidData => BuildError::UnrecognizedImage {
          backend,
          path: layer_path.display().to_string(),
          message: e.to_string(),
        },
        _ => BuildError::Io(e),
      })
    })
    .await
}

/// Open a layer, transparently decompressing gzip.
fn open_layer(path: &Path) -> io::Result<Box<dyn Read>> {
  let mut file = File::open(path)?;
  let mut magic = [0u8; 4];
  let n = read_prefix(&mut file, &mut magic)?;
  file.seek(SeekFrom::Start(0))?;

  if n >= 2 && magic[..2] == GZIP_MAGIC {
    Ok(Box::new(GzDecoder::new(BufReader::new(file))))
  } else if n == 4 && magic == ZSTD_MAGIC {
    Err(io::Error::new(
      io::ErrorKind::InvalidData,
      "zstd-compressed layers are not supported",
    ))
  } else {
    Ok(Box::new(BufReader::new(file)))
  }
}

fn read_prefix(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
  let mut filled = 0;
  while filled < buf.len() {
    let n = file.read(&mut buf[filled..])?;
    if n == 0 {
      break;
    }
    filled += n;
  }
  Ok(filled)
}

/// Reject absolute paths and `..` so whiteouts cannot reach outside the rootfs.
fn safe_relative(path: &Path) -> Option<PathBuf> {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::Normal(part) => out.push(part),
      Component::CurDir => {}
      Component::RootDir | Component::Prefix(_) | Component::ParentDir => return None,
    }
  }
  Some(out)
}

/// Canonical `root/relative`, provided it exists and resolves inside `root`.
/// `root` must already be canonical.
fn contained(root: &Path, relative: &Path) -> io::Result<Option<PathBuf>> {
  match fs::canonicalize(root.join(relative)) {
    Ok(resolved) if resolved.starts_with(root) => Ok(Some(resolved)),
    Ok(resolved) => {
      warn!(path = ?relative, resolved = ?resolved, "path resolves outside the root, skipping");
      Ok(None)
    }
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(e) => Err(e),
  }
}

/// `root/relative` with its parent directory resolved inside `root`. The last
/// component is left as is, so a symlink there is removed rather than followed.
fn contained_entry(root: &Path, relative: &Path) -> io::Result<Option<PathBuf>> {
  let Some(name) = relative.file_name() else {
    return Ok(None);
  };
  let parent = relative.parent().unwrap_or(Path::new(""));
  Ok(contained(root, parent)?.map(|dir| dir.join(name)))
}

fn remove_path(path: &Path) -> io::Result<()> {
  match fs::symlink_metadata(path) {
    Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
    Ok(_) => fs::remove_file(path),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

fn clear_dir(dir: &Path) -> io::Result<()> {
  let entries = match fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
    Err(e) => return Err(e),
  };
  for entry in entries {
    remove_path(&entry?.path())?;
  }
  Ok(())
}

/// Extract a whole (optionally gzipped) archive into `dest`, checking `ctx`
/// between entries. Blocking.
pub(crate) fn unpack_archive(ctx: &BuildContext, path: &Path, dest: &Path) -> io::Result<()> {
  fs::create_dir_all(dest)?;
  let mut archive = tar::Archive::new(open_layer(path)?);
  for entry in archive.entries()? {
    ctx.check_io()?;
    entry?.unpack_in(dest)?;
  }
  Ok(())
}

/// Apply one layer, checking `ctx` between entries. Blocking; run it off the
/// async runtime.
pub(crate) fn apply_layer(ctx: &BuildContext, layer: &Path, rootfs: &Path) -> io::Result<()> {
  let root = fs::canonicalize(rootfs)?;

  // opaque directories are cleared before any entry of this layer lands,
  // wherever the marker sits in the archive
  let mut archive = tar::Archive::new(open_layer(layer)?);
  for entry in archive.entries()? {
    ctx.check_io()?;
    let entry = entry?;
    let path = entry.path()?.into_owned();
    if path.file_name().and_then(|n| n.to_str()) != Some(OPAQUE_WHITEOUT) {
      continue;
    }
    let Some(relative) = path.parent().and_then(safe_relative) else {
      continue;
    };
    if let Some(dir) = contained(&root, &relative)? {
      debug!(dir = ?relative, "opaque whiteout");
      clear_dir(&dir)?;
    }
  }

  let mut archive = tar::Archive::new(open_layer(layer)?);
  archive.set_preserve_permissions(true);
  archive.set_overwrite(true);
  archive.set_unpack_xattrs(false);

  for entry in archive.entries()? {
    ctx.check_io()?;
    let mut entry = entry?;
    let path = entry.path()?.into_owned();
    let Some(relative) = safe_relative(&path) else {
      warn!(path = ?path, "skipping layer entry outside the root");
      continue;
    };
    let Some(name) = relative.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
      continue;
    };

    if name == OPAQUE_WHITEOUT {
      continue;
    }
    if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
      if hidden.is_empty() || hidden == "." || hidden == ".." {
        warn!(path = ?path, "skipping malformed whiteout");
        continue;
      }
      let parent = relative.parent().unwrap_or(Path::new(""));
      if let Some(target) = contained_entry(&root, &parent.join(hidden))? {
        remove_path(&target)?;
      }
      continue;
    }

    // a directory replaces a non-directory and vice versa
    let entry_is_dir = entry.header().entry_type().is_dir();
    if let Some(dest) = contained_entry(&root, &relative)?
      && let Ok(meta) = fs::symlink_metadata(&dest)
      && meta.is_dir() != entry_is_dir
    {
      remove_path(&dest)?;
    }

    entry.unpack_in(&root)?;
  }

  Ok(())
}
