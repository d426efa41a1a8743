//! Images already on this host: sandbox directories, tarballs, squashfs and
//! SIF files.
//!
//! The library, oras and shub backends download a file in fetch and hand it
//! to [`LocalImage`] for pack, so every file-based source unpacks the same way.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use super::layers::apply_layer_to;
use super::sif;
use super::tool::run_tool;
use super::{Conveyor, Packer, require_header};
use crate::bundle::Bundle;
use crate::config::Tool;
use crate::context::BuildContext;
use crate::dispatch::SourceKind;
use crate::error::BuildError;

const SQUASHFS_MAGIC: &[u8; 4] = b"hsqs";
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8; 5] = b"ustar";

/// A recognized image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LocalImage {
  /// An unpacked root filesystem directory.
  Sandbox(PathBuf),
  /// A tarball of a root filesystem, optionally gzipped.
  Tar(PathBuf),
  /// A squashfs filesystem starting `offset` bytes into `path` (non-zero
  /// for SIF files).
  Squashfs { path: PathBuf, offset: u64 },
}

impl LocalImage {
  /// Recognize the image at `path` by its content, not its name.
  pub fn inspect(path: &Path, backend: &SourceKind) -> Result<Self, BuildError> {
    let unrecognized = |message: String| BuildError::UnrecognizedImage {
      backend: backend.clone(),
      path: path.display().to_string(),
      message,
    };

    if fs::metadata(path)?.is_dir() {
      return Ok(LocalImage::Sandbox(path.to_path_buf()));
    }

    let mut prefix = Vec::with_capacity(512);
    File::open(path)?.take(512).read_to_end(&mut prefix)?;

    if prefix.starts_with(SQUASHFS_MAGIC) {
      return Ok(LocalImage::Squashfs {
        path: path.to_path_buf(),
        offset: 0,
      });
    }

    if sif::is_sif(&prefix) {
      return match sif::find_root_partition(path) {
        Ok(Some(partition)) => Ok(LocalImage::Squashfs {
          path: path.to_path_buf(),
          offset: partition.offset,
        }),
        Ok(None) => Err(unrecognized("SIF file has no squashfs partition".to_string())),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => Err(unrecognized(e.to_string())),
        Err(e) => Err(BuildError::Io(e)),
      };
    }

    let gzip = prefix.starts_with(&[0x1f, 0x8b]);
    let tar = prefix.len() >= TAR_MAGIC_OFFSET + TAR_MAGIC.len()
      && &prefix[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC;
    if gzip || tar {
      return Ok(LocalImage::Tar(path.to_path_buf()));
    }

    Err(unrecognized(
      "expected a directory, tar archive, squashfs or SIF image".to_string(),
    ))
  }

  pub fn format_name(&self) -> &'static str {
    match self {
      LocalImage::Sandbox(_) => "sandbox",
      LocalImage::Tar(_) => "tar",
      LocalImage::Squashfs { offset: 0, .. } => "squashfs",
      LocalImage::Squashfs { .. } => "sif",
    }
  }

  /// Populate `bundle`'s root filesystem from this image.
  pub async fn unpack(&self, ctx: &BuildContext, backend: &SourceKind, bundle: &Bundle) -> Result<(), BuildError> {
    let rootfs = bundle.rootfs_path().to_path_buf();
    info!(source = %backend, format = self.format_name(), rootfs = ?rootfs, "unpacking image");

    match self {
      LocalImage::Sandbox(src) => {
        let src = src.clone();
        bundle
          .blocking(ctx, move |ctx| copy_tree(ctx, &src, &rootfs).map_err(BuildError::from))
          .await?;
      }
      LocalImage::Tar(path) => apply_layer_to(ctx, backend, path, bundle).await?,
      LocalImage::Squashfs { path, offset } => {
        let unsquashfs = bundle.config().tools.resolve(Tool::Unsquashfs, backend)?;
        let mut args: Vec<OsString> = vec!["-f".into(), "-d".into(), rootfs.as_os_str().into()];
        if *offset > 0 {
          args.push("-o".into());
          args.push(offset.to_string().into());
        }
        args.push(path.as_os_str().into());
        run_tool(ctx, backend, &unsquashfs, &args, &[]).await?;
      }
    }
    Ok(())
  }
}

/// The image staged by fetch; pack cannot run without one.
pub(crate) fn staged<'a>(image: &'a Option<LocalImage>, bundle: &Bundle, backend: &SourceKind) -> Result<&'a LocalImage, BuildError> {
  image.as_ref().ok_or_else(|| BuildError::UnrecognizedImage {
    backend: backend.clone(),
    path: bundle.tmp_path().display().to_string(),
    message: "fetch staged no image".to_string(),
  })
}

/// Copy a directory tree, keeping modes and symlinks, checking `ctx` between
/// entries. Blocking.
fn copy_tree(ctx: &BuildContext, src: &Path, dst: &Path) -> io::Result<()> {
  let mut dirs = Vec::new();

  for entry in WalkDir::new(src).follow_links(false) {
    ctx.check_io()?;
    let entry = entry.map_err(io::Error::from)?;
    let relative = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    let target = dst.join(relative);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
      dirs.push((target, entry.metadata().map_err(io::Error::from)?.permissions()));
    } else if file_type.is_symlink() {
      let link = fs::read_link(entry.path())?;
      if fs::symlink_metadata(&target).is_ok() {
        fs::remove_file(&target)?;
      }
      symlink(&link, &target)?;
    } else if file_type.is_file() {
      fs::copy(entry.path(), &target)?;
    } else {
      debug!(path = ?entry.path(), "skipping special file");
    }
  }

  // read-only directories only after their contents are in place
  for (dir, permissions) in dirs.into_iter().rev() {
    fs::set_permissions(dir, permissions)?;
  }
  Ok(())
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(original, link)
}

#[cfg(not(unix))]
fn symlink(_original: &Path, _link: &Path) -> io::Result<()> {
  Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks require a unix host"))
}

/// `bootstrap: localimage`, `from: <path>`.
#[derive(Debug, Default)]
pub(crate) struct LocalConveyorPacker {
  image: Option<LocalImage>,
}

impl Conveyor for LocalConveyorPacker {
  async fn fetch(&mut self, _ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    let from = require_header(bundle, "from", &SourceKind::LocalImage)?;
    let path = PathBuf::from(&from);
    if !tokio::fs::try_exists(&path).await? {
      return Err(BuildError::InvalidHeader {
        key: "from",
        value: from,
        message: "no such file or directory".to_string(),
      });
    }

    let image = LocalImage::inspect(&path, &SourceKind::LocalImage)?;
    debug!(path = ?path, format = image.format_name(), "recognized local image");
    bundle.annotations.insert("local.path".to_string(), path.display().to_string());
    bundle
      .annotations
      .insert("local.format".to_string(), image.format_name().to_string());
    self.image = Some(image);
    Ok(())
  }
}

impl Packer for LocalConveyorPacker {
  async fn pack(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    staged(&self.image, bundle, &SourceKind::LocalImage)?
      .unpack(ctx, &SourceKind::LocalImage, bundle)
      .await
  }
}
