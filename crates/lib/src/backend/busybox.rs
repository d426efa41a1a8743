//! `bootstrap: busybox`: a static busybox binary on a minimal skeleton.

use std::fs;
use std::io;
use std::path::Path;

use tracing::info;

use super::download::{download, http_client};
use super::{Conveyor, Packer, require_header};
use crate::bundle::Bundle;
use crate::context::BuildContext;
use crate::dispatch::SourceKind;
use crate::error::BuildError;

const SKELETON_DIRS: &[&str] = &[
  "bin", "dev", "etc", "home", "proc", "root", "sys", "tmp", "usr/bin", "usr/sbin", "var/tmp",
];

const SKELETON_FILES: &[(&str, &str)] = &[
  ("etc/passwd", "root:x:0:0:root:/root:/bin/sh\n"),
  ("etc/group", "root:x:0:\n"),
  ("etc/hosts", "127.0.0.1 localhost\n"),
];

const STAGED_BINARY: &str = "busybox";

#[derive(Debug)]
pub(crate) struct BusyBoxConveyorPacker;

impl Conveyor for BusyBoxConveyorPacker {
  async fn fetch(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    let kind = SourceKind::BusyBox;
    let url = require_header(bundle, "mirrorurl", &kind)?;
    let dest = bundle.tmp_path().join(STAGED_BINARY);

    info!(url = %url, "downloading busybox");
    let digest = download(ctx, &kind, http_client()?.get(&url), &url, &dest, None).await?;
    bundle.annotations.insert("busybox.url".to_string(), url);
    bundle.annotations.insert("busybox.digest".to_string(), digest.to_string());
    Ok(())
  }
}

impl Packer for BusyBoxConveyorPacker {
  async fn pack(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    let staged = bundle.tmp_path().join(STAGED_BINARY);
    let rootfs = bundle.rootfs_path().to_path_buf();
    bundle
      .blocking(ctx, move |_| install_skeleton(&staged, &rootfs).map_err(BuildError::from))
      .await
  }
}

fn install_skeleton(binary: &Path, rootfs: &Path) -> io::Result<()> {
  for dir in SKELETON_DIRS {
    fs::create_dir_all(rootfs.join(dir))?;
  }
  for (path, content) in SKELETON_FILES {
    fs::write(rootfs.join(path), content)?;
  }

  let target = rootfs.join("bin/busybox");
  fs::copy(binary, &target)?;
  set_executable(&target)?;
  link_shell(rootfs)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(unix)]
fn link_shell(rootfs: &Path) -> io::Result<()> {
  let sh = rootfs.join("bin/sh");
  if fs::symlink_metadata(&sh).is_ok() {
    fs::remove_file(&sh)?;
  }
  std::os::unix::fs::symlink("busybox", sh)
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
  Ok(())
}

#[cfg(not(unix))]
fn link_shell(_rootfs: &Path) -> io::Result<()> {
  Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks require a unix host"))
}
