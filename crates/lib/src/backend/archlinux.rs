//! `bootstrap: arch`: an Arch Linux root filesystem via `pacstrap`.

use std::ffi::OsString;
use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use super::tool::run_tool;
use super::{Conveyor, Packer};
use crate::bundle::Bundle;
use crate::config::Tool;
use crate::context::BuildContext;
use crate::dispatch::SourceKind;
use crate::error::BuildError;
use crate::platform;

/// Packages installed before any `include`.
const BASE_PACKAGES: &[&str] = &["base"];

#[derive(Debug)]
pub(crate) struct ArchConveyorPacker;

/// A pacman.conf pointing `core` and `extra` at `mirror`
/// (e.g. `https://geo.mirror.pkgbuild.com/$repo/os/$arch`).
fn pacman_conf(mirror: &str) -> String {
  format!(
    "[options]\nArchitecture = auto\nSigLevel = Required DatabaseOptional\n\n[core]\nServer = {mirror}\n\n[extra]\nServer = {mirror}\n"
  )
}

fn pacstrap_args(conf: Option<&Path>, rootfs: &Path, include: &[String]) -> Vec<OsString> {
  let mut args: Vec<OsString> = Vec::new();
  if let Some(conf) = conf {
    args.push("-C".into());
    args.push(conf.as_os_str().into());
  }
  // keep the host cache untouched, skip host keyring and mirrorlist copies
  for flag in ["-c", "-d", "-G", "-M"] {
    args.push(flag.into());
  }
  args.push(rootfs.as_os_str().into());
  args.extend(BASE_PACKAGES.iter().map(OsString::from));
  args.extend(include.iter().map(OsString::from));
  args
}

impl Conveyor for ArchConveyorPacker {
  async fn fetch(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    let kind = SourceKind::Arch;
    let pacstrap = bundle.config().tools.resolve(Tool::Pacstrap, &kind)?;
    if !platform::is_elevated() {
      warn!("pacstrap usually needs root; expect it to fail");
    }

    let conf = match bundle.definition().get_non_empty("mirrorurl") {
      Some(mirror) => {
        let path = bundle.tmp_path().join("pacman.conf");
        fs::write(&path, pacman_conf(mirror)).await?;
        debug!(path = ?path, mirror, "wrote pacman.conf");
        Some(path)
      }
      None => None,
    };

    let include = bundle.definition().get_list("include");
    let args = pacstrap_args(conf.as_deref(), bundle.rootfs_path(), &include);
    run_tool(ctx, &kind, &pacstrap, &args, &[]).await?;

    if let Some(mirror) = bundle.definition().get_non_empty("mirrorurl").map(str::to_string) {
      bundle.annotations.insert("arch.mirror".to_string(), mirror);
    }
    Ok(())
  }
}

impl Packer for ArchConveyorPacker {
  async fn pack(&mut self, _ctx: &BuildContext, _bundle: &mut Bundle) -> Result<(), BuildError> {
    Ok(())
  }
}
