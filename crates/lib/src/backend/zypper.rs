//! `bootstrap: zypper`: an openSUSE / SLES root filesystem.

use std::ffi::OsString;
use std::path::Path;

use tracing::{info, warn};

use super::tool::run_tool;
use super::{Conveyor, Packer, expand_osversion, require_header};
use crate::bundle::Bundle;
use crate::config::Tool;
use crate::context::BuildContext;
use crate::dispatch::SourceKind;
use crate::error::BuildError;
use crate::platform;

const BASE_PACKAGE: &str = "zypper";

#[derive(Debug)]
pub(crate) struct ZypperConveyorPacker;

/// Every zypper invocation starts with these: no prompts, operate on `rootfs`.
fn root_args(rootfs: &Path) -> Vec<OsString> {
  vec!["--non-interactive".into(), "--root".into(), rootfs.as_os_str().into()]
}

fn with_root(rootfs: &Path, rest: &[&str]) -> Vec<OsString> {
  let mut args = root_args(rootfs);
  args.extend(rest.iter().map(OsString::from));
  args
}

/// The zypper invocations for one bootstrap, in order.
fn commands(rootfs: &Path, mirror: &str, update: Option<&str>, include: &[String]) -> Vec<Vec<OsString>> {
  let mut cmds = vec![with_root(rootfs, &["addrepo", "--refresh", mirror, "repo-oss"])];
  if let Some(update) = update {
    cmds.push(with_root(rootfs, &["addrepo", "--refresh", update, "repo-update"]));
  }
  cmds.push(with_root(rootfs, &["--gpg-auto-import-keys", "refresh"]));

  let mut install = with_root(rootfs, &["install", "--auto-agree-with-licenses", BASE_PACKAGE]);
  install.extend(include.iter().map(OsString::from));
  cmds.push(install);
  cmds
}

impl Conveyor for ZypperConveyorPacker {
  async fn fetch(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    let kind = SourceKind::Zypper;
    let def = bundle.definition();
    let osversion = def.get_non_empty("osversion").map(str::to_string);
    let mirror = expand_osversion(&require_header(bundle, "mirrorurl", &kind)?, osversion.as_deref())?;
    let update = match def.get_non_empty("updateurl") {
      Some(url) => Some(expand_osversion(url, osversion.as_deref())?),
      None => None,
    };
    let include = def.get_list("include");

    let zypper = bundle.config().tools.resolve(Tool::Zypper, &kind)?;
    if !platform::is_elevated() {
      warn!("zypper bootstraps usually need root; expect it to fail");
    }

    info!(mirror = %mirror, "installing zypper root filesystem");
    for args in commands(bundle.rootfs_path(), &mirror, update.as_deref(), &include) {
      run_tool(ctx, &kind, &zypper, &args, &[]).await?;
    }

    bundle.annotations.insert("zypper.mirror".to_string(), mirror);
    if let Some(update) = update {
      bundle.annotations.insert("zypper.update".to_string(), update);
    }
    Ok(())
  }
}

impl Packer for ZypperConveyorPacker {
  async fn pack(&mut self, _ctx: &BuildContext, _bundle: &mut Bundle) -> Result<(), BuildError> {
    Ok(())
  }
}
