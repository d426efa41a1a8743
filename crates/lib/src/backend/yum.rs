//! `bootstrap: yum` / `bootstrap: dnf`: an RPM root filesystem.
//!
//! Both spellings land here. The installer prefers `dnf` when it can be
//! found and falls back to `yum`, whichever name the definition used.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use super::tool::run_tool;
use super::{Conveyor, Packer, expand_osversion, require_header};
use crate::bundle::Bundle;
use crate::config::{Tool, ToolPaths};
use crate::context::BuildContext;
use crate::dispatch::SourceKind;
use crate::error::BuildError;
use crate::platform;

/// Installed before any `include` so the root has a usable userland.
const BASE_PACKAGE: &str = "coreutils";

#[derive(Debug)]
pub(crate) struct YumConveyorPacker;

fn find_installer(tools: &ToolPaths) -> Result<PathBuf, BuildError> {
  let kind = SourceKind::Yum;
  match tools.find(Tool::Dnf) {
    Some(dnf) => {
      debug!(path = ?dnf, "using dnf");
      Ok(dnf)
    }
    None => tools.resolve(Tool::Yum, &kind),
  }
}

/// Repository configuration. Host repos are ignored (`reposdir=/dev/null`)
/// so only the mirrors from the definition are consulted.
fn repo_conf(mirror: &str, update: Option<&str>, gpgcheck: bool) -> String {
  let mut conf = format!(
    "[main]\ngpgcheck={}\nreposdir=/dev/null\nkeepcache=0\n\n[base]\nname=base\nbaseurl={mirror}\nenabled=1\n",
    u8::from(gpgcheck)
  );
  if let Some(update) = update {
    conf.push_str(&format!("\n[updates]\nname=updates\nbaseurl={update}\nenabled=1\n"));
  }
  conf
}

fn install_args(conf: &Path, rootfs: &Path, osversion: Option<&str>, include: &[String]) -> Vec<OsString> {
  let mut args: Vec<OsString> = vec!["--noplugins".into(), "-c".into(), conf.as_os_str().into()];
  let mut installroot = OsString::from("--installroot=");
  installroot.push(rootfs.as_os_str());
  args.push(installroot);
  if let Some(version) = osversion {
    args.push(format!("--releasever={version}").into());
  }
  args.push("-y".into());
  args.push("install".into());
  args.push(BASE_PACKAGE.into());
  args.extend(include.iter().map(OsString::from));
  args
}

impl Conveyor for YumConveyorPacker {
  async fn fetch(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    let kind = SourceKind::Yum;
    let def = bundle.definition();
    let osversion = def.get_non_empty("osversion").map(str::to_string);
    let mirror = expand_osversion(&require_header(bundle, "mirrorurl", &kind)?, osversion.as_deref())?;
    let update = match def.get_non_empty("updateurl") {
      Some(url) => Some(expand_osversion(url, osversion.as_deref())?),
      None => None,
    };
    let gpgcheck = !matches!(def.get_non_empty("gpgcheck"), Some("0" | "no" | "false"));
    let include = def.get_list("include");

    let installer = find_installer(&bundle.config().tools)?;
    if !platform::is_elevated() {
      warn!("rpm bootstraps usually need root; expect it to fail");
    }

    let conf = bundle.tmp_path().join("yum.conf");
    fs::write(&conf, repo_conf(&mirror, update.as_deref(), gpgcheck)).await?;

    info!(mirror = %mirror, packages = include.len() + 1, "installing rpm root filesystem");
    let args = install_args(&conf, bundle.rootfs_path(), osversion.as_deref(), &include);
    run_tool(ctx, &kind, &installer, &args, &[]).await?;

    bundle.annotations.insert("yum.mirror".to_string(), mirror);
    if let Some(version) = osversion {
      bundle.annotations.insert("yum.osversion".to_string(), version);
    }
    Ok(())
  }
}

impl Packer for YumConveyorPacker {
  async fn pack(&mut self, _ctx: &BuildContext, _bundle: &mut Bundle) -> Result<(), BuildError> {
    Ok(())
  }
}
