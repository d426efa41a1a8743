//! `bootstrap: debootstrap`: a Debian-family root filesystem.

use std::ffi::OsString;

use tracing::warn;

use super::tool::run_tool;
use super::{Conveyor, Packer, require_header};
use crate::bundle::Bundle;
use crate::config::Tool;
use crate::context::BuildContext;
use crate::dispatch::SourceKind;
use crate::error::BuildError;
use crate::platform;

#[derive(Debug)]
pub(crate) struct DebootstrapConveyorPacker;

/// Arguments for `debootstrap [options] <suite> <target> <mirror>`.
fn debootstrap_args(bundle: &Bundle, osversion: &str, mirror: &str) -> Vec<OsString> {
  let def = bundle.definition();
  let mut args: Vec<OsString> = vec![
    "--variant=minbase".into(),
    format!("--arch={}", bundle.config().arch).into(),
  ];
  let include = def.get_list("include");
  if !include.is_empty() {
    args.push(format!("--include={}", include.join(",")).into());
  }
  args.push(osversion.into());
  args.push(bundle.rootfs_path().as_os_str().into());
  args.push(mirror.into());
  args
}

impl Conveyor for DebootstrapConveyorPacker {
  async fn fetch(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    let kind = SourceKind::Debootstrap;
    let osversion = require_header(bundle, "osversion", &kind)?;
    let mirror = require_header(bundle, "mirrorurl", &kind)?;
    let debootstrap = bundle.config().tools.resolve(Tool::Debootstrap, &kind)?;
    if !platform::is_elevated() {
      warn!("debootstrap usually needs root; expect it to fail");
    }

    let args = debootstrap_args(bundle, &osversion, &mirror);
    run_tool(ctx, &kind, &debootstrap, &args, &[]).await?;

    bundle.annotations.insert("debootstrap.suite".to_string(), osversion);
    bundle.annotations.insert("debootstrap.mirror".to_string(), mirror);
    Ok(())
  }
}

impl Packer for DebootstrapConveyorPacker {
  async fn pack(&mut self, _ctx: &BuildContext, _bundle: &mut Bundle) -> Result<(), BuildError> {
    Ok(())
  }
}
