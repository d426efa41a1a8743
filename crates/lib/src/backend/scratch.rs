//! `bootstrap: scratch`: an empty root filesystem.

use super::{Conveyor, Packer};
use crate::bundle::Bundle;
use crate::context::BuildContext;
use crate::error::BuildError;

#[derive(Debug)]
pub(crate) struct ScratchConveyorPacker;

impl Conveyor for ScratchConveyorPacker {
  async fn fetch(&mut self, _ctx: &BuildContext, _bundle: &mut Bundle) -> Result<(), BuildError> {
    Ok(())
  }
}

impl Packer for ScratchConveyorPacker {
  async fn pack(&mut self, _ctx: &BuildContext, _bundle: &mut Bundle) -> Result<(), BuildError> {
    Ok(())
  }
}
