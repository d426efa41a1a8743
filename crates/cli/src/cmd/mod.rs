mod build;
mod sources;

pub use build::{BuildArgs, cmd_build};
pub use sources::cmd_sources;
