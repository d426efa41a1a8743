//! rootforge-lib: the container root filesystem build pipeline.
//!
//! A build turns a parsed [`Definition`] into a populated [`Bundle`]:
//! - `dispatch`: maps the definition's `bootstrap` header to a backend
//! - `backend`: the two-phase (fetch, then pack) contract and every backend
//! - `orchestrator`: drives both phases under one [`BuildContext`]
//!
//! Configuration is explicit ([`BuildConfig`]); nothing is read from ambient
//! global state.

pub mod backend;
pub mod bundle;
pub mod config;
pub mod consts;
pub mod context;
pub mod definition;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod platform;
pub mod util;

pub use backend::{BackendState, ConveyorPacker};
pub use bundle::Bundle;
pub use config::BuildConfig;
pub use context::BuildContext;
pub use definition::{Definition, Section};
pub use dispatch::{FetchRetry, OciTransport, SourceKind, select_backend};
pub use error::{BuildError, ErrorKind};
pub use orchestrator::{BuildFailure, BuildPhase, build};
