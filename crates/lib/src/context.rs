//! Cancellable execution context threaded through dispatch, fetch and pack.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::BuildError;

/// Cancellation token plus an optional deadline.
///
/// Clones share the same token, so cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
  token: CancellationToken,
  deadline: Option<Instant>,
}

impl BuildContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// Wrap an existing token, e.g. one already wired to a signal handler.
  pub fn from_token(token: CancellationToken) -> Self {
    Self { token, deadline: None }
  }

  /// Expire the context `timeout` from now.
  pub fn with_timeout(self, timeout: Duration) -> Self {
    self.with_deadline(Instant::now() + timeout)
  }

  /// Expire the context at `deadline`. An earlier existing deadline wins.
  pub fn with_deadline(mut self, deadline: Instant) -> Self {
    self.deadline = Some(match self.deadline {
      Some(existing) if existing < deadline => existing,
      _ => deadline,
    });
    self
  }

  pub fn cancel(&self) {
    self.token.cancel();
  }

  pub fn token(&self) -> &CancellationToken {
    &self.token
  }

  pub fn deadline(&self) -> Option<Instant> {
    self.deadline
  }

  /// Returns the error the context would report right now, if any.
  pub fn err(&self) -> Option<BuildError> {
    if self.token.is_cancelled() {
      return Some(BuildError::Cancelled);
    }
    match self.deadline {
      Some(deadline) if Instant::now() >= deadline => Some(BuildError::DeadlineExceeded),
      _ => None,
    }
  }

  pub fn is_done(&self) -> bool {
    self.err().is_some()
  }

  /// Fail fast if the context is already done.
  pub fn check(&self) -> Result<(), BuildError> {
    match self.err() {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  /// [`BuildContext::check`] for blocking loops: fails with
  /// [`io::ErrorKind::Interrupted`] once the context is done.
  pub fn check_io(&self) -> io::Result<()> {
    match self.err() {
      Some(err) => Err(io::Error::new(io::ErrorKind::Interrupted, err.to_string())),
      None => Ok(()),
    }
  }

  /// Resolves once the context is cancelled or its deadline passes.
  pub async fn done(&self) -> BuildError {
    match self.deadline {
      Some(deadline) => tokio::select! {
        _ = self.token.cancelled() => BuildError::Cancelled,
        _ = tokio::time::sleep_until(deadline) => BuildError::DeadlineExceeded,
      },
      None => {
        self.token.cancelled().await;
        BuildError::Cancelled
      }
    }
  }

  /// Run `fut` unless the context finishes first.
  ///
  /// When the context wins, `fut` is dropped; child processes spawned with
  /// `kill_on_drop` die with it.
  pub async fn run<F, T>(&self, fut: F) -> Result<T, BuildError>
  where
    F: Future<Output = Result<T, BuildError>>,
  {
    self.check()?;
    tokio::select! {
      biased;
      err = self.done() => Err(err),
      result = fut => result,
    }
  }
}
