//! HTTP downloads with SHA-256 verification.

use std::path::Path;

use reqwest::{RequestBuilder, Response, StatusCode};
use sha2::{Digest as _, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::consts::USER_AGENT;
use crate::context::BuildContext;
use crate::dispatch::SourceKind;
use crate::error::BuildError;
use crate::util::hash::Digest;

/// The shared client used by every network backend.
pub(crate) fn http_client() -> Result<reqwest::Client, BuildError> {
  reqwest::Client::builder()
    .user_agent(USER_AGENT)
    .build()
    .map_err(|e| BuildError::Io(std::io::Error::other(e)))
}

/// Classify a failed HTTP response.
///
/// Missing or forbidden content is the definition's fault; anything else the
/// server says is assumed to be temporary.
pub(crate) fn check_status(backend: &SourceKind, reference: &str, response: Response) -> Result<Response, BuildError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  match status {
    StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BuildError::NotFound {
      backend: backend.clone(),
      reference: reference.to_string(),
      message: format!("HTTP {}", status),
    }),
    _ => Err(BuildError::transient(
      backend.clone(),
      format!("{}: HTTP {}", reference, status),
    )),
  }
}

pub(crate) fn request_error(backend: &SourceKind, url: &str, err: reqwest::Error) -> BuildError {
  BuildError::transient(backend.clone(), format!("request to {} failed: {}", url, err))
}

/// Stream the body of `request` into `dest`, hashing as it goes.
///
/// When `expected` is given the content must match it; a mismatching file is
/// removed. Returns the digest of what was written.
pub(crate) async fn download(
  ctx: &BuildContext,
  backend: &SourceKind,
  request: RequestBuilder,
  url: &str,
  dest: &Path,
  expected: Option<&Digest>,
) -> Result<Digest, BuildError> {
  ctx
    .run(async {
      info!(source = %backend, url = %url, "downloading");
      if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
      }

      let response = request.send().await.map_err(|e| request_error(backend, url, e))?;
      let mut response = check_status(backend, url, response)?;

      let mut file = fs::File::create(dest).await?;
      let mut hasher = Sha256::new();
      let mut size: u64 = 0;
      while let Some(chunk) = response.chunk().await.map_err(|e| request_error(backend, url, e))? {
        hasher.update(&chunk);
        size += chunk.len() as u64;
        file.write_all(&chunk).await?;
      }
      file.flush().await?;

      let actual = Digest {
        algorithm: "sha256".to_string(),
        hex: hex::encode(hasher.finalize()),
      };

      if let Some(expected) = expected
        && expected.is_sha256()
        && expected != &actual
      {
        let _ = fs::remove_file(dest).await;
        return Err(BuildError::DigestMismatch {
          backend: backend.clone(),
          url: url.to_string(),
          expected: expected.to_string(),
          actual: actual.to_string(),
        });
      }

      debug!(path = ?dest, size, digest = %actual, "download complete");
      Ok(actual)
    })
    .await
}

/// Derive a safe local file name from the last path segment of a URL.
pub(crate) fn url_to_filename(url: &str) -> String {
  if let Some(filename) = url.rsplit('/').next() {
    let filename = filename.split('?').next().unwrap_or(filename);
    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  format!("download_{}", &hex::encode(hasher.finalize())[..16])
}
