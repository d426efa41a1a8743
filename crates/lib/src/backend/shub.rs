//! `bootstrap: shub`: resolve a `user/repo[:tag]` on the legacy hub and
//! download the image it points to.

use serde::Deserialize;
use tracing::info;

use super::download::{check_status, download, http_client, request_error};
use super::local::{LocalImage, staged};
use super::{Conveyor, Packer, require_header};
use crate::bundle::Bundle;
use crate::context::BuildContext;
use crate::dispatch::SourceKind;
use crate::error::BuildError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ShubRef {
  pub user: String,
  pub repo: String,
  pub tag: String,
}

impl ShubRef {
  pub fn parse(value: &str) -> Option<Self> {
    let value = value.trim();
    let value = value.strip_prefix("shub:").unwrap_or(value).trim_start_matches('/');
    let (path, tag) = match value.split_once(':') {
      Some((path, tag)) if !tag.is_empty() => (path, tag),
      Some(_) => return None,
      None => (value, "latest"),
    };
    let (user, repo) = path.split_once('/')?;
    if user.is_empty() || repo.is_empty() || repo.contains('/') {
      return None;
    }
    Some(Self {
      user: user.to_string(),
      repo: repo.to_string(),
      tag: tag.to_string(),
    })
  }
}

impl std::fmt::Display for ShubRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "shub://{}/{}:{}", self.user, self.repo, self.tag)
  }
}

/// The hub's answer for a container.
#[derive(Debug, Deserialize)]
struct ShubManifest {
  image: String,
  #[serde(default)]
  version: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct ShubConveyorPacker {
  image: Option<LocalImage>,
}

impl Conveyor for ShubConveyorPacker {
  async fn fetch(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    let kind = SourceKind::Shub;
    let from = require_header(bundle, "from", &kind)?;
    let reference = ShubRef::parse(&from).ok_or_else(|| BuildError::InvalidHeader {
      key: "from",
      value: from.clone(),
      message: "expected user/repo[:tag]".to_string(),
    })?;

    let client = http_client()?;
    let api = format!(
      "{}/api/container/{}/{}:{}",
      bundle.config().shub_url.trim_end_matches('/'),
      reference.user,
      reference.repo,
      reference.tag
    );
    info!(reference = %reference, "resolving hub image");
    let manifest: ShubManifest = ctx
      .run(async {
        let response = client.get(&api).send().await.map_err(|e| request_error(&kind, &api, e))?;
        let response = check_status(&kind, &reference.to_string(), response)?;
        response.json().await.map_err(|e| request_error(&kind, &api, e))
      })
      .await?;

    let dest = bundle.tmp_path().join("shub.sif");
    let digest = download(ctx, &kind, client.get(&manifest.image), &manifest.image, &dest, None).await?;

    let image = LocalImage::inspect(&dest, &kind)?;
    bundle.annotations.insert("shub.reference".to_string(), reference.to_string());
    bundle.annotations.insert("shub.digest".to_string(), digest.to_string());
    if let Some(version) = manifest.version {
      bundle.annotations.insert("shub.version".to_string(), version);
    }
    self.image = Some(image);
    Ok(())
  }
}

impl Packer for ShubConveyorPacker {
  async fn pack(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    staged(&self.image, bundle, &SourceKind::Shub)?
      .unpack(ctx, &SourceKind::Shub, bundle)
      .await
  }
}
