//! `bootstrap: library`: download a SIF image from a container library.
//!
//! `from` is `[library://][entity/[collection/]]container[:tag]`; missing
//! parts default to `library/default` and `latest`.

use tracing::info;

use super::download::{download, http_client};
use super::local::{LocalImage, staged};
use super::{Conveyor, Packer, require_header};
use crate::bundle::Bundle;
use crate::context::BuildContext;
use crate::dispatch::SourceKind;
use crate::error::BuildError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LibraryRef {
  pub path: String,
  pub tag: String,
}

impl LibraryRef {
  pub fn parse(value: &str) -> Option<Self> {
    let value = value.trim();
    let value = value.strip_prefix("library:").unwrap_or(value).trim_start_matches('/');

    let (path, tag) = match value.rsplit_once(':') {
      Some((path, tag)) if !tag.contains('/') && !tag.is_empty() => (path, tag),
      Some(_) => return None,
      None => (value, "latest"),
    };

    let parts: Vec<&str> = path.split('/').collect();
    if parts.iter().any(|p| p.is_empty()) {
      return None;
    }
    let path = match parts.as_slice() {
      [container] => format!("library/default/{}", container),
      [collection, container] => format!("library/{}/{}", collection, container),
      [entity, collection, container] => format!("{}/{}/{}", entity, collection, container),
      _ => return None,
    };

    Some(Self {
      path,
      tag: tag.to_string(),
    })
  }
}

impl std::fmt::Display for LibraryRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "library://{}:{}", self.path, self.tag)
  }
}

#[derive(Debug, Default)]
pub(crate) struct LibraryConveyorPacker {
  image: Option<LocalImage>,
}

impl Conveyor for LibraryConveyorPacker {
  async fn fetch(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    let kind = SourceKind::Library;
    let from = require_header(bundle, "from", &kind)?;
    let reference = LibraryRef::parse(&from).ok_or_else(|| BuildError::InvalidHeader {
      key: "from",
      value: from.clone(),
      message: "expected [entity/[collection/]]container[:tag]".to_string(),
    })?;

    let config = bundle.config();
    let url = format!(
      "{}/v1/imagefile/{}:{}?arch={}",
      config.library_url.trim_end_matches('/'),
      reference.path,
      reference.tag,
      config.arch
    );
    let mut request = http_client()?.get(&url);
    if let Some(token) = &config.library_token {
      request = request.bearer_auth(token);
    }

    let dest = bundle.tmp_path().join("library.sif");
    info!(reference = %reference, "pulling from library");
    let digest = download(ctx, &kind, request, &url, &dest, None).await?;

    let image = LocalImage::inspect(&dest, &kind)?;
    bundle
      .annotations
      .insert("library.reference".to_string(), reference.to_string());
    bundle.annotations.insert("library.digest".to_string(), digest.to_string());
    self.image = Some(image);
    Ok(())
  }
}

impl Packer for LibraryConveyorPacker {
  async fn pack(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    staged(&self.image, bundle, &SourceKind::Library)?
      .unpack(ctx, &SourceKind::Library, bundle)
      .await
  }
}
