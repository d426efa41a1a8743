//! `bootstrap: oras`: a SIF image stored as an artifact in an OCI registry.

use tracing::info;

use super::download::http_client;
use super::local::{LocalImage, staged};
use super::registry::{ImageRef, RegistryClient};
use super::{Conveyor, Packer, require_header};
use crate::bundle::Bundle;
use crate::context::BuildContext;
use crate::dispatch::SourceKind;
use crate::error::BuildError;

pub(crate) const SIF_LAYER_MEDIA_TYPE: &str = "application/vnd.sylabs.sif.layer.v1.sif";

#[derive(Debug, Default)]
pub(crate) struct OrasConveyorPacker {
  image: Option<LocalImage>,
}

impl Conveyor for OrasConveyorPacker {
  async fn fetch(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    let kind = SourceKind::Oras;
    let from = require_header(bundle, "from", &kind)?;
    let reference = from.strip_prefix("oras:").unwrap_or(&from);
    let image_ref = ImageRef::parse(reference).ok_or_else(|| BuildError::InvalidHeader {
      key: "from",
      value: from.clone(),
      message: "expected registry/repository[:tag][@digest]".to_string(),
    })?;

    let insecure = bundle.config().is_insecure_registry(&image_ref.registry);
    let mut client = RegistryClient::new(http_client()?, kind.clone(), image_ref, insecure);
    info!(image = %client.image(), "pulling SIF artifact");

    let reference = client.image().reference().to_string();
    let (manifest, manifest_digest) = client.manifest(&reference).await?;
    let layer = match manifest.layers.iter().find(|l| l.media_type == SIF_LAYER_MEDIA_TYPE) {
      Some(layer) => layer,
      None if manifest.layers.len() == 1 => &manifest.layers[0],
      None => {
        return Err(BuildError::NotFound {
          backend: kind,
          reference: client.image().to_string(),
          message: format!("manifest has no {} layer", SIF_LAYER_MEDIA_TYPE),
        });
      }
    };

    let dest = bundle.tmp_path().join("oras.sif");
    client.blob_to_file(ctx, layer, &dest).await?;

    let image = LocalImage::inspect(&dest, &kind)?;
    bundle
      .annotations
      .insert("oras.reference".to_string(), client.image().to_string());
    bundle
      .annotations
      .insert("oras.manifest.digest".to_string(), manifest_digest.to_string());
    bundle.annotations.insert("oras.layer.digest".to_string(), layer.digest.clone());
    self.image = Some(image);
    Ok(())
  }
}

impl Packer for OrasConveyorPacker {
  async fn pack(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    staged(&self.image, bundle, &SourceKind::Oras)?
      .unpack(ctx, &SourceKind::Oras, bundle)
      .await
  }
}
