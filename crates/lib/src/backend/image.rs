//! OCI image manifest, index and config types shared by the registry,
//! layout and archive readers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bundle::Bundle;

pub(crate) const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub(crate) const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub(crate) const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub(crate) const MEDIA_TYPE_DOCKER_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Annotation naming a manifest inside an OCI layout's `index.json`.
pub(crate) const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Every manifest media type we can read, for `Accept` headers.
pub(crate) fn manifest_accept() -> String {
  [
    MEDIA_TYPE_OCI_MANIFEST,
    MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_DOCKER_MANIFEST,
    MEDIA_TYPE_DOCKER_LIST,
  ]
  .join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Descriptor {
  #[serde(default)]
  pub media_type: String,
  pub digest: String,
  #[serde(default)]
  pub size: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub platform: Option<Platform>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Platform {
  pub architecture: String,
  pub os: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub variant: Option<String>,
}

/// An image manifest or an image index; which one is decided by content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Manifest {
  #[serde(default)]
  pub schema_version: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub media_type: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub config: Option<Descriptor>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub layers: Vec<Descriptor>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub manifests: Vec<Descriptor>,
}

impl Manifest {
  pub fn is_index(&self) -> bool {
    match self.media_type.as_deref() {
      Some(MEDIA_TYPE_OCI_INDEX) | Some(MEDIA_TYPE_DOCKER_LIST) => true,
      _ => self.config.is_none() && !self.manifests.is_empty(),
    }
  }

  /// The entry of an index built for `os`/`arch`.
  pub fn select_platform(&self, os: &str, arch: &str) -> Option<&Descriptor> {
    self
      .manifests
      .iter()
      .find(|d| d.platform.as_ref().is_some_and(|p| p.os == os && p.architecture == arch))
  }
}

/// The parts of an image config a root filesystem build cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct ImageConfig {
  #[serde(default)]
  pub config: Option<ContainerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ContainerConfig {
  #[serde(default)]
  pub env: Option<Vec<String>>,
  #[serde(default)]
  pub entrypoint: Option<Vec<String>>,
  #[serde(default)]
  pub cmd: Option<Vec<String>>,
  #[serde(default)]
  pub working_dir: Option<String>,
}

impl ImageConfig {
  /// Record the image's environment and runtime defaults on the bundle.
  pub fn apply_to(&self, bundle: &mut Bundle) {
    let Some(config) = &self.config else {
      return;
    };

    for entry in config.env.iter().flatten() {
      if let Some((key, value)) = entry.split_once('=')
        && !key.is_empty()
      {
        bundle.build_env.insert(key.to_string(), value.to_string());
      }
    }

    let runtime = [("oci.entrypoint", &config.entrypoint), ("oci.cmd", &config.cmd)];
    for (key, value) in runtime {
      if let Some(value) = value
        && let Ok(json) = serde_json::to_string(value)
      {
        bundle.annotations.insert(key.to_string(), json);
      }
    }
    if let Some(dir) = config.working_dir.as_deref().filter(|d| !d.is_empty()) {
      bundle.annotations.insert("oci.workdir".to_string(), dir.to_string());
    }
  }
}
