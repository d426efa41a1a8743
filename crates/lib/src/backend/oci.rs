//! OCI transports: `docker`, `docker-daemon`, `docker-archive`, `oci` and
//! `oci-archive`.
//!
//! Fetch resolves the image to an ordered list of layer blobs staged on disk
//! (downloaded into the bundle's tmp directory, or read in place from a
//! layout) and records the image config. Pack applies the layers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::download::http_client;
use super::image::{ANNOTATION_REF_NAME, ImageConfig, Manifest};
use super::layers::{apply_layers, unpack_archive};
use super::registry::{ImageRef, RegistryClient};
use super::tool::run_tool;
use super::{Conveyor, Packer, require_header};
use crate::bundle::Bundle;
use crate::config::Tool;
use crate::context::BuildContext;
use crate::dispatch::{OciTransport, SourceKind};
use crate::error::BuildError;
use crate::util::hash::{Digest, hash_file};

/// The result of fetch: layers in application order plus the image config.
#[derive(Debug, Default)]
struct StagedImage {
  layers: Vec<PathBuf>,
  config: ImageConfig,
  reference: String,
  manifest_digest: Option<String>,
}

#[derive(Debug)]
pub(crate) struct OciConveyorPacker {
  transport: OciTransport,
  layers: Vec<PathBuf>,
}

impl OciConveyorPacker {
  pub fn new(transport: OciTransport) -> Self {
    Self {
      transport,
      layers: Vec::new(),
    }
  }

  fn kind(&self) -> SourceKind {
    SourceKind::Oci(self.transport)
  }
}

impl Conveyor for OciConveyorPacker {
  async fn fetch(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    let kind = self.kind();
    let from = require_header(bundle, "from", &kind)?;
    info!(transport = self.transport.as_str(), from = %from, "resolving image");

    let staged = match self.transport {
      OciTransport::Docker => fetch_from_registry(ctx, &kind, &from, bundle).await?,
      OciTransport::DockerDaemon => {
        let archive = save_from_daemon(ctx, &kind, &from, bundle).await?;
        let dir = bundle.tmp_path().join("docker-archive");
        let mut staged = bundle
          .blocking(ctx, move |ctx| {
            read_docker_archive(ctx, &kind_of(OciTransport::DockerDaemon), &archive, &dir, None)
          })
          .await?;
        staged.reference = from.clone();
        staged
      }
      OciTransport::DockerArchive => {
        let (path, tag) = split_path_ref(&from);
        let path = existing(path, &from)?;
        let dir = bundle.tmp_path().join("docker-archive");
        bundle
          .blocking(ctx, move |ctx| {
            read_docker_archive(ctx, &kind_of(OciTransport::DockerArchive), &path, &dir, tag.as_deref())
          })
          .await?
      }
      OciTransport::Oci => {
        let (path, name) = split_path_ref(&from);
        let layout = existing(path, &from)?;
        let arch = bundle.config().arch.clone();
        bundle
          .blocking(ctx, move |_| read_oci_layout(&kind_of(OciTransport::Oci), &layout, name.as_deref(), &arch))
          .await?
      }
      OciTransport::OciArchive => {
        let (path, name) = split_path_ref(&from);
        let archive = existing(path, &from)?;
        let layout = bundle.tmp_path().join("oci-layout");
        let arch = bundle.config().arch.clone();
        bundle
          .blocking(ctx, move |ctx| {
            let kind = kind_of(OciTransport::OciArchive);
            unpack_archive(ctx, &archive, &layout).map_err(|e| invalid_data(&kind, &archive, e))?;
            read_oci_layout(&kind, &layout, name.as_deref(), &arch)
          })
          .await?
      }
    };

    debug!(layers = staged.layers.len(), reference = %staged.reference, "image staged");
    staged.config.apply_to(bundle);
    bundle.annotations.insert("oci.reference".to_string(), staged.reference);
    if let Some(digest) = staged.manifest_digest {
      bundle.annotations.insert("oci.manifest.digest".to_string(), digest);
    }
    self.layers = staged.layers;
    Ok(())
  }
}

impl Packer for OciConveyorPacker {
  async fn pack(&mut self, ctx: &BuildContext, bundle: &mut Bundle) -> Result<(), BuildError> {
    apply_layers(ctx, &self.kind(), &self.layers, bundle).await
  }
}

fn kind_of(transport: OciTransport) -> SourceKind {
  SourceKind::Oci(transport)
}

/// `path` or `path:ref`, where `ref` may itself contain colons
/// (`image.tar:repo:tag`). A suffix only counts when the whole value is not
/// an existing path.
fn split_path_ref(from: &str) -> (PathBuf, Option<String>) {
  if Path::new(from).exists() {
    return (PathBuf::from(from), None);
  }
  for (at, _) in from.match_indices(':') {
    let (path, reference) = (&from[..at], &from[at + 1..]);
    if !reference.is_empty() && Path::new(path).exists() {
      return (PathBuf::from(path), Some(reference.to_string()));
    }
  }
  (PathBuf::from(from), None)
}

fn existing(path: PathBuf, from: &str) -> Result<PathBuf, BuildError> {
  if path.exists() {
    Ok(path)
  } else {
    Err(BuildError::InvalidHeader {
      key: "from",
      value: from.to_string(),
      message: "no such file or directory".to_string(),
    })
  }
}

fn invalid_data(kind: &SourceKind, path: &Path, err: io::Error) -> BuildError {
  match err.kind() {
    io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => BuildError::UnrecognizedImage {
      backend: kind.clone(),
      path: path.display().to_string(),
      message: err.to_string(),
    },
    _ => BuildError::Io(err),
  }
}

fn unrecognized(kind: &SourceKind, path: &Path, message: impl Into<String>) -> BuildError {
  BuildError::UnrecognizedImage {
    backend: kind.clone(),
    path: path.display().to_string(),
    message: message.into(),
  }
}

fn read_json<T: DeserializeOwned>(kind: &SourceKind, path: &Path) -> Result<T, BuildError> {
  let data = fs::read(path).map_err(|e| match e.kind() {
    io::ErrorKind::NotFound => unrecognized(kind, path, "missing file"),
    _ => BuildError::Io(e),
  })?;
  serde_json::from_slice(&data).map_err(|e| unrecognized(kind, path, e.to_string()))
}

/// Pull `from` from its registry into `tmp/blobs/`.
async fn fetch_from_registry(
  ctx: &BuildContext,
  kind: &SourceKind,
  from: &str,
  bundle: &Bundle,
) -> Result<StagedImage, BuildError> {
  let image = ImageRef::parse(from).ok_or_else(|| BuildError::InvalidHeader {
    key: "from",
    value: from.to_string(),
    message: "expected [registry/]repository[:tag][@digest]".to_string(),
  })?;
  let config = bundle.config();
  let insecure = config.is_insecure_registry(&image.registry);
  let mut client = RegistryClient::new(http_client()?, kind.clone(), image, insecure);

  let (manifest, manifest_digest) = client.image_manifest("linux", &config.arch).await?;
  let image_config = match &manifest.config {
    Some(descriptor) => {
      let bytes = client.blob_bytes(descriptor).await?;
      serde_json::from_slice(&bytes)
        .map_err(|e| BuildError::transient(kind.clone(), format!("malformed image config: {}", e)))?
    }
    None => ImageConfig::default(),
  };

  let blobs = bundle.tmp_path().join("blobs");
  let mut layers = Vec::with_capacity(manifest.layers.len());
  for (index, layer) in manifest.layers.iter().enumerate() {
    let digest = Digest::parse(&layer.digest)
      .ok_or_else(|| BuildError::transient(kind.clone(), format!("malformed layer digest {:?}", layer.digest)))?;
    let dest = blobs.join(format!("{}-{}", digest.algorithm, digest.hex));
    debug!(index, digest = %digest, size = layer.size, "pulling layer");
    client.blob_to_file(ctx, layer, &dest).await?;
    layers.push(dest);
  }

  Ok(StagedImage {
    layers,
    config: image_config,
    reference: client.image().to_string(),
    manifest_digest: Some(manifest_digest.to_string()),
  })
}

/// `docker save` the image into the bundle's tmp directory.
async fn save_from_daemon(
  ctx: &BuildContext,
  kind: &SourceKind,
  from: &str,
  bundle: &Bundle,
) -> Result<PathBuf, BuildError> {
  let reference = from.trim_start_matches('/');
  if reference.is_empty() {
    return Err(BuildError::MissingHeader {
      backend: kind.clone(),
      key: "from",
    });
  }
  let docker = bundle.config().tools.resolve(Tool::Docker, kind)?;
  let archive = bundle.tmp_path().join("daemon.tar");
  let args = vec!["save".into(), "-o".into(), archive.as_os_str().into(), reference.into()];
  run_tool(ctx, kind, &docker, &args, &[]).await?;
  Ok(archive)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ArchiveEntry {
  config: String,
  #[serde(default)]
  repo_tags: Option<Vec<String>>,
  layers: Vec<String>,
}

/// Paths inside an archive must stay inside the extraction directory.
fn archive_member(kind: &SourceKind, dir: &Path, member: &str) -> Result<PathBuf, BuildError> {
  let relative = Path::new(member);
  if relative.is_absolute() || relative.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
    return Err(unrecognized(kind, dir, format!("archive member {:?} escapes the archive", member)));
  }
  Ok(dir.join(relative))
}

/// Extract a `docker save` tarball and read its `manifest.json`.
fn read_docker_archive(
  ctx: &BuildContext,
  kind: &SourceKind,
  archive: &Path,
  dir: &Path,
  tag: Option<&str>,
) -> Result<StagedImage, BuildError> {
  unpack_archive(ctx, archive, dir).map_err(|e| invalid_data(kind, archive, e))?;

  let entries: Vec<ArchiveEntry> = read_json(kind, &dir.join("manifest.json"))?;
  let entry = match tag {
    Some(tag) => entries
      .iter()
      .find(|e| e.repo_tags.iter().flatten().any(|t| t == tag))
      .ok_or_else(|| BuildError::NotFound {
        backend: kind.clone(),
        reference: format!("{}:{}", archive.display(), tag),
        message: "no image with that tag in the archive".to_string(),
      })?,
    None => entries
      .first()
      .ok_or_else(|| unrecognized(kind, archive, "archive holds no images"))?,
  };

  let config: ImageConfig = read_json(kind, &archive_member(kind, dir, &entry.config)?)?;
  let layers = entry
    .layers
    .iter()
    .map(|layer| archive_member(kind, dir, layer))
    .collect::<Result<Vec<_>, _>>()?;

  let reference = entry
    .repo_tags
    .iter()
    .flatten()
    .next()
    .cloned()
    .unwrap_or_else(|| archive.display().to_string());

  Ok(StagedImage {
    layers,
    config,
    reference,
    manifest_digest: None,
  })
}

/// Path of a blob in a layout, after checking it matches its digest.
fn verified_blob(kind: &SourceKind, layout: &Path, digest: &str) -> Result<PathBuf, BuildError> {
  let parsed = Digest::parse(digest).ok_or_else(|| unrecognized(kind, layout, format!("invalid digest {:?}", digest)))?;
  let path = layout.join("blobs").join(&parsed.algorithm).join(&parsed.hex);
  if !path.is_file() {
    return Err(unrecognized(kind, layout, format!("missing blob {}", digest)));
  }

  if parsed.is_sha256() {
    let actual = hash_file(&path).map_err(|e| unrecognized(kind, &path, e.to_string()))?;
    if actual.0 != parsed.hex {
      return Err(BuildError::DigestMismatch {
        backend: kind.clone(),
        url: path.display().to_string(),
        expected: digest.to_string(),
        actual: Digest::sha256(&actual).to_string(),
      });
    }
  }
  Ok(path)
}

/// Read the image named `name` (or the only / host-platform image) from an
/// OCI image layout directory.
fn read_oci_layout(kind: &SourceKind, layout: &Path, name: Option<&str>, arch: &str) -> Result<StagedImage, BuildError> {
  let index: Manifest = read_json(kind, &layout.join("index.json"))?;

  let descriptor = match name {
    Some(name) => index
      .manifests
      .iter()
      .find(|d| d.annotations.get(ANNOTATION_REF_NAME).map(String::as_str) == Some(name))
      .ok_or_else(|| BuildError::NotFound {
        backend: kind.clone(),
        reference: format!("{}:{}", layout.display(), name),
        message: "no manifest with that name in the layout".to_string(),
      })?,
    None if index.manifests.len() == 1 => &index.manifests[0],
    None => index.select_platform("linux", arch).ok_or_else(|| BuildError::NotFound {
      backend: kind.clone(),
      reference: layout.display().to_string(),
      message: format!(
        "layout holds {} manifests and none for linux/{}; name one as path:ref",
        index.manifests.len(),
        arch
      ),
    })?,
  };

  let mut manifest_digest = descriptor.digest.clone();
  let mut manifest: Manifest = read_json(kind, &verified_blob(kind, layout, &manifest_digest)?)?;
  if manifest.is_index() {
    let platform = manifest.select_platform("linux", arch).ok_or_else(|| BuildError::NotFound {
      backend: kind.clone(),
      reference: layout.display().to_string(),
      message: format!("no manifest for platform linux/{}", arch),
    })?;
    manifest_digest = platform.digest.clone();
    manifest = read_json(kind, &verified_blob(kind, layout, &manifest_digest)?)?;
  }

  let config = match &manifest.config {
    Some(descriptor) => read_json(kind, &verified_blob(kind, layout, &descriptor.digest)?)?,
    None => ImageConfig::default(),
  };
  let layers = manifest
    .layers
    .iter()
    .map(|layer| verified_blob(kind, layout, &layer.digest))
    .collect::<Result<Vec<_>, _>>()?;

  let reference = match name {
    Some(name) => format!("{}:{}", layout.display(), name),
    None => layout.display().to_string(),
  };
  Ok(StagedImage {
    layers,
    config,
    reference,
    manifest_digest: Some(manifest_digest),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::BuildConfig;
  use crate::definition::Definition;
  use crate::error::ErrorKind;
  use crate::util::hash::hash_bytes;
  use crate::util::testutil::{Canned, TarEntry, build_tar, serve_http, write_script};
  use tempfile::TempDir;

  const CONFIG: &str = r#"{ "architecture": "amd64", "os": "linux",
    "config": { "Env": ["PATH=/usr/sbin:/usr/bin:/sbin:/bin", "APP=demo"], "Cmd": ["/bin/sh"] } }"#;

  fn sha(data: &[u8]) -> String {
    format!("sha256:{}", hash_bytes(data).0)
  }

  fn base_layer() -> Vec<u8> {
    build_tar(
      &[
        TarEntry::Dir("etc/"),
        TarEntry::File("etc/os-release", b"ID=base\n", 0o644),
        TarEntry::File("etc/motd", b"welcome\n", 0o644),
      ],
      true,
    )
  }

  fn top_layer() -> Vec<u8> {
    build_tar(
      &[
        TarEntry::File("etc/.wh.motd", b"", 0o644),
        TarEntry::File("etc/app.conf", b"on\n", 0o644),
      ],
      false,
    )
  }

  fn manifest_json(config: &[u8], layers: &[&[u8]]) -> String {
    let layers: Vec<String> = layers
      .iter()
      .map(|l| {
        format!(
          r#"{{ "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip", "digest": "{}", "size": {} }}"#,
          sha(l),
          l.len()
        )
      })
      .collect();
    format!(
      r#"{{ "schemaVersion": 2, "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {{ "mediaType": "application/vnd.oci.image.config.v1+json", "digest": "{}", "size": {} }},
        "layers": [{}] }}"#,
      sha(config),
      config.len(),
      layers.join(",")
    )
  }

  /// Write an OCI layout holding one image tagged `name`.
  fn write_layout(dir: &Path, name: &str) {
    let blobs = dir.join("blobs/sha256");
    fs::create_dir_all(&blobs).unwrap();
    let (base, top) = (base_layer(), top_layer());
    let manifest = manifest_json(CONFIG.as_bytes(), &[&base, &top]);
    for blob in [base.as_slice(), top.as_slice(), CONFIG.as_bytes(), manifest.as_bytes()] {
      fs::write(blobs.join(hash_bytes(blob).0), blob).unwrap();
    }
    fs::write(dir.join("oci-layout"), r#"{"imageLayoutVersion": "1.0.0"}"#).unwrap();
    fs::write(
      dir.join("index.json"),
      format!(
        r#"{{ "schemaVersion": 2, "manifests": [ {{ "mediaType": "application/vnd.oci.image.manifest.v1+json",
          "digest": "{}", "size": {}, "annotations": {{ "{}": "{}" }} }} ] }}"#,
        sha(manifest.as_bytes()),
        manifest.len(),
        ANNOTATION_REF_NAME,
        name
      ),
    )
    .unwrap();
  }

  fn docker_archive() -> Vec<u8> {
    let (base, top) = (base_layer(), top_layer());
    let manifest = r#"[{"Config": "config.json", "RepoTags": ["demo:1.0"], "Layers": ["base/layer.tar", "top/layer.tar"]}]"#;
    build_tar(
      &[
        TarEntry::File("manifest.json", manifest.as_bytes(), 0o644),
        TarEntry::File("config.json", CONFIG.as_bytes(), 0o644),
        TarEntry::Dir("base/"),
        TarEntry::File("base/layer.tar", &base, 0o644),
        TarEntry::Dir("top/"),
        TarEntry::File("top/layer.tar", &top, 0o644),
      ],
      false,
    )
  }

  async fn build(transport: OciTransport, from: &str, config: &BuildConfig) -> Bundle {
    let def = Definition::from_header([("bootstrap", transport.as_str()), ("from", from)]);
    let mut bundle = Bundle::create(def, config).unwrap();
    let ctx = BuildContext::new();
    let mut cp = OciConveyorPacker::new(transport);
    cp.fetch(&ctx, &mut bundle).await.unwrap();
    cp.pack(&ctx, &mut bundle).await.unwrap();
    bundle
  }

  fn assert_layers_applied(bundle: &Bundle) {
    let rootfs = bundle.rootfs_path();
    assert_eq!(fs::read_to_string(rootfs.join("etc/os-release")).unwrap(), "ID=base\n");
    assert_eq!(fs::read_to_string(rootfs.join("etc/app.conf")).unwrap(), "on\n");
    assert!(!rootfs.join("etc/motd").exists());
    assert_eq!(bundle.build_env["APP"], "demo");
    assert_eq!(bundle.annotations["oci.cmd"], r#"["/bin/sh"]"#);
  }

  #[tokio::test]
  async fn oci_layout_by_name() {
    let temp = TempDir::new().unwrap();
    let layout = temp.path().join("layout");
    write_layout(&layout, "v1");
    let config = BuildConfig::default().with_tmp_dir(temp.path().join("bundles"));

    let bundle = build(OciTransport::Oci, &format!("{}:v1", layout.display()), &config).await;

    assert_layers_applied(&bundle);
    assert!(bundle.annotations["oci.reference"].ends_with("layout:v1"));
  }

  #[tokio::test]
  async fn oci_layout_unknown_name_is_not_found() {
    let temp = TempDir::new().unwrap();
    let layout = temp.path().join("layout");
    write_layout(&layout, "v1");
    let config = BuildConfig::default().with_tmp_dir(temp.path().join("bundles"));
    let from = format!("{}:v2", layout.display());
    let def = Definition::from_header([("bootstrap", "oci"), ("from", from.as_str())]);
    let mut bundle = Bundle::create(def, &config).unwrap();

    let err = OciConveyorPacker::new(OciTransport::Oci)
      .fetch(&BuildContext::new(), &mut bundle)
      .await
      .unwrap_err();

    assert!(matches!(err, BuildError::NotFound { .. }), "{err}");
  }

  #[tokio::test]
  async fn tampered_layout_blob_is_detected() {
    let temp = TempDir::new().unwrap();
    let layout = temp.path().join("layout");
    write_layout(&layout, "v1");
    let victim = layout.join("blobs/sha256").join(hash_bytes(&top_layer()).0);
    fs::write(&victim, b"tampered").unwrap();
    let config = BuildConfig::default().with_tmp_dir(temp.path().join("bundles"));
    let from = layout.display().to_string();
    let def = Definition::from_header([("bootstrap", "oci"), ("from", from.as_str())]);
    let mut bundle = Bundle::create(def, &config).unwrap();

    let err = OciConveyorPacker::new(OciTransport::Oci)
      .fetch(&BuildContext::new(), &mut bundle)
      .await
      .unwrap_err();

    assert!(matches!(err, BuildError::DigestMismatch { .. }), "{err}");
  }

  #[tokio::test]
  async fn oci_archive_is_extracted_then_read() {
    let temp = TempDir::new().unwrap();
    let layout = temp.path().join("layout");
    write_layout(&layout, "latest");
    let archive = temp.path().join("image.tar");
    {
      let file = fs::File::create(&archive).unwrap();
      let mut builder = tar::Builder::new(file);
      builder.append_dir_all(".", &layout).unwrap();
      builder.finish().unwrap();
    }
    let config = BuildConfig::default().with_tmp_dir(temp.path().join("bundles"));

    let bundle = build(OciTransport::OciArchive, &archive.display().to_string(), &config).await;

    assert_layers_applied(&bundle);
  }

  #[tokio::test]
  async fn docker_archive_by_tag() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("demo.tar");
    fs::write(&archive, docker_archive()).unwrap();
    let config = BuildConfig::default().with_tmp_dir(temp.path().join("bundles"));

    let bundle = build(
      OciTransport::DockerArchive,
      &format!("{}:demo:1.0", archive.display()),
      &config,
    )
    .await;

    assert_layers_applied(&bundle);
    assert_eq!(bundle.annotations["oci.reference"], "demo:1.0");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn docker_daemon_saves_through_the_docker_cli() {
    let temp = TempDir::new().unwrap();
    let fixture = temp.path().join("saved.tar");
    fs::write(&fixture, docker_archive()).unwrap();
    // docker save -o <path> <ref>
    let docker = write_script(temp.path(), "docker", &format!("cp '{}' \"$3\"", fixture.display()));
    let mut config = BuildConfig::default().with_tmp_dir(temp.path().join("bundles"));
    config.tools.docker = Some(docker);

    let bundle = build(OciTransport::DockerDaemon, "demo:1.0", &config).await;

    assert_layers_applied(&bundle);
    assert_eq!(bundle.annotations["oci.reference"], "demo:1.0");
  }

  #[tokio::test]
  async fn registry_pull_selects_platform_and_records_env() {
    let temp = TempDir::new().unwrap();
    let (base, top) = (base_layer(), top_layer());
    let manifest = manifest_json(CONFIG.as_bytes(), &[&base, &top]);
    let index = format!(
      r#"{{ "schemaVersion": 2, "mediaType": "application/vnd.oci.image.index.v1+json", "manifests": [
        {{ "mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:{}", "size": 1,
           "platform": {{ "architecture": "s390x", "os": "linux" }} }},
        {{ "mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "{}", "size": {},
           "platform": {{ "architecture": "amd64", "os": "linux" }} }} ] }}"#,
      "0".repeat(64),
      sha(manifest.as_bytes()),
      manifest.len()
    );
    let repo = "/v2/test/demo";
    let routes = vec![
      (format!("{}/manifests/1.0", repo), Canned::ok(index)),
      (format!("{}/manifests/{}", repo, sha(manifest.as_bytes())), Canned::ok(manifest.clone())),
      (format!("{}/blobs/{}", repo, sha(CONFIG.as_bytes())), Canned::ok(CONFIG)),
      (format!("{}/blobs/{}", repo, sha(&base)), Canned::ok(base.clone())),
      (format!("{}/blobs/{}", repo, sha(&top)), Canned::ok(top.clone())),
    ];
    let addr = serve_http(routes).await;
    let mut config = BuildConfig::default().with_tmp_dir(temp.path().join("bundles"));
    config.arch = "amd64".to_string();
    config.insecure_registries.push(addr.to_string());

    let bundle = build(OciTransport::Docker, &format!("//{}/test/demo:1.0", addr), &config).await;

    assert_layers_applied(&bundle);
    assert_eq!(bundle.annotations["oci.manifest.digest"], sha(manifest.as_bytes()));
  }

  #[tokio::test]
  async fn registry_without_platform_match_is_a_config_error() {
    let temp = TempDir::new().unwrap();
    let index = r#"{ "schemaVersion": 2, "mediaType": "application/vnd.oci.image.index.v1+json", "manifests": [
      { "digest": "sha256:00", "size": 1, "platform": { "architecture": "s390x", "os": "linux" } } ] }"#;
    let addr = serve_http(vec![("/v2/test/demo/manifests/latest".to_string(), Canned::ok(index))]).await;
    let mut config = BuildConfig::default().with_tmp_dir(temp.path().join("bundles"));
    config.arch = "amd64".to_string();
    config.insecure_registries.push(addr.to_string());
    let from = format!("{}/test/demo", addr);
    let def = Definition::from_header([("bootstrap", "docker"), ("from", from.as_str())]);
    let mut bundle = Bundle::create(def, &config).unwrap();

    let err = OciConveyorPacker::new(OciTransport::Docker)
      .fetch(&BuildContext::new(), &mut bundle)
      .await
      .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Config, "{err}");
  }

  #[test]
  fn path_ref_split_only_when_prefix_exists() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().display().to_string();

    assert_eq!(split_path_ref(&dir), (temp.path().to_path_buf(), None));
    assert_eq!(
      split_path_ref(&format!("{}:v1", dir)),
      (temp.path().to_path_buf(), Some("v1".to_string()))
    );
    assert_eq!(split_path_ref("/no/such:v1"), (PathBuf::from("/no/such:v1"), None));
  }

  #[test]
  fn archive_members_cannot_escape() {
    let kind = kind_of(OciTransport::DockerArchive);
    assert!(archive_member(&kind, Path::new("/tmp/x"), "../../etc/passwd").is_err());
    assert!(archive_member(&kind, Path::new("/tmp/x"), "/etc/passwd").is_err());
    assert_eq!(
      archive_member(&kind, Path::new("/tmp/x"), "abc/layer.tar").unwrap(),
      PathBuf::from("/tmp/x/abc/layer.tar")
    );
  }
}
