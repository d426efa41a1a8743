//! A minimal OCI distribution client: manifests and blobs, with anonymous
//! bearer-token auth.

use std::fmt;
use std::path::Path;

use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::download::{check_status, download, request_error};
use super::image::{Descriptor, Manifest, manifest_accept};
use crate::context::BuildContext;
use crate::dispatch::SourceKind;
use crate::error::BuildError;
use crate::util::hash::{Digest, hash_bytes};

const DOCKER_HUB: &str = "docker.io";
const DOCKER_HUB_API: &str = "registry-1.docker.io";

/// A parsed image reference: `[registry/]repository[:tag][@digest]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImageRef {
  pub registry: String,
  pub repository: String,
  pub tag: Option<String>,
  pub digest: Option<String>,
}

impl ImageRef {
  /// Parse a reference, filling in Docker Hub defaults. A leading `//` (as in
  /// `docker://alpine`) is ignored.
  pub fn parse(value: &str) -> Option<Self> {
    let value = value.trim().trim_start_matches("//");
    if value.is_empty() {
      return None;
    }

    let (name, digest) = match value.split_once('@') {
      Some((name, digest)) => (name, Some(Digest::parse(digest)?.to_string())),
      None => (value, None),
    };

    let (name, tag) = match name.rsplit_once(':') {
      Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag.to_string())),
      _ => (name, None),
    };

    let (registry, repository) = match name.split_once('/') {
      Some((host, rest)) if host.contains('.') || host.contains(':') || host == "localhost" => {
        (host.to_string(), rest.to_string())
      }
      _ => (DOCKER_HUB.to_string(), name.to_string()),
    };

    let repository = if registry == DOCKER_HUB && !repository.contains('/') {
      format!("library/{}", repository)
    } else {
      repository
    };

    let valid = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-/".contains(c);
    if repository.is_empty() || !repository.chars().all(valid) || tag.as_deref() == Some("") {
      return None;
    }

    let tag = match (&tag, &digest) {
      (None, None) => Some("latest".to_string()),
      _ => tag,
    };

    Some(Self {
      registry,
      repository,
      tag,
      digest,
    })
  }

  /// The reference used to fetch the manifest: the digest if pinned, else the tag.
  pub fn reference(&self) -> &str {
    self
      .digest
      .as_deref()
      .or(self.tag.as_deref())
      .unwrap_or("latest")
  }

  fn api_host(&self) -> &str {
    if self.registry == DOCKER_HUB {
      DOCKER_HUB_API
    } else {
      &self.registry
    }
  }
}

impl fmt::Display for ImageRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.registry, self.repository)?;
    if let Some(tag) = &self.tag {
      write!(f, ":{}", tag)?;
    }
    if let Some(digest) = &self.digest {
      write!(f, "@{}", digest)?;
    }
    Ok(())
  }
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct BearerChallenge {
  pub realm: String,
  pub service: Option<String>,
  pub scope: Option<String>,
}

pub(crate) fn parse_challenge(header: &str) -> Option<BearerChallenge> {
  let (scheme, params) = header.trim().split_once(' ')?;
  if !scheme.eq_ignore_ascii_case("bearer") {
    return None;
  }

  let mut challenge = BearerChallenge::default();
  let mut rest = params.trim();
  while !rest.is_empty() {
    let (key, after) = rest.split_once('=')?;
    let after = after.trim_start();
    let (value, remaining) = match after.strip_prefix('"') {
      Some(quoted) => {
        let end = quoted.find('"')?;
        (&quoted[..end], &quoted[end + 1..])
      }
      None => match after.find(',') {
        Some(end) => (&after[..end], &after[end..]),
        None => (after, ""),
      },
    };
    match key.trim() {
      "realm" => challenge.realm = value.to_string(),
      "service" => challenge.service = Some(value.to_string()),
      "scope" => challenge.scope = Some(value.to_string()),
      _ => {}
    }
    rest = remaining.trim_start().trim_start_matches(',').trim_start();
  }

  if challenge.realm.is_empty() {
    return None;
  }
  Some(challenge)
}

#[derive(Deserialize)]
struct TokenResponse {
  #[serde(default)]
  token: Option<String>,
  #[serde(default)]
  access_token: Option<String>,
}

/// Registry session for one repository.
#[derive(Debug)]
pub(crate) struct RegistryClient {
  http: reqwest::Client,
  backend: SourceKind,
  image: ImageRef,
  base_url: String,
  token: Option<String>,
}

impl RegistryClient {
  pub fn new(http: reqwest::Client, backend: SourceKind, image: ImageRef, insecure: bool) -> Self {
    let scheme = if insecure { "http" } else { "https" };
    let base_url = format!("{}://{}/v2/{}", scheme, image.api_host(), image.repository);
    Self {
      http,
      backend,
      image,
      base_url,
      token: None,
    }
  }

  pub fn image(&self) -> &ImageRef {
    &self.image
  }

  fn request(&self, url: &str, accept: Option<&str>) -> RequestBuilder {
    let mut request = self.http.get(url);
    if let Some(accept) = accept {
      request = request.header(ACCEPT, accept);
    }
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }
    request
  }

  /// GET `url`, answering one bearer challenge if the registry asks for it.
  async fn get(&mut self, url: &str, accept: Option<&str>) -> Result<Response, BuildError> {
    let response = self
      .request(url, accept)
      .send()
      .await
      .map_err(|e| request_error(&self.backend, url, e))?;

    if response.status() == StatusCode::UNAUTHORIZED && self.token.is_none() {
      let challenge = response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_challenge);
      if let Some(challenge) = challenge {
        self.token = Some(self.fetch_token(&challenge).await?);
        let response = self
          .request(url, accept)
          .send()
          .await
          .map_err(|e| request_error(&self.backend, url, e))?;
        return check_status(&self.backend, &self.image.to_string(), response);
      }
    }

    check_status(&self.backend, &self.image.to_string(), response)
  }

  async fn fetch_token(&self, challenge: &BearerChallenge) -> Result<String, BuildError> {
    debug!(realm = %challenge.realm, service = ?challenge.service, "requesting registry token");
    let mut query = Vec::new();
    if let Some(service) = &challenge.service {
      query.push(("service", service.clone()));
    }
    query.push((
      "scope",
      challenge
        .scope
        .clone()
        .unwrap_or_else(|| format!("repository:{}:pull", self.image.repository)),
    ));

    let response = self
      .http
      .get(&challenge.realm)
      .query(&query)
      .send()
      .await
      .map_err(|e| request_error(&self.backend, &challenge.realm, e))?;
    let response = check_status(&self.backend, &self.image.to_string(), response)?;
    let body: TokenResponse = response
      .json()
      .await
      .map_err(|e| request_error(&self.backend, &challenge.realm, e))?;

    body.token.or(body.access_token).ok_or_else(|| {
      BuildError::transient(self.backend.clone(), "token endpoint returned no token")
    })
  }

  /// Fetch the manifest (or index) stored under `reference` and its digest.
  pub async fn manifest(&mut self, reference: &str) -> Result<(Manifest, Digest), BuildError> {
    let url = format!("{}/manifests/{}", self.base_url, reference);
    let accept = manifest_accept();
    let response = self.get(&url, Some(&accept)).await?;
    let bytes = response
      .bytes()
      .await
      .map_err(|e| request_error(&self.backend, &url, e))?;

    let actual = Digest::sha256(&hash_bytes(&bytes));
    if let Some(expected) = Digest::parse(reference)
      && expected.is_sha256()
      && expected != actual
    {
      return Err(BuildError::DigestMismatch {
        backend: self.backend.clone(),
        url,
        expected: expected.to_string(),
        actual: actual.to_string(),
      });
    }

    let manifest: Manifest = serde_json::from_slice(&bytes).map_err(|e| {
      BuildError::transient(self.backend.clone(), format!("malformed manifest from {}: {}", url, e))
    })?;
    Ok((manifest, actual))
  }

  /// Resolve the image's manifest, descending through an index to the entry
  /// built for `os`/`arch`.
  pub async fn image_manifest(&mut self, os: &str, arch: &str) -> Result<(Manifest, Digest), BuildError> {
    let reference = self.image.reference().to_string();
    let (manifest, digest) = self.manifest(&reference).await?;
    if !manifest.is_index() {
      return Ok((manifest, digest));
    }

    let entry = manifest
      .select_platform(os, arch)
      .ok_or_else(|| BuildError::NotFound {
        backend: self.backend.clone(),
        reference: self.image.to_string(),
        message: format!("no manifest for platform {}/{}", os, arch),
      })?
      .digest
      .clone();
    debug!(image = %self.image, platform = %format!("{}/{}", os, arch), digest = %entry, "selected platform manifest");
    self.manifest(&entry).await
  }

  /// Download a blob into `dest`, verifying its digest.
  pub async fn blob_to_file(
    &self,
    ctx: &BuildContext,
    descriptor: &Descriptor,
    dest: &Path,
  ) -> Result<Digest, BuildError> {
    let url = format!("{}/blobs/{}", self.base_url, descriptor.digest);
    let expected = Digest::parse(&descriptor.digest);
    download(
      ctx,
      &self.backend,
      self.request(&url, None),
      &url,
      dest,
      expected.as_ref(),
    )
    .await
  }

  /// Read a small blob (an image config) into memory, verifying its digest.
  pub async fn blob_bytes(&mut self, descriptor: &Descriptor) -> Result<Vec<u8>, BuildError> {
    let url = format!("{}/blobs/{}", self.base_url, descriptor.digest);
    let response = self.get(&url, None).await?;
    let bytes = response
      .bytes()
      .await
      .map_err(|e| request_error(&self.backend, &url, e))?;

    let actual = Digest::sha256(&hash_bytes(&bytes));
    if let Some(expected) = Digest::parse(&descriptor.digest)
      && expected.is_sha256()
      && expected != actual
    {
      return Err(BuildError::DigestMismatch {
        backend: self.backend.clone(),
        url,
        expected: expected.to_string(),
        actual: actual.to_string(),
      });
    }
    Ok(bytes.to_vec())
  }
}
