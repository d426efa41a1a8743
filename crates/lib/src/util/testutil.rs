//! Test utilities for rootforge-lib.
//!
//! Stand-in executables for the external tools backends shell out to, so
//! backend tests run without debootstrap, dnf or a registry.

use std::path::{Path, PathBuf};

/// Write an executable `/bin/sh` script at `dir/name` and return its path.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
  use std::os::unix::fs::PermissionsExt;

  let path = dir.join(name);
  std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
  std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
  path
}

/// A fake package manager that honours `--installroot=` (or `--root`) and
/// writes the requested package names to `<root>/var/lib/fake-packages`.
#[cfg(unix)]
pub fn fake_package_manager(dir: &Path, name: &str) -> PathBuf {
  write_script(
    dir,
    name,
    r#"root=""
pkgs=""
installing=0
prev=""
for arg in "$@"; do
  case "$arg" in
    --installroot=*) root="${arg#--installroot=}" ;;
    install) installing=1 ;;
    -*) ;;
    *)
      if [ "$prev" = "--root" ]; then root="$arg";
      elif [ "$installing" = 1 ]; then pkgs="$pkgs $arg"; fi ;;
  esac
  prev="$arg"
done
[ -n "$root" ] || exit 2
mkdir -p "$root/etc" "$root/var/lib"
echo "ID=fake" > "$root/etc/os-release"
if [ "$installing" = 1 ]; then
  for p in $pkgs; do echo "$p"; done | sort > "$root/var/lib/fake-packages"
fi"#,
  )
}

/// A script that sleeps far longer than any test should wait.
#[cfg(unix)]
pub fn hanging_tool(dir: &Path, name: &str) -> PathBuf {
  write_script(dir, name, "sleep 600")
}

/// A fixed HTTP response served by [`serve_http`].
#[derive(Debug, Clone)]
pub struct Canned {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  /// `(token, challenge)`: answer 401 with `challenge` unless the request
  /// carries `Authorization: Bearer <token>`.
  pub bearer: Option<(String, String)>,
}

impl Canned {
  pub fn ok(body: impl Into<Vec<u8>>) -> Self {
    Self {
      status: 200,
      headers: Vec::new(),
      body: body.into(),
      bearer: None,
    }
  }

  pub fn status(status: u16) -> Self {
    Self {
      status,
      ..Self::ok(Vec::new())
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn requires_bearer(mut self, token: &str, challenge: &str) -> Self {
    self.bearer = Some((token.to_string(), challenge.to_string()));
    self
  }
}

/// Serve `routes` on an ephemeral localhost port until the runtime shuts down.
///
/// Routes match the full request target first, then the path without its
/// query string. Anything else gets a 404.
pub async fn serve_http(routes: Vec<(String, Canned)>) -> std::net::SocketAddr {
  use std::sync::Arc;

  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let routes = Arc::new(routes);

  tokio::spawn(async move {
    while let Ok((stream, _)) = listener.accept().await {
      let routes = Arc::clone(&routes);
      tokio::spawn(async move {
        let _ = respond(stream, &routes).await;
      });
    }
  });

  addr
}

async fn respond(mut stream: tokio::net::TcpStream, routes: &[(String, Canned)]) -> std::io::Result<()> {
  use tokio::io::{AsyncReadExt, AsyncWriteExt};

  let mut request = Vec::new();
  let mut chunk = [0u8; 4096];
  while !request.windows(4).any(|w| w == b"\r\n\r\n") {
    let n = stream.read(&mut chunk).await?;
    if n == 0 {
      return Ok(());
    }
    request.extend_from_slice(&chunk[..n]);
  }

  let head = String::from_utf8_lossy(&request).to_string();
  let mut lines = head.lines();
  let target = lines
    .next()
    .and_then(|l| l.split_whitespace().nth(1))
    .unwrap_or("/")
    .to_string();
  let authorization = lines.find_map(|l| {
    let (name, value) = l.split_once(':')?;
    name.eq_ignore_ascii_case("authorization").then(|| value.trim().to_string())
  });
  let path = target.split('?').next().unwrap_or("/");

  let canned = routes
    .iter()
    .find(|(route, _)| route == &target)
    .or_else(|| routes.iter().find(|(route, _)| route == path))
    .map(|(_, canned)| canned.clone())
    .unwrap_or_else(|| Canned::status(404));

  let canned = match &canned.bearer {
    Some((token, challenge)) if authorization.as_deref() != Some(format!("Bearer {}", token).as_str()) => {
      Canned::status(401).with_header("WWW-Authenticate", challenge)
    }
    _ => canned,
  };

  let mut response = format!(
    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
    canned.status,
    if canned.status == 200 { "OK" } else { "Status" },
    canned.body.len()
  );
  for (name, value) in &canned.headers {
    response.push_str(&format!("{}: {}\r\n", name, value));
  }
  response.push_str("\r\n");

  stream.write_all(response.as_bytes()).await?;
  stream.write_all(&canned.body).await?;
  stream.shutdown().await
}

/// One entry of a test tarball.
#[derive(Debug, Clone)]
pub enum TarEntry<'a> {
  Dir(&'a str),
  File(&'a str, &'a [u8], u32),
  Symlink(&'a str, &'a str),
}

/// Build an in-memory tarball, gzipped when `gzip` is set.
pub fn build_tar(entries: &[TarEntry<'_>], gzip: bool) -> Vec<u8> {
  let mut builder = tar::Builder::new(Vec::new());
  for entry in entries {
    let mut header = tar::Header::new_gnu();
    header.set_mtime(0);
    match entry {
      TarEntry::Dir(path) => {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        header.set_cksum();
        builder.append_data(&mut header, path, std::io::empty()).unwrap();
      }
      TarEntry::File(path, data, mode) => {
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(*mode);
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
      }
      TarEntry::Symlink(path, target) => {
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_mode(0o777);
        header.set_size(0);
        builder.append_link(&mut header, path, target).unwrap();
      }
    }
  }
  let raw = builder.into_inner().unwrap();

  if !gzip {
    return raw;
  }
  let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
  std::io::Write::write_all(&mut encoder, &raw).unwrap();
  encoder.finish().unwrap()
}
