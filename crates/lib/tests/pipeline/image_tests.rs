//! Builds from images that already exist on this host.

use rootforge_lib::{BuildContext, Definition, ErrorKind, build};

use super::common::{Entry, TestEnv, gzip, tar_of, write_oci_layout};

fn provenance(bundle: &rootforge_lib::Bundle) -> serde_json::Value {
  let raw = std::fs::read_to_string(bundle.metadata_path().join("provenance.json")).unwrap();
  serde_json::from_str(&raw).unwrap()
}

#[tokio::test]
async fn localimage_copies_a_sandbox_directory() {
  let env = TestEnv::new();
  let sandbox = env.path("sandbox");
  std::fs::create_dir_all(sandbox.join("etc")).unwrap();
  std::fs::write(sandbox.join("etc/os-release"), "ID=sandbox\n").unwrap();
  let def = Definition::from_header([("bootstrap", "localimage"), ("from", sandbox.to_str().unwrap())]);

  let bundle = build(&BuildContext::new(), def, &env.config).await.unwrap();

  assert_eq!(
    std::fs::read_to_string(bundle.rootfs_path().join("etc/os-release")).unwrap(),
    "ID=sandbox\n"
  );
  let provenance = provenance(&bundle);
  assert_eq!(provenance["source"], "localimage");
  assert_eq!(provenance["annotations"]["local.format"], "sandbox");
  // the source is left alone
  assert!(sandbox.join("etc/os-release").is_file());
}

#[tokio::test]
async fn localimage_extracts_a_gzipped_tarball() {
  let env = TestEnv::new();
  let archive = env.path("rootfs.tar.gz");
  let tar = tar_of(&[
    Entry::Dir("usr/"),
    Entry::Dir("usr/bin/"),
    Entry::File("usr/bin/hello", b"#!/bin/sh\necho hello\n"),
  ]);
  std::fs::write(&archive, gzip(&tar)).unwrap();
  let def = Definition::from_header([("bootstrap", "localimage"), ("from", archive.to_str().unwrap())]);

  let bundle = build(&BuildContext::new(), def, &env.config).await.unwrap();

  assert!(bundle.rootfs_path().join("usr/bin/hello").is_file());
  assert_eq!(provenance(&bundle)["annotations"]["local.format"], "tar");
}

#[tokio::test]
async fn localimage_rejects_unknown_content() {
  let env = TestEnv::new();
  let junk = env.path("junk.img");
  std::fs::write(&junk, b"definitely not an image").unwrap();
  let def = Definition::from_header([("bootstrap", "localimage"), ("from", junk.to_str().unwrap())]);

  let failure = build(&BuildContext::new(), def, &env.config).await.unwrap_err();

  assert_eq!(failure.kind(), ErrorKind::Fatal);
  assert!(failure.bundle.as_ref().is_some_and(|b| !b.is_usable()));
}

#[tokio::test]
async fn oci_layout_layers_apply_in_order_with_whiteouts() {
  let env = TestEnv::new();
  let layout = env.path("layout");
  let base = tar_of(&[
    Entry::Dir("etc/"),
    Entry::File("etc/motd", b"base\n"),
    Entry::File("etc/stale.conf", b"old\n"),
  ]);
  let top = tar_of(&[
    Entry::Dir("etc/"),
    Entry::File("etc/motd", b"top\n"),
    Entry::File("etc/.wh.stale.conf", b""),
  ]);
  let config = r#"{"architecture": "amd64", "os": "linux",
    "config": {"Env": ["PATH=/usr/sbin:/usr/bin", "GREETING=hello"], "Cmd": ["/bin/sh"]}}"#;
  write_oci_layout(&layout, "v1", config, &[base, top]);
  let from = format!("{}:v1", layout.display());
  let def = Definition::from_header([("bootstrap", "oci"), ("from", from.as_str())]);

  let bundle = build(&BuildContext::new(), def, &env.config).await.unwrap();

  let rootfs = bundle.rootfs_path();
  assert_eq!(std::fs::read_to_string(rootfs.join("etc/motd")).unwrap(), "top\n");
  assert!(!rootfs.join("etc/stale.conf").exists());
  assert!(!rootfs.join("etc/.wh.stale.conf").exists());

  let env_file = std::fs::read_to_string(bundle.metadata_path().join("env")).unwrap();
  assert!(env_file.contains("export GREETING='hello'"), "{env_file}");
  assert!(env_file.contains("export PATH='/usr/sbin:/usr/bin'"), "{env_file}");
  assert_eq!(provenance(&bundle)["source"], "oci");
}

#[tokio::test]
async fn oci_layout_with_an_unknown_name_is_a_config_error() {
  let env = TestEnv::new();
  let layout = env.path("layout");
  write_oci_layout(&layout, "v1", r#"{"config": {}}"#, &[tar_of(&[Entry::Dir("etc/")])]);
  let from = format!("{}:v2", layout.display());
  let def = Definition::from_header([("bootstrap", "oci"), ("from", from.as_str())]);

  let failure = build(&BuildContext::new(), def, &env.config).await.unwrap_err();

  assert_eq!(failure.kind(), ErrorKind::Config);
  assert_eq!(failure.backend.unwrap().as_str(), "oci");
}
