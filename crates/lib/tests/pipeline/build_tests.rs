//! Dispatch and whole-build outcomes.

use rootforge_lib::{
  BuildContext, BuildError, BuildPhase, Definition, ErrorKind, FetchRetry, Section, SourceKind, build, select_backend,
};

use super::common::TestEnv;

#[tokio::test]
async fn scratch_yields_an_existing_empty_rootfs() {
  let env = TestEnv::new();

  let bundle = build(&BuildContext::new(), Definition::from_header([("bootstrap", "scratch")]), &env.config)
    .await
    .unwrap();

  assert!(bundle.rootfs_path().is_dir());
  assert!(bundle.rootfs_is_empty().unwrap());
  assert!(bundle.metadata_path().join("definition.json").is_file());
  assert!(bundle.metadata_path().join("env").is_file());
}

#[tokio::test]
async fn unknown_source_is_a_config_error_naming_it() {
  let env = TestEnv::new();

  let failure = build(&BuildContext::new(), Definition::from_header([("bootstrap", "bogus")]), &env.config)
    .await
    .unwrap_err();

  assert_eq!(failure.phase, BuildPhase::Dispatch);
  assert_eq!(failure.kind(), ErrorKind::Config);
  assert!(failure.error.to_string().contains("bogus"));
  assert_eq!(env.bundle_count(), 0);
}

#[tokio::test]
async fn empty_and_missing_bootstrap_are_config_errors() {
  let env = TestEnv::new();

  for def in [
    Definition::from_header([("bootstrap", "")]),
    Definition::from_header([("from", "alpine")]),
  ] {
    let failure = build(&BuildContext::new(), def, &env.config).await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::Config);
    assert!(matches!(failure.error, BuildError::MissingSource { .. }));
    assert!(failure.error.to_string().contains("bootstrap"));
  }
}

#[test]
fn header_keys_are_case_insensitive() {
  let cp = select_backend(&Definition::from_header([("Bootstrap", " zypper ")])).unwrap();
  assert_eq!(cp.kind(), &SourceKind::Zypper);
}

#[test]
fn json_definitions_dispatch_like_built_ones() {
  let def = Definition::from_json(
    r#"{"header": {"BOOTSTRAP": "docker-archive", "From": "image.tar"}, "sections": [{"name": "post"}]}"#,
  )
  .unwrap();

  assert_eq!(def.get("from"), Some("image.tar"));
  assert_eq!(def.sections(), &[Section::new("post", "")]);
  let cp = select_backend(&def).unwrap();
  assert_eq!(cp.kind().as_str(), "docker-archive");
}

#[test]
fn fetch_retry_policy_is_explicit_per_kind() {
  for name in SourceKind::accepted_names() {
    let kind = SourceKind::parse(name).unwrap();
    let expected = match name {
      "debootstrap" | "arch" | "yum" | "dnf" | "zypper" => FetchRetry::AfterCleanup,
      _ => FetchRetry::Safe,
    };
    assert_eq!(kind.fetch_retry(), expected, "{name}");
  }
}

#[cfg(unix)]
#[tokio::test]
async fn yum_and_dnf_produce_the_same_rootfs() {
  use super::common::fake_rpm_installer;

  let mut env = TestEnv::new();
  env.config.tools.dnf = Some(fake_rpm_installer(env.temp.path(), "dnf"));
  let header = |bootstrap: &'static str| {
    Definition::from_header([
      ("bootstrap", bootstrap),
      ("osversion", "9"),
      ("mirrorurl", "http://mirror.example/%{OSVERSION}/BaseOS/os"),
      ("include", "bash vim-minimal"),
    ])
  };

  let yum = build(&BuildContext::new(), header("yum"), &env.config).await.unwrap();
  let dnf = build(&BuildContext::new(), header("dnf"), &env.config).await.unwrap();

  assert_ne!(yum.path(), dnf.path());
  assert!(yum.rootfs_path().join("var/lib/rpm/coreutils").is_file());
  assert_eq!(yum.content_hash().unwrap(), dnf.content_hash().unwrap());
}

#[tokio::test]
async fn concurrent_builds_use_distinct_bundles() {
  let env = TestEnv::new();
  let ctx = BuildContext::new();
  let def = Definition::from_header([("bootstrap", "scratch")]);

  let (a, b, c) = tokio::join!(
    build(&ctx, def.clone(), &env.config),
    build(&ctx, def.clone(), &env.config),
    build(&ctx, def, &env.config),
  );
  let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

  assert_ne!(a.path(), b.path());
  assert_ne!(b.path(), c.path());
  assert_ne!(a.path(), c.path());
  assert_eq!(env.bundle_count(), 3);
}

#[tokio::test]
async fn failed_bundles_are_handed_back_for_cleanup() {
  let env = TestEnv::new();
  let def = Definition::from_header([("bootstrap", "localimage"), ("from", "/nonexistent/image.sif")]);

  let mut failure = build(&BuildContext::new(), def, &env.config).await.unwrap_err();

  assert_eq!(failure.phase, BuildPhase::Fetch);
  assert_eq!(failure.backend, Some(SourceKind::LocalImage));
  let bundle = failure.take_bundle().unwrap();
  assert!(!bundle.is_usable());
  bundle.remove().unwrap();
  assert_eq!(env.bundle_count(), 0);
}
