//! Cancellation and deadlines across a whole build.

use std::time::Duration;

use rootforge_lib::{BuildContext, BuildError, BuildPhase, Definition, build};

use super::common::{TestEnv, count_entries};

#[tokio::test]
async fn cancelled_before_fetch_leaves_no_content() {
  let env = TestEnv::new();
  let ctx = BuildContext::new();
  ctx.cancel();

  let failure = build(&ctx, Definition::from_header([("bootstrap", "scratch")]), &env.config)
    .await
    .unwrap_err();

  assert_eq!(failure.phase, BuildPhase::Fetch);
  assert!(failure.is_cancelled());
  assert!(matches!(failure.error, BuildError::Cancelled));
  let bundle = failure.bundle.unwrap();
  assert!(!bundle.is_usable());
  assert!(bundle.rootfs_is_empty().unwrap());
}

#[cfg(unix)]
#[tokio::test]
async fn cancelling_mid_fetch_stops_the_bootstrap_tool() {
  use super::common::write_script;

  let mut env = TestEnv::new();
  let marker = env.path("finished");
  env.config.tools.debootstrap = Some(write_script(
    env.temp.path(),
    "debootstrap",
    &format!("sleep 30\ntouch '{}'", marker.display()),
  ));
  let def = Definition::from_header([
    ("bootstrap", "debootstrap"),
    ("osversion", "bookworm"),
    ("mirrorurl", "http://deb.debian.org/debian"),
  ]);
  let ctx = BuildContext::new();
  let canceller = ctx.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(200)).await;
    canceller.cancel();
  });

  let failure = tokio::time::timeout(Duration::from_secs(10), build(&ctx, def, &env.config))
    .await
    .expect("cancellation should interrupt the build")
    .unwrap_err();

  assert_eq!(failure.phase, BuildPhase::Fetch);
  assert!(failure.is_cancelled());
  assert!(!failure.is_retryable());
  assert!(!marker.exists());
}

#[tokio::test]
async fn an_expired_deadline_reports_deadline_exceeded() {
  let env = TestEnv::new();
  let ctx = BuildContext::new().with_timeout(Duration::ZERO);

  let failure = build(&ctx, Definition::from_header([("bootstrap", "scratch")]), &env.config)
    .await
    .unwrap_err();

  assert!(matches!(failure.error, BuildError::DeadlineExceeded));
  assert!(failure.is_cancelled());
}

#[tokio::test]
async fn cancelling_mid_pack_stops_writes_before_returning() {
  let env = TestEnv::new();
  let sandbox = env.path("sandbox");
  for d in 0..100 {
    let dir = sandbox.join(format!("d{d}"));
    std::fs::create_dir_all(&dir).unwrap();
    for f in 0..100 {
      std::fs::write(dir.join(format!("f{f}")), "x").unwrap();
    }
  }
  let from = sandbox.display().to_string();
  let def = Definition::from_header([("bootstrap", "localimage"), ("from", from.as_str())]);
  let ctx = BuildContext::new();
  let canceller = ctx.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(30)).await;
    canceller.cancel();
  });

  // a fast host may finish the copy first; either way nothing writes afterwards
  let bundle = match build(&ctx, def, &env.config).await {
    Ok(bundle) => bundle,
    Err(mut failure) => {
      assert!(failure.is_cancelled());
      failure.take_bundle().unwrap()
    }
  };
  let at_return = count_entries(bundle.rootfs_path());
  tokio::time::sleep(Duration::from_millis(500)).await;

  assert_eq!(count_entries(bundle.rootfs_path()), at_return);
  bundle.remove().unwrap();
}
