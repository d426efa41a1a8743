//! Sources command implementation.
//!
//! Lists every value accepted in a definition's `bootstrap` header.

use anyhow::Result;
use serde::Serialize;

use rootforge_lib::{FetchRetry, SourceKind};

use crate::output::{OutputFormat, print_json, print_stat};

#[derive(Debug, Serialize)]
struct SourceInfo {
  name: &'static str,
  backend: &'static str,
  fetch_retry: FetchRetry,
}

fn sources() -> Vec<SourceInfo> {
  SourceKind::accepted_names()
    .into_iter()
    .filter_map(|name| {
      SourceKind::parse(name).map(|kind| SourceInfo {
        name,
        backend: kind.as_str(),
        fetch_retry: kind.fetch_retry(),
      })
    })
    .collect()
}

pub fn cmd_sources(output: OutputFormat) -> Result<()> {
  let sources = sources();
  if output.is_json() {
    return print_json(&sources);
  }

  println!("Accepted bootstrap sources:");
  for source in &sources {
    let retry = match source.fetch_retry {
      FetchRetry::Safe => "retry safe",
      FetchRetry::AfterCleanup => "retry after cleanup",
    };
    let label = if source.name == source.backend {
      source.name.to_string()
    } else {
      format!("{} (alias of {})", source.name, source.backend)
    };
    print_stat(&label, retry);
  }
  Ok(())
}
