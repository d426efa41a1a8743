//! The parsed build definition consumed by the pipeline.
//!
//! Parsing the definition file itself happens elsewhere; this type only holds
//! the result: header key/value pairs and the ordered raw sections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A named, backend-specific block of text (e.g. `post`, `files`, `environment`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
  pub name: String,
  #[serde(default)]
  pub body: String,
}

impl Section {
  pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      body: body.into(),
    }
  }
}

/// An immutable build manifest.
///
/// Header keys are stored lowercase and values are trimmed, whatever the
/// input looked like. Decoded input may not spell one key twice
/// (`Bootstrap` and `bootstrap`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDefinition")]
pub struct Definition {
  header: BTreeMap<String, String>,
  sections: Vec<Section>,
}

#[derive(Deserialize)]
struct RawDefinition {
  #[serde(default)]
  header: BTreeMap<String, String>,
  #[serde(default)]
  sections: Vec<Section>,
}

impl TryFrom<RawDefinition> for Definition {
  type Error = String;

  fn try_from(raw: RawDefinition) -> Result<Self, Self::Error> {
    let mut header = BTreeMap::new();
    for (key, value) in raw.header {
      let key = key.trim().to_lowercase();
      if header.contains_key(&key) {
        return Err(format!("header key {:?} is given more than once", key));
      }
      header.insert(key, value.trim().to_string());
    }
    Ok(Self {
      header,
      sections: raw.sections,
    })
  }
}

impl Definition {
  /// Build a definition from header pairs. Keys that collide once lowercased
  /// resolve to the last pair given.
  pub fn new<K, V>(header: impl IntoIterator<Item = (K, V)>, sections: Vec<Section>) -> Self
  where
    K: AsRef<str>,
    V: AsRef<str>,
  {
    let mut def = Self {
      header: BTreeMap::new(),
      sections,
    };
    for (key, value) in header {
      def = def.with_header(key.as_ref(), value.as_ref());
    }
    def
  }

  /// A definition with only header entries.
  pub fn from_header<K, V>(header: impl IntoIterator<Item = (K, V)>) -> Self
  where
    K: AsRef<str>,
    V: AsRef<str>,
  {
    Self::new(header, Vec::new())
  }

  /// Decode a definition that was parsed elsewhere and serialized as JSON.
  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  /// Returns a copy with one header entry added or replaced.
  pub fn with_header(mut self, key: &str, value: &str) -> Self {
    self.header.insert(key.trim().to_lowercase(), value.trim().to_string());
    self
  }

  pub fn header(&self) -> &BTreeMap<String, String> {
    &self.header
  }

  /// Look up a header value; `key` is matched case-insensitively.
  pub fn get(&self, key: &str) -> Option<&str> {
    match self.header.get(key) {
      Some(value) => Some(value.as_str()),
      None => self.header.get(&key.to_lowercase()).map(String::as_str),
    }
  }

  /// Look up a header value, treating an empty value as absent.
  pub fn get_non_empty(&self, key: &str) -> Option<&str> {
    self.get(key).filter(|v| !v.is_empty())
  }

  /// Split a list-valued header (`include: "vim, curl git"`) into items.
  pub fn get_list(&self, key: &str) -> Vec<String> {
    self
      .get(key)
      .map(|v| {
        v.split(|c: char| c == ',' || c.is_whitespace())
          .filter(|s| !s.is_empty())
          .map(str::to_string)
          .collect()
      })
      .unwrap_or_default()
  }

  pub fn sections(&self) -> &[Section] {
    &self.sections
  }

  /// First section with the given name, compared case-insensitively.
  pub fn section(&self, name: &str) -> Option<&Section> {
    self.sections.iter().find(|s| s.name.eq_ignore_ascii_case(name))
  }
}
