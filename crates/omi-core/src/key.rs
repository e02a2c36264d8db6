//! The canonical zone join key.
//!
//! A join key is two uppercase ASCII letters (the province) followed by eight
//! zero-padded digits, e.g. `AL00000101`. It is the only value that links a
//! quotation row to a zone polygon. Values that do not match the pattern can
//! never be constructed, so nothing else can reach the store.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const PROVINCE_LEN: usize = 2;
const SEQUENCE_LEN: usize = 8;

/// A validated join key (`[A-Z]{2}\d{8}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JoinKey(String);

impl JoinKey {
  /// Validate `raw` exactly as given. No trimming or case folding.
  pub fn parse(raw: &str) -> Result<Self> {
    if is_join_key(raw) {
      Ok(Self(raw.to_owned()))
    } else {
      Err(Error::InvalidJoinKey(raw.to_owned()))
    }
  }

  /// Trim surrounding whitespace and uppercase before validating.
  ///
  /// Polygon documents occasionally carry keys with stray spaces or in
  /// lowercase; the tabular files never do.
  pub fn normalize(raw: &str) -> Result<Self> {
    Self::parse(&raw.trim().to_ascii_uppercase())
  }

  pub fn as_str(&self) -> &str { &self.0 }

  /// The two-letter province prefix.
  pub fn province(&self) -> &str { &self.0[..PROVINCE_LEN] }
}

/// Returns `true` when `s` matches `^[A-Z]{2}\d{8}$`.
pub fn is_join_key(s: &str) -> bool {
  let bytes = s.as_bytes();
  bytes.len() == PROVINCE_LEN + SEQUENCE_LEN
    && bytes[..PROVINCE_LEN].iter().all(u8::is_ascii_uppercase)
    && bytes[PROVINCE_LEN..].iter().all(u8::is_ascii_digit)
}

impl fmt::Display for JoinKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl FromStr for JoinKey {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

impl TryFrom<String> for JoinKey {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> {
    if is_join_key(&s) { Ok(Self(s)) } else { Err(Error::InvalidJoinKey(s)) }
  }
}

impl From<JoinKey> for String {
  fn from(k: JoinKey) -> Self { k.0 }
}

impl AsRef<str> for JoinKey {
  fn as_ref(&self) -> &str { &self.0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_canonical_keys() {
    let k = JoinKey::parse("AL00000101").unwrap();
    assert_eq!(k.as_str(), "AL00000101");
    assert_eq!(k.province(), "AL");
  }

  #[test]
  fn rejects_everything_else() {
    for bad in [
      "",
      "AL0000010",
      "AL000001011",
      "al00000101",
      "A100000101",
      "AL0000010X",
      " AL00000101",
      "ÀL00000101",
    ] {
      assert!(JoinKey::parse(bad).is_err(), "{bad:?} should be rejected");
    }
  }

  #[test]
  fn normalize_trims_and_uppercases() {
    let k = JoinKey::normalize("  to00001234 ").unwrap();
    assert_eq!(k.as_str(), "TO00001234");
  }

  #[test]
  fn serde_rejects_invalid_keys() {
    let ok: JoinKey = serde_json::from_str("\"MI00012345\"").unwrap();
    assert_eq!(ok.as_str(), "MI00012345");
    assert!(serde_json::from_str::<JoinKey>("\"MI-12345\"").is_err());
  }
}
