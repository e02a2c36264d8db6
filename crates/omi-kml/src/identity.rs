//! Placemark identity: which of the three historical schemes a placemark
//! uses, and how it maps onto a canonical join key.
//!
//! The scheme is chosen per placemark from the fields it carries. Documents
//! published around a format change mix schemes, so nothing here is decided
//! per archive.

use std::{fmt, sync::LazyLock};

use omi_core::{
  JoinKey,
  resolver::{Unresolved, ZoneKeyResolver},
  zone::ZoneDescriptor,
};
use regex::Regex;

use crate::document::Placemark;

/// Extended-data names carrying the canonical join key.
pub const JOIN_KEY_FIELDS: &[&str] = &["LINKZONA", "LINK_ZONA"];
/// Extended-data names carrying the administrative municipality code.
pub const ADMIN_CODE_FIELDS: &[&str] = &["CODCOM", "COMUNE_AMM"];
/// Extended-data names carrying the local zone code.
pub const ZONE_CODE_FIELDS: &[&str] = &["CODZONA", "ZONA"];

/// The identity scheme of a placemark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variant {
  Direct,
  TitleDerived,
  CodePair,
}

impl fmt::Display for Variant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Direct => "direct",
      Self::TitleDerived => "title-derived",
      Self::CodePair => "code-pair",
    })
  }
}

/// A classified placemark identity, not yet checked against the zone table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
  /// The join key is in the placemark's own metadata.
  Direct { join_key: JoinKey },
  /// Municipality code from the document's file name, zone code from the
  /// placemark title.
  TitleDerived { admin_code: String, zone_code: String },
  /// Both codes are in the placemark's metadata.
  CodePair { admin_code: String, zone_code: String },
}

impl Identity {
  pub fn variant(&self) -> Variant {
    match self {
      Self::Direct { .. } => Variant::Direct,
      Self::TitleDerived { .. } => Variant::TitleDerived,
      Self::CodePair { .. } => Variant::CodePair,
    }
  }
}

/// A placemark whose identity cannot even be classified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
  #[error("join key field holds {0:?}, which is not a join key")]
  MalformedJoinKey(String),
  #[error("only one of the municipality and zone codes is present")]
  IncompleteCodePair,
  #[error("title carries a zone code but the document has no municipality code")]
  NoDocumentCode,
  #[error("no identity fields and no zone code in the title")]
  NoIdentity,
}

// ─── Classification ──────────────────────────────────────────────────────────

static TITLE_ZONE_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?i)\bzona(?:\s+omi)?\s*[:\-]?\s*([A-Z]\d{1,3})\b").expect("valid regex")
});

static TRAILING_CODE_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?i)(?:^|[\s\-])([A-Z]\d{1,3})\s*$").expect("valid regex"));

/// The local zone code named in a title such as `ALESSANDRIA - Zona OMI B01`.
pub fn zone_code_from_title(title: &str) -> Option<String> {
  TITLE_ZONE_RE
    .captures(title)
    .or_else(|| TRAILING_CODE_RE.captures(title.trim()))
    .map(|c| c[1].to_ascii_uppercase())
}

/// Decide a placemark's scheme from the fields it carries.
///
/// `document_code` is the municipality code of the enclosing document, used
/// only by the title-derived scheme.
pub fn classify(placemark: &Placemark, document_code: Option<&str>) -> Result<Identity, IdentityError> {
  if let Some(raw) = placemark.field(JOIN_KEY_FIELDS) {
    return JoinKey::normalize(raw)
      .map(|join_key| Identity::Direct { join_key })
      .map_err(|_| IdentityError::MalformedJoinKey(raw.to_owned()));
  }

  let admin = placemark.field(ADMIN_CODE_FIELDS);
  let zone = placemark.field(ZONE_CODE_FIELDS);
  match (admin, zone) {
    (Some(admin), Some(zone)) => {
      return Ok(Identity::CodePair { admin_code: admin.to_owned(), zone_code: zone.to_owned() });
    }
    (Some(_), None) | (None, Some(_)) => return Err(IdentityError::IncompleteCodePair),
    (None, None) => {}
  }

  let zone_code = [placemark.name.as_deref(), placemark.description.as_deref()]
    .into_iter()
    .flatten()
    .find_map(zone_code_from_title)
    .ok_or(IdentityError::NoIdentity)?;
  let admin_code = document_code.ok_or(IdentityError::NoDocumentCode)?;
  Ok(Identity::TitleDerived { admin_code: admin_code.to_owned(), zone_code })
}

/// A classified identity checked against the semester's zone table.
#[derive(Debug, Clone)]
pub struct Resolved<'r> {
  pub join_key:   JoinKey,
  /// Zone-table metadata, when the table knows the key.
  pub descriptor: Option<&'r ZoneDescriptor>,
}

/// Map an identity to its join key. Direct keys always resolve; the other
/// two schemes must be found in `resolver`.
pub fn resolve<'r>(
  identity: &Identity,
  resolver: &'r ZoneKeyResolver,
) -> Result<Resolved<'r>, Unresolved> {
  match identity {
    Identity::Direct { join_key } => Ok(Resolved {
      join_key:   join_key.clone(),
      descriptor: resolver.describe(join_key),
    }),
    Identity::TitleDerived { admin_code, zone_code }
    | Identity::CodePair { admin_code, zone_code } => {
      let d = resolver.resolve(admin_code, zone_code)?;
      Ok(Resolved { join_key: d.join_key.clone(), descriptor: Some(d) })
    }
  }
}
