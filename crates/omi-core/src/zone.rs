//! Zone descriptors (from the zone table) and zone records (persisted
//! polygons).

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

use crate::{JoinKey, Semester};

// ─── Zone band ───────────────────────────────────────────────────────────────

/// Urban-centrality class of a zone (`Fascia`).
///
/// Letters outside the published set are kept verbatim in [`ZoneBand::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneBand {
  Central,
  SemiCentral,
  Peripheral,
  Suburban,
  Rural,
  Other(String),
}

impl ZoneBand {
  /// Map the one-letter source code. Empty input yields `None`.
  pub fn from_code(code: &str) -> Option<Self> {
    let code = code.trim();
    let band = match code.to_ascii_uppercase().as_str() {
      "" => return None,
      "B" => Self::Central,
      "C" => Self::SemiCentral,
      "D" => Self::Peripheral,
      "E" => Self::Suburban,
      "R" => Self::Rural,
      _ => Self::Other(code.to_owned()),
    };
    Some(band)
  }

  /// The source code this band was read from.
  pub fn code(&self) -> &str {
    match self {
      Self::Central => "B",
      Self::SemiCentral => "C",
      Self::Peripheral => "D",
      Self::Suburban => "E",
      Self::Rural => "R",
      Self::Other(code) => code,
    }
  }
}

// ─── Zone descriptor ─────────────────────────────────────────────────────────

/// One row of the zone-description table. Never persisted; it feeds the
/// [`ZoneKeyResolver`](crate::resolver::ZoneKeyResolver) for its semester.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneDescriptor {
  pub join_key:           JoinKey,
  /// Administrative municipality code (`Comune_amm`, e.g. `A182`).
  pub admin_code:         String,
  /// Local zone code within the municipality (`Zona`, e.g. `B01`).
  pub zone_code:          String,
  pub band:               Option<ZoneBand>,
  pub province_code:      Option<String>,
  pub municipality_istat: Option<String>,
  pub municipality_name:  Option<String>,
  pub description:        Option<String>,
  pub prevalent_type:     Option<PrevalentType>,
  pub microzone:          Option<u32>,
}

/// The property type and conservation state a zone is characterised by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrevalentType {
  pub type_code:          Option<u32>,
  pub type_description:   Option<String>,
  pub conservation_state: Option<String>,
}

// ─── Zone record ─────────────────────────────────────────────────────────────

/// A zone polygon ready for persistence. Unique per (join key, semester);
/// once a semester's zones are loaded they are never rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneRecord {
  pub join_key:          JoinKey,
  pub semester:          Semester,
  pub zone_code:         String,
  pub band:              Option<ZoneBand>,
  pub admin_code:        String,
  pub municipality_name: Option<String>,
  pub province_code:     Option<String>,
  pub description:       Option<String>,
  /// Always valid and polygon-only once it has passed the geometry builder.
  pub geometry:          MultiPolygon<f64>,
}

impl ZoneRecord {
  /// Build a record from the descriptor that resolved its identity.
  pub fn from_descriptor(
    descriptor: &ZoneDescriptor,
    semester: Semester,
    geometry: MultiPolygon<f64>,
  ) -> Self {
    Self {
      join_key: descriptor.join_key.clone(),
      semester,
      zone_code: descriptor.zone_code.clone(),
      band: descriptor.band.clone(),
      admin_code: descriptor.admin_code.clone(),
      municipality_name: descriptor.municipality_name.clone(),
      province_code: descriptor.province_code.clone(),
      description: descriptor.description.clone(),
      geometry,
    }
  }

  /// Number of rings (exterior and interior) across all polygons.
  pub fn ring_count(&self) -> usize {
    self.geometry.0.iter().map(|p| 1 + p.interiors().len()).sum()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn band_codes() {
    assert_eq!(ZoneBand::from_code("B"), Some(ZoneBand::Central));
    assert_eq!(ZoneBand::from_code(" c "), Some(ZoneBand::SemiCentral));
    assert_eq!(ZoneBand::from_code("R"), Some(ZoneBand::Rural));
    assert_eq!(ZoneBand::from_code(""), None);
    let other = ZoneBand::from_code("X").unwrap();
    assert_eq!(other, ZoneBand::Other("X".into()));
    assert_eq!(other.code(), "X");
    assert_eq!(ZoneBand::Peripheral.code(), "D");
  }
}
