//! Encoding and decoding helpers between domain types and the plain values
//! stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings. Geometry is stored as JSON next to its
//! bounding box, which is what spatial prefiltering runs on.

use chrono::{DateTime, Utc};
use geo::{BoundingRect, MultiPolygon};
use omi_core::{
  JoinKey, Semester,
  quotation::{QuotationRecord, SurfaceBasis},
  store::ZoneMatch,
  zone::{ZoneBand, ZoneRecord},
};

use crate::Result;

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn encode_band(band: Option<&ZoneBand>) -> Option<String> { band.map(|b| b.code().to_owned()) }

pub fn encode_surface(s: Option<SurfaceBasis>) -> Option<&'static str> { s.map(SurfaceBasis::code) }

// ─── Geometry ────────────────────────────────────────────────────────────────

pub fn encode_geometry(g: &MultiPolygon<f64>) -> Result<String> { Ok(serde_json::to_string(g)?) }

pub fn decode_geometry(s: &str) -> Result<MultiPolygon<f64>> { Ok(serde_json::from_str(s)?) }

/// `(min_lon, min_lat, max_lon, max_lat)`; `None` for an empty geometry.
pub type BBox = (f64, f64, f64, f64);

pub fn bbox(g: &MultiPolygon<f64>) -> Option<BBox> {
  g.bounding_rect().map(|r| (r.min().x, r.min().y, r.max().x, r.max().y))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column values of one `zones` row, ready to bind.
pub struct ZoneRow {
  pub join_key:          String,
  pub semester:          String,
  pub zone_code:         String,
  pub band:              Option<String>,
  pub admin_code:        String,
  pub municipality_name: Option<String>,
  pub province_code:     Option<String>,
  pub description:       Option<String>,
  pub geometry_json:     String,
  pub ring_count:        i64,
  /// Left `NULL` for an empty geometry, which the schema rejects.
  pub bbox:              Option<BBox>,
}

impl ZoneRow {
  pub fn encode(zone: &ZoneRecord) -> Result<Self> {
    Ok(Self {
      join_key:          zone.join_key.to_string(),
      semester:          zone.semester.to_string(),
      zone_code:         zone.zone_code.clone(),
      band:              encode_band(zone.band.as_ref()),
      admin_code:        zone.admin_code.clone(),
      municipality_name: zone.municipality_name.clone(),
      province_code:     zone.province_code.clone(),
      description:       zone.description.clone(),
      geometry_json:     encode_geometry(&zone.geometry)?,
      ring_count:        i64::try_from(zone.ring_count()).unwrap_or(i64::MAX),
      bbox:              bbox(&zone.geometry),
    })
  }
}

/// Raw strings read from a `zones` row by the spatial lookup.
pub struct RawZoneCandidate {
  pub join_key:          String,
  pub semester:          String,
  pub zone_code:         String,
  pub band:              Option<String>,
  pub municipality_name: Option<String>,
  pub description:       Option<String>,
  pub geometry_json:     String,
}

impl RawZoneCandidate {
  pub fn decode(self) -> Result<(ZoneMatch, MultiPolygon<f64>)> {
    let geometry = decode_geometry(&self.geometry_json)?;
    let matched = ZoneMatch {
      join_key:          JoinKey::parse(&self.join_key)?,
      semester:          self.semester.parse::<Semester>()?,
      zone_code:         self.zone_code,
      band:              self.band.as_deref().and_then(ZoneBand::from_code),
      municipality_name: self.municipality_name,
      description:       self.description,
      distance_m:        None,
    };
    Ok((matched, geometry))
  }
}

/// Raw values read from a `quotations` row.
pub struct RawQuotation {
  pub join_key:           String,
  pub semester:           String,
  pub property_type_code: i64,
  pub property_type_desc: Option<String>,
  pub conservation_state: String,
  pub is_prevalent:       bool,
  pub price_min:          Option<f64>,
  pub price_max:          Option<f64>,
  pub sale_surface:       Option<String>,
  pub rent_min:           Option<f64>,
  pub rent_max:           Option<f64>,
  pub rent_surface:       Option<String>,
}

impl RawQuotation {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      join_key:           row.get(0)?,
      semester:           row.get(1)?,
      property_type_code: row.get(2)?,
      property_type_desc: row.get(3)?,
      conservation_state: row.get(4)?,
      is_prevalent:       row.get(5)?,
      price_min:          row.get(6)?,
      price_max:          row.get(7)?,
      sale_surface:       row.get(8)?,
      rent_min:           row.get(9)?,
      rent_max:           row.get(10)?,
      rent_surface:       row.get(11)?,
    })
  }

  pub fn into_record(self) -> Result<QuotationRecord> {
    Ok(QuotationRecord {
      join_key:           JoinKey::parse(&self.join_key)?,
      semester:           self.semester.parse()?,
      property_type_code: u32::try_from(self.property_type_code).unwrap_or_default(),
      property_type_desc: self.property_type_desc,
      conservation_state: self.conservation_state,
      is_prevalent:       self.is_prevalent,
      price_min:          self.price_min,
      price_max:          self.price_max,
      sale_surface:       self.sale_surface.as_deref().and_then(SurfaceBasis::from_code),
      rent_min:           self.rent_min,
      rent_max:           self.rent_max,
      rent_surface:       self.rent_surface.as_deref().and_then(SurfaceBasis::from_code),
    })
  }
}
