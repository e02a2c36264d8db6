//! Placemarks to zone records.

use std::{
  collections::BTreeMap,
  panic::{AssertUnwindSafe, catch_unwind},
};

use omi_core::{
  JoinKey,
  resolver::ZoneKeyResolver,
  zone::{ZoneBand, ZoneRecord},
};
use tracing::{debug, warn};

use crate::{
  document::{Placemark, PolygonDocument},
  geometry::build_geometry,
  identity::{self, ADMIN_CODE_FIELDS, Identity, Variant, ZONE_CODE_FIELDS},
  repair::{Invalidity, Repair, repair},
};

/// Per-document (or, merged, per-semester) geometry counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeometryTally {
  pub documents:            usize,
  /// Documents that were not well-formed XML and contributed nothing.
  pub unreadable_documents: usize,
  /// Documents decoded with replacement characters.
  pub lossy_documents:      usize,
  pub placemarks:           usize,
  /// Records produced, repaired ones included.
  pub built:                usize,
  pub repaired:             usize,
  /// Geometry that could not be repaired.
  pub invalid_dropped:      usize,
  /// Identity classified but absent from the zone table.
  pub unresolved:           usize,
  /// Identity could not be classified at all.
  pub identity_errors:      usize,
  /// No polygon with a usable outer ring.
  pub no_geometry:          usize,
  pub malformed_tuples:     usize,
  pub dropped_rings:        usize,
  pub variants:             BTreeMap<Variant, usize>,
  pub defects:              BTreeMap<Invalidity, usize>,
}

impl GeometryTally {
  /// Placemarks that did not become a record.
  pub fn dropped(&self) -> usize {
    self.invalid_dropped + self.unresolved + self.identity_errors + self.no_geometry
  }

  pub fn merge(&mut self, other: &GeometryTally) {
    self.documents += other.documents;
    self.unreadable_documents += other.unreadable_documents;
    self.lossy_documents += other.lossy_documents;
    self.placemarks += other.placemarks;
    self.built += other.built;
    self.repaired += other.repaired;
    self.invalid_dropped += other.invalid_dropped;
    self.unresolved += other.unresolved;
    self.identity_errors += other.identity_errors;
    self.no_geometry += other.no_geometry;
    self.malformed_tuples += other.malformed_tuples;
    self.dropped_rings += other.dropped_rings;
    for (&v, &n) in &other.variants {
      *self.variants.entry(v).or_default() += n;
    }
    for (&d, &n) in &other.defects {
      *self.defects.entry(d).or_default() += n;
    }
  }
}

#[derive(Debug, Default)]
pub struct BuiltZones {
  pub zones: Vec<ZoneRecord>,
  pub tally: GeometryTally,
}

/// Turn every placemark of `document` into a zone record of the resolver's
/// semester. Placemarks that cannot be identified, resolved, or given valid
/// geometry are dropped and counted.
pub fn build_document_zones(document: &PolygonDocument, resolver: &ZoneKeyResolver) -> BuiltZones {
  let semester = resolver.semester();
  let mut out = BuiltZones::default();
  out.tally.documents = 1;
  out.tally.lossy_documents = usize::from(document.lossy);

  for placemark in &document.placemarks {
    out.tally.placemarks += 1;

    let identity = match identity::classify(placemark, document.code.as_deref()) {
      Ok(identity) => identity,
      Err(e) => {
        out.tally.identity_errors += 1;
        debug!(source = %document.source, name = ?placemark.name, error = %e, "placemark has no identity");
        continue;
      }
    };
    *out.tally.variants.entry(identity.variant()).or_default() += 1;

    let resolved = match identity::resolve(&identity, resolver) {
      Ok(resolved) => resolved,
      Err(miss) => {
        out.tally.unresolved += 1;
        warn!(source = %document.source, %semester, variant = %identity.variant(), "{miss}");
        continue;
      }
    };

    let parsed = build_geometry(&placemark.polygons);
    out.tally.malformed_tuples += parsed.malformed_tuples;
    out.tally.dropped_rings += parsed.dropped_rings;
    let Some(geometry) = parsed.geometry else {
      out.tally.no_geometry += 1;
      debug!(source = %document.source, join_key = %resolved.join_key, "placemark has no polygon");
      continue;
    };

    // A geometry routine that panics costs this placemark, not the archive.
    let repaired = match catch_unwind(AssertUnwindSafe(|| repair(geometry))) {
      Ok(repaired) => repaired,
      Err(_) => {
        out.tally.invalid_dropped += 1;
        warn!(source = %document.source, join_key = %resolved.join_key, "geometry check panicked; dropping placemark");
        continue;
      }
    };
    let geometry = match repaired {
      Repair::Valid(g) => g,
      Repair::Repaired { geometry, defect } => {
        out.tally.repaired += 1;
        *out.tally.defects.entry(defect).or_default() += 1;
        debug!(join_key = %resolved.join_key, %defect, "geometry repaired");
        geometry
      }
      Repair::Unrepairable(defect) => {
        out.tally.invalid_dropped += 1;
        *out.tally.defects.entry(defect).or_default() += 1;
        warn!(source = %document.source, join_key = %resolved.join_key, %defect, "dropping unrepairable geometry");
        continue;
      }
    };

    let record = match resolved.descriptor {
      Some(d) => {
        let mut record = ZoneRecord::from_descriptor(d, semester, geometry);
        // A direct key keeps its own identity even when the table lists it
        // under another code pair.
        record.join_key = resolved.join_key;
        record
      }
      None => record_from_placemark(resolved.join_key, &identity, placemark, document, semester, geometry),
    };
    out.tally.built += 1;
    out.zones.push(record);
  }

  out
}

/// Metadata for a direct key the zone table does not list.
fn record_from_placemark(
  join_key: JoinKey,
  identity: &Identity,
  placemark: &Placemark,
  document: &PolygonDocument,
  semester: omi_core::Semester,
  geometry: geo::MultiPolygon<f64>,
) -> ZoneRecord {
  let title = placemark.name.as_deref().unwrap_or_default();
  let zone_code = match identity {
    Identity::TitleDerived { zone_code, .. } | Identity::CodePair { zone_code, .. } => zone_code.clone(),
    Identity::Direct { .. } => placemark
      .field(ZONE_CODE_FIELDS)
      .map(str::to_owned)
      .or_else(|| identity::zone_code_from_title(title))
      .unwrap_or_default(),
  };
  let admin_code = placemark
    .field(ADMIN_CODE_FIELDS)
    .map(str::to_owned)
    .or_else(|| document.code.clone())
    .unwrap_or_default();
  let municipality_name = title
    .split_once(" - ")
    .map(|(name, _)| name.trim().to_owned())
    .filter(|name| !name.is_empty());

  ZoneRecord {
    province_code: Some(join_key.province().to_owned()),
    join_key,
    semester,
    zone_code,
    band: placemark.field(&["FASCIA"]).and_then(ZoneBand::from_code),
    admin_code,
    municipality_name,
    description: placemark.description.clone(),
    geometry,
  }
}
