//! The blocking half of one archive: extraction, semester detection, and
//! parsing of both tables and every polygon document.
//!
//! Everything here runs on a blocking thread and touches no store.

use std::path::Path;

use omi_core::{
  Semester,
  quotation::QuotationRecord,
  resolver::ZoneKeyResolver,
  semester::{SemesterResolution, reconcile},
  zone::ZoneRecord,
};
use omi_kml::{GeometryTally, build_document_zones, read_document};
use omi_tabular::SkipTally;
use tracing::{debug, info, warn};

use crate::{
  error::{Error, Result},
  scanner::{self, ExtractedArchive},
};

/// An extracted archive together with its semester.
#[derive(Debug)]
pub struct OpenedArchive {
  pub extracted:  ExtractedArchive,
  pub resolution: SemesterResolution,
}

impl OpenedArchive {
  pub fn semester(&self) -> Result<Semester> { self.resolution.semester().ok_or(Error::UnknownSemester) }
}

/// Extract `path` and determine its semester from the table names and the
/// header of the first readable polygon document.
pub fn open_archive(path: &Path) -> Result<OpenedArchive> {
  let extracted = scanner::extract(path)?;
  let from_tables = extracted.table_semester();
  let from_document = extracted.documents.iter().find_map(|doc| {
    let bytes = std::fs::read(doc).ok()?;
    let parsed = read_document(&bytes, &source_name(doc)).ok()?;
    Some(Semester::from_document_header(&parsed.header))
  });
  let resolution = reconcile(from_tables, from_document.flatten());
  Ok(OpenedArchive { extracted, resolution })
}

fn source_name(path: &Path) -> String {
  path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

/// One archive parsed into records of a single semester, ready to load.
#[derive(Debug)]
pub struct PreparedArchive {
  pub semester:           Semester,
  pub zones:              Vec<ZoneRecord>,
  pub quotations:         Vec<QuotationRecord>,
  pub geometry:           GeometryTally,
  pub zone_skips:         SkipTally,
  pub quotation_skips:    SkipTally,
  pub demoted_prevalent:  usize,
  /// (administrative code, zone code) pairs listed under more than one key.
  pub resolver_conflicts: usize,
}

/// Parse the zone table, build the semester's resolver, turn every polygon
/// document into zone records, then parse the quotation table.
///
/// The working directory is released when `opened` is dropped at the end of
/// this call.
pub fn prepare(opened: OpenedArchive) -> Result<PreparedArchive> {
  let semester = opened.semester()?;
  let archive = &opened.extracted;

  let zone_bytes = std::fs::read(&archive.zone_table).map_err(|e| Error::io(&archive.zone_table, e))?;
  let zone_table = omi_tabular::parse_zones(&zone_bytes)?;
  let resolver = ZoneKeyResolver::new(semester, zone_table.records);
  if resolver.conflicts() > 0 {
    warn!(%semester, conflicts = resolver.conflicts(), "zone table maps one code pair to several keys");
  }

  let mut geometry = GeometryTally::default();
  let mut zones = Vec::new();
  for path in &archive.documents {
    let source = source_name(path);
    let document = match std::fs::read(path) {
      Ok(bytes) => read_document(&bytes, &source),
      Err(e) => {
        warn!(%source, error = %e, "cannot read polygon document");
        geometry.documents += 1;
        geometry.unreadable_documents += 1;
        continue;
      }
    };
    let document = match document {
      Ok(document) => document,
      Err(e) => {
        warn!(%source, error = %e, "skipping malformed polygon document");
        geometry.documents += 1;
        geometry.unreadable_documents += 1;
        continue;
      }
    };
    let built = build_document_zones(&document, &resolver);
    geometry.merge(&built.tally);
    zones.extend(built.zones);
  }
  debug!(%semester, documents = geometry.documents, zones = zones.len(), "polygon documents built");

  let quotation_bytes =
    std::fs::read(&archive.quotation_table).map_err(|e| Error::io(&archive.quotation_table, e))?;
  let quotation_table = omi_tabular::parse_quotations(&quotation_bytes, semester)?;

  info!(
    %semester,
    zones = zones.len(),
    quotations = quotation_table.records.len(),
    dropped_geometries = geometry.dropped(),
    skipped_rows = zone_table.skipped.total() + quotation_table.skipped.total(),
    "archive parsed"
  );

  Ok(PreparedArchive {
    semester,
    zones,
    quotations: quotation_table.records,
    geometry,
    zone_skips: zone_table.skipped,
    quotation_skips: quotation_table.skipped,
    demoted_prevalent: quotation_table.demoted_prevalent,
    resolver_conflicts: resolver.conflicts(),
  })
}
