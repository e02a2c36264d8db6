//! The `ZoneStore` trait and its supporting result types.
//!
//! Implemented by storage backends (e.g. `omi-store-sqlite`). The ingest
//! pipeline depends on this abstraction, not on a concrete backend.

use std::{collections::BTreeSet, future::Future};

use crate::{
  JoinKey, Semester,
  batch::BatchOutcome,
  quotation::QuotationRecord,
  zone::{ZoneBand, ZoneRecord},
};

// ─── Result types ────────────────────────────────────────────────────────────

/// Which of the two tables hold rows for a semester.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SemesterPresence {
  pub zones:      bool,
  pub quotations: bool,
}

impl SemesterPresence {
  /// A semester counts as loaded only when both tables have it.
  pub fn is_complete(&self) -> bool { self.zones && self.quotations }
}

/// Outcome of replacing one semester's quotations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotationLoad {
  pub deleted:  usize,
  pub inserted: usize,
}

/// A zone found by [`ZoneStore::locate_zone`].
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneMatch {
  pub join_key:          JoinKey,
  pub semester:          Semester,
  pub zone_code:         String,
  pub band:              Option<ZoneBand>,
  pub municipality_name: Option<String>,
  pub description:       Option<String>,
  /// `None` for an exact point-in-polygon hit; otherwise the distance in
  /// metres to the nearest zone boundary.
  pub distance_m:        Option<f64>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Destination store for zones and quotations.
///
/// Zone writes are insert-or-ignore on (join key, semester). Quotation
/// writes replace a whole semester at once. Both are safe to retry, but
/// callers must not write the same semester from two tasks at a time.
pub trait ZoneStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Insert one batch of zones, each record under its own sub-transaction.
  /// Existing (join key, semester) pairs are left untouched.
  fn insert_zone_batch(
    &self,
    batch: Vec<ZoneRecord>,
  ) -> impl Future<Output = Result<BatchOutcome, Self::Error>> + Send + '_;

  /// Delete every quotation of `semester`, then insert `rows`, atomically.
  /// `rows` must already be free of natural-key duplicates.
  fn replace_quotations(
    &self,
    semester: Semester,
    rows: Vec<QuotationRecord>,
  ) -> impl Future<Output = Result<QuotationLoad, Self::Error>> + Send + '_;

  /// Refresh the query planner's statistics for both tables.
  fn refresh_statistics(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Remove every zone and quotation.
  fn reset(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Which tables already hold `semester`.
  fn semester_presence(
    &self,
    semester: Semester,
  ) -> impl Future<Output = Result<SemesterPresence, Self::Error>> + Send + '_;

  /// The idempotency predicate: `semester` is present in both tables.
  fn is_semester_complete(
    &self,
    semester: Semester,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_ {
    async move { Ok(self.semester_presence(semester).await?.is_complete()) }
  }

  /// Every semester present in both tables.
  fn complete_semesters(
    &self,
  ) -> impl Future<Output = Result<BTreeSet<Semester>, Self::Error>> + Send + '_;

  /// Every semester with at least one zone, newest first.
  fn list_semesters(&self) -> impl Future<Output = Result<Vec<Semester>, Self::Error>> + Send + '_;

  fn count_zones(
    &self,
    semester: Semester,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  fn count_quotations(
    &self,
    semester: Semester,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// The zone containing (`lon`, `lat`) in `semester`, or the nearest one
  /// within `buffer_m` metres.
  fn locate_zone(
    &self,
    lon: f64,
    lat: f64,
    semester: Semester,
    buffer_m: f64,
  ) -> impl Future<Output = Result<Option<ZoneMatch>, Self::Error>> + Send + '_;
}
