//! Codec for the two semicolon-delimited OMI tables.
//!
//! Converts raw table bytes into typed [`omi_core`] records. Pure
//! synchronous; no file or database access. A malformed row never fails a
//! call: it is dropped and counted in the returned [`SkipTally`].
//!
//! # Quick start
//!
//! ```no_run
//! let bytes = std::fs::read("QI_20242_VALORI.csv").unwrap();
//! let semester = "2024_S2".parse().unwrap();
//! let parsed = omi_tabular::parse_quotations(&bytes, semester).unwrap();
//! println!("{} rows, {} skipped", parsed.records.len(), parsed.skipped.total());
//! ```

mod decode;
pub mod error;
mod parse;
pub mod schema;

use std::{collections::BTreeMap, fmt};

pub use decode::{SourceEncoding, decode_table};
pub use error::{Error, Result};
pub use parse::{parse_decimal, parse_quotations, parse_zones};

// ─── Public types ────────────────────────────────────────────────────────────

/// Why a row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SkipReason {
  /// The join key does not match `[A-Z]{2}\d{8}`.
  InvalidJoinKey,
  /// A numeric column holds something that is not a number.
  MalformedNumber(&'static str),
  /// A column that is part of the natural key is empty.
  MissingField(&'static str),
  /// Field count differs from the schema.
  WrongWidth,
  /// The delimited reader could not read the row at all.
  Unreadable,
  /// An earlier row had the same natural key.
  Duplicate,
}

impl fmt::Display for SkipReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::InvalidJoinKey => f.write_str("invalid join key"),
      Self::MalformedNumber(col) => write!(f, "malformed number in {col}"),
      Self::MissingField(col) => write!(f, "missing {col}"),
      Self::WrongWidth => f.write_str("wrong field count"),
      Self::Unreadable => f.write_str("unreadable"),
      Self::Duplicate => f.write_str("duplicate"),
    }
  }
}

/// Per-reason counts of dropped rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipTally(BTreeMap<SkipReason, usize>);

impl SkipTally {
  pub fn add(&mut self, reason: SkipReason) { self.add_n(reason, 1) }

  pub fn add_n(&mut self, reason: SkipReason, n: usize) {
    if n > 0 {
      *self.0.entry(reason).or_default() += n;
    }
  }

  pub fn get(&self, reason: SkipReason) -> usize { self.0.get(&reason).copied().unwrap_or(0) }

  pub fn total(&self) -> usize { self.0.values().sum() }

  pub fn merge(&mut self, other: &SkipTally) {
    for (&reason, &n) in &other.0 {
      self.add_n(reason, n);
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (SkipReason, usize)> + '_ {
    self.0.iter().map(|(&r, &n)| (r, n))
  }
}

/// The result of parsing one table.
#[derive(Debug)]
pub struct ParsedTable<T> {
  pub records:           Vec<T>,
  pub skipped:           SkipTally,
  pub encoding:          SourceEncoding,
  /// Prevalence markers cleared because the zone/type already had one.
  pub demoted_prevalent: usize,
}
