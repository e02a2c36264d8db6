//! Error types for the omi-tabular codec.
//!
//! Only whole-table problems are errors. A bad row is skipped and tallied.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("table has no header line")]
  MissingHeader,

  #[error("csv error: {0}")]
  Csv(#[from] csv::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
