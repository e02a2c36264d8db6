//! Error type for `omi-store-sqlite`.

use omi_core::Semester;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] omi_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A quotation handed to [`replace_quotations`] belongs to another
  /// semester than the one being replaced.
  ///
  /// [`replace_quotations`]: omi_core::store::ZoneStore::replace_quotations
  #[error("quotation for {found} in a load of {expected}")]
  SemesterMismatch { expected: Semester, found: Semester },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
