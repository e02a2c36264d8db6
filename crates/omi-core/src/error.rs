//! Error types for `omi-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid join key: {0:?}")]
  InvalidJoinKey(String),

  #[error("invalid semester token: {0:?}")]
  InvalidSemester(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
