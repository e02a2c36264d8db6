//! Error type for `omi-ingest`.
//!
//! Archive-level errors abort one archive; store errors abort one
//! semester's load. Neither stops the run.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("cannot read {path:?}: {source}")]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("cannot list {0:?}: {1}")]
  Walk(PathBuf, #[source] walkdir::Error),

  #[error("zip error: {0}")]
  Zip(#[from] zip::result::ZipError),

  #[error("table error: {0}")]
  Tabular(#[from] omi_tabular::Error),

  #[error("archive has no {0}")]
  MissingFile(&'static str),

  #[error("archive semester could not be determined")]
  UnknownSemester,

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("worker task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

impl Error {
  pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io { path: path.into(), source }
  }

  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self { Self::Store(Box::new(e)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
