//! Error types for the omi-kml codec.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The document is not well-formed XML. Its placemarks are dropped.
  #[error("xml error at byte {position}: {message}")]
  Xml { position: u64, message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
