//! Codec for OMI zone polygon documents (KML).
//!
//! Each document covers one municipality and holds one placemark per zone.
//! A placemark's identity is encoded in one of three historical schemes
//! (see [`identity::Variant`]); this crate classifies it, resolves it against
//! the semester's [`ZoneKeyResolver`](omi_core::resolver::ZoneKeyResolver),
//! and turns its coordinate text into valid polygon geometry.
//!
//! Pure and synchronous; no file or database access.

mod arrangement;
pub mod build;
pub mod document;
pub mod error;
pub mod geometry;
pub mod identity;
pub mod repair;

pub use build::{BuiltZones, GeometryTally, build_document_zones};
pub use document::{Placemark, PolygonDocument, RawPolygon, decode_document, document_code, parse_document};
pub use error::{Error, Result};
pub use identity::{Identity, IdentityError, Variant};
pub use repair::{Invalidity, Repair};

/// Decode and parse document bytes read from the file `source`.
pub fn read_document(bytes: &[u8], source: &str) -> Result<PolygonDocument> {
  let (text, lossy) = decode_document(bytes);
  if lossy {
    tracing::warn!(%source, "document is not valid in its declared encoding; decoded lossily");
  }
  let mut document = parse_document(&text, source)?;
  document.lossy = lossy;
  Ok(document)
}
