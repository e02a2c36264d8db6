//! Byte-to-text decoding with a legacy single-byte fallback.

use std::borrow::Cow;

use encoding_rs::WINDOWS_1252;

/// The encoding a table was actually read with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
  Utf8,
  /// Windows-1252, the superset of ISO-8859-1 the older tables use.
  Latin1,
}

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Decode `bytes` as UTF-8, falling back to Windows-1252 instead of failing.
pub fn decode_table(bytes: &[u8]) -> (Cow<'_, str>, SourceEncoding) {
  let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
  match std::str::from_utf8(bytes) {
    Ok(text) => (Cow::Borrowed(text), SourceEncoding::Utf8),
    Err(e) => {
      tracing::warn!(
        valid_up_to = e.valid_up_to(),
        "table is not valid UTF-8; decoding as Windows-1252"
      );
      let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
      (text, SourceEncoding::Latin1)
    }
  }
}
