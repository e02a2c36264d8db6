//! Polygon document (KML) reading.
//!
//! Uses `quick-xml`'s pull reader. Only the parts the pipeline needs are
//! kept: the document header text, and for each placemark its title,
//! description, extended-data fields, and polygon ring coordinate text.

use std::{borrow::Cow, collections::HashMap, sync::LazyLock};

use encoding_rs::Encoding;
use quick_xml::{Reader, events::Event};
use regex::Regex;

use crate::error::{Error, Result};

// ─── Parsed shape ────────────────────────────────────────────────────────────

/// Coordinate text of one polygon: one outer ring, zero or more holes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPolygon {
  pub outer: String,
  pub inner: Vec<String>,
}

/// One `<Placemark>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placemark {
  /// Human-readable title, e.g. `ALESSANDRIA - Zona OMI B01`.
  pub name:        Option<String>,
  pub description: Option<String>,
  /// Extended-data fields keyed by uppercased field name.
  pub fields:      HashMap<String, String>,
  pub polygons:    Vec<RawPolygon>,
}

impl Placemark {
  /// The first non-empty field among `names` (uppercase).
  pub fn field(&self, names: &[&str]) -> Option<&str> {
    names
      .iter()
      .filter_map(|n| self.fields.get(*n))
      .map(|v| v.trim())
      .find(|v| !v.is_empty())
  }
}

/// A parsed polygon document, usually one per municipality.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolygonDocument {
  /// File name the document was read from.
  pub source:     String,
  /// Municipality code taken from the file name (e.g. `A182`).
  pub code:       Option<String>,
  /// Document-level name and description, concatenated.
  pub header:     String,
  pub placemarks: Vec<Placemark>,
  /// The bytes were not valid in the declared encoding and were decoded
  /// lossily.
  pub lossy:      bool,
}

// ─── Decoding ────────────────────────────────────────────────────────────────

static DECL_ENCODING_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"^\s*<\?xml[^>]*encoding\s*=\s*["']([A-Za-z0-9._-]+)["']"#).expect("valid regex")
});

/// Decode document bytes in their declared encoding (UTF-8 when none is
/// declared). Invalid sequences are replaced rather than rejected; the flag
/// reports whether that happened.
pub fn decode_document(bytes: &[u8]) -> (Cow<'_, str>, bool) {
  let head = String::from_utf8_lossy(&bytes[..bytes.len().min(200)]);
  let declared = DECL_ENCODING_RE
    .captures(&head)
    .and_then(|c| Encoding::for_label(c[1].as_bytes()))
    .unwrap_or(encoding_rs::UTF_8);

  if declared == encoding_rs::UTF_8 {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    return match std::str::from_utf8(bytes) {
      Ok(text) => (Cow::Borrowed(text), false),
      Err(_) => (String::from_utf8_lossy(bytes), true),
    };
  }

  let (text, _, had_errors) = declared.decode(bytes);
  (text, had_errors)
}

/// Municipality code from a document file name: `A182.kml` → `A182`.
pub fn document_code(file_name: &str) -> Option<String> {
  static CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]\d{3})(?:[^0-9]|$)").expect("valid regex"));
  let stem = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
  let upper = stem.to_ascii_uppercase();
  CODE_RE.captures(&upper).map(|c| c[1].to_owned())
}

// ─── Parser ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tag {
  Document,
  Placemark,
  Name,
  Description,
  Data(String),
  SimpleData(String),
  Value,
  Polygon,
  Outer,
  Inner,
  LinearRing,
  Coordinates,
  Other,
}

fn local_name(name: &[u8]) -> &[u8] {
  // strip "prefix:" if present
  if let Some(pos) = name.iter().rposition(|&b| b == b':') { &name[pos + 1..] } else { name }
}

fn attr(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
  e.attributes()
    .flatten()
    .find(|a| local_name(a.key.as_ref()) == key)
    .map(|a| String::from_utf8_lossy(&a.value).trim().to_owned())
}

fn push_text(slot: &mut Option<String>, text: &str) {
  slot.get_or_insert_with(String::new).push_str(text);
}

/// Parse decoded document text. `source` is the document's file name.
pub fn parse_document(text: &str, source: &str) -> Result<PolygonDocument> {
  let mut reader = Reader::from_str(text);
  reader.config_mut().trim_text(true);

  let mut doc = PolygonDocument {
    source: source.to_owned(),
    code: document_code(source),
    ..Default::default()
  };
  let mut stack: Vec<Tag> = Vec::new();
  let mut placemark: Option<Placemark> = None;
  let mut polygon: Option<RawPolygon> = None;
  let mut doc_name: Option<String> = None;
  let mut doc_description: Option<String> = None;

  loop {
    let event = reader.read_event().map_err(|e| Error::Xml {
      position: reader.buffer_position() as u64,
      message:  e.to_string(),
    })?;

    match event {
      Event::Start(e) => {
        let tag = match local_name(e.name().as_ref()) {
          b"Document" => Tag::Document,
          b"Placemark" => {
            placemark = Some(Placemark::default());
            Tag::Placemark
          }
          b"name" => Tag::Name,
          b"description" => Tag::Description,
          b"Data" => Tag::Data(attr(&e, b"name").unwrap_or_default().to_ascii_uppercase()),
          b"SimpleData" => {
            Tag::SimpleData(attr(&e, b"name").unwrap_or_default().to_ascii_uppercase())
          }
          b"value" => Tag::Value,
          b"Polygon" if placemark.is_some() => {
            polygon = Some(RawPolygon::default());
            Tag::Polygon
          }
          b"outerBoundaryIs" => Tag::Outer,
          b"innerBoundaryIs" => Tag::Inner,
          b"LinearRing" => {
            if stack.last() == Some(&Tag::Inner)
              && let Some(p) = polygon.as_mut()
            {
              p.inner.push(String::new());
            }
            Tag::LinearRing
          }
          b"coordinates" => Tag::Coordinates,
          _ => Tag::Other,
        };
        stack.push(tag);
      }

      Event::End(_) => match stack.pop() {
        Some(Tag::Placemark) => {
          if let Some(pm) = placemark.take() {
            doc.placemarks.push(pm);
          }
        }
        Some(Tag::Polygon) => {
          if let (Some(p), Some(pm)) = (polygon.take(), placemark.as_mut()) {
            pm.polygons.push(p);
          }
        }
        _ => {}
      },

      Event::Text(t) => {
        let text = t.unescape().map_err(|e| Error::Xml {
          position: reader.buffer_position() as u64,
          message:  e.to_string(),
        })?;
        on_text(&stack, &text, &mut placemark, &mut polygon, &mut doc_name, &mut doc_description);
      }

      Event::CData(c) => {
        let raw = c.into_inner();
        let text = String::from_utf8_lossy(&raw);
        on_text(&stack, &text, &mut placemark, &mut polygon, &mut doc_name, &mut doc_description);
      }

      Event::Eof => break,
      _ => {}
    }
  }

  doc.header = [doc_name, doc_description].into_iter().flatten().collect::<Vec<_>>().join(" ");
  Ok(doc)
}

fn on_text(
  stack: &[Tag],
  text: &str,
  placemark: &mut Option<Placemark>,
  polygon: &mut Option<RawPolygon>,
  doc_name: &mut Option<String>,
  doc_description: &mut Option<String>,
) {
  let Some(top) = stack.last() else { return };
  let parent = stack.len().checked_sub(2).map(|i| &stack[i]);

  match (top, parent) {
    (Tag::Name, Some(Tag::Placemark)) => {
      if let Some(pm) = placemark.as_mut() {
        push_text(&mut pm.name, text);
      }
    }
    (Tag::Description, Some(Tag::Placemark)) => {
      if let Some(pm) = placemark.as_mut() {
        push_text(&mut pm.description, text);
      }
    }
    (Tag::Name, Some(Tag::Document)) => push_text(doc_name, text),
    (Tag::Description, Some(Tag::Document)) => push_text(doc_description, text),
    (Tag::Value, Some(Tag::Data(name))) | (Tag::SimpleData(name), _) => {
      if let Some(pm) = placemark.as_mut()
        && !name.is_empty()
      {
        pm.fields.entry(name.clone()).or_default().push_str(text);
      }
    }
    (Tag::Coordinates, _) => {
      let Some(p) = polygon.as_mut() else { return };
      // The nearest boundary ancestor decides which ring the text feeds.
      let boundary = stack.iter().rev().find(|t| matches!(t, Tag::Outer | Tag::Inner));
      let ring = match boundary {
        Some(Tag::Outer) => Some(&mut p.outer),
        Some(_) => p.inner.last_mut(),
        None => None,
      };
      if let Some(ring) = ring {
        ring.push(' ');
        ring.push_str(text);
      }
    }
    _ => {}
  }
}
