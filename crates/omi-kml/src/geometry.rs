//! Coordinate text to polygon geometry.
//!
//! Coordinate lists are whitespace-separated `lon,lat[,alt]` tuples. Tuples
//! that do not parse or fall outside the valid range are skipped and counted;
//! a ring needs at least three distinct points to survive.

use geo::{Coord, LineString, MultiPolygon, Polygon};

use crate::document::RawPolygon;

/// Outcome of turning one placemark's polygons into a multi-polygon.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedGeometry {
  /// `None` when no polygon had a usable outer ring.
  pub geometry:         Option<MultiPolygon<f64>>,
  /// Coordinate tuples skipped because they did not parse or were out of
  /// range.
  pub malformed_tuples: usize,
  /// Rings dropped because fewer than three distinct points remained.
  pub dropped_rings:    usize,
}

fn parse_tuple(tuple: &str) -> Option<Coord<f64>> {
  let mut parts = tuple.split(',');
  let x: f64 = parts.next()?.trim().parse().ok()?;
  let y: f64 = parts.next()?.trim().parse().ok()?;
  // Elevation is optional and ignored, but must still be a number if given.
  if let Some(z) = parts.next()
    && !z.trim().is_empty()
    && z.trim().parse::<f64>().is_err()
  {
    return None;
  }
  if parts.next().is_some() {
    return None;
  }
  let in_range = x.is_finite() && y.is_finite() && (-180.0..=180.0).contains(&x) && (-90.0..=90.0).contains(&y);
  in_range.then_some(Coord { x, y })
}

/// Parse one ring. Returns the closed ring (if it has three distinct points)
/// and the number of skipped tuples.
pub fn parse_ring(text: &str) -> (Option<LineString<f64>>, usize) {
  let mut malformed = 0;
  let mut coords: Vec<Coord<f64>> = Vec::new();
  for tuple in text.split_whitespace() {
    match parse_tuple(tuple) {
      Some(c) if coords.last() != Some(&c) => coords.push(c),
      Some(_) => {}
      None => malformed += 1,
    }
  }

  if coords.len() > 1 && coords.first() == coords.last() {
    coords.pop();
  }
  if coords.len() < 3 {
    return (None, malformed);
  }
  coords.push(coords[0]);
  (Some(LineString::new(coords)), malformed)
}

/// Build the multi-polygon of one placemark. Holes that fail to parse are
/// dropped on their own; a polygon whose outer ring fails is dropped whole.
pub fn build_geometry(polygons: &[RawPolygon]) -> ParsedGeometry {
  let mut out = ParsedGeometry::default();
  let mut parts = Vec::with_capacity(polygons.len());

  for raw in polygons {
    let (outer, bad) = parse_ring(&raw.outer);
    out.malformed_tuples += bad;
    let Some(outer) = outer else {
      out.dropped_rings += 1 + raw.inner.len();
      continue;
    };

    let mut holes = Vec::with_capacity(raw.inner.len());
    for inner in &raw.inner {
      let (ring, bad) = parse_ring(inner);
      out.malformed_tuples += bad;
      match ring {
        Some(ring) => holes.push(ring),
        None => out.dropped_rings += 1,
      }
    }
    parts.push(Polygon::new(outer, holes));
  }

  if !parts.is_empty() {
    out.geometry = Some(MultiPolygon::new(parts));
  }
  out
}
