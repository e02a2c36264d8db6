//! Point-to-zone matching over prefiltered candidates.

use geo::{Contains, Coord, EuclideanDistance, MapCoords, MultiPolygon, Point};
use omi_core::store::ZoneMatch;

/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Degrees of latitude and longitude spanned by `metres` around `lat`.
pub fn degree_span(metres: f64, lat: f64) -> (f64, f64) {
  let dlat = (metres / EARTH_RADIUS_M).to_degrees();
  let cos = lat.to_radians().cos().max(1e-6);
  (dlat, dlat / cos)
}

/// Project `g` onto a plane tangent at (`lon0`, `lat0`), in metres.
fn project(g: &MultiPolygon<f64>, lon0: f64, lat0: f64) -> MultiPolygon<f64> {
  // metres per degree of latitude
  let k = EARTH_RADIUS_M.to_radians();
  let cos = lat0.to_radians().cos();
  g.map_coords(|c| Coord { x: (c.x - lon0) * k * cos, y: (c.y - lat0) * k })
}

/// The zone containing the point, else the nearest one within `buffer_m`.
///
/// Ties are broken by candidate order.
pub fn best_match(
  lon: f64,
  lat: f64,
  buffer_m: f64,
  candidates: Vec<(ZoneMatch, MultiPolygon<f64>)>,
) -> Option<ZoneMatch> {
  let point = Point::new(lon, lat);
  let mut nearest: Option<(ZoneMatch, f64)> = None;

  for (zone, geometry) in candidates {
    if geometry.contains(&point) {
      return Some(zone);
    }
    let distance = Point::new(0.0, 0.0).euclidean_distance(&project(&geometry, lon, lat));
    let closer = nearest.as_ref().is_none_or(|(_, best)| distance < *best);
    if distance <= buffer_m && closer {
      nearest = Some((zone, distance));
    }
  }

  nearest.map(|(zone, distance)| ZoneMatch { distance_m: Some(distance), ..zone })
}

#[cfg(test)]
mod tests {
  use geo::polygon;
  use omi_core::JoinKey;

  use super::*;

  fn zone(key: &str) -> ZoneMatch {
    ZoneMatch {
      join_key:          JoinKey::parse(key).unwrap(),
      semester:          "2024_S2".parse().unwrap(),
      zone_code:         "B01".into(),
      band:              None,
      municipality_name: None,
      description:       None,
      distance_m:        None,
    }
  }

  fn square(lon: f64, lat: f64, side: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon![
      (x: lon, y: lat),
      (x: lon + side, y: lat),
      (x: lon + side, y: lat + side),
      (x: lon, y: lat + side),
    ]])
  }

  #[test]
  fn containment_beats_proximity() {
    let candidates = vec![
      (zone("AL00000101"), square(8.60, 44.90, 0.01)),
      (zone("AL00000102"), square(8.611, 44.90, 0.01)),
    ];
    let hit = best_match(8.615, 44.905, 200.0, candidates).unwrap();
    assert_eq!(hit.join_key.as_str(), "AL00000102");
    assert_eq!(hit.distance_m, None);
  }

  #[test]
  fn nearest_within_buffer() {
    // 0.001 degrees of longitude at 45°N is roughly 79 m.
    let candidates = vec![(zone("AL00000101"), square(8.60, 44.90, 0.01))];
    let hit = best_match(8.611, 44.905, 200.0, candidates.clone()).unwrap();
    let d = hit.distance_m.unwrap();
    assert!((70.0..90.0).contains(&d), "distance {d}");
    assert!(best_match(8.611, 44.905, 50.0, candidates).is_none());
  }

  #[test]
  fn degree_span_widens_longitude() {
    let (dlat, dlon) = degree_span(200.0, 45.0);
    assert!(dlon > dlat);
    assert!((dlat - 0.0018).abs() < 0.0001);
  }
}
