//! Geometry validation and repair.
//!
//! A geometry is valid when every polygon has closed rings of at least three
//! distinct points with non-zero area, no ring crosses or touches itself,
//! rings of one polygon meet at most at shared vertices without crossing
//! there, every hole lies inside its shell, and no two polygons overlap.
//!
//! Repair builds the planar arrangement of all rings and keeps the faces
//! covered by some polygon: inside its exterior by non-zero winding and
//! inside none of its holes. The boundary of that region is split into
//! simple loops, which become shells and holes again. Zero-area residue is
//! discarded, so the output only ever contains polygons.

use std::{collections::HashMap, fmt};

use geo::{
  BoundingRect, Coord, Kernel, Line, LineString, MultiPolygon, Orientation, Polygon, Rect,
  algorithm::{
    line_intersection::{LineIntersection, line_intersection},
    orient::{Direction, Orient},
  },
  coordinate_position::{CoordPos, CoordinatePosition},
  kernels::RobustKernel,
};
use rstar::{AABB, RTree, RTreeObject};

use crate::arrangement::{Arrangement, bit_key, is_endpoint, line_envelope};

/// Areas at or below this (in square degrees, roughly 0.01 m²) count as
/// zero.
const AREA_EPSILON: f64 = 1e-12;

/// The first defect found in a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Invalidity {
  Empty,
  TooFewPoints,
  ZeroArea,
  SelfIntersection,
  HoleOutsideShell,
  Overlap,
}

impl fmt::Display for Invalidity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Empty => "empty",
      Self::TooFewPoints => "too few points",
      Self::ZeroArea => "zero area",
      Self::SelfIntersection => "self-intersection",
      Self::HoleOutsideShell => "hole outside shell",
      Self::Overlap => "overlapping polygons",
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Repair {
  /// Already valid; returned unchanged.
  Valid(MultiPolygon<f64>),
  /// Was invalid because of `defect`; `geometry` is the valid result.
  Repaired { geometry: MultiPolygon<f64>, defect: Invalidity },
  /// Nothing valid and polygonal could be recovered.
  Unrepairable(Invalidity),
}

impl Repair {
  /// The storable geometry, if any.
  pub fn into_geometry(self) -> Option<MultiPolygon<f64>> {
    match self {
      Self::Valid(g) | Self::Repaired { geometry: g, .. } => Some(g),
      Self::Unrepairable(_) => None,
    }
  }
}

// ─── Validation ──────────────────────────────────────────────────────────────

pub fn validate(geometry: &MultiPolygon<f64>) -> Result<(), Invalidity> {
  if geometry.0.is_empty() {
    return Err(Invalidity::Empty);
  }
  for polygon in &geometry.0 {
    validate_polygon(polygon)?;
  }
  if has_overlap(geometry) {
    return Err(Invalidity::Overlap);
  }
  Ok(())
}

fn validate_polygon(polygon: &Polygon<f64>) -> Result<(), Invalidity> {
  let rings = rings(polygon);
  if rings.iter().any(|r| r.0.len() < 4) {
    return Err(Invalidity::TooFewPoints);
  }
  if self_intersects(&rings) {
    return Err(Invalidity::SelfIntersection);
  }
  if rings.iter().any(|r| signed_area(&r.0).abs() <= AREA_EPSILON) {
    return Err(Invalidity::ZeroArea);
  }
  let shell = Polygon::new(polygon.exterior().clone(), vec![]);
  if !polygon.interiors().iter().all(|hole| hole_inside(&shell, hole)) {
    return Err(Invalidity::HoleOutsideShell);
  }
  Ok(())
}

fn rings(polygon: &Polygon<f64>) -> Vec<&LineString<f64>> {
  std::iter::once(polygon.exterior()).chain(polygon.interiors()).collect()
}

/// Shoelace area; positive for counter-clockwise rings.
fn signed_area(coords: &[Coord<f64>]) -> f64 {
  coords.windows(2).map(|w| w[0].x * w[1].y - w[1].x * w[0].y).sum::<f64>() / 2.0
}

/// A hole that touches its shell at a vertex still lies inside it, but it
/// needs at least one vertex strictly inside.
fn hole_inside(shell: &Polygon<f64>, hole: &LineString<f64>) -> bool {
  let mut inside = false;
  for c in &hole.0 {
    match shell.coordinate_position(c) {
      CoordPos::Outside => return false,
      CoordPos::Inside => inside = true,
      CoordPos::OnBoundary => {}
    }
  }
  inside
}

fn boxes_touch(a: Option<Rect<f64>>, b: Option<Rect<f64>>) -> bool {
  let (Some(a), Some(b)) = (a, b) else { return false };
  a.min().x <= b.max().x && b.min().x <= a.max().x && a.min().y <= b.max().y && b.min().y <= a.max().y
}

/// Whether the interiors of two polygons share any area. Polygons that only
/// touch at points or along edges do not overlap.
fn has_overlap(geometry: &MultiPolygon<f64>) -> bool {
  let boxes: Vec<Option<Rect<f64>>> = geometry.0.iter().map(BoundingRect::bounding_rect).collect();
  let near = boxes
    .iter()
    .enumerate()
    .any(|(i, a)| boxes[i + 1..].iter().any(|b| boxes_touch(*a, *b)));
  near && Arrangement::build(geometry).is_none_or(|a| a.has_overlap())
}

// ─── Segment index ───────────────────────────────────────────────────────────

struct Segment {
  ring:  usize,
  index: usize,
  line:  Line<f64>,
}

impl RTreeObject for Segment {
  type Envelope = AABB<[f64; 2]>;

  fn envelope(&self) -> Self::Envelope { line_envelope(&self.line) }
}

fn segment_index(rings: &[&[Coord<f64>]]) -> RTree<Segment> {
  let segments: Vec<Segment> = rings
    .iter()
    .enumerate()
    .flat_map(|(ring, coords)| {
      coords.windows(2).enumerate().filter(|(_, w)| w[0] != w[1]).map(move |(index, w)| Segment {
        ring,
        index,
        line: Line::new(w[0], w[1]),
      })
    })
    .collect();
  RTree::bulk_load(segments)
}

/// Every intersecting pair of distinct segments, each pair reported once.
fn intersecting_pairs(tree: &RTree<Segment>) -> Vec<(&Segment, &Segment, LineIntersection<f64>)> {
  let mut hits = Vec::new();
  for a in tree.iter() {
    for b in tree.locate_in_envelope_intersecting(&a.envelope()) {
      if (b.ring, b.index) <= (a.ring, a.index) {
        continue;
      }
      if let Some(hit) = line_intersection(a.line, b.line) {
        hits.push((a, b, hit));
      }
    }
  }
  hits
}

fn self_intersects(rings: &[&LineString<f64>]) -> bool {
  let coords: Vec<&[Coord<f64>]> = rings.iter().map(|r| r.0.as_slice()).collect();
  let tree = segment_index(&coords);

  intersecting_pairs(&tree).into_iter().any(|(a, b, hit)| {
    if a.ring != b.ring {
      // Two rings may share a vertex as long as they do not cross there.
      return match hit {
        LineIntersection::SinglePoint { intersection: v, .. }
          if is_endpoint(&a.line, v) && is_endpoint(&b.line, v) =>
        {
          crosses_at(coords[a.ring], a.index, coords[b.ring], b.index, v)
        }
        _ => true,
      };
    }

    let last = coords[a.ring].len().saturating_sub(2);
    let shared = if b.index == a.index + 1 {
      Some(a.line.end)
    } else if a.index == 0 && b.index == last {
      Some(a.line.start)
    } else {
      None
    };
    // Neighbouring segments may meet only at their common vertex.
    match (shared, hit) {
      (Some(v), LineIntersection::SinglePoint { intersection, .. }) => intersection != v,
      (Some(v), LineIntersection::Collinear { intersection }) => {
        intersection.start != v || intersection.end != v
      }
      (None, _) => true,
    }
  })
}

/// The vertices before and after `v` on a closed ring, where `v` is an
/// endpoint of the segment starting at `index`.
fn corner(ring: &[Coord<f64>], index: usize, v: Coord<f64>) -> (Coord<f64>, Coord<f64>) {
  let n = ring.len() - 1;
  let i = if ring[index] == v { index } else { (index + 1) % n };
  (ring[(i + n - 1) % n], ring[i + 1])
}

/// Whether `p` lies left of the path `prev → v → next`. `None` when it lies
/// on the line of either arm.
fn left_of_corner(prev: Coord<f64>, v: Coord<f64>, next: Coord<f64>, p: Coord<f64>) -> Option<bool> {
  let before = RobustKernel::orient2d(prev, v, p);
  let after = RobustKernel::orient2d(v, next, p);
  if before == Orientation::Collinear || after == Orientation::Collinear {
    return None;
  }
  let left = |o: Orientation| o == Orientation::CounterClockwise;
  Some(match RobustKernel::orient2d(prev, v, next) {
    Orientation::CounterClockwise => left(before) && left(after),
    Orientation::Clockwise => left(before) || left(after),
    Orientation::Collinear => left(before),
  })
}

/// Whether ring `b` passes from one side of ring `a` to the other through
/// their common vertex `v`.
fn crosses_at(a: &[Coord<f64>], a_index: usize, b: &[Coord<f64>], b_index: usize, v: Coord<f64>) -> bool {
  let (a_prev, a_next) = corner(a, a_index, v);
  let (b_prev, b_next) = corner(b, b_index, v);
  matches!(
    (left_of_corner(a_prev, v, a_next, b_prev), left_of_corner(a_prev, v, a_next, b_next)),
    (Some(x), Some(y)) if x != y
  )
}

// ─── Repair ──────────────────────────────────────────────────────────────────

pub fn repair(geometry: MultiPolygon<f64>) -> Repair {
  let defect = match validate(&geometry) {
    Ok(()) => return Repair::Valid(geometry),
    Err(defect) => defect,
  };

  let Some(arrangement) = Arrangement::build(&geometry) else {
    tracing::debug!(%defect, "rings could not be noded");
    return Repair::Unrepairable(defect);
  };
  let parts = assemble(arrangement.boundary());
  if parts.is_empty() {
    return Repair::Unrepairable(defect);
  }
  let repaired = MultiPolygon::new(parts).orient(Direction::Default);

  match validate(&repaired) {
    Ok(()) => Repair::Repaired { geometry: repaired, defect },
    Err(still) => {
      tracing::debug!(%defect, %still, "geometry repair did not converge");
      Repair::Unrepairable(defect)
    }
  }
}

/// Walk a closed path and cut out a loop every time a vertex repeats.
fn extract_loops(coords: &[Coord<f64>]) -> Vec<Vec<Coord<f64>>> {
  let mut loops = Vec::new();
  let mut path: Vec<Coord<f64>> = Vec::with_capacity(coords.len());
  let mut seen: HashMap<(u64, u64), usize> = HashMap::new();

  for &c in coords {
    if let Some(&start) = seen.get(&bit_key(c)) {
      let mut closed = path.split_off(start);
      for p in &closed {
        seen.remove(&bit_key(*p));
      }
      closed.push(c);
      loops.push(closed);
    }
    seen.insert(bit_key(c), path.len());
    path.push(c);
  }
  loops
}

/// Turn boundary walks into polygons.
///
/// Every walk keeps the covered region on its left, so counter-clockwise
/// loops are shells and clockwise ones are holes. A hole goes to the
/// smallest shell holding one of its vertices strictly inside.
fn assemble(walks: Vec<Vec<Coord<f64>>>) -> Vec<Polygon<f64>> {
  let mut shells: Vec<(f64, LineString<f64>)> = Vec::new();
  let mut holes: Vec<LineString<f64>> = Vec::new();
  for ring in walks.iter().flat_map(|w| extract_loops(w)) {
    let area = signed_area(&ring);
    if ring.len() < 4 || area.abs() <= AREA_EPSILON {
      continue;
    }
    if area > 0.0 {
      shells.push((area, LineString::new(ring)));
    } else {
      holes.push(LineString::new(ring));
    }
  }
  shells.sort_by(|a, b| a.0.total_cmp(&b.0));

  let mut parts: Vec<(Polygon<f64>, Vec<LineString<f64>>)> =
    shells.into_iter().map(|(_, s)| (Polygon::new(s, vec![]), Vec::new())).collect();
  for hole in holes {
    let owner = parts
      .iter_mut()
      .find(|(shell, _)| hole.0.iter().any(|c| shell.coordinate_position(c) == CoordPos::Inside));
    if let Some((_, owned)) = owner {
      owned.push(hole);
    }
  }
  parts
    .into_iter()
    .map(|(shell, holes)| Polygon::new(shell.into_inner().0, holes))
    .collect()
}
