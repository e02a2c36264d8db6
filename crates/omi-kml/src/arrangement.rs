//! Planar arrangement of polygon rings.
//!
//! Ring segments are cut wherever they meet until any two of them share at
//! most an endpoint. The cut segments form a planar graph; its faces are
//! traced with half-edges, and every face records the winding number of
//! each input ring around it. A face is covered by a polygon when the
//! polygon's exterior winds around it and none of its holes do.
//!
//! Only orientation predicates decide topology, so the result does not
//! depend on how far apart nearly coincident features happen to be.

use std::{
  cmp::Ordering,
  collections::{BTreeMap, HashMap},
};

use geo::{
  Coord, Kernel, Line, MultiPolygon, Orientation,
  algorithm::line_intersection::{LineIntersection, line_intersection},
  kernels::RobustKernel,
};
use rstar::{
  AABB, RTree, RTreeObject,
  primitives::{GeomWithData, Rectangle},
};

/// Cutting stops after this many passes without reaching a clean graph.
const MAX_NODING_ROUNDS: usize = 16;

/// A computed crossing this close to a segment endpoint (in degrees, about
/// 0.1 mm) becomes that endpoint.
const SNAP_TOLERANCE: f64 = 1e-9;

pub(crate) fn line_envelope(line: &Line<f64>) -> AABB<[f64; 2]> {
  AABB::from_corners([line.start.x, line.start.y], [line.end.x, line.end.y])
}

/// Hashable identity of a coordinate; `-0.0` and `0.0` map to one key.
pub(crate) fn bit_key(c: Coord<f64>) -> (u64, u64) {
  let c = canonical(c);
  (c.x.to_bits(), c.y.to_bits())
}

fn canonical(c: Coord<f64>) -> Coord<f64> { Coord { x: c.x + 0.0, y: c.y + 0.0 } }

pub(crate) fn is_endpoint(line: &Line<f64>, c: Coord<f64>) -> bool { line.start == c || line.end == c }

// ─── Noding ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Piece {
  id:   usize,
  ring: usize,
  line: Line<f64>,
}

impl RTreeObject for Piece {
  type Envelope = AABB<[f64; 2]>;

  fn envelope(&self) -> Self::Envelope { line_envelope(&self.line) }
}

fn snap(c: Coord<f64>, a: &Line<f64>, b: &Line<f64>) -> Coord<f64> {
  [a.start, a.end, b.start, b.end]
    .into_iter()
    .map(|e| (e, (e.x - c.x).abs().max((e.y - c.y).abs())))
    .filter(|(_, d)| *d <= SNAP_TOLERANCE)
    .min_by(|p, q| p.1.total_cmp(&q.1))
    .map_or(c, |(e, _)| e)
}

/// Cut `pieces` wherever two of them cross, touch, or overlap, until they
/// meet only at shared endpoints. `None` if that does not settle.
fn node(mut pieces: Vec<Piece>) -> Option<Vec<Piece>> {
  for _ in 0..MAX_NODING_ROUNDS {
    let tree = RTree::bulk_load(pieces.clone());
    let mut cuts: Vec<Vec<Coord<f64>>> = vec![Vec::new(); pieces.len()];

    for a in tree.iter() {
      for b in tree.locate_in_envelope_intersecting(&a.envelope()) {
        if b.id <= a.id {
          continue;
        }
        let Some(hit) = line_intersection(a.line, b.line) else { continue };
        let mut cut = |c: Coord<f64>| {
          for piece in [a, b] {
            if !is_endpoint(&piece.line, c) {
              cuts[piece.id].push(c);
            }
          }
        };
        match hit {
          LineIntersection::SinglePoint { intersection, .. } => cut(snap(intersection, &a.line, &b.line)),
          LineIntersection::Collinear { intersection } => {
            cut(intersection.start);
            cut(intersection.end);
          }
        }
      }
    }

    if cuts.iter().all(Vec::is_empty) {
      return Some(pieces);
    }
    pieces = split(&pieces, &cuts);
  }
  None
}

fn split(pieces: &[Piece], cuts: &[Vec<Coord<f64>>]) -> Vec<Piece> {
  let mut out = Vec::with_capacity(pieces.len() * 2);
  for (piece, points) in pieces.iter().zip(cuts) {
    let start = piece.line.start;
    let along = |c: &Coord<f64>| (c.x - start.x).powi(2) + (c.y - start.y).powi(2);
    let mut stops: Vec<Coord<f64>> = points.iter().copied().map(canonical).collect();
    stops.sort_by(|p, q| along(p).total_cmp(&along(q)));
    stops.dedup();
    stops.push(piece.line.end);

    let mut from = start;
    for to in stops {
      if to != from {
        out.push(Piece { id: out.len(), ring: piece.ring, line: Line::new(from, to) });
        from = to;
      }
    }
  }
  out
}

// ─── Graph ───────────────────────────────────────────────────────────────────

/// An undirected edge, stored from its lower to its higher vertex id.
#[derive(Debug)]
struct Edge {
  from:  usize,
  to:    usize,
  /// Net number of times each ring runs `from → to`; zero entries are
  /// left out.
  winds: Vec<(usize, i32)>,
}

/// The rings of one input polygon, as ring ids.
#[derive(Debug)]
struct RingSet {
  exterior: usize,
  holes:    Vec<usize>,
}

/// Half-edge `2e` runs along edge `e` from `from` to `to`; `2e + 1` runs
/// back. A half-edge's face is the one on its left.
#[derive(Debug)]
pub(crate) struct Arrangement {
  vertices: Vec<Coord<f64>>,
  edges:    Vec<Edge>,
  /// Outgoing half-edges of each vertex, counter-clockwise.
  outgoing: Vec<Vec<usize>>,
  /// Position of each half-edge in its origin's `outgoing` list.
  slot:     Vec<usize>,
  face:     Vec<usize>,
  /// Winding number of every ring around every face.
  windings: Vec<Vec<i32>>,
  polygons: Vec<RingSet>,
}

fn vertex_id(index: &mut HashMap<(u64, u64), usize>, vertices: &mut Vec<Coord<f64>>, c: Coord<f64>) -> usize {
  *index.entry(bit_key(c)).or_insert_with(|| {
    vertices.push(c);
    vertices.len() - 1
  })
}

/// Whether `to` lies in the upper half-plane seen from `from`, the
/// positive x axis included.
fn upper(from: Coord<f64>, to: Coord<f64>) -> bool { to.y > from.y || (to.y == from.y && to.x > from.x) }

/// Counter-clockwise order of the directions `o → a` and `o → b`, starting
/// at the positive x axis.
fn by_angle(o: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> Ordering {
  match (upper(o, a), upper(o, b)) {
    (true, false) => Ordering::Less,
    (false, true) => Ordering::Greater,
    _ => match RobustKernel::orient2d(o, a, b) {
      Orientation::CounterClockwise => Ordering::Less,
      Orientation::Clockwise => Ordering::Greater,
      Orientation::Collinear => Ordering::Equal,
    },
  }
}

fn lowest_leftmost(a: Coord<f64>, b: Coord<f64>) -> bool { a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)).is_lt() }

impl Arrangement {
  /// Node every ring of `geometry` and classify the faces. `None` if the
  /// rings could not be noded.
  pub(crate) fn build(geometry: &MultiPolygon<f64>) -> Option<Self> {
    let mut polygons = Vec::with_capacity(geometry.0.len());
    let mut pieces = Vec::new();
    let mut ring = 0;
    for polygon in &geometry.0 {
      let exterior = ring;
      for coords in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
        for w in coords.0.windows(2) {
          let (a, b) = (canonical(w[0]), canonical(w[1]));
          if a != b {
            pieces.push(Piece { id: pieces.len(), ring, line: Line::new(a, b) });
          }
        }
        ring += 1;
      }
      polygons.push(RingSet { exterior, holes: (exterior + 1..ring).collect() });
    }

    let pieces = node(pieces)?;

    let mut index = HashMap::new();
    let mut vertices = Vec::new();
    let mut winds: BTreeMap<(usize, usize), BTreeMap<usize, i32>> = BTreeMap::new();
    for piece in &pieces {
      let u = vertex_id(&mut index, &mut vertices, piece.line.start);
      let v = vertex_id(&mut index, &mut vertices, piece.line.end);
      let (key, step) = if u < v { ((u, v), 1) } else { ((v, u), -1) };
      *winds.entry(key).or_default().entry(piece.ring).or_default() += step;
    }
    let edges: Vec<Edge> = winds
      .into_iter()
      .filter_map(|((from, to), by_ring)| {
        let winds: Vec<(usize, i32)> = by_ring.into_iter().filter(|(_, n)| *n != 0).collect();
        (!winds.is_empty()).then_some(Edge { from, to, winds })
      })
      .collect();

    let mut arrangement = Self {
      vertices,
      edges,
      outgoing: Vec::new(),
      slot: Vec::new(),
      face: Vec::new(),
      windings: Vec::new(),
      polygons,
    };
    arrangement.link();
    let faces = arrangement.trace_faces();
    arrangement.wind(&faces, ring);
    Some(arrangement)
  }

  fn origin(&self, h: usize) -> usize {
    let edge = &self.edges[h / 2];
    if h % 2 == 0 { edge.from } else { edge.to }
  }

  fn target(&self, h: usize) -> usize { self.origin(h ^ 1) }

  /// The half-edge after `h` around the face on its left.
  fn next(&self, h: usize) -> usize {
    let around = &self.outgoing[self.target(h)];
    around[(self.slot[h ^ 1] + around.len() - 1) % around.len()]
  }

  fn link(&mut self) {
    let mut outgoing = vec![Vec::new(); self.vertices.len()];
    for h in 0..2 * self.edges.len() {
      outgoing[self.origin(h)].push(h);
    }
    let mut slot = vec![0; 2 * self.edges.len()];
    for (v, around) in outgoing.iter_mut().enumerate() {
      let o = self.vertices[v];
      around.sort_by(|&g, &h| by_angle(o, self.vertices[self.target(g)], self.vertices[self.target(h)]));
      for (i, &h) in around.iter().enumerate() {
        slot[h] = i;
      }
    }
    self.outgoing = outgoing;
    self.slot = slot;
  }

  /// Assign every half-edge its face; returns each face's half-edges.
  fn trace_faces(&mut self) -> Vec<Vec<usize>> {
    let mut face = vec![usize::MAX; self.slot.len()];
    let mut faces = Vec::new();
    for start in 0..face.len() {
      if face[start] != usize::MAX {
        continue;
      }
      let mut cycle = Vec::new();
      let mut h = start;
      while face[h] == usize::MAX {
        face[h] = faces.len();
        cycle.push(h);
        h = self.next(h);
      }
      faces.push(cycle);
    }
    self.face = face;
    faces
  }

  /// Winding numbers for every face.
  ///
  /// Within a connected component, crossing an edge from right to left
  /// adds the edge's winds. Each component is seeded at the face around its
  /// lowest-leftmost vertex, whose windings come from a ray cast against
  /// every other component.
  fn wind(&mut self, faces: &[Vec<usize>], rings: usize) {
    let component = self.components();
    let tree = RTree::bulk_load(
      self
        .edges
        .iter()
        .enumerate()
        .map(|(id, e)| {
          let (a, b) = (self.vertices[e.from], self.vertices[e.to]);
          GeomWithData::new(Rectangle::from_corners([a.x, a.y], [b.x, b.y]), id)
        })
        .collect(),
    );

    let mut windings: Vec<Option<Vec<i32>>> = vec![None; faces.len()];
    for (id, &anchor) in component.anchors.iter().enumerate() {
      let o = self.vertices[anchor];
      let around = &self.outgoing[anchor];
      // The sector holding the negative x axis faces away from the component.
      let j = around
        .iter()
        .rposition(|&h| upper(o, self.vertices[self.target(h)]))
        .unwrap_or(around.len() - 1);
      let outer = self.face[around[j]];

      let mut seed = vec![0; rings];
      let ray = AABB::from_corners([o.x, o.y], [f64::MAX, o.y]);
      for hit in tree.locate_in_envelope_intersecting(&ray) {
        let edge = &self.edges[hit.data];
        if component.of[edge.from] == id {
          continue;
        }
        let (a, b) = (self.vertices[edge.from], self.vertices[edge.to]);
        let turn = RobustKernel::orient2d(a, b, o);
        let step = if a.y <= o.y {
          i32::from(b.y > o.y && turn == Orientation::CounterClockwise)
        } else {
          -i32::from(b.y <= o.y && turn == Orientation::Clockwise)
        };
        for &(ring, n) in &edge.winds {
          seed[ring] += step * n;
        }
      }

      windings[outer] = Some(seed);
      let mut stack = vec![outer];
      while let Some(f) = stack.pop() {
        let Some(here) = windings[f].clone() else { continue };
        for &h in &faces[f] {
          let across = self.face[h ^ 1];
          if windings[across].is_some() {
            continue;
          }
          let sign = if h % 2 == 0 { 1 } else { -1 };
          let mut there = here.clone();
          for &(ring, n) in &self.edges[h / 2].winds {
            there[ring] -= sign * n;
          }
          windings[across] = Some(there);
          stack.push(across);
        }
      }
    }

    self.windings = windings.into_iter().map(|w| w.unwrap_or_else(|| vec![0; rings])).collect();
  }

  fn components(&self) -> Components {
    let mut of = vec![usize::MAX; self.vertices.len()];
    let mut anchors = Vec::new();
    for seed in 0..self.vertices.len() {
      if of[seed] != usize::MAX || self.outgoing[seed].is_empty() {
        continue;
      }
      let id = anchors.len();
      let mut anchor = seed;
      of[seed] = id;
      let mut stack = vec![seed];
      while let Some(v) = stack.pop() {
        if lowest_leftmost(self.vertices[v], self.vertices[anchor]) {
          anchor = v;
        }
        for &h in &self.outgoing[v] {
          let w = self.target(h);
          if of[w] == usize::MAX {
            of[w] = id;
            stack.push(w);
          }
        }
      }
      anchors.push(anchor);
    }
    Components { of, anchors }
  }

  /// How many input polygons cover `face`.
  fn covering(&self, face: usize) -> usize {
    let w = &self.windings[face];
    self
      .polygons
      .iter()
      .filter(|p| w[p.exterior] != 0 && p.holes.iter().all(|&h| w[h] == 0))
      .count()
  }

  /// Whether some face is covered by more than one polygon.
  pub(crate) fn has_overlap(&self) -> bool { (0..self.windings.len()).any(|f| self.covering(f) > 1) }

  /// Closed walks around the covered region, each keeping it on its left.
  ///
  /// Where the region meets itself at a vertex the walk turns into the
  /// nearest covered sector, so a walk may revisit a vertex but never
  /// crosses itself.
  pub(crate) fn boundary(&self) -> Vec<Vec<Coord<f64>>> {
    let covered: Vec<bool> = (0..self.windings.len()).map(|f| self.covering(f) > 0).collect();
    let is_boundary = |h: usize| covered[self.face[h]] && !covered[self.face[h ^ 1]];

    let mut used = vec![false; self.face.len()];
    let mut walks = Vec::new();
    for start in 0..self.face.len() {
      if used[start] || !is_boundary(start) {
        continue;
      }
      let mut walk = vec![self.vertices[self.origin(start)]];
      let mut h = start;
      while !used[h] {
        used[h] = true;
        let v = self.target(h);
        walk.push(self.vertices[v]);

        let around = &self.outgoing[v];
        let (k, n) = (self.slot[h ^ 1], around.len());
        let Some(next) = (1..n).map(|i| around[(k + n - i) % n]).find(|&g| is_boundary(g)) else { break };
        h = next;
      }
      walks.push(walk);
    }
    walks
  }
}

struct Components {
  /// Component id of each vertex; `usize::MAX` for isolated ones.
  of:      Vec<usize>,
  anchors: Vec<usize>,
}
