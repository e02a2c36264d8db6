//! Per-semester lookup from (administrative code, local zone code) to the
//! canonical join key.
//!
//! A resolver is built from exactly one semester's zone table and carries
//! that semester with it. Geometry building receives it as an argument, so
//! keys from one vintage can never leak into another.

use std::collections::HashMap;

use crate::{JoinKey, Semester, zone::ZoneDescriptor};

/// A lookup that found no descriptor. The geometry is dropped, never
/// assigned an invented key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no zone descriptor for municipality {admin_code} zone {zone_code}")]
pub struct Unresolved {
  pub admin_code: String,
  pub zone_code:  String,
}

#[derive(Debug)]
pub struct ZoneKeyResolver {
  semester:    Semester,
  descriptors: Vec<ZoneDescriptor>,
  by_pair:     HashMap<(String, String), usize>,
  by_key:      HashMap<JoinKey, usize>,
  conflicts:   usize,
}

impl ZoneKeyResolver {
  /// Build the lookup. When two descriptors share a code pair the first one
  /// wins and the clash is counted.
  pub fn new(semester: Semester, descriptors: Vec<ZoneDescriptor>) -> Self {
    let mut by_pair = HashMap::with_capacity(descriptors.len());
    let mut by_key = HashMap::with_capacity(descriptors.len());
    let mut conflicts = 0;

    for (idx, d) in descriptors.iter().enumerate() {
      let pair = (normalize_code(&d.admin_code), normalize_code(&d.zone_code));
      if let Some(&existing) = by_pair.get(&pair) {
        let first: &ZoneDescriptor = &descriptors[existing];
        if first.join_key != d.join_key {
          conflicts += 1;
          tracing::warn!(
            %semester,
            admin_code = %d.admin_code,
            zone_code = %d.zone_code,
            kept = %first.join_key,
            ignored = %d.join_key,
            "zone code pair maps to two join keys"
          );
        }
      } else {
        by_pair.insert(pair, idx);
      }
      by_key.entry(d.join_key.clone()).or_insert(idx);
    }

    Self { semester, descriptors, by_pair, by_key, conflicts }
  }

  pub fn semester(&self) -> Semester { self.semester }

  pub fn len(&self) -> usize { self.by_pair.len() }

  pub fn is_empty(&self) -> bool { self.by_pair.is_empty() }

  /// Number of code pairs that appeared with more than one join key.
  pub fn conflicts(&self) -> usize { self.conflicts }

  /// Resolve a code pair. Codes are compared trimmed and uppercased.
  pub fn resolve(&self, admin_code: &str, zone_code: &str) -> Result<&ZoneDescriptor, Unresolved> {
    let pair = (normalize_code(admin_code), normalize_code(zone_code));
    self
      .by_pair
      .get(&pair)
      .map(|&idx| &self.descriptors[idx])
      .ok_or_else(|| Unresolved {
        admin_code: admin_code.trim().to_owned(),
        zone_code:  zone_code.trim().to_owned(),
      })
  }

  /// Metadata for a key that was already known, if the zone table has it.
  pub fn describe(&self, key: &JoinKey) -> Option<&ZoneDescriptor> {
    self.by_key.get(key).map(|&idx| &self.descriptors[idx])
  }
}

fn normalize_code(code: &str) -> String { code.trim().to_ascii_uppercase() }
