//! Price quotations.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{JoinKey, Semester};

/// Whether a unit price refers to gross or net floor area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceBasis {
  /// `L` (lorda).
  Gross,
  /// `N` (netta).
  Net,
}

impl SurfaceBasis {
  pub fn from_code(code: &str) -> Option<Self> {
    match code.trim() {
      "L" | "l" => Some(Self::Gross),
      "N" | "n" => Some(Self::Net),
      _ => None,
    }
  }

  pub fn code(self) -> &'static str {
    match self {
      Self::Gross => "L",
      Self::Net => "N",
    }
  }
}

/// One price quotation row. Unique per [`QuotationKey`].
///
/// No relationship to a stored zone is assumed: a quotation may reference a
/// join key that has no polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotationRecord {
  pub join_key:           JoinKey,
  pub semester:           Semester,
  pub property_type_code: u32,
  pub property_type_desc: Option<String>,
  pub conservation_state: String,
  pub is_prevalent:       bool,
  /// Purchase price per square metre.
  pub price_min:          Option<f64>,
  pub price_max:          Option<f64>,
  pub sale_surface:       Option<SurfaceBasis>,
  /// Monthly rent per square metre.
  pub rent_min:           Option<f64>,
  pub rent_max:           Option<f64>,
  pub rent_surface:       Option<SurfaceBasis>,
}

/// Natural key of a quotation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotationKey {
  pub join_key:           JoinKey,
  pub semester:           Semester,
  pub property_type_code: u32,
  pub conservation_state: String,
}

impl QuotationRecord {
  pub fn key(&self) -> QuotationKey {
    QuotationKey {
      join_key:           self.join_key.clone(),
      semester:           self.semester,
      property_type_code: self.property_type_code,
      conservation_state: self.conservation_state.clone(),
    }
  }
}

/// Counts produced by [`dedup_quotations`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
  /// Rows dropped because an earlier row had the same natural key.
  pub duplicates:         usize,
  /// Prevalence markers cleared because the (zone, type) pair already had a
  /// prevalent row.
  pub demoted_prevalent:  usize,
}

/// Keep the first row per natural key and at most one prevalent row per
/// (join key, semester, property type). Order is preserved.
pub fn dedup_quotations(rows: Vec<QuotationRecord>) -> (Vec<QuotationRecord>, DedupStats) {
  let mut seen = HashSet::with_capacity(rows.len());
  let mut prevalent = HashSet::new();
  let mut stats = DedupStats::default();
  let mut out = Vec::with_capacity(rows.len());

  for mut row in rows {
    if !seen.insert(row.key()) {
      stats.duplicates += 1;
      continue;
    }
    if row.is_prevalent
      && !prevalent.insert((row.join_key.clone(), row.semester, row.property_type_code))
    {
      row.is_prevalent = false;
      stats.demoted_prevalent += 1;
    }
    out.push(row);
  }

  (out, stats)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn row(key: &str, type_code: u32, state: &str, prevalent: bool) -> QuotationRecord {
    QuotationRecord {
      join_key:           JoinKey::parse(key).unwrap(),
      semester:           "2024_S2".parse().unwrap(),
      property_type_code: type_code,
      property_type_desc: Some("Abitazioni civili".into()),
      conservation_state: state.into(),
      is_prevalent:       prevalent,
      price_min:          Some(1000.0),
      price_max:          Some(1500.0),
      sale_surface:       Some(SurfaceBasis::Gross),
      rent_min:           Some(5.1),
      rent_max:           Some(7.0),
      rent_surface:       Some(SurfaceBasis::Net),
    }
  }

  #[test]
  fn keeps_first_of_each_natural_key() {
    let mut second = row("AL00000101", 20, "NORMALE", true);
    second.price_min = Some(1.0);
    let rows = vec![
      row("AL00000101", 20, "NORMALE", true),
      second,
      row("AL00000101", 20, "OTTIMO", false),
      row("AL00000102", 20, "NORMALE", true),
    ];
    let (out, stats) = dedup_quotations(rows);
    assert_eq!(out.len(), 3);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(out[0].price_min, Some(1000.0));
  }

  #[test]
  fn demotes_second_prevalent_state() {
    let rows = vec![
      row("AL00000101", 20, "NORMALE", true),
      row("AL00000101", 20, "OTTIMO", true),
      row("AL00000101", 21, "OTTIMO", true),
    ];
    let (out, stats) = dedup_quotations(rows);
    assert_eq!(stats.demoted_prevalent, 1);
    assert!(out[0].is_prevalent);
    assert!(!out[1].is_prevalent);
    assert!(out[2].is_prevalent);
  }

  #[test]
  fn surface_codes() {
    assert_eq!(SurfaceBasis::from_code("L"), Some(SurfaceBasis::Gross));
    assert_eq!(SurfaceBasis::from_code(" n "), Some(SurfaceBasis::Net));
    assert_eq!(SurfaceBasis::from_code(""), None);
    assert_eq!(SurfaceBasis::Net.code(), "N");
  }
}
