//! Semester tokens (`YYYY_Sn`) and the two independent ways of finding one.
//!
//! An archive declares its vintage twice: in the table filenames
//! (`QI_20242_VALORI.csv`) and in the descriptive header of every polygon
//! document (`… Anno/Semestre 2024/2 generato il …`). Both are extracted
//! with their own pattern and then reconciled; the filename wins.

use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Half-year data vintage. Orders chronologically.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Semester {
  year: u16,
  half: u8,
}

impl Semester {
  /// `half` must be 1 or 2.
  pub fn new(year: u16, half: u8) -> Result<Self> {
    if (1..=2).contains(&half) && (1000..=9999).contains(&year) {
      Ok(Self { year, half })
    } else {
      Err(Error::InvalidSemester(format!("{year}/{half}")))
    }
  }

  pub fn year(&self) -> u16 { self.year }

  pub fn half(&self) -> u8 { self.half }

  /// Extract the token from a table filename such as `QI_20242_VALORI.csv`.
  pub fn from_table_filename(name: &str) -> Option<Self> {
    static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
      Regex::new(r"(?i)(\d{4})([12])_(?:VALORI|ZONE)").expect("valid regex")
    });
    let caps = FILENAME_RE.captures(name)?;
    Self::from_parts(&caps[1], &caps[2])
  }

  /// Extract the token from the descriptive header text of a polygon
  /// document (`Anno/Semestre 2025/1`).
  pub fn from_document_header(text: &str) -> Option<Self> {
    static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
      Regex::new(r"(?i)Anno\s*/\s*Semestre\s+(\d{4})\s*/\s*(\d)").expect("valid regex")
    });
    let caps = HEADER_RE.captures(text)?;
    Self::from_parts(&caps[1], &caps[2])
  }

  fn from_parts(year: &str, half: &str) -> Option<Self> {
    Self::new(year.parse().ok()?, half.parse().ok()?).ok()
  }
}

impl fmt::Display for Semester {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}_S{}", self.year, self.half)
  }
}

impl FromStr for Semester {
  type Err = Error;

  /// Parse the canonical `YYYY_Sn` form.
  fn from_str(s: &str) -> Result<Self> {
    let invalid = || Error::InvalidSemester(s.to_owned());
    let (year, half) = s.split_once("_S").ok_or_else(invalid)?;
    if year.len() != 4 || half.len() != 1 {
      return Err(invalid());
    }
    let year = year.parse().map_err(|_| invalid())?;
    let half = half.parse().map_err(|_| invalid())?;
    Self::new(year, half).map_err(|_| invalid())
  }
}

impl TryFrom<String> for Semester {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { s.parse() }
}

impl From<Semester> for String {
  fn from(s: Semester) -> Self { s.to_string() }
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

/// Outcome of reconciling the filename-derived and document-derived tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemesterResolution {
  /// Both sources agree, or only one was available.
  Agreed(Semester),
  /// Both sources were available and disagree. The filename token is used.
  Conflict { filename: Semester, document: Semester },
  /// Neither source yielded a token.
  Missing,
}

impl SemesterResolution {
  /// The token to use for loading, if any.
  pub fn semester(&self) -> Option<Semester> {
    match *self {
      Self::Agreed(s) => Some(s),
      Self::Conflict { filename, .. } => Some(filename),
      Self::Missing => None,
    }
  }
}

/// Combine the two extraction attempts. A disagreement is a warning, never a
/// failure.
pub fn reconcile(filename: Option<Semester>, document: Option<Semester>) -> SemesterResolution {
  match (filename, document) {
    (Some(f), Some(d)) if f != d => {
      tracing::warn!(
        filename = %f,
        document = %d,
        "semester tokens disagree; using the filename token"
      );
      SemesterResolution::Conflict { filename: f, document: d }
    }
    (Some(s), _) | (None, Some(s)) => SemesterResolution::Agreed(s),
    (None, None) => SemesterResolution::Missing,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sem(s: &str) -> Semester { s.parse().unwrap() }

  #[test]
  fn canonical_form_roundtrips() {
    let s = sem("2024_S2");
    assert_eq!(s.year(), 2024);
    assert_eq!(s.half(), 2);
    assert_eq!(s.to_string(), "2024_S2");
  }

  #[test]
  fn rejects_bad_tokens() {
    for bad in ["2024_S3", "2024_S0", "24_S1", "2024S1", "2024_S12", "abcd_S1", ""] {
      assert!(bad.parse::<Semester>().is_err(), "{bad:?}");
    }
  }

  #[test]
  fn orders_chronologically() {
    assert!(sem("2023_S2") < sem("2024_S1"));
    assert!(sem("2024_S1") < sem("2024_S2"));
  }

  #[test]
  fn filename_extraction() {
    assert_eq!(Semester::from_table_filename("QI_20242_VALORI.csv"), Some(sem("2024_S2")));
    assert_eq!(Semester::from_table_filename("qi_20111_zone.CSV"), Some(sem("2011_S1")));
    assert_eq!(
      Semester::from_table_filename("export/QI_1234567_20191_ZONE.csv"),
      Some(sem("2019_S1"))
    );
    assert_eq!(Semester::from_table_filename("QI_20243_VALORI.csv"), None);
    assert_eq!(Semester::from_table_filename("A182.kml"), None);
  }

  #[test]
  fn header_extraction() {
    let text = "AGRIGENTO (AG) Anno/Semestre 2025/1 generato il 03/09/2025";
    assert_eq!(Semester::from_document_header(text), Some(sem("2025_S1")));
    assert_eq!(Semester::from_document_header("Anno/Semestre 2025/3"), None);
    assert_eq!(Semester::from_document_header("no header here"), None);
  }

  #[test]
  fn reconcile_prefers_filename_on_conflict() {
    let r = reconcile(Some(sem("2024_S2")), Some(sem("2024_S1")));
    assert_eq!(
      r,
      SemesterResolution::Conflict { filename: sem("2024_S2"), document: sem("2024_S1") }
    );
    assert_eq!(r.semester(), Some(sem("2024_S2")));
  }

  #[test]
  fn reconcile_uses_whichever_is_available() {
    assert_eq!(reconcile(None, Some(sem("2020_S1"))).semester(), Some(sem("2020_S1")));
    assert_eq!(reconcile(Some(sem("2020_S1")), None).semester(), Some(sem("2020_S1")));
    assert_eq!(reconcile(None, None), SemesterResolution::Missing);
  }
}
