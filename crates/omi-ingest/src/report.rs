//! End-of-run report.

use std::{collections::BTreeMap, fmt, path::PathBuf};

use omi_core::{Semester, batch::BatchOutcome, store::QuotationLoad};
use omi_kml::GeometryTally;
use omi_tabular::SkipTally;

use crate::orchestrator::LoadState;

/// What happened to one archive.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveStatus {
  Loaded,
  /// The store already held the semester in both tables.
  AlreadyComplete,
  Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveReport {
  pub path:     PathBuf,
  pub semester: Option<Semester>,
  pub status:   ArchiveStatus,
}

/// Counts for one semester's load.
#[derive(Debug, Clone, PartialEq)]
pub struct SemesterReport {
  pub state:              LoadState,
  pub archive:            PathBuf,
  pub zones:              BatchOutcome,
  pub geometry:           GeometryTally,
  pub zone_skips:         SkipTally,
  pub quotation_skips:    SkipTally,
  pub quotations:         QuotationLoad,
  /// Rows the loader dropped as natural-key duplicates.
  pub quotation_dups:     usize,
  pub demoted_prevalent:  usize,
  pub resolver_conflicts: usize,
}

impl SemesterReport {
  pub fn new(archive: PathBuf) -> Self {
    Self {
      state: LoadState::NotStarted,
      archive,
      zones: BatchOutcome::default(),
      geometry: GeometryTally::default(),
      zone_skips: SkipTally::default(),
      quotation_skips: SkipTally::default(),
      quotations: QuotationLoad::default(),
      quotation_dups: 0,
      demoted_prevalent: 0,
      resolver_conflicts: 0,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
  pub archives:  Vec<ArchiveReport>,
  pub semesters: BTreeMap<Semester, SemesterReport>,
}

impl RunReport {
  /// Record a semester load. A completed load is never replaced by a later
  /// attempt; a failed one is.
  pub fn record_semester(&mut self, semester: Semester, report: SemesterReport) {
    match self.semesters.get(&semester) {
      Some(existing) if existing.state == LoadState::Complete => {}
      _ => {
        self.semesters.insert(semester, report);
      }
    }
  }

  pub fn failed_archives(&self) -> impl Iterator<Item = &ArchiveReport> {
    self.archives.iter().filter(|a| matches!(a.status, ArchiveStatus::Failed { .. }))
  }

  /// Zone rows committed across every semester in this run.
  pub fn zones_committed(&self) -> usize { self.semesters.values().map(|s| s.zones.committed).sum() }
}

impl fmt::Display for RunReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "archives: {}", self.archives.len())?;
    for a in &self.archives {
      let semester = a.semester.map(|s| s.to_string()).unwrap_or_else(|| "?".into());
      match &a.status {
        ArchiveStatus::Loaded => writeln!(f, "  {} [{semester}] loaded", a.path.display())?,
        ArchiveStatus::AlreadyComplete => {
          writeln!(f, "  {} [{semester}] already loaded, skipped", a.path.display())?
        }
        ArchiveStatus::Failed { reason } => {
          writeln!(f, "  {} [{semester}] FAILED: {reason}", a.path.display())?
        }
      }
    }

    for (semester, s) in &self.semesters {
      writeln!(f, "semester {semester}: {}", s.state)?;
      writeln!(
        f,
        "  zones: {} committed, {} already present, {} rolled back",
        s.zones.committed,
        s.zones.ignored,
        s.zones.rolled_back.len()
      )?;
      let g = &s.geometry;
      writeln!(
        f,
        "  geometry: {} documents ({} unreadable, {} lossy), {} placemarks, {} built, {} repaired",
        g.documents, g.unreadable_documents, g.lossy_documents, g.placemarks, g.built, g.repaired
      )?;
      writeln!(
        f,
        "  geometry dropped: {} unresolved, {} without identity, {} without polygon, {} invalid",
        g.unresolved, g.identity_errors, g.no_geometry, g.invalid_dropped
      )?;
      if !g.variants.is_empty() {
        let variants: Vec<String> = g.variants.iter().map(|(v, n)| format!("{v}={n}")).collect();
        writeln!(f, "  identity variants: {}", variants.join(", "))?;
      }
      if !g.defects.is_empty() {
        let defects: Vec<String> = g.defects.iter().map(|(d, n)| format!("{d}={n}")).collect();
        writeln!(f, "  geometry defects: {}", defects.join(", "))?;
      }
      writeln!(
        f,
        "  quotations: {} inserted, {} replaced, {} duplicates, {} prevalence markers demoted",
        s.quotations.inserted,
        s.quotations.deleted,
        s.quotation_dups,
        s.demoted_prevalent
      )?;
      write_skips(f, "zone rows skipped", &s.zone_skips)?;
      write_skips(f, "quotation rows skipped", &s.quotation_skips)?;
      if s.resolver_conflicts > 0 {
        writeln!(f, "  zone table conflicts: {}", s.resolver_conflicts)?;
      }
    }
    Ok(())
  }
}

fn write_skips(f: &mut fmt::Formatter<'_>, label: &str, tally: &SkipTally) -> fmt::Result {
  if tally.total() == 0 {
    return Ok(());
  }
  let parts: Vec<String> = tally.iter().map(|(r, n)| format!("{r}={n}")).collect();
  writeln!(f, "  {label}: {} ({})", tally.total(), parts.join(", "))
}
