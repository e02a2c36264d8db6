//! Run-level driver: archive grouping, bounded parallelism, and the
//! per-semester load state machine.
//!
//! Archives are grouped by the semester visible in their entry names. Groups
//! run concurrently (at most `parallelism` at a time); the archives of one
//! group run one after another, so no two tasks ever write the same
//! semester. Archives whose semester cannot be seen without extracting them
//! run last, one at a time.

use std::{collections::BTreeMap, fmt, path::PathBuf, sync::Arc};

use omi_core::{Semester, store::ZoneStore};
use tokio::sync::Semaphore;
use tracing::{Instrument as _, debug, error, info, info_span, warn};

use crate::{
  config::IngestConfig,
  error::{Error, Result},
  loader::{load_quotations, load_zones},
  pipeline::{self, PreparedArchive},
  report::{ArchiveReport, ArchiveStatus, RunReport, SemesterReport},
  scanner,
};

// ─── State machine ───────────────────────────────────────────────────────────

/// The two load steps that can fail and be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStep {
  Zones,
  Quotations,
}

impl fmt::Display for LoadStep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Zones => "zone",
      Self::Quotations => "quotation",
    })
  }
}

/// Where one semester's load stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
  NotStarted,
  ZonesLoading,
  ZonesLoaded,
  QuotationsLoading,
  Complete,
  Failed { step: LoadStep, reason: String },
}

impl LoadState {
  pub fn is_terminal(&self) -> bool { matches!(self, Self::Complete | Self::Failed { .. }) }

  /// The state that runs `step`.
  fn running(step: LoadStep) -> Self {
    match step {
      LoadStep::Zones => Self::ZonesLoading,
      LoadStep::Quotations => Self::QuotationsLoading,
    }
  }
}

impl fmt::Display for LoadState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NotStarted => f.write_str("not started"),
      Self::ZonesLoading => f.write_str("loading zones"),
      Self::ZonesLoaded => f.write_str("zones loaded"),
      Self::QuotationsLoading => f.write_str("loading quotations"),
      Self::Complete => f.write_str("complete"),
      Self::Failed { step, reason } => write!(f, "failed during {step} load: {reason}"),
    }
  }
}

/// Counts a failed attempt at `step` and picks the next state: the same
/// step again while attempts remain, otherwise `Failed`.
fn after_failure(step: LoadStep, error: &Error, attempts: &mut u32, max_attempts: u32) -> LoadState {
  *attempts += 1;
  if *attempts < max_attempts {
    warn!(%step, attempt = *attempts, %error, "load step failed; retrying");
    LoadState::running(step)
  } else {
    error!(%step, attempts = *attempts, %error, "load step failed; giving up on semester");
    LoadState::Failed { step, reason: error.to_string() }
  }
}

/// Drive one prepared archive through the state machine.
pub async fn load_semester<S: ZoneStore>(
  store: &S,
  config: &IngestConfig,
  prepared: PreparedArchive,
  archive: PathBuf,
) -> SemesterReport {
  let semester = prepared.semester;
  let mut report = SemesterReport::new(archive);
  report.geometry = prepared.geometry;
  report.zone_skips = prepared.zone_skips;
  report.quotation_skips = prepared.quotation_skips;
  report.demoted_prevalent = prepared.demoted_prevalent;
  report.resolver_conflicts = prepared.resolver_conflicts;

  let mut attempts = 0;
  while !report.state.is_terminal() {
    let next = match report.state.clone() {
      LoadState::NotStarted => LoadState::ZonesLoading,
      LoadState::ZonesLoading => {
        // A failed batch rolls back whole, so a retry resumes after the
        // records already accounted for.
        let pending = &prepared.zones[report.zones.attempted().min(prepared.zones.len())..];
        match load_zones(store, pending, config.zone_batch_size, &mut report.zones).await {
          Ok(()) => LoadState::ZonesLoaded,
          Err(e) => after_failure(LoadStep::Zones, &e, &mut attempts, config.max_attempts),
        }
      }
      LoadState::ZonesLoaded => {
        attempts = 0;
        LoadState::QuotationsLoading
      }
      LoadState::QuotationsLoading => {
        match load_quotations(store, semester, prepared.quotations.clone()).await {
          Ok((load, stats)) => {
            report.quotations = load;
            report.quotation_dups = stats.duplicates;
            report.demoted_prevalent += stats.demoted_prevalent;
            LoadState::Complete
          }
          Err(e) => after_failure(LoadStep::Quotations, &e, &mut attempts, config.max_attempts),
        }
      }
      terminal @ (LoadState::Complete | LoadState::Failed { .. }) => terminal,
    };
    debug!(%semester, from = %report.state, to = %next, "load state");
    report.state = next;
  }

  match &report.state {
    LoadState::Complete => info!(
      %semester,
      zones = report.zones.committed,
      quotations = report.quotations.inserted,
      "semester loaded"
    ),
    state => warn!(%semester, %state, "semester not loaded"),
  }
  report
}

// ─── Archives ────────────────────────────────────────────────────────────────

/// The result of processing one archive.
#[derive(Debug)]
pub struct ArchiveOutcome {
  pub archive:  ArchiveReport,
  pub semester: Option<(Semester, SemesterReport)>,
}

impl ArchiveOutcome {
  fn failed(path: PathBuf, semester: Option<Semester>, error: &Error) -> Self {
    error!(archive = %path.display(), %error, "archive aborted");
    Self {
      archive:  ArchiveReport { path, semester, status: ArchiveStatus::Failed { reason: error.to_string() } },
      semester: None,
    }
  }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
  T: Send + 'static,
  F: FnOnce() -> Result<T> + Send + 'static,
{
  tokio::task::spawn_blocking(f).await?
}

/// Extract, check, parse, and load one archive. Never fails: every error is
/// captured in the outcome.
pub async fn process_archive<S: ZoneStore>(store: &S, config: &IngestConfig, path: PathBuf) -> ArchiveOutcome {
  let span = info_span!("archive", path = %path.display());
  async move {
    let source = path.clone();
    let opened = match blocking(move || pipeline::open_archive(&source)).await {
      Ok(opened) => opened,
      Err(e) => return ArchiveOutcome::failed(path, None, &e),
    };
    let semester = match opened.semester() {
      Ok(semester) => semester,
      Err(e) => return ArchiveOutcome::failed(path, None, &e),
    };

    match store.is_semester_complete(semester).await {
      Ok(true) => {
        info!(%semester, "semester already in both tables; skipping archive");
        return ArchiveOutcome {
          archive:  ArchiveReport { path, semester: Some(semester), status: ArchiveStatus::AlreadyComplete },
          semester: None,
        };
      }
      Ok(false) => {}
      Err(e) => return ArchiveOutcome::failed(path, Some(semester), &Error::store(e)),
    }

    info!(%semester, "loading archive");
    let prepared = match blocking(move || pipeline::prepare(opened)).await {
      Ok(prepared) => prepared,
      Err(e) => return ArchiveOutcome::failed(path, Some(semester), &e),
    };

    let report = load_semester(store, config, prepared, path.clone()).await;
    let status = match &report.state {
      LoadState::Complete => ArchiveStatus::Loaded,
      state => ArchiveStatus::Failed { reason: state.to_string() },
    };
    ArchiveOutcome {
      archive:  ArchiveReport { path, semester: Some(semester), status },
      semester: Some((semester, report)),
    }
  }
  .instrument(span)
  .await
}

type Groups = (BTreeMap<Semester, Vec<PathBuf>>, Vec<PathBuf>);

/// Split archives by the semester named in their entries; the rest go last.
fn group_by_semester(archives: Vec<PathBuf>) -> Groups {
  let mut groups: BTreeMap<Semester, Vec<PathBuf>> = BTreeMap::new();
  let mut unknown = Vec::new();
  for path in archives {
    match scanner::peek_semester(&path) {
      Ok(Some(semester)) => groups.entry(semester).or_default().push(path),
      Ok(None) => unknown.push(path),
      Err(e) => {
        debug!(archive = %path.display(), error = %e, "cannot peek archive");
        unknown.push(path);
      }
    }
  }
  (groups, unknown)
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

/// Runs an import over every archive of the configured source directory.
pub struct Orchestrator<S> {
  store:  Arc<S>,
  config: IngestConfig,
}

impl<S: ZoneStore + 'static> Orchestrator<S> {
  pub fn new(store: Arc<S>, config: IngestConfig) -> Self { Self { store, config: config.clamped() } }

  /// Process every archive and report what happened.
  ///
  /// Only a store reset failure or an unreadable source directory is an
  /// error; archive and semester failures are part of the report.
  pub async fn run(&self, reset: bool) -> Result<RunReport> {
    if reset {
      self.store.reset().await.map_err(Error::store)?;
      info!("store reset; every archive will be reloaded");
    }

    let dir = self.config.source_dir.clone();
    let archives = blocking(move || scanner::list_archives(&dir)).await?;
    info!(count = archives.len(), dir = %self.config.source_dir.display(), "archives found");
    let (groups, unknown) = blocking(move || Ok(group_by_semester(archives))).await?;

    let permits = Arc::new(Semaphore::new(self.config.parallelism));
    let mut handles = Vec::with_capacity(groups.len());
    for (semester, paths) in groups {
      let store = Arc::clone(&self.store);
      let config = self.config.clone();
      let permits = Arc::clone(&permits);
      let queue = paths.clone();
      let handle = tokio::spawn(
        async move {
          let _permit = permits.acquire_owned().await;
          let mut outcomes = Vec::with_capacity(queue.len());
          for path in queue {
            outcomes.push(process_archive(store.as_ref(), &config, path).await);
          }
          outcomes
        }
        .instrument(info_span!("semester", %semester)),
      );
      handles.push((paths, handle));
    }

    let mut report = RunReport::default();
    for (paths, handle) in handles {
      match handle.await {
        Ok(outcomes) => outcomes.into_iter().for_each(|o| absorb(&mut report, o)),
        Err(e) => {
          error!(error = %e, "semester task failed");
          for path in paths {
            let status = ArchiveStatus::Failed { reason: format!("worker task failed: {e}") };
            report.archives.push(ArchiveReport { path, semester: None, status });
          }
        }
      }
    }

    for path in unknown {
      let outcome = process_archive(self.store.as_ref(), &self.config, path).await;
      absorb(&mut report, outcome);
    }

    if let Err(e) = self.store.refresh_statistics().await {
      warn!(error = %e, "could not refresh planner statistics");
    }
    info!(
      archives = report.archives.len(),
      failed = report.failed_archives().count(),
      zones = report.zones_committed(),
      "import finished"
    );
    Ok(report)
  }
}

fn absorb(report: &mut RunReport, outcome: ArchiveOutcome) {
  report.archives.push(outcome.archive);
  if let Some((semester, s)) = outcome.semester {
    report.record_semester(semester, s);
  }
}
