//! Importer configuration.
//!
//! Layered lowest to highest: built-in defaults, an optional TOML file,
//! `OMI_*` environment variables, then command-line flags (applied by the
//! binary).

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Runtime importer configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
  /// Directory holding the semiannual `*.zip` archives.
  pub source_dir:      PathBuf,
  /// SQLite database file. A leading `~` is expanded by the binary.
  pub database:        PathBuf,
  /// Semesters loaded concurrently.
  pub parallelism:     usize,
  /// Zone records per write batch.
  pub zone_batch_size: usize,
  /// Attempts per load step before a semester is marked failed.
  pub max_attempts:    u32,
  /// Radius of the nearest-zone fallback in spatial lookups.
  pub locate_buffer_m: f64,
}

impl Default for IngestConfig {
  fn default() -> Self {
    Self {
      source_dir:      PathBuf::from("data/omi"),
      database:        PathBuf::from("omi.sqlite"),
      parallelism:     2,
      zone_batch_size: 500,
      max_attempts:    2,
      locate_buffer_m: 200.0,
    }
  }
}

impl IngestConfig {
  /// Read the optional file at `path`, then the environment.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    let cfg: Self = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("OMI"))
      .build()?
      .try_deserialize()?;
    Ok(cfg.clamped())
  }

  /// Raise counts that must be at least one.
  pub fn clamped(mut self) -> Self {
    self.parallelism = self.parallelism.max(1);
    self.zone_batch_size = self.zone_batch_size.max(1);
    self.max_attempts = self.max_attempts.max(1);
    self.locate_buffer_m = self.locate_buffer_m.max(0.0);
    self
  }
}
