//! OMI semiannual archive importer.
//!
//! Scans a directory of `*.zip` archives, one per semester, and loads their
//! zones and quotations into any [`ZoneStore`](omi_core::store::ZoneStore).
//! A semester already present in both tables is skipped, so a rerun only
//! redoes what is missing.

pub mod config;
pub mod error;
pub mod loader;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod scanner;

pub use config::IngestConfig;
pub use error::{Error, Result};
pub use orchestrator::{LoadState, LoadStep, Orchestrator};
pub use report::{ArchiveReport, ArchiveStatus, RunReport, SemesterReport};

#[cfg(test)]
mod tests;
