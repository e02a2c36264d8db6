//! Archive discovery and extraction.
//!
//! Each archive is unpacked into its own [`TempDir`], released when the
//! [`ExtractedArchive`] is dropped, whichever way processing ends.

use std::{
  fs::File,
  path::{Path, PathBuf},
};

use omi_core::Semester;
use tempfile::TempDir;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Every `*.zip` directly under `dir`, sorted by file name.
pub fn list_archives(dir: &Path) -> Result<Vec<PathBuf>> {
  let mut archives = Vec::new();
  for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
    let entry = entry.map_err(|e| Error::Walk(dir.to_path_buf(), e))?;
    if entry.file_type().is_file() && has_extension(entry.path(), "zip") {
      archives.push(entry.into_path());
    }
  }
  Ok(archives)
}

fn has_extension(path: &Path, ext: &str) -> bool {
  path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn file_name(path: &str) -> String {
  path.rsplit(['/', '\\']).next().unwrap_or(path).to_ascii_uppercase()
}

fn is_quotation_table(name: &str) -> bool {
  let name = file_name(name);
  name.ends_with(".CSV") && name.contains("VALORI")
}

fn is_zone_table(name: &str) -> bool {
  let name = file_name(name);
  name.ends_with(".CSV") && name.contains("ZONE")
}

/// The semester named by the tables among `names`, preferring the quotation
/// table's name.
pub fn semester_from_table_names<'a>(names: impl IntoIterator<Item = &'a str> + Clone) -> Option<Semester> {
  let from = |pred: fn(&str) -> bool| {
    names
      .clone()
      .into_iter()
      .filter(|n| pred(n))
      .find_map(|n| Semester::from_table_filename(&file_name(n)))
  };
  from(is_quotation_table).or_else(|| from(is_zone_table))
}

/// The semester visible in an archive's entry names, without extracting it.
pub fn peek_semester(path: &Path) -> Result<Option<Semester>> {
  let file = File::open(path).map_err(|e| Error::io(path, e))?;
  let archive = zip::ZipArchive::new(file)?;
  let names: Vec<&str> = archive.file_names().collect();
  Ok(semester_from_table_names(names.iter().copied()))
}

/// An archive unpacked to a private working directory.
#[derive(Debug)]
pub struct ExtractedArchive {
  pub source:          PathBuf,
  pub quotation_table: PathBuf,
  pub zone_table:      PathBuf,
  /// Polygon documents, sorted by path.
  pub documents:       Vec<PathBuf>,
  workdir:             TempDir,
}

impl ExtractedArchive {
  pub fn workdir(&self) -> &Path { self.workdir.path() }

  /// Semester named by the two table file names.
  pub fn table_semester(&self) -> Option<Semester> {
    let names = [&self.quotation_table, &self.zone_table].map(|p| p.to_string_lossy().into_owned());
    semester_from_table_names(names.iter().map(String::as_str))
  }
}

/// Unpack `path` and classify its files. Fails if either table or all
/// polygon documents are missing.
pub fn extract(path: &Path) -> Result<ExtractedArchive> {
  let workdir = tempfile::Builder::new()
    .prefix("omi-")
    .tempdir()
    .map_err(|e| Error::io(std::env::temp_dir(), e))?;

  let file = File::open(path).map_err(|e| Error::io(path, e))?;
  let mut archive = zip::ZipArchive::new(file)?;
  archive.extract(workdir.path())?;

  let mut quotation_tables = Vec::new();
  let mut zone_tables = Vec::new();
  let mut documents = Vec::new();
  for entry in WalkDir::new(workdir.path()).sort_by_file_name() {
    let entry = entry.map_err(|e| Error::Walk(workdir.path().to_path_buf(), e))?;
    if !entry.file_type().is_file() {
      continue;
    }
    let name = entry.file_name().to_string_lossy().into_owned();
    if is_quotation_table(&name) {
      quotation_tables.push(entry.into_path());
    } else if is_zone_table(&name) {
      zone_tables.push(entry.into_path());
    } else if has_extension(entry.path(), "kml") {
      documents.push(entry.into_path());
    }
  }

  let quotation_table = first_of(quotation_tables, "quotation table", path)?;
  let zone_table = first_of(zone_tables, "zone table", path)?;
  if documents.is_empty() {
    return Err(Error::MissingFile("polygon documents"));
  }
  debug!(archive = %path.display(), documents = documents.len(), "archive extracted");

  Ok(ExtractedArchive { source: path.to_path_buf(), quotation_table, zone_table, documents, workdir })
}

fn first_of(mut found: Vec<PathBuf>, what: &'static str, archive: &Path) -> Result<PathBuf> {
  if found.len() > 1 {
    warn!(archive = %archive.display(), count = found.len(), "archive has more than one {what}; using the first");
  }
  if found.is_empty() { Err(Error::MissingFile(what)) } else { Ok(found.swap_remove(0)) }
}
