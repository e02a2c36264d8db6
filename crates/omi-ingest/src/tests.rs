//! End-to-end runs over real zip archives against an in-memory store.

use std::{
  collections::BTreeSet,
  fs::File,
  io::Write as _,
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
  },
};

use omi_core::{
  JoinKey, Semester,
  batch::BatchOutcome,
  quotation::QuotationRecord,
  store::{QuotationLoad, SemesterPresence, ZoneMatch, ZoneStore},
  zone::ZoneRecord,
};
use omi_store_sqlite::SqliteStore;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use crate::{ArchiveStatus, IngestConfig, LoadState, LoadStep, Orchestrator, RunReport};

// ─── Fixtures ────────────────────────────────────────────────────────────────

const VALORI_HEADER: &str = "Area_territoriale;Regione;Prov;Comune_ISTAT;Comune_cat;Sez;\
  Comune_amm;Comune_descrizione;Fascia;Zona;LinkZona;Cod_Tip;Descr_Tipologia;Stato;\
  Stato_prev;Compr_min;Compr_max;Sup_NL_compr;Loc_min;Loc_max;Sup_NL_loc;";

const ZONE_HEADER: &str = "Area_territoriale;Regione;Prov;Comune_ISTAT;Comune_cat;Sez;\
  Comune_amm;Comune_descrizione;Fascia;Zona_Descr;Zona;LinkZona;Cod_tip_prev;\
  Descr_tip_prev;Stato_prev;Microzona;";

const SQUARE: &str = "8.60,44.90 8.61,44.90 8.61,44.91 8.60,44.91 8.60,44.90";
const BOWTIE: &str = "8.70,44.90 8.72,44.92 8.72,44.90 8.70,44.92 8.70,44.90";

fn zone_table() -> String {
  let line = |zone: &str, key: &str| {
    format!(
      "NORD-OVEST;PIEMONTE;AL;6003;A182;;A182;ALESSANDRIA;B;'Centro';{zone};{key};20;\
       Abitazioni civili;NORMALE;1;"
    )
  };
  format!("Zone OMI\n{ZONE_HEADER}\n{}\n{}\n", line("B01", "AL00000101"), line("C01", "AL00000102"))
}

fn valori_table() -> String {
  let line = |key: &str, state: &str, prev: &str| {
    format!(
      "NORD-OVEST;PIEMONTE;AL;6003;A182;;A182;ALESSANDRIA;B;B01;{key};20;\
       Abitazioni civili;{state};{prev};1050;1500;L;5,1;7,2;N;"
    )
  };
  [
    "Quotazioni OMI".to_owned(),
    VALORI_HEADER.to_owned(),
    line("AL00000101", "NORMALE", "P"),
    line("AL00000101", "OTTIMO", ""),
    line("AL00000102", "NORMALE", "P"),
    line("AL0000010", "NORMALE", ""),
  ]
  .join("\n")
}

fn placemark(name: &str, data: &[(&str, &str)], coords: &str) -> String {
  let data: String = data
    .iter()
    .map(|(k, v)| format!(r#"<Data name="{k}"><value>{v}</value></Data>"#))
    .collect();
  format!(
    "<Placemark><name>{name}</name><ExtendedData>{data}</ExtendedData>\
     <Polygon><outerBoundaryIs><LinearRing><coordinates>{coords}</coordinates>\
     </LinearRing></outerBoundaryIs></Polygon></Placemark>"
  )
}

fn polygon_document(half: u8) -> String {
  format!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
     <kml><Document><name>ALESSANDRIA (AL) Anno/Semestre 2024/{half}</name>{}{}{}</Document></kml>",
    placemark("ALESSANDRIA - Zona OMI B01", &[], SQUARE),
    placemark("ALESSANDRIA - Zona OMI C01", &[("LINKZONA", "AL00000102")], BOWTIE),
    placemark("ALESSANDRIA - Zona OMI E07", &[], SQUARE),
  )
}

fn write_zip(dir: &Path, name: &str, entries: &[(&str, &str)]) -> PathBuf {
  let path = dir.join(name);
  let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
  for (entry, body) in entries {
    zip.start_file(*entry, SimpleFileOptions::default()).unwrap();
    zip.write_all(body.as_bytes()).unwrap();
  }
  zip.finish().unwrap();
  path
}

/// A complete archive for 2024 semester `half`.
fn write_archive(dir: &Path, name: &str, half: u8) -> PathBuf {
  let valori = format!("QI_2024{half}_VALORI.csv");
  let zone = format!("QI_2024{half}_ZONE.csv");
  write_zip(dir, name, &[
    (valori.as_str(), valori_table().as_str()),
    (zone.as_str(), zone_table().as_str()),
    ("KML/A182.kml", polygon_document(half).as_str()),
  ])
}

fn config(dir: &Path) -> IngestConfig {
  IngestConfig { source_dir: dir.to_path_buf(), ..IngestConfig::default() }
}

fn s2() -> Semester { "2024_S2".parse().unwrap() }

async fn store() -> SqliteStore { SqliteStore::open_in_memory().await.expect("in-memory store") }

async fn run(store: &SqliteStore, dir: &Path, reset: bool) -> RunReport {
  Orchestrator::new(Arc::new(store.clone()), config(dir)).run(reset).await.unwrap()
}

// ─── Loading ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn loads_one_archive() {
  let dir = TempDir::new().unwrap();
  write_archive(dir.path(), "omi_2024_2.zip", 2);
  let s = store().await;

  let report = run(&s, dir.path(), false).await;
  assert_eq!(report.archives.len(), 1);
  assert_eq!(report.archives[0].status, ArchiveStatus::Loaded);
  assert_eq!(report.archives[0].semester, Some(s2()));

  let sem = &report.semesters[&s2()];
  assert_eq!(sem.state, LoadState::Complete);
  assert_eq!(sem.zones.committed, 2);
  assert_eq!(sem.geometry.placemarks, 3);
  assert_eq!(sem.geometry.unresolved, 1);
  assert_eq!(sem.geometry.repaired, 1);
  assert_eq!(sem.quotations.inserted, 3);
  assert_eq!(sem.quotation_skips.total(), 1);

  assert_eq!(s.count_zones(s2()).await.unwrap(), 2);
  assert_eq!(s.count_quotations(s2()).await.unwrap(), 3);
  assert!(s.is_semester_complete(s2()).await.unwrap());
}

#[tokio::test]
async fn title_derived_placemark_takes_the_zone_table_key() {
  let dir = TempDir::new().unwrap();
  write_archive(dir.path(), "omi_2024_2.zip", 2);
  let s = store().await;
  run(&s, dir.path(), false).await;

  let hit = s.locate_zone(8.605, 44.905, s2(), 0.0).await.unwrap().unwrap();
  assert_eq!(hit.join_key.as_str(), "AL00000101");
  assert_eq!(hit.zone_code, "B01");
  assert_eq!(hit.municipality_name.as_deref(), Some("ALESSANDRIA"));
}

#[tokio::test]
async fn self_intersecting_zone_is_stored_repaired() {
  let dir = TempDir::new().unwrap();
  write_archive(dir.path(), "omi_2024_2.zip", 2);
  let s = store().await;
  run(&s, dir.path(), false).await;

  // Inside the eastern lobe of the bowtie.
  let hit = s.locate_zone(8.715, 44.91, s2(), 0.0).await.unwrap().unwrap();
  assert_eq!(hit.join_key.as_str(), "AL00000102");
  assert_eq!(hit.distance_m, None);
}

#[tokio::test]
async fn tangled_zone_loads_next_to_a_clean_one() {
  let dir = TempDir::new().unwrap();
  let tangled = "8.7,44.2 8.1,44.8 8.5,44.3 8.4,44.5 8.8,44.4 8.8,44.8 8.6,44.1 8.8,44.2 8.7,44.3 8.7,44.6 8.7,44.2";
  let kml = format!(
    "<kml><Document><name>ALESSANDRIA (AL) Anno/Semestre 2024/2</name>{}{}</Document></kml>",
    placemark("ALESSANDRIA - Zona OMI C01", &[("LINKZONA", "AL00000102")], tangled),
    placemark("ALESSANDRIA - Zona OMI B01", &[], SQUARE),
  );
  write_zip(dir.path(), "omi_2024_2.zip", &[
    ("QI_20242_VALORI.csv", valori_table().as_str()),
    ("QI_20242_ZONE.csv", zone_table().as_str()),
    ("KML/A182.kml", kml.as_str()),
  ]);
  let s = store().await;

  let report = run(&s, dir.path(), false).await;
  assert_eq!(report.archives[0].status, ArchiveStatus::Loaded);
  let sem = &report.semesters[&s2()];
  assert_eq!(sem.state, LoadState::Complete);
  assert_eq!(sem.geometry.repaired, 1);
  assert_eq!(sem.geometry.invalid_dropped, 0);
  assert_eq!(s.count_zones(s2()).await.unwrap(), 2);

  // Inside the western triangle cut off by the first crossing.
  let hit = s.locate_zone(8.33, 44.53, s2(), 0.0).await.unwrap().unwrap();
  assert_eq!(hit.join_key.as_str(), "AL00000102");
  let hit = s.locate_zone(8.605, 44.905, s2(), 0.0).await.unwrap().unwrap();
  assert_eq!(hit.join_key.as_str(), "AL00000101");
}

#[tokio::test]
async fn two_semesters_load_side_by_side() {
  let dir = TempDir::new().unwrap();
  write_archive(dir.path(), "omi_2024_1.zip", 1);
  write_archive(dir.path(), "omi_2024_2.zip", 2);
  let s = store().await;

  let report = run(&s, dir.path(), false).await;
  assert_eq!(report.semesters.len(), 2);
  assert!(report.semesters.values().all(|r| r.state == LoadState::Complete));
  let complete = s.complete_semesters().await.unwrap();
  assert_eq!(complete, BTreeSet::from(["2024_S1".parse().unwrap(), s2()]));
}

#[tokio::test]
async fn semester_read_from_document_header_when_tables_are_unnamed() {
  let dir = TempDir::new().unwrap();
  write_zip(dir.path(), "latest.zip", &[
    ("VALORI.csv", valori_table().as_str()),
    ("ZONE.csv", zone_table().as_str()),
    ("A182.kml", polygon_document(2).as_str()),
  ]);
  let s = store().await;

  let report = run(&s, dir.path(), false).await;
  assert_eq!(report.archives[0].status, ArchiveStatus::Loaded);
  assert_eq!(report.archives[0].semester, Some(s2()));
  assert_eq!(s.count_quotations(s2()).await.unwrap(), 3);
}

// ─── Idempotence ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_run_inserts_nothing() {
  let dir = TempDir::new().unwrap();
  write_archive(dir.path(), "omi_2024_2.zip", 2);
  let s = store().await;
  run(&s, dir.path(), false).await;

  let again = run(&s, dir.path(), false).await;
  assert_eq!(again.archives[0].status, ArchiveStatus::AlreadyComplete);
  assert!(again.semesters.is_empty());
  assert_eq!(again.zones_committed(), 0);
  assert_eq!(s.count_zones(s2()).await.unwrap(), 2);
  assert_eq!(s.count_quotations(s2()).await.unwrap(), 3);
}

#[tokio::test]
async fn duplicate_archives_count_once() {
  let dir = TempDir::new().unwrap();
  write_archive(dir.path(), "a.zip", 2);
  write_archive(dir.path(), "b.zip", 2);
  let s = store().await;

  let report = run(&s, dir.path(), false).await;
  let statuses: Vec<_> = report.archives.iter().map(|a| a.status.clone()).collect();
  assert_eq!(statuses, [ArchiveStatus::Loaded, ArchiveStatus::AlreadyComplete]);
  assert_eq!(s.count_zones(s2()).await.unwrap(), 2);
  assert_eq!(s.count_quotations(s2()).await.unwrap(), 3);
}

#[tokio::test]
async fn reset_reloads_everything() {
  let dir = TempDir::new().unwrap();
  write_archive(dir.path(), "omi_2024_2.zip", 2);
  let s = store().await;
  run(&s, dir.path(), false).await;

  let report = run(&s, dir.path(), true).await;
  assert_eq!(report.archives[0].status, ArchiveStatus::Loaded);
  assert_eq!(report.semesters[&s2()].zones.committed, 2);
  assert_eq!(report.semesters[&s2()].quotations.deleted, 0);
  assert_eq!(s.count_zones(s2()).await.unwrap(), 2);
}

// ─── Failure isolation ───────────────────────────────────────────────────────

#[tokio::test]
async fn broken_archives_do_not_stop_the_run() {
  let dir = TempDir::new().unwrap();
  std::fs::write(dir.path().join("a_garbage.zip"), "not a zip").unwrap();
  write_zip(dir.path(), "b_no_zone.zip", &[
    ("QI_20241_VALORI.csv", valori_table().as_str()),
    ("A182.kml", polygon_document(1).as_str()),
  ]);
  write_archive(dir.path(), "c_good.zip", 2);
  let s = store().await;

  let report = run(&s, dir.path(), false).await;
  assert_eq!(report.archives.len(), 3);
  assert_eq!(report.failed_archives().count(), 2);
  assert!(report.semesters[&s2()].state == LoadState::Complete);
  assert!(!s.semester_presence("2024_S1".parse().unwrap()).await.unwrap().zones);
  assert!(report.to_string().contains("FAILED"));
}

#[tokio::test]
async fn missing_source_dir_aborts_the_run() {
  let dir = TempDir::new().unwrap();
  let s = store().await;
  let result =
    Orchestrator::new(Arc::new(s), config(&dir.path().join("absent"))).run(false).await;
  assert!(result.is_err());
}

// ─── Retries ─────────────────────────────────────────────────────────────────

/// A store whose first quotation loads fail, and whose zone batch number
/// `zone_fault_at` (counting from zero) fails once.
struct FlakyStore {
  inner:              SqliteStore,
  quotation_failures: AtomicU32,
  zone_fault_at:      AtomicU32,
}

impl ZoneStore for FlakyStore {
  type Error = omi_store_sqlite::Error;

  async fn insert_zone_batch(&self, batch: Vec<ZoneRecord>) -> Result<BatchOutcome, Self::Error> {
    match self.zone_fault_at.load(Ordering::SeqCst) {
      0 => {
        self.zone_fault_at.store(u32::MAX, Ordering::SeqCst);
        let semester = batch[0].semester;
        Err(omi_store_sqlite::Error::SemesterMismatch { expected: semester, found: semester })
      }
      u32::MAX => self.inner.insert_zone_batch(batch).await,
      n => {
        self.zone_fault_at.store(n - 1, Ordering::SeqCst);
        self.inner.insert_zone_batch(batch).await
      }
    }
  }

  async fn replace_quotations(
    &self,
    semester: Semester,
    rows: Vec<QuotationRecord>,
  ) -> Result<QuotationLoad, Self::Error> {
    let pending = self.quotation_failures.load(Ordering::SeqCst);
    if pending > 0 {
      self.quotation_failures.store(pending - 1, Ordering::SeqCst);
      return Err(omi_store_sqlite::Error::SemesterMismatch { expected: semester, found: semester });
    }
    self.inner.replace_quotations(semester, rows).await
  }

  async fn refresh_statistics(&self) -> Result<(), Self::Error> { self.inner.refresh_statistics().await }

  async fn reset(&self) -> Result<(), Self::Error> { self.inner.reset().await }

  async fn semester_presence(&self, semester: Semester) -> Result<SemesterPresence, Self::Error> {
    self.inner.semester_presence(semester).await
  }

  async fn complete_semesters(&self) -> Result<BTreeSet<Semester>, Self::Error> {
    self.inner.complete_semesters().await
  }

  async fn list_semesters(&self) -> Result<Vec<Semester>, Self::Error> { self.inner.list_semesters().await }

  async fn count_zones(&self, semester: Semester) -> Result<usize, Self::Error> {
    self.inner.count_zones(semester).await
  }

  async fn count_quotations(&self, semester: Semester) -> Result<usize, Self::Error> {
    self.inner.count_quotations(semester).await
  }

  async fn locate_zone(
    &self,
    lon: f64,
    lat: f64,
    semester: Semester,
    buffer_m: f64,
  ) -> Result<Option<ZoneMatch>, Self::Error> {
    self.inner.locate_zone(lon, lat, semester, buffer_m).await
  }
}

async fn flaky(failures: u32) -> Arc<FlakyStore> {
  Arc::new(FlakyStore {
    inner:              store().await,
    quotation_failures: AtomicU32::new(failures),
    zone_fault_at:      AtomicU32::new(u32::MAX),
  })
}

#[tokio::test]
async fn zone_retry_resumes_after_committed_batches() {
  let dir = TempDir::new().unwrap();
  write_archive(dir.path(), "omi_2024_2.zip", 2);
  let store = flaky(0).await;
  store.zone_fault_at.store(1, Ordering::SeqCst);
  let config = IngestConfig { zone_batch_size: 1, ..config(dir.path()) };

  let report = Orchestrator::new(Arc::clone(&store), config).run(false).await.unwrap();
  let sem = &report.semesters[&s2()];
  assert_eq!(sem.state, LoadState::Complete);
  assert_eq!(sem.zones.committed, 2);
  assert_eq!(sem.zones.ignored, 0);
  assert_eq!(sem.zones.attempted(), 2);
  assert_eq!(store.count_zones(s2()).await.unwrap(), 2);
}

#[tokio::test]
async fn transient_failure_is_retried_in_place() {
  let dir = TempDir::new().unwrap();
  write_archive(dir.path(), "omi_2024_2.zip", 2);
  let store = flaky(1).await;

  let report = Orchestrator::new(Arc::clone(&store), config(dir.path())).run(false).await.unwrap();
  assert_eq!(report.semesters[&s2()].state, LoadState::Complete);
  assert!(store.is_semester_complete(s2()).await.unwrap());
}

#[tokio::test]
async fn half_loaded_semester_is_finished_by_the_next_run() {
  let dir = TempDir::new().unwrap();
  write_archive(dir.path(), "omi_2024_2.zip", 2);
  let store = flaky(2).await;

  let first = Orchestrator::new(Arc::clone(&store), config(dir.path())).run(false).await.unwrap();
  assert!(matches!(
    first.semesters[&s2()].state,
    LoadState::Failed { step: LoadStep::Quotations, .. }
  ));
  assert_eq!(first.failed_archives().count(), 1);
  let presence = store.semester_presence(s2()).await.unwrap();
  assert!(presence.zones && !presence.quotations);

  let second = Orchestrator::new(Arc::clone(&store), config(dir.path())).run(false).await.unwrap();
  let sem = &second.semesters[&s2()];
  assert_eq!(sem.state, LoadState::Complete);
  assert_eq!(sem.zones.committed, 0);
  assert_eq!(sem.zones.ignored, 2);
  assert_eq!(sem.quotations.inserted, 3);
}

#[tokio::test]
async fn stored_keys_are_canonical() {
  let dir = TempDir::new().unwrap();
  write_archive(dir.path(), "omi_2024_2.zip", 2);
  let s = store().await;
  run(&s, dir.path(), false).await;

  for key in ["AL00000101", "AL00000102"] {
    let key = JoinKey::parse(key).unwrap();
    assert!(!s.quotations_for_zone(&key, s2()).await.unwrap().is_empty());
  }
}
