//! Integration tests for `SqliteStore` against an in-memory database.

use geo::{MultiPolygon, polygon};
use omi_core::{
  JoinKey, Semester,
  quotation::{QuotationRecord, SurfaceBasis},
  store::ZoneStore,
  zone::{ZoneBand, ZoneRecord},
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn semester(s: &str) -> Semester { s.parse().unwrap() }

fn square(lon: f64, lat: f64, side: f64) -> MultiPolygon<f64> {
  MultiPolygon::new(vec![polygon![
    (x: lon, y: lat),
    (x: lon + side, y: lat),
    (x: lon + side, y: lat + side),
    (x: lon, y: lat + side),
  ]])
}

fn zone(key: &str, sem: &str, geometry: MultiPolygon<f64>) -> ZoneRecord {
  ZoneRecord {
    join_key: JoinKey::parse(key).unwrap(),
    semester: semester(sem),
    zone_code: "B01".into(),
    band: Some(ZoneBand::Central),
    admin_code: "A182".into(),
    municipality_name: Some("ALESSANDRIA".into()),
    province_code: Some("AL".into()),
    description: Some("CENTRO".into()),
    geometry,
  }
}

fn quotation(key: &str, sem: &str, type_code: u32, state: &str, prevalent: bool) -> QuotationRecord {
  QuotationRecord {
    join_key:           JoinKey::parse(key).unwrap(),
    semester:           semester(sem),
    property_type_code: type_code,
    property_type_desc: Some("Abitazioni civili".into()),
    conservation_state: state.into(),
    is_prevalent:       prevalent,
    price_min:          Some(1050.0),
    price_max:          Some(1500.0),
    sale_surface:       Some(SurfaceBasis::Gross),
    rent_min:           Some(5.1),
    rent_max:           Some(7.0),
    rent_surface:       Some(SurfaceBasis::Net),
  }
}

// ─── Zones ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn zone_insert_is_idempotent() {
  let s = store().await;
  let batch = vec![
    zone("AL00000101", "2024_S2", square(8.60, 44.90, 0.01)),
    zone("AL00000102", "2024_S2", square(8.61, 44.90, 0.01)),
  ];

  let first = s.insert_zone_batch(batch.clone()).await.unwrap();
  assert_eq!(first.committed, 2);
  assert_eq!(first.ignored, 0);

  let second = s.insert_zone_batch(batch).await.unwrap();
  assert_eq!(second.committed, 0);
  assert_eq!(second.ignored, 2);
  assert_eq!(s.count_zones(semester("2024_S2")).await.unwrap(), 2);
}

#[tokio::test]
async fn first_write_wins_for_same_key() {
  let s = store().await;
  s.insert_zone_batch(vec![zone("AL00000101", "2024_S2", square(8.60, 44.90, 0.01))])
    .await
    .unwrap();
  // Same key, different geometry: ignored, original kept.
  s.insert_zone_batch(vec![zone("AL00000101", "2024_S2", square(9.0, 45.0, 0.01))])
    .await
    .unwrap();
  let hit = s.locate_zone(8.605, 44.905, semester("2024_S2"), 0.0).await.unwrap();
  assert_eq!(hit.unwrap().join_key.as_str(), "AL00000101");
}

#[tokio::test]
async fn malformed_record_rolls_back_alone() {
  let s = store().await;
  let batch = vec![
    zone("AL00000101", "2024_S2", square(8.60, 44.90, 0.01)),
    zone("AL00000102", "2024_S2", MultiPolygon::new(vec![])),
    zone("AL00000103", "2024_S2", square(8.62, 44.90, 0.01)),
  ];

  let outcome = s.insert_zone_batch(batch).await.unwrap();
  assert_eq!(outcome.committed, 2);
  assert_eq!(outcome.rolled_back.len(), 1);
  assert_eq!(outcome.rolled_back[0].label, "AL00000102@2024_S2");
  assert_eq!(s.count_zones(semester("2024_S2")).await.unwrap(), 2);
}

#[tokio::test]
async fn same_key_in_two_semesters_is_two_rows() {
  let s = store().await;
  s.insert_zone_batch(vec![
    zone("AL00000101", "2024_S1", square(8.60, 44.90, 0.01)),
    zone("AL00000101", "2024_S2", square(8.60, 44.90, 0.01)),
  ])
  .await
  .unwrap();
  assert_eq!(s.count_zones(semester("2024_S1")).await.unwrap(), 1);
  assert_eq!(s.count_zones(semester("2024_S2")).await.unwrap(), 1);
  assert_eq!(s.list_semesters().await.unwrap(), vec![semester("2024_S2"), semester("2024_S1")]);
}

// ─── Quotations ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn quotation_replace_is_rerunnable() {
  let s = store().await;
  let sem = semester("2024_S2");
  let rows = vec![
    quotation("AL00000101", "2024_S2", 20, "NORMALE", true),
    quotation("AL00000101", "2024_S2", 20, "OTTIMO", false),
    quotation("AL00000102", "2024_S2", 20, "NORMALE", true),
  ];

  let first = s.replace_quotations(sem, rows.clone()).await.unwrap();
  assert_eq!((first.deleted, first.inserted), (0, 3));
  let second = s.replace_quotations(sem, rows).await.unwrap();
  assert_eq!((second.deleted, second.inserted), (3, 3));
  assert_eq!(s.count_quotations(sem).await.unwrap(), 3);

  let key = JoinKey::parse("AL00000101").unwrap();
  let stored = s.quotations_for_zone(&key, sem).await.unwrap();
  assert_eq!(stored.len(), 2);
  assert_eq!(stored[0].conservation_state, "NORMALE");
  assert!(stored[0].is_prevalent);
  assert_eq!(stored[0].rent_min, Some(5.1));
  assert_eq!(stored[1].sale_surface, Some(SurfaceBasis::Gross));
}

#[tokio::test]
async fn failed_quotation_load_keeps_previous_rows() {
  let s = store().await;
  let sem = semester("2024_S2");
  s.replace_quotations(sem, vec![quotation("AL00000101", "2024_S2", 20, "NORMALE", true)])
    .await
    .unwrap();

  // Two prevalent rows for one zone and type violate the partial index.
  let bad = vec![
    quotation("AL00000101", "2024_S2", 20, "NORMALE", true),
    quotation("AL00000101", "2024_S2", 20, "OTTIMO", true),
  ];
  assert!(s.replace_quotations(sem, bad).await.is_err());
  assert_eq!(s.count_quotations(sem).await.unwrap(), 1);
}

#[tokio::test]
async fn quotations_of_another_semester_are_refused() {
  let s = store().await;
  let err = s
    .replace_quotations(semester("2024_S2"), vec![quotation("AL00000101", "2024_S1", 20, "NORMALE", false)])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::SemesterMismatch { .. }));
}

// ─── Semester predicates ─────────────────────────────────────────────────────

#[tokio::test]
async fn semester_complete_only_with_both_tables() {
  let s = store().await;
  let sem = semester("2024_S2");
  assert!(!s.is_semester_complete(sem).await.unwrap());

  s.insert_zone_batch(vec![zone("AL00000101", "2024_S2", square(8.60, 44.90, 0.01))])
    .await
    .unwrap();
  let presence = s.semester_presence(sem).await.unwrap();
  assert!(presence.zones && !presence.quotations);
  assert!(!s.is_semester_complete(sem).await.unwrap());
  assert!(s.complete_semesters().await.unwrap().is_empty());

  s.replace_quotations(sem, vec![quotation("AL00000101", "2024_S2", 20, "NORMALE", true)])
    .await
    .unwrap();
  assert!(s.is_semester_complete(sem).await.unwrap());
  assert!(s.complete_semesters().await.unwrap().contains(&sem));
  s.refresh_statistics().await.unwrap();
}

#[tokio::test]
async fn reset_empties_both_tables() {
  let s = store().await;
  let sem = semester("2024_S2");
  s.insert_zone_batch(vec![zone("AL00000101", "2024_S2", square(8.60, 44.90, 0.01))])
    .await
    .unwrap();
  s.replace_quotations(sem, vec![quotation("AL00000101", "2024_S2", 20, "NORMALE", true)])
    .await
    .unwrap();

  s.reset().await.unwrap();
  assert_eq!(s.count_zones(sem).await.unwrap(), 0);
  assert_eq!(s.count_quotations(sem).await.unwrap(), 0);
  assert!(s.list_semesters().await.unwrap().is_empty());
}

// ─── Spatial lookup ──────────────────────────────────────────────────────────

#[tokio::test]
async fn locate_exact_then_buffered() {
  let s = store().await;
  let sem = semester("2024_S2");
  s.insert_zone_batch(vec![
    zone("AL00000101", "2024_S2", square(8.60, 44.90, 0.01)),
    zone("AL00000102", "2024_S2", square(8.70, 44.90, 0.01)),
  ])
  .await
  .unwrap();

  let inside = s.locate_zone(8.705, 44.905, sem, 200.0).await.unwrap().unwrap();
  assert_eq!(inside.join_key.as_str(), "AL00000102");
  assert_eq!(inside.distance_m, None);
  assert_eq!(inside.band, Some(ZoneBand::Central));

  // Roughly 80 m east of the first square.
  let near = s.locate_zone(8.611, 44.905, sem, 200.0).await.unwrap().unwrap();
  assert_eq!(near.join_key.as_str(), "AL00000101");
  assert!(near.distance_m.unwrap() > 0.0);

  assert!(s.locate_zone(8.65, 44.905, sem, 200.0).await.unwrap().is_none());
  assert!(s.locate_zone(8.605, 44.905, semester("2023_S1"), 200.0).await.unwrap().is_none());
}
