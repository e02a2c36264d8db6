//! [`SqliteStore`], the SQLite implementation of [`ZoneStore`].

use std::{collections::BTreeSet, path::Path};

use chrono::Utc;
use omi_core::{
  JoinKey, Semester,
  batch::{BatchOutcome, RecordFault, RowWrite, apply_batch},
  quotation::QuotationRecord,
  store::{QuotationLoad, SemesterPresence, ZoneMatch, ZoneStore},
  zone::ZoneRecord,
};
use tracing::debug;

use crate::{
  Error, Result,
  encode::{RawQuotation, RawZoneCandidate, ZoneRow, encode_dt, encode_surface},
  locate::{best_match, degree_span},
  schema::SCHEMA,
};

const INSERT_ZONE: &str = "
  INSERT INTO zones (
    join_key, semester, zone_code, band, admin_code, municipality_name,
    province_code, description, geometry_json, ring_count,
    min_lon, min_lat, max_lon, max_lat, loaded_at
  ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
  ON CONFLICT (join_key, semester) DO NOTHING";

const INSERT_QUOTATION: &str = "
  INSERT INTO quotations (
    join_key, semester, property_type_code, property_type_desc,
    conservation_state, is_prevalent, price_min, price_max, sale_surface,
    rent_min, rent_max, rent_surface, loaded_at
  ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

const SELECT_QUOTATION: &str = "
  SELECT join_key, semester, property_type_code, property_type_desc,
         conservation_state, is_prevalent, price_min, price_max, sale_surface,
         rent_min, rent_max, rent_surface
  FROM quotations";

/// Errors that roll back one record instead of the whole batch.
fn is_record_fault(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
  )
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// An OMI zone store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// All quotations of one zone in one semester, ordered by property type
  /// and conservation state.
  pub async fn quotations_for_zone(
    &self,
    join_key: &JoinKey,
    semester: Semester,
  ) -> Result<Vec<QuotationRecord>> {
    let key = join_key.to_string();
    let sem = semester.to_string();

    let raws: Vec<RawQuotation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "{SELECT_QUOTATION} WHERE join_key = ?1 AND semester = ?2
           ORDER BY property_type_code, conservation_state"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![key, sem], RawQuotation::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawQuotation::into_record).collect()
  }

  async fn distinct_semesters(&self, sql: &'static str) -> Result<Vec<Semester>> {
    let raw: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
          .query_map([], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    raw.iter().map(|s| s.parse::<Semester>().map_err(Error::from)).collect()
  }

  async fn count(&self, table: &'static str, semester: Semester) -> Result<usize> {
    let sem = semester.to_string();
    let n: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          &format!("SELECT COUNT(*) FROM {table} WHERE semester = ?1"),
          [sem],
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(usize::try_from(n).unwrap_or_default())
  }
}

// ─── ZoneStore impl ──────────────────────────────────────────────────────────

impl ZoneStore for SqliteStore {
  type Error = Error;

  // ── Writes ────────────────────────────────────────────────────────────────

  async fn insert_zone_batch(&self, batch: Vec<ZoneRecord>) -> Result<BatchOutcome> {
    let loaded_at = encode_dt(Utc::now());

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let outcome = {
          let mut stmt = tx.prepare_cached(INSERT_ZONE)?;
          apply_batch(&batch, |zone| -> Result<RowWrite, RecordFault<rusqlite::Error>> {
            let row = ZoneRow::encode(zone).map_err(|e| RecordFault::Record(e.to_string()))?;
            let (min_lon, min_lat, max_lon, max_lat) = match row.bbox {
              Some((a, b, c, d)) => (Some(a), Some(b), Some(c), Some(d)),
              None => (None, None, None, None),
            };

            tx.execute_batch("SAVEPOINT zone_record").map_err(RecordFault::Fatal)?;
            let written = stmt.execute(rusqlite::params![
              row.join_key,
              row.semester,
              row.zone_code,
              row.band,
              row.admin_code,
              row.municipality_name,
              row.province_code,
              row.description,
              row.geometry_json,
              row.ring_count,
              min_lon,
              min_lat,
              max_lon,
              max_lat,
              loaded_at,
            ]);

            match written {
              Ok(changed) => {
                tx.execute_batch("RELEASE zone_record").map_err(RecordFault::Fatal)?;
                Ok(if changed == 0 { RowWrite::Ignored } else { RowWrite::Inserted })
              }
              Err(e) if is_record_fault(&e) => {
                tx.execute_batch("ROLLBACK TO zone_record; RELEASE zone_record")
                  .map_err(RecordFault::Fatal)?;
                Err(RecordFault::Record(e.to_string()))
              }
              Err(e) => Err(RecordFault::Fatal(e)),
            }
          })?
        };
        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    debug!(
      committed = outcome.committed,
      ignored = outcome.ignored,
      rolled_back = outcome.rolled_back.len(),
      "zone batch written"
    );
    Ok(outcome)
  }

  async fn replace_quotations(
    &self,
    semester: Semester,
    rows: Vec<QuotationRecord>,
  ) -> Result<QuotationLoad> {
    if let Some(stray) = rows.iter().find(|r| r.semester != semester) {
      return Err(Error::SemesterMismatch { expected: semester, found: stray.semester });
    }
    let sem = semester.to_string();
    let loaded_at = encode_dt(Utc::now());

    let load = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let deleted = tx.execute("DELETE FROM quotations WHERE semester = ?1", [&sem])?;
        let mut inserted = 0;
        {
          let mut stmt = tx.prepare_cached(INSERT_QUOTATION)?;
          for r in &rows {
            inserted += stmt.execute(rusqlite::params![
              r.join_key.as_str(),
              sem,
              r.property_type_code,
              r.property_type_desc,
              r.conservation_state,
              r.is_prevalent,
              r.price_min,
              r.price_max,
              encode_surface(r.sale_surface),
              r.rent_min,
              r.rent_max,
              encode_surface(r.rent_surface),
              loaded_at,
            ])?;
          }
        }
        tx.commit()?;
        Ok(QuotationLoad { deleted, inserted })
      })
      .await?;

    debug!(%semester, deleted = load.deleted, inserted = load.inserted, "quotations replaced");
    Ok(load)
  }

  async fn refresh_statistics(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch("ANALYZE zones; ANALYZE quotations;")?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn reset(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        let tx = conn.transaction()?;
        tx.execute_batch("DELETE FROM zones; DELETE FROM quotations;")?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn semester_presence(&self, semester: Semester) -> Result<SemesterPresence> {
    let sem = semester.to_string();
    let presence = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT EXISTS (SELECT 1 FROM zones      WHERE semester = ?1),
                  EXISTS (SELECT 1 FROM quotations WHERE semester = ?1)",
          [sem],
          |r| Ok(SemesterPresence { zones: r.get(0)?, quotations: r.get(1)? }),
        )?)
      })
      .await?;
    Ok(presence)
  }

  async fn complete_semesters(&self) -> Result<BTreeSet<Semester>> {
    let semesters = self
      .distinct_semesters(
        "SELECT DISTINCT semester FROM zones
         WHERE semester IN (SELECT DISTINCT semester FROM quotations)",
      )
      .await?;
    Ok(semesters.into_iter().collect())
  }

  async fn list_semesters(&self) -> Result<Vec<Semester>> {
    let mut semesters = self.distinct_semesters("SELECT DISTINCT semester FROM zones").await?;
    semesters.sort_unstable_by(|a, b| b.cmp(a));
    Ok(semesters)
  }

  async fn count_zones(&self, semester: Semester) -> Result<usize> {
    self.count("zones", semester).await
  }

  async fn count_quotations(&self, semester: Semester) -> Result<usize> {
    self.count("quotations", semester).await
  }

  async fn locate_zone(
    &self,
    lon: f64,
    lat: f64,
    semester: Semester,
    buffer_m: f64,
  ) -> Result<Option<ZoneMatch>> {
    let sem = semester.to_string();
    let (dlat, dlon) = degree_span(buffer_m.max(0.0), lat);

    let raws: Vec<RawZoneCandidate> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT join_key, semester, zone_code, band, municipality_name,
                  description, geometry_json
           FROM zones
           WHERE semester = ?1
             AND min_lon <= ?2 + ?5 AND max_lon >= ?2 - ?5
             AND min_lat <= ?3 + ?4 AND max_lat >= ?3 - ?4
           ORDER BY join_key",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![sem, lon, lat, dlat, dlon], |r| {
            Ok(RawZoneCandidate {
              join_key:          r.get(0)?,
              semester:          r.get(1)?,
              zone_code:         r.get(2)?,
              band:              r.get(3)?,
              municipality_name: r.get(4)?,
              description:       r.get(5)?,
              geometry_json:     r.get(6)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let candidates = raws.into_iter().map(RawZoneCandidate::decode).collect::<Result<Vec<_>>>()?;
    Ok(best_match(lon, lat, buffer_m, candidates))
  }
}
