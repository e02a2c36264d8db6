//! The two write protocols, driven against any [`ZoneStore`].

use omi_core::{
  Semester,
  batch::BatchOutcome,
  quotation::{DedupStats, QuotationRecord, dedup_quotations},
  store::{QuotationLoad, ZoneStore},
  zone::ZoneRecord,
};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Write `zones` in batches of `batch_size`, accumulating into `total`.
///
/// Rolled-back records are reported in the outcome; a store error stops the
/// load and is returned, leaving the batches already written in `total`.
/// Every record of a finished batch is counted in `total`, so a caller can
/// resume at `total.attempted()`.
pub async fn load_zones<S: ZoneStore>(
  store: &S,
  zones: &[ZoneRecord],
  batch_size: usize,
  total: &mut BatchOutcome,
) -> Result<()> {
  for (n, chunk) in zones.chunks(batch_size.max(1)).enumerate() {
    let outcome = store.insert_zone_batch(chunk.to_vec()).await.map_err(Error::store)?;
    for rb in &outcome.rolled_back {
      warn!(record = %rb.label, reason = %rb.reason, "zone record rolled back");
    }
    debug!(batch = n, committed = outcome.committed, ignored = outcome.ignored, "zone batch done");
    total.merge(outcome);
  }
  Ok(())
}

/// Replace every quotation of `semester` with `rows`, deduplicated on the
/// natural key first.
pub async fn load_quotations<S: ZoneStore>(
  store: &S,
  semester: Semester,
  rows: Vec<QuotationRecord>,
) -> Result<(QuotationLoad, DedupStats)> {
  let (rows, stats) = dedup_quotations(rows);
  if stats.duplicates > 0 || stats.demoted_prevalent > 0 {
    debug!(
      %semester,
      duplicates = stats.duplicates,
      demoted = stats.demoted_prevalent,
      "quotations deduplicated before load"
    );
  }
  let load = store.replace_quotations(semester, rows).await.map_err(Error::store)?;
  Ok((load, stats))
}
