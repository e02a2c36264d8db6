//! Partial-failure batch writes.
//!
//! A zone batch runs every record inside its own sub-transaction. The result
//! of a batch is a plain value, so the rollback bookkeeping can be exercised
//! without provoking a real storage fault.

/// What happened to one record that reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowWrite {
  Inserted,
  /// A row with the same unique key already existed.
  Ignored,
}

/// Why a single record could not be written.
#[derive(Debug)]
pub enum RecordFault<E> {
  /// Only this record is affected; its sub-transaction was rolled back.
  Record(String),
  /// The batch cannot continue.
  Fatal(E),
}

/// A record whose effect was rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolledBack {
  pub label:  String,
  pub reason: String,
}

/// Outcome of one or more batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
  pub committed:   usize,
  pub ignored:     usize,
  pub rolled_back: Vec<RolledBack>,
}

impl BatchOutcome {
  pub fn attempted(&self) -> usize { self.committed + self.ignored + self.rolled_back.len() }

  pub fn merge(&mut self, other: BatchOutcome) {
    self.committed += other.committed;
    self.ignored += other.ignored;
    self.rolled_back.extend(other.rolled_back);
  }
}

/// Something that can be named in a rollback report.
pub trait BatchRecord {
  fn label(&self) -> String;
}

impl BatchRecord for crate::zone::ZoneRecord {
  fn label(&self) -> String { format!("{}@{}", self.join_key, self.semester) }
}

/// Drive `write` over `records`, collecting per-record outcomes.
///
/// A [`RecordFault::Record`] is tallied and the loop moves on; a
/// [`RecordFault::Fatal`] stops the batch and is returned as `Err`.
pub fn apply_batch<T, E, F>(records: &[T], mut write: F) -> Result<BatchOutcome, E>
where
  T: BatchRecord,
  F: FnMut(&T) -> Result<RowWrite, RecordFault<E>>,
{
  let mut outcome = BatchOutcome::default();
  for record in records {
    match write(record) {
      Ok(RowWrite::Inserted) => outcome.committed += 1,
      Ok(RowWrite::Ignored) => outcome.ignored += 1,
      Err(RecordFault::Record(reason)) => {
        outcome.rolled_back.push(RolledBack { label: record.label(), reason });
      }
      Err(RecordFault::Fatal(e)) => return Err(e),
    }
  }
  Ok(outcome)
}
