//! Column layouts of the two tables.
//!
//! Columns are located by header name when the header carries it, and by
//! canonical position otherwise, so tables whose headers drifted over the
//! years still parse.

use csv::StringRecord;

/// A fixed table layout.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
  pub name:    &'static str,
  pub columns: &'static [&'static str],
}

impl TableSchema {
  /// Fields per row, not counting the empty field produced by a trailing
  /// delimiter.
  pub fn width(&self) -> usize { self.columns.len() }

  fn position(&self, column: &str) -> usize {
    self
      .columns
      .iter()
      .position(|c| *c == column)
      .unwrap_or(usize::MAX)
  }
}

/// Price quotation table (`*_VALORI.csv`): 21 fields plus the trailing
/// empty one.
pub const QUOTATIONS: TableSchema = TableSchema {
  name:    "quotations",
  columns: &[
    "Area_territoriale",
    "Regione",
    "Prov",
    "Comune_ISTAT",
    "Comune_cat",
    "Sez",
    "Comune_amm",
    "Comune_descrizione",
    "Fascia",
    "Zona",
    "LinkZona",
    "Cod_Tip",
    "Descr_Tipologia",
    "Stato",
    "Stato_prev",
    "Compr_min",
    "Compr_max",
    "Sup_NL_compr",
    "Loc_min",
    "Loc_max",
    "Sup_NL_loc",
  ],
};

/// Zone description table (`*_ZONE.csv`): 16 fields.
pub const ZONES: TableSchema = TableSchema {
  name:    "zones",
  columns: &[
    "Area_territoriale",
    "Regione",
    "Prov",
    "Comune_ISTAT",
    "Comune_cat",
    "Sez",
    "Comune_amm",
    "Comune_descrizione",
    "Fascia",
    "Zona_Descr",
    "Zona",
    "LinkZona",
    "Cod_tip_prev",
    "Descr_tip_prev",
    "Stato_prev",
    "Microzona",
  ],
};

/// Resolved field index for each schema column.
#[derive(Debug)]
pub struct ColumnMap {
  schema:  TableSchema,
  indices: Vec<usize>,
  /// Columns that had to fall back to their canonical position.
  pub positional: Vec<&'static str>,
}

impl ColumnMap {
  pub fn from_header(schema: TableSchema, header: &StringRecord) -> Self {
    let mut positional = Vec::new();
    let indices = schema
      .columns
      .iter()
      .enumerate()
      .map(|(canonical, column)| {
        header
          .iter()
          .position(|h| h.trim().eq_ignore_ascii_case(column))
          .unwrap_or_else(|| {
            positional.push(*column);
            canonical
          })
      })
      .collect();
    Self { schema, indices, positional }
  }

  /// The field for `column`, trimmed; empty when absent.
  pub fn field<'r>(&self, record: &'r StringRecord, column: &str) -> &'r str {
    self
      .indices
      .get(self.schema.position(column))
      .and_then(|&idx| record.get(idx))
      .map(str::trim)
      .unwrap_or("")
  }

  /// Whether `record` has the schema's width once trailing empty fields,
  /// the residue of a trailing delimiter, are discarded.
  pub fn width_ok(&self, record: &StringRecord) -> bool {
    let width = self.schema.width();
    match record.len() {
      n if n == width => true,
      n if n > width => record.iter().skip(width).all(|f| f.trim().is_empty()),
      _ => false,
    }
  }
}
