//! Row-level decoding of the two tables.
//!
//! Pipeline:
//!   raw bytes
//!     └─ decode_table()        → text (UTF-8, else Windows-1252)
//!          └─ drop title line  → header + data lines
//!               └─ read_rows()     → StringRecord per data line
//!                    └─ quotation_row() / zone_row() → typed record or SkipReason

use std::collections::HashSet;

use csv::{ReaderBuilder, StringRecord, Trim};
use omi_core::{
  JoinKey, Semester,
  quotation::{QuotationRecord, SurfaceBasis, dedup_quotations},
  zone::{PrevalentType, ZoneBand, ZoneDescriptor},
};

use crate::{
  ParsedTable, SkipReason, SkipTally,
  decode::decode_table,
  error::{Error, Result},
  schema::{ColumnMap, QUOTATIONS, TableSchema, ZONES},
};

// ─── Field helpers ───────────────────────────────────────────────────────────

/// Parse a decimal that may use a comma separator. Empty input is `None`.
///
/// `"5,1"` → `5.1`, `"540"` → `540.0`.
pub fn parse_decimal(raw: &str) -> Result<Option<f64>, ()> {
  let raw = raw.trim();
  if raw.is_empty() {
    return Ok(None);
  }
  let value: f64 = raw.replace(',', ".").parse().map_err(|_| ())?;
  if value.is_finite() { Ok(Some(value)) } else { Err(()) }
}

fn parse_code(raw: &str) -> Result<Option<u32>, ()> {
  let raw = raw.trim();
  if raw.is_empty() {
    return Ok(None);
  }
  if let Ok(n) = raw.parse::<u32>() {
    return Ok(Some(n));
  }
  // Some vintages export integer codes as "20.0" / "20,0".
  match parse_decimal(raw)? {
    Some(v) if v >= 0.0 && v.fract() == 0.0 && v <= f64::from(u32::MAX) => Ok(Some(v as u32)),
    _ => Err(()),
  }
}

fn non_empty(s: &str) -> Option<String> { (!s.is_empty()).then(|| s.to_owned()) }

/// Strip the single quotes some vintages wrap descriptions in.
fn unquote(s: &str) -> &str { s.trim().trim_matches('\'').trim() }

// ─── Table reader ────────────────────────────────────────────────────────────

/// Decode `bytes`, skip the title line, and hand every data row to `row`.
fn read_rows<T>(
  bytes: &[u8],
  schema: TableSchema,
  mut row: impl FnMut(&ColumnMap, &StringRecord) -> Result<T, SkipReason>,
) -> Result<(Vec<T>, SkipTally, crate::SourceEncoding)> {
  let (text, encoding) = decode_table(bytes);
  let body = skip_title(&text).ok_or(Error::MissingHeader)?;

  let mut reader = ReaderBuilder::new()
    .delimiter(b';')
    .has_headers(true)
    .flexible(true)
    .trim(Trim::All)
    .from_reader(body.as_bytes());

  let header = reader.headers()?.clone();
  if header.iter().all(|h| h.is_empty()) {
    return Err(Error::MissingHeader);
  }
  let columns = ColumnMap::from_header(schema, &header);
  if !columns.positional.is_empty() {
    tracing::debug!(
      table = schema.name,
      columns = ?columns.positional,
      "header lacks expected names; using canonical positions"
    );
  }

  let mut records = Vec::new();
  let mut skipped = SkipTally::default();

  for result in reader.records() {
    let record = match result {
      Ok(r) => r,
      Err(e) => {
        tracing::debug!(table = schema.name, error = %e, "unreadable row");
        skipped.add(SkipReason::Unreadable);
        continue;
      }
    };
    if record.iter().all(str::is_empty) {
      continue;
    }
    if !columns.width_ok(&record) {
      skipped.add(SkipReason::WrongWidth);
      continue;
    }
    match row(&columns, &record) {
      Ok(r) => records.push(r),
      Err(reason) => {
        tracing::trace!(
          table = schema.name,
          line = record.position().map(|p| p.line()),
          ?reason,
          "row skipped"
        );
        skipped.add(reason);
      }
    }
  }

  Ok((records, skipped, encoding))
}

/// Everything after the descriptive title line. A file that starts straight
/// with the header is taken as-is.
fn skip_title(text: &str) -> Option<&str> {
  let (first, rest) = text.split_once('\n')?;
  if first.to_ascii_lowercase().contains("linkzona") { Some(text) } else { Some(rest) }
}

fn join_key(columns: &ColumnMap, record: &StringRecord) -> Result<JoinKey, SkipReason> {
  JoinKey::parse(columns.field(record, "LinkZona")).map_err(|_| SkipReason::InvalidJoinKey)
}

fn decimal(
  columns: &ColumnMap,
  record: &StringRecord,
  column: &'static str,
) -> Result<Option<f64>, SkipReason> {
  parse_decimal(columns.field(record, column)).map_err(|()| SkipReason::MalformedNumber(column))
}

// ─── Quotations ──────────────────────────────────────────────────────────────

fn quotation_row(
  columns: &ColumnMap,
  record: &StringRecord,
  semester: Semester,
) -> Result<QuotationRecord, SkipReason> {
  let join_key = join_key(columns, record)?;
  let property_type_code = parse_code(columns.field(record, "Cod_Tip"))
    .map_err(|()| SkipReason::MalformedNumber("Cod_Tip"))?
    .ok_or(SkipReason::MissingField("Cod_Tip"))?;
  let conservation_state =
    non_empty(columns.field(record, "Stato")).ok_or(SkipReason::MissingField("Stato"))?;

  Ok(QuotationRecord {
    join_key,
    semester,
    property_type_code,
    property_type_desc: non_empty(columns.field(record, "Descr_Tipologia")),
    conservation_state,
    is_prevalent: columns.field(record, "Stato_prev").eq_ignore_ascii_case("P"),
    price_min: decimal(columns, record, "Compr_min")?,
    price_max: decimal(columns, record, "Compr_max")?,
    sale_surface: SurfaceBasis::from_code(columns.field(record, "Sup_NL_compr")),
    rent_min: decimal(columns, record, "Loc_min")?,
    rent_max: decimal(columns, record, "Loc_max")?,
    rent_surface: SurfaceBasis::from_code(columns.field(record, "Sup_NL_loc")),
  })
}

/// Parse a quotation table for `semester`. Rows are deduplicated on their
/// natural key; extra prevalence markers are cleared.
pub fn parse_quotations(bytes: &[u8], semester: Semester) -> Result<ParsedTable<QuotationRecord>> {
  let (rows, mut skipped, encoding) =
    read_rows(bytes, QUOTATIONS, |columns, record| quotation_row(columns, record, semester))?;

  let (records, stats) = dedup_quotations(rows);
  skipped.add_n(SkipReason::Duplicate, stats.duplicates);

  tracing::debug!(
    %semester,
    rows = records.len(),
    skipped = skipped.total(),
    "parsed quotation table"
  );

  Ok(ParsedTable { records, skipped, encoding, demoted_prevalent: stats.demoted_prevalent })
}

// ─── Zone descriptors ────────────────────────────────────────────────────────

fn zone_row(columns: &ColumnMap, record: &StringRecord) -> Result<ZoneDescriptor, SkipReason> {
  let join_key = join_key(columns, record)?;
  let admin_code =
    non_empty(columns.field(record, "Comune_amm")).ok_or(SkipReason::MissingField("Comune_amm"))?;
  let zone_code = non_empty(columns.field(record, "Zona")).ok_or(SkipReason::MissingField("Zona"))?;

  let prevalent_type = PrevalentType {
    type_code:          parse_code(columns.field(record, "Cod_tip_prev"))
      .map_err(|()| SkipReason::MalformedNumber("Cod_tip_prev"))?,
    type_description:   non_empty(columns.field(record, "Descr_tip_prev")),
    conservation_state: non_empty(columns.field(record, "Stato_prev")),
  };
  let has_prevalent = prevalent_type.type_code.is_some()
    || prevalent_type.type_description.is_some()
    || prevalent_type.conservation_state.is_some();

  Ok(ZoneDescriptor {
    join_key,
    admin_code,
    zone_code,
    band: ZoneBand::from_code(columns.field(record, "Fascia")),
    province_code: non_empty(columns.field(record, "Prov")),
    municipality_istat: non_empty(columns.field(record, "Comune_ISTAT")),
    municipality_name: non_empty(columns.field(record, "Comune_descrizione")),
    description: non_empty(unquote(columns.field(record, "Zona_Descr"))),
    prevalent_type: has_prevalent.then_some(prevalent_type),
    microzone: parse_code(columns.field(record, "Microzona"))
      .map_err(|()| SkipReason::MalformedNumber("Microzona"))?,
  })
}

/// Parse a zone-description table. Rows are deduplicated on join key.
pub fn parse_zones(bytes: &[u8]) -> Result<ParsedTable<ZoneDescriptor>> {
  let (rows, mut skipped, encoding) = read_rows(bytes, ZONES, zone_row)?;

  let mut seen = HashSet::with_capacity(rows.len());
  let mut records = Vec::with_capacity(rows.len());
  for row in rows {
    if seen.insert(row.join_key.clone()) {
      records.push(row);
    } else {
      skipped.add(SkipReason::Duplicate);
    }
  }

  tracing::debug!(rows = records.len(), skipped = skipped.total(), "parsed zone table");

  Ok(ParsedTable { records, skipped, encoding, demoted_prevalent: 0 })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;
  use crate::SourceEncoding;

  const VALORI_HEADER: &str = "Area_territoriale;Regione;Prov;Comune_ISTAT;Comune_cat;Sez;\
    Comune_amm;Comune_descrizione;Fascia;Zona;LinkZona;Cod_Tip;Descr_Tipologia;Stato;\
    Stato_prev;Compr_min;Compr_max;Sup_NL_compr;Loc_min;Loc_max;Sup_NL_loc;";

  const ZONE_HEADER: &str = "Area_territoriale;Regione;Prov;Comune_ISTAT;Comune_cat;Sez;\
    Comune_amm;Comune_descrizione;Fascia;Zona_Descr;Zona;LinkZona;Cod_tip_prev;\
    Descr_tip_prev;Stato_prev;Microzona;";

  fn valori_line(key: &str, type_code: &str, state: &str, prev: &str, price_min: &str) -> String {
    format!(
      "NORD-OVEST;PIEMONTE;AL;6003;A182;;A182;ALESSANDRIA;B;B01;{key};{type_code};\
       Abitazioni civili;{state};{prev};{price_min};1500;L;5,1;7,2;N;"
    )
  }

  fn valori(lines: &[String]) -> Vec<u8> {
    let mut out = format!("Quotazioni OMI 2024/2\n{VALORI_HEADER}\n");
    for l in lines {
      out.push_str(l);
      out.push('\n');
    }
    out.into_bytes()
  }

  fn semester() -> Semester { "2024_S2".parse().unwrap() }

  #[test]
  fn decimal_normalization() {
    assert_eq!(parse_decimal("5,1"), Ok(Some(5.1)));
    assert_eq!(parse_decimal("540"), Ok(Some(540.0)));
    assert_eq!(parse_decimal(" 1200,50 "), Ok(Some(1200.5)));
    assert_eq!(parse_decimal(""), Ok(None));
    assert_eq!(parse_decimal("n.d."), Err(()));
    assert_eq!(parse_decimal("inf"), Err(()));
  }

  #[test]
  fn code_parsing() {
    assert_eq!(parse_code("20"), Ok(Some(20)));
    assert_eq!(parse_code("20.0"), Ok(Some(20)));
    assert_eq!(parse_code(""), Ok(None));
    assert_eq!(parse_code("2.5"), Err(()));
    assert_eq!(parse_code("-1"), Err(()));
  }

  #[test]
  fn parses_quotation_rows() {
    let bytes = valori(&[valori_line("AL00000101", "20", "NORMALE", "P", "1000")]);
    let parsed = parse_quotations(&bytes, semester()).unwrap();
    assert_eq!(parsed.encoding, SourceEncoding::Utf8);
    assert_eq!(parsed.records.len(), 1);
    assert_eq!(parsed.skipped.total(), 0);

    let q = &parsed.records[0];
    assert_eq!(q.join_key.as_str(), "AL00000101");
    assert_eq!(q.semester, semester());
    assert_eq!(q.property_type_code, 20);
    assert_eq!(q.property_type_desc.as_deref(), Some("Abitazioni civili"));
    assert_eq!(q.conservation_state, "NORMALE");
    assert!(q.is_prevalent);
    assert_eq!(q.price_min, Some(1000.0));
    assert_eq!(q.price_max, Some(1500.0));
    assert_eq!(q.sale_surface, Some(SurfaceBasis::Gross));
    assert_eq!(q.rent_min, Some(5.1));
    assert_eq!(q.rent_max, Some(7.2));
    assert_eq!(q.rent_surface, Some(SurfaceBasis::Net));
  }

  #[test]
  fn bad_rows_are_counted_not_fatal() {
    let bytes = valori(&[
      valori_line("AL00000101", "20", "NORMALE", "P", "1000"),
      valori_line("AL0000010", "20", "NORMALE", "", "1000"),
      valori_line("AL00000102", "20", "NORMALE", "", "mille"),
      valori_line("AL00000103", "", "NORMALE", "", "1000"),
      valori_line("AL00000104", "20", "", "", "1000"),
      "too;few;fields".to_owned(),
      valori_line("AL00000105", "20", "OTTIMO", "", ""),
    ]);
    let parsed = parse_quotations(&bytes, semester()).unwrap();
    assert_eq!(parsed.records.len(), 2);
    assert_eq!(parsed.skipped.get(SkipReason::InvalidJoinKey), 1);
    assert_eq!(parsed.skipped.get(SkipReason::MalformedNumber("Compr_min")), 1);
    assert_eq!(parsed.skipped.get(SkipReason::MissingField("Cod_Tip")), 1);
    assert_eq!(parsed.skipped.get(SkipReason::MissingField("Stato")), 1);
    assert_eq!(parsed.skipped.get(SkipReason::WrongWidth), 1);
    assert_eq!(parsed.skipped.total(), 5);
    assert_eq!(parsed.records[1].price_min, None);
  }

  #[test]
  fn duplicates_are_dropped_before_emission() {
    let line = valori_line("AL00000101", "20", "NORMALE", "P", "1000");
    let bytes = valori(&[line.clone(), line, valori_line("AL00000101", "20", "OTTIMO", "P", "1")]);
    let parsed = parse_quotations(&bytes, semester()).unwrap();
    assert_eq!(parsed.records.len(), 2);
    assert_eq!(parsed.skipped.get(SkipReason::Duplicate), 1);
    assert_eq!(parsed.demoted_prevalent, 1);
    assert_eq!(parsed.records.iter().filter(|q| q.is_prevalent).count(), 1);
  }

  #[test]
  fn latin1_table_is_decoded() {
    let mut bytes = b"Quotazioni\n".to_vec();
    bytes.extend_from_slice(ZONE_HEADER.as_bytes());
    bytes.extend_from_slice(
      b"\nNORD-EST;EMILIA-ROMAGNA;FC;40012;D704;;D704;FORL\xCC;B;'CENTRO STORICO';B1;\
        FC00000001;20;Abitazioni civili;NORMALE;1;\n",
    );
    let parsed = parse_zones(&bytes).unwrap();
    assert_eq!(parsed.encoding, SourceEncoding::Latin1);
    assert_eq!(parsed.records.len(), 1);
    let z = &parsed.records[0];
    assert_eq!(z.municipality_name.as_deref(), Some("FORLÌ"));
    assert_eq!(z.description.as_deref(), Some("CENTRO STORICO"));
    assert_eq!(z.band, Some(ZoneBand::Central));
    assert_eq!(z.admin_code, "D704");
    assert_eq!(z.zone_code, "B1");
    assert_eq!(z.microzone, Some(1));
    let prevalent = z.prevalent_type.as_ref().unwrap();
    assert_eq!(prevalent.type_code, Some(20));
    assert_eq!(prevalent.conservation_state.as_deref(), Some("NORMALE"));
  }

  #[test]
  fn zone_table_dedups_on_join_key() {
    let line = "NORD-OVEST;PIEMONTE;AL;6003;A182;;A182;ALESSANDRIA;B;'Centro';B01;\
                AL00000101;20;Abitazioni civili;NORMALE;1;";
    let text = format!("title\n{ZONE_HEADER}\n{line}\n{line}\n");
    let parsed = parse_zones(text.as_bytes()).unwrap();
    assert_eq!(parsed.records.len(), 1);
    assert_eq!(parsed.skipped.get(SkipReason::Duplicate), 1);
  }

  #[test]
  fn header_only_file_is_empty_not_an_error() {
    let text = format!("title\n{ZONE_HEADER}\n");
    let parsed = parse_zones(text.as_bytes()).unwrap();
    assert!(parsed.records.is_empty());
  }

  #[test]
  fn file_without_header_is_an_error() {
    assert!(matches!(parse_zones(b"only a title"), Err(Error::MissingHeader)));
  }
}
