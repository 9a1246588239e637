//! CSV decoding for product imports.
//!
//! Column names are fixed and matched case-insensitively after trimming:
//! `sku`, `name`, `description`, `price` and `is_active` (alias `active`).
//! Unknown columns are ignored.

use std::io::Read;
use std::str::FromStr;

use csv::{ByteRecord, ErrorKind, ReaderBuilder, StringRecord};
use rust_decimal::Decimal;

use bulkimport_core::DomainError;
use bulkimport_products::ProductDraft;

/// Why a row (or the whole file) could not be imported.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportError {
    /// The file cannot be processed any further; the job fails with this
    /// message.
    #[error("{0}")]
    Fatal(String),
    /// One data row is invalid; it is skipped and the import continues.
    #[error("row {line}: {source}")]
    Row { line: u64, source: DomainError },
}

impl ImportError {
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ImportError::Fatal(_))
    }
}

/// Map a `csv` error onto a fatal import error.
pub fn fatal_csv_error(err: csv::Error) -> ImportError {
    let line = err.position().map(|p| p.line());
    match err.kind() {
        ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => ImportError::fatal(format!(
            "Malformed CSV at line {}: expected {expected_len} fields, found {len}",
            line.unwrap_or_default()
        )),
        ErrorKind::Utf8 { .. } => ImportError::fatal(format!(
            "CSV is not valid UTF-8 (line {})",
            line.unwrap_or_default()
        )),
        _ => ImportError::fatal(format!("Malformed CSV: {err}")),
    }
}

/// Strict reader: every record must have the header's field count. The
/// `csv` reader buffers internally, so a plain `File` streams fine.
pub fn strict_reader<R: Read>(source: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(source)
}

/// Count data rows (header excluded) with a tolerant reader, so rows with
/// the wrong field count are still counted.
pub fn count_rows<R: Read>(source: R) -> Result<u64, ImportError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(source);

    let mut record = ByteRecord::new();
    let mut rows = 0u64;
    while reader.read_byte_record(&mut record).map_err(fatal_csv_error)? {
        rows += 1;
    }
    Ok(rows)
}

/// `true` for `1/true/yes/active` (any case), and when the cell is empty.
pub fn parse_bool(raw: &str) -> bool {
    let value = raw.trim();
    if value.is_empty() {
        return true;
    }
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "active"
    )
}

/// Lenient price: anything that does not parse as a number imports as "no
/// price". Negative or out-of-range values still reach draft validation and
/// skip the row.
fn lenient_price(raw: &str) -> Option<Decimal> {
    let value = raw.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("null") {
        return None;
    }
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
}

/// Positions of the known columns in the header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    sku: usize,
    name: usize,
    description: Option<usize>,
    price: Option<usize>,
    is_active: Option<usize>,
}

impl ColumnMap {
    pub fn from_headers(headers: &StringRecord) -> Result<Self, ImportError> {
        let find = |wanted: &[&str]| {
            headers.iter().position(|h| {
                let h = h.trim().trim_start_matches('\u{feff}').to_ascii_lowercase();
                wanted.contains(&h.as_str())
            })
        };

        let sku = find(&["sku"])
            .ok_or_else(|| ImportError::fatal("CSV is missing required column 'sku'"))?;
        let name = find(&["name"])
            .ok_or_else(|| ImportError::fatal("CSV is missing required column 'name'"))?;

        Ok(Self {
            sku,
            name,
            description: find(&["description"]),
            price: find(&["price"]),
            is_active: find(&["is_active", "active"]),
        })
    }

    /// Build a validated draft from one record. `line` is used for error
    /// messages only.
    pub fn decode(&self, record: &StringRecord, line: u64) -> Result<ProductDraft, ImportError> {
        let cell = |idx: usize| record.get(idx).unwrap_or("");
        let optional = |idx: Option<usize>| idx.map(cell).unwrap_or("");

        let description = Some(optional(self.description).to_string());
        let price = lenient_price(optional(self.price));
        let is_active = parse_bool(optional(self.is_active));

        ProductDraft::new(cell(self.sku), cell(self.name), description, price, is_active)
            .map_err(|source| ImportError::Row { line, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn record(line: &str) -> StringRecord {
        StringRecord::from(line.split(',').collect::<Vec<_>>())
    }

    #[test]
    fn header_matching_is_case_insensitive_with_alias() {
        let map = ColumnMap::from_headers(&record(" SKU ,Name,Active,extra")).unwrap();
        let draft = map.decode(&record("A-1,Widget,no,ignored"), 2).unwrap();

        assert_eq!(draft.sku, "A-1");
        assert_eq!(draft.name, "Widget");
        assert!(!draft.is_active);
        assert!(draft.price.is_none());
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let err = ColumnMap::from_headers(&record("sku,description")).unwrap_err();
        assert_eq!(err, ImportError::fatal("CSV is missing required column 'name'"));
    }

    #[test]
    fn row_without_name_is_a_row_error() {
        let map = ColumnMap::from_headers(&record("sku,name")).unwrap();
        let err = map.decode(&record("C,"), 4).unwrap_err();
        assert!(matches!(err, ImportError::Row { line: 4, .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn price_is_lenient_but_not_negative() {
        let map = ColumnMap::from_headers(&record("sku,name,price")).unwrap();

        assert_eq!(map.decode(&record("A,a,12.50"), 2).unwrap().price, Some(dec("12.50")));
        assert_eq!(map.decode(&record("A,a,abc"), 2).unwrap().price, None);
        assert!(map.decode(&record("A,a,-1"), 2).is_err());
    }

    #[test]
    fn out_of_range_price_skips_only_that_row() {
        let map = ColumnMap::from_headers(&record("sku,name,price")).unwrap();

        for raw in ["12345678901.999", "10000000000", "1.999"] {
            let err = map.decode(&record(&format!("A,a,{raw}")), 3).unwrap_err();
            assert!(matches!(err, ImportError::Row { line: 3, .. }), "{raw}");
        }
        assert_eq!(map.decode(&record("A,a,9999999999.99"), 2).unwrap().price, Some(dec("9999999999.99")));
    }

    #[test]
    fn parse_bool_matches_accepted_spellings() {
        for yes in ["1", "true", "YES", "Active", "", "  "] {
            assert!(parse_bool(yes), "{yes:?}");
        }
        for no in ["0", "false", "no", "inactive", "maybe"] {
            assert!(!parse_bool(no), "{no:?}");
        }
    }

    #[test]
    fn count_rows_tolerates_ragged_records() {
        let data: &[u8] = b"sku,name\nA,a\nB,b,extra\nC\n";
        assert_eq!(count_rows(data).unwrap(), 3);
        assert_eq!(count_rows(&b"sku,name\n"[..]).unwrap(), 0);
        assert_eq!(count_rows(&b""[..]).unwrap(), 0);
    }

    #[test]
    fn strict_reader_reports_unequal_lengths() {
        let data: &[u8] = b"sku,name\nA,a\nB,b,extra\n";
        let mut records = strict_reader(data).into_records();

        assert!(records.next().unwrap().is_ok());
        let err = fatal_csv_error(records.next().unwrap().unwrap_err());
        assert!(matches!(err, ImportError::Fatal(ref msg) if msg.contains("expected 2 fields, found 3")));
    }

    #[test]
    fn strict_reader_reports_invalid_utf8() {
        let data: &[u8] = b"sku,name\nA,\xff\xfe\n";
        let mut records = strict_reader(data).into_records();

        let err = fatal_csv_error(records.next().unwrap().unwrap_err());
        assert!(matches!(err, ImportError::Fatal(ref msg) if msg.starts_with("CSV is not valid UTF-8")));
    }
}
