//! CSV ingestion: header resolution, row decoding and row counting.

pub mod csv;

pub use self::csv::{count_rows, parse_bool, ColumnMap, ImportError};
