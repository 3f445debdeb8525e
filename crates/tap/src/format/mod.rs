//! Format decoders: raw file bytes to field→value rows
//!
//! One decoder per container format. Each returns a lazy, forward-only
//! row iterator; consuming the byte source is destructive, so an iterator
//! is one-shot and never restartable. Malformed input surfaces as an
//! error item and aborts the run; there is no skip-and-continue.

mod delimited;
mod spreadsheet;

pub use spreadsheet::normalize_header;

use anyhow::Result;

use crate::config::{TableFormat, TableSpec};
use crate::models::RetrievedFile;

/// One decoded row: field name to value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// One-shot row iterator over a retrieved file
pub type RowIter = Box<dyn Iterator<Item = Result<Row>>>;

/// Build the row iterator for a file according to the table's format.
pub fn get_row_iterator(spec: &TableSpec, file: RetrievedFile) -> Result<RowIter> {
    match spec.format {
        TableFormat::Delimited => delimited::rows(spec, file),
        TableFormat::Spreadsheet => spreadsheet::rows(spec, file),
    }
}

#[cfg(test)]
pub(crate) fn collect_rows(iter: RowIter) -> Vec<Row> {
    iter.collect::<Result<Vec<_>>>().unwrap()
}
