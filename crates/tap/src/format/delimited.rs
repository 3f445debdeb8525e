//! Delimited-text decoding
//!
//! The first row defines field order and names; each subsequent row is
//! zipped against it. An explicit `field_names` list replaces the header,
//! in which case the first row is already data. A configured `unzip` flag
//! transparently gunzips the bytes before parsing.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::io::{Cursor, Read};

use super::{Row, RowIter};
use crate::config::{Quoting, TableSpec};
use crate::models::RetrievedFile;

pub fn rows(spec: &TableSpec, file: RetrievedFile) -> Result<RowIter> {
    let cursor = Cursor::new(file.data);
    let reader: Box<dyn Read> = if spec.unzip {
        Box::new(GzDecoder::new(cursor))
    } else {
        Box::new(cursor)
    };

    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .flexible(true)
        .delimiter(spec.delimiter_byte()?);
    if spec.quoting == Some(Quoting::None) {
        builder.quoting(false);
    }

    let mut records = builder.from_reader(reader).into_records();

    let headers: Vec<String> = match &spec.field_names {
        Some(names) => names.clone(),
        None => match records.next() {
            Some(first) => first
                .with_context(|| format!("Malformed header row in {}", file.file_name))?
                .iter()
                .map(String::from)
                .collect(),
            None => Vec::new(),
        },
    };

    let file_name = file.file_name;
    Ok(Box::new(records.map(move |record| {
        let record =
            record.with_context(|| format!("Malformed delimited row in {}", file_name))?;
        Ok(zip_row(&headers, record.iter()))
    })))
}

/// Zip field names against row values; a short row simply omits the
/// trailing fields, a long row drops the extra values.
fn zip_row<'a>(headers: &[String], values: impl Iterator<Item = &'a str>) -> Row {
    headers
        .iter()
        .zip(values)
        .map(|(name, value)| (name.clone(), serde_json::Value::String(value.to_string())))
        .collect()
}
