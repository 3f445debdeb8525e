//! Spreadsheet (xlsx) decoding
//!
//! Reads one named worksheet from an xlsx workbook: the first row is the
//! header, every later row is zipped against it. Header-cell text is
//! normalized into a field name (see [`normalize_header`]); that
//! normalized form is the emitted field name, bit for bit.
//!
//! The reader walks the workbook's XML parts directly (workbook,
//! relationships, shared strings, worksheet) instead of pulling in a
//! full spreadsheet engine; only cell values are of interest here.

use anyhow::{Context, Result, bail};
use regex::Regex;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::LazyLock;

use quick_xml::events::Event;

use super::{Row, RowIter};
use crate::config::TableSpec;
use crate::models::RetrievedFile;

/// Maximum decompressed bytes read from a single ZIP entry
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").expect("valid pattern"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid pattern"));

/// Normalize a header cell into a field name: strip every character that
/// is neither a word character nor whitespace, collapse whitespace runs
/// to a single underscore, then lowercase.
pub fn normalize_header(raw: &str) -> String {
    let stripped = NON_WORD.replace_all(raw, "");
    let collapsed = WHITESPACE.replace_all(&stripped, "_");
    collapsed.to_lowercase()
}

type Archive = zip::ZipArchive<Cursor<Vec<u8>>>;

pub fn rows(spec: &TableSpec, file: RetrievedFile) -> Result<RowIter> {
    let worksheet_name = spec
        .worksheet_name
        .as_deref()
        .with_context(|| format!("Table {} has no worksheet_name", spec.name))?;

    let mut archive = zip::ZipArchive::new(Cursor::new(file.data))
        .with_context(|| format!("Not a valid workbook: {}", file.file_name))?;

    let sheet_path = worksheet_path(&mut archive, worksheet_name).with_context(|| {
        format!(
            "Worksheet {:?} not found in {}",
            worksheet_name, file.file_name
        )
    })?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_xml = read_zip_entry(&mut archive, &sheet_path)?;
    let raw_rows = parse_sheet_rows(&sheet_xml, &shared_strings)?;

    let mut rows = raw_rows.into_iter();
    let headers: Vec<Option<String>> = match rows.next() {
        Some(header_row) => header_row
            .into_iter()
            .map(|cell| cell.map(|text| normalize_header(&text)))
            .collect(),
        None => Vec::new(),
    };

    let zipped: Vec<Row> = rows.map(|cells| zip_row(&headers, cells)).collect();
    Ok(Box::new(zipped.into_iter().map(Ok)))
}

/// Zip a data row against the normalized header by column position.
/// Columns with an empty header cell, or cells missing from the row,
/// simply produce no field.
fn zip_row(headers: &[Option<String>], cells: Vec<Option<String>>) -> Row {
    headers
        .iter()
        .zip(cells)
        .filter_map(|(header, cell)| match (header, cell) {
            (Some(name), Some(value)) => {
                Some((name.clone(), serde_json::Value::String(value)))
            }
            _ => None,
        })
        .collect()
}

fn read_zip_entry(archive: &mut Archive, name: &str) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .with_context(|| format!("Workbook entry not found: {name}"))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .with_context(|| format!("Failed to read workbook entry: {name}"))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        bail!("Workbook entry {name} exceeds size limit");
    }
    Ok(out)
}

/// Resolve a worksheet name to its part path via workbook.xml and the
/// workbook relationships.
fn worksheet_path(archive: &mut Archive, worksheet_name: &str) -> Result<String> {
    let workbook_xml = read_zip_entry(archive, "xl/workbook.xml")?;
    let rels_xml = read_zip_entry(archive, "xl/_rels/workbook.xml.rels")?;

    let sheets = parse_workbook_sheets(&workbook_xml)?;
    let rel_id = sheets
        .iter()
        .find(|(name, _)| name == worksheet_name)
        .map(|(_, rid)| rid.clone())
        .with_context(|| format!("No sheet named {worksheet_name:?}"))?;

    let targets = parse_relationship_targets(&rels_xml)?;
    let target = targets
        .get(&rel_id)
        .with_context(|| format!("No relationship for sheet id {rel_id}"))?;

    // Targets are relative to xl/ unless package-absolute
    Ok(match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{target}"),
    })
}

/// Parse `<sheet name=".." r:id="..">` entries, in declaration order.
fn parse_workbook_sheets(xml: &[u8]) -> Result<Vec<(String, String)>> {
    let mut sheets = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    let mut name = None;
                    let mut rel_id = None;
                    for attr in e.attributes() {
                        let attr = attr.context("Malformed workbook.xml attribute")?;
                        match attr.key.as_ref() {
                            b"name" => name = Some(attr_text(&attr)?),
                            key if key == b"r:id"
                                || attr.key.local_name().as_ref() == b"id" =>
                            {
                                rel_id = Some(attr_text(&attr)?)
                            }
                            _ => {}
                        }
                    }
                    if let (Some(name), Some(rel_id)) = (name, rel_id) {
                        sheets.push((name, rel_id));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("Malformed workbook.xml: {e}"),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// Parse `<Relationship Id=".." Target="..">` entries.
fn parse_relationship_targets(xml: &[u8]) -> Result<HashMap<String, String>> {
    let mut targets = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Relationship" {
                    let mut id = None;
                    let mut target = None;
                    for attr in e.attributes() {
                        let attr = attr.context("Malformed workbook rels attribute")?;
                        match attr.key.as_ref() {
                            b"Id" => id = Some(attr_text(&attr)?),
                            b"Target" => target = Some(attr_text(&attr)?),
                            _ => {}
                        }
                    }
                    if let (Some(id), Some(target)) = (id, target) {
                        targets.insert(id, target);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("Malformed workbook rels: {e}"),
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

fn attr_text(attr: &quick_xml::events::attributes::Attribute) -> Result<String> {
    Ok(attr
        .unescape_value()
        .context("Malformed attribute value")?
        .into_owned())
}

/// Read the shared-strings table; absent in workbooks with no text cells.
/// Rich-text runs inside one entry are concatenated.
fn read_shared_strings(archive: &mut Archive) -> Result<Vec<String>> {
    if archive.by_name("xl/sharedStrings.xml").is_err() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry(archive, "xl/sharedStrings.xml")?;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut in_si = false;
    let mut in_t = false;
    let mut current = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_t => {
                current.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => bail!("Malformed sharedStrings.xml: {e}"),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Parse a worksheet into rows of column-positioned cell values.
///
/// Cells carry their column in the `r` attribute, so sparse rows come
/// back with `None` gaps in the right places.
fn parse_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<Vec<Option<String>>>> {
    let mut rows: Vec<Vec<Option<String>>> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut current_row: Vec<Option<String>> = Vec::new();
    let mut in_row = false;
    let mut cell_col: usize = 0;
    let mut cell_type: Option<String> = None;
    let mut in_value = false;
    let mut in_inline_t = false;
    let mut seen_cells = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"row" => {
                in_row = true;
                current_row = Vec::new();
                seen_cells = 0;
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"row" => {
                rows.push(Vec::new());
            }
            Ok(Event::Start(e)) if in_row && e.local_name().as_ref() == b"c" => {
                cell_type = None;
                cell_col = seen_cells;
                for attr in e.attributes() {
                    let attr = attr.context("Malformed worksheet attribute")?;
                    match attr.key.as_ref() {
                        b"r" => {
                            if let Some(col) = column_index(&attr_text(&attr)?) {
                                cell_col = col;
                            }
                        }
                        b"t" => cell_type = Some(attr_text(&attr)?),
                        _ => {}
                    }
                }
                seen_cells = cell_col + 1;
            }
            Ok(Event::Start(e)) if in_row && e.local_name().as_ref() == b"v" => {
                in_value = true;
            }
            Ok(Event::Start(e))
                if in_row
                    && e.local_name().as_ref() == b"t"
                    && cell_type.as_deref() == Some("inlineStr") =>
            {
                in_inline_t = true;
            }
            Ok(Event::Text(t)) if in_value || in_inline_t => {
                let raw = t.unescape().unwrap_or_default().into_owned();
                let value = if in_value && cell_type.as_deref() == Some("s") {
                    raw.trim()
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared_strings.get(i))
                        .cloned()
                        .unwrap_or_default()
                } else {
                    raw
                };
                set_cell(&mut current_row, cell_col, value);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"t" => in_inline_t = false,
                b"row" => {
                    in_row = false;
                    rows.push(std::mem::take(&mut current_row));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => bail!("Malformed worksheet XML: {e}"),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

fn set_cell(row: &mut Vec<Option<String>>, col: usize, value: String) {
    if row.len() <= col {
        row.resize(col + 1, None);
    }
    row[col] = Some(value);
}

/// Zero-based column index from a cell reference like "B12".
fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: String = cell_ref
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut index = 0usize;
    for c in letters.chars() {
        index = index * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(index - 1)
}
