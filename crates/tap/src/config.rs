//! Tap configuration and table specifications
//!
//! The config is a JSON document naming the mailbox search query, the
//! incremental start date and one [`TableSpec`] per logical output stream.
//! Everything is validated up front, before any network call: an invalid
//! pattern or format aborts the run at load time.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;

/// Top-level tap configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TapConfig {
    /// Address of the mailbox being read; attached to every emitted row
    /// as lineage metadata
    pub email_address: String,
    /// Free-text mailbox search query; the incremental `after:` clause is
    /// appended at run time
    #[serde(default)]
    pub gmail_search_query: String,
    /// Lower bound for the first run, ISO-8601 (e.g. "2020-01-01T00:00:00")
    pub start_date: String,
    /// Stored OAuth token as base64-encoded JSON, decoded in memory only
    pub token_base64: Option<String>,
    /// One entry per logical output stream
    pub tables: Vec<TableSpec>,
}

impl TapConfig {
    /// Load and validate a config file. Fails before any network call if
    /// a pattern does not compile or a table spec is inconsistent.
    pub fn load(path: &Path) -> Result<Self> {
        let config: TapConfig = config::load_json_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.parsed_start_date()
            .with_context(|| format!("Invalid start_date: {}", self.start_date))?;
        for table in &self.tables {
            table
                .validate()
                .with_context(|| format!("Invalid table spec: {}", table.name))?;
        }
        Ok(())
    }

    /// Parse `start_date`, accepting a bare date or a full timestamp.
    pub fn parsed_start_date(&self) -> Result<chrono::NaiveDateTime> {
        parse_timestamp(&self.start_date)
            .with_context(|| format!("Could not parse timestamp: {}", self.start_date))
    }
}

/// Parse an ISO-8601-ish timestamp string, accepting a bare date.
pub fn parse_timestamp(s: &str) -> Result<chrono::NaiveDateTime> {
    if let Ok(dt) = s.parse::<chrono::NaiveDateTime>() {
        return Ok(dt);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    let date = s
        .parse::<chrono::NaiveDate>()
        .with_context(|| format!("Not a recognized timestamp: {s}"))?;
    date.and_hms_opt(0, 0, 0)
        .context("Date has no midnight representation")
}

/// Where a table's files come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Files attached to matching messages
    Attachment,
    /// Files linked from matching message bodies
    Url,
}

/// Container format of a table's files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TableFormat {
    /// Delimited text, first row is the header
    #[serde(rename = "csv", alias = "delimited")]
    Delimited,
    /// Spreadsheet workbook; requires `worksheet_name`
    #[serde(rename = "excel", alias = "spreadsheet")]
    Spreadsheet,
}

/// Quoting convention for delimited files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Quoting {
    #[serde(rename = "QUOTE_MINIMAL")]
    Minimal,
    #[serde(rename = "QUOTE_ALL")]
    All,
    #[serde(rename = "QUOTE_NONNUMERIC")]
    NonNumeric,
    #[serde(rename = "QUOTE_NONE")]
    None,
}

/// Declarative description of one logical output stream and how to
/// locate and parse its source files.
#[derive(Debug, Clone, Deserialize)]
pub struct TableSpec {
    /// Output stream name; also the state-store key
    pub name: String,
    /// Regular expression applied with substring-search semantics to
    /// attachment display names or URL strings
    pub pattern: String,
    /// Primary-key field names for downstream dedup
    pub key_properties: Vec<String>,
    pub format: TableFormat,
    pub source: SourceType,
    /// Transparently gunzip file bytes before parsing
    #[serde(default)]
    pub unzip: bool,
    /// Field delimiter for delimited files (single character, default ",")
    pub delimiter: Option<String>,
    pub quoting: Option<Quoting>,
    /// Explicit field names; when given, the first row is data, not a header
    pub field_names: Option<Vec<String>>,
    /// Worksheet to read for spreadsheet tables
    pub worksheet_name: Option<String>,
    /// Per-field schema properties merged over the inferred schema
    pub schema_overrides: Option<serde_json::Value>,
}

impl TableSpec {
    /// Compile the name-matching pattern
    pub fn compiled_pattern(&self) -> Result<Regex> {
        Regex::new(&self.pattern)
            .with_context(|| format!("Invalid pattern for table {}: {}", self.name, self.pattern))
    }

    /// Delimiter byte for delimited files
    pub fn delimiter_byte(&self) -> Result<u8> {
        match self.delimiter.as_deref() {
            None => Ok(b','),
            Some(d) if d.len() == 1 => Ok(d.as_bytes()[0]),
            Some(d) => anyhow::bail!("Delimiter must be a single character, got {d:?}"),
        }
    }

    fn validate(&self) -> Result<()> {
        self.compiled_pattern()?;
        self.delimiter_byte()?;
        if self.format == TableFormat::Spreadsheet && self.worksheet_name.is_none() {
            anyhow::bail!("Spreadsheet tables require worksheet_name");
        }
        Ok(())
    }
}
