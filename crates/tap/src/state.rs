//! Per-table incremental state
//!
//! The state document maps each table name to the watermark of its last
//! fully-emitted file. The value is an ISO-8601 timestamp string; the
//! store itself treats it as opaque and only the sync driver interprets
//! it.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Watermark entry for one table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableState {
    /// Lower bound for the next run's search, ISO-8601
    pub modified_since: String,
}

/// The whole state document: table name to watermark
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct State {
    tables: BTreeMap<String, TableState>,
}

impl State {
    /// Load state from a file, or start empty when no path was given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => config::load_json_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Watermark for a table, if one was recorded
    pub fn watermark(&self, table: &str) -> Option<&str> {
        self.tables
            .get(table)
            .map(|entry| entry.modified_since.as_str())
    }

    /// Record a table's watermark
    pub fn set_watermark(&mut self, table: &str, modified_since: String) {
        self.tables
            .insert(table.to_string(), TableState { modified_since });
    }
}

/// Convert a message's `internal_date` (epoch milliseconds) to the
/// watermark timestamp: floor-divide to seconds, never round up.
pub fn watermark_from_internal_date(internal_date: i64) -> Result<NaiveDateTime> {
    let seconds = internal_date.div_euclid(1000);
    DateTime::from_timestamp(seconds, 0)
        .map(|dt| dt.naive_utc())
        .with_context(|| format!("internal_date out of range: {internal_date}"))
}

/// Render a watermark as its stored ISO-8601 string.
pub fn format_watermark(timestamp: NaiveDateTime) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S").to_string()
}
