//! Record sinks
//!
//! The sync driver emits three message kinds per table: one schema, any
//! number of records, and a state message after every fully-processed
//! file. [`JsonLinesSink`] writes them as line-delimited JSON on an
//! arbitrary writer; in production that writer is stdout.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::io::Write;

use crate::format::Row;
use crate::state::State;

/// Where emitted messages go
pub trait RecordSink {
    fn write_schema(&mut self, table: &str, schema: &Value, key_properties: &[String])
    -> Result<()>;
    fn write_record(&mut self, table: &str, record: &Row) -> Result<()>;
    fn write_state(&mut self, state: &State) -> Result<()>;
}

/// Line-delimited JSON sink
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    fn write_line(&mut self, message: &Value) -> Result<()> {
        serde_json::to_writer(&mut self.writer, message).context("Failed to serialize message")?;
        writeln!(self.writer).context("Failed to write message")?;
        Ok(())
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn write_schema(
        &mut self,
        table: &str,
        schema: &Value,
        key_properties: &[String],
    ) -> Result<()> {
        self.write_line(&json!({
            "type": "SCHEMA",
            "stream": table,
            "schema": schema,
            "key_properties": key_properties,
        }))
    }

    fn write_record(&mut self, table: &str, record: &Row) -> Result<()> {
        self.write_line(&json!({
            "type": "RECORD",
            "stream": table,
            "record": record,
        }))
    }

    fn write_state(&mut self, state: &State) -> Result<()> {
        self.write_line(&json!({
            "type": "STATE",
            "value": state,
        }))
    }
}

/// In-memory sink capturing every emitted message, for tests.
#[derive(Default)]
pub struct MemorySink {
    pub schemas: Vec<(String, Value, Vec<String>)>,
    pub records: Vec<(String, Row)>,
    pub states: Vec<State>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for MemorySink {
    fn write_schema(
        &mut self,
        table: &str,
        schema: &Value,
        key_properties: &[String],
    ) -> Result<()> {
        self.schemas
            .push((table.to_string(), schema.clone(), key_properties.to_vec()));
        Ok(())
    }

    fn write_record(&mut self, table: &str, record: &Row) -> Result<()> {
        self.records.push((table.to_string(), record.clone()));
        Ok(())
    }

    fn write_state(&mut self, state: &State) -> Result<()> {
        self.states.push(state.clone());
        Ok(())
    }
}
