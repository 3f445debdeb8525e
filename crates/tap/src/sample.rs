//! Bounded sampling of rows for schema inference
//!
//! Schema discovery should not read every byte a table could reach, so
//! sampling is bounded three ways: every `sample_rate`-th row of a file,
//! at most `max_records` kept rows per file, at most `max_files`
//! resources across the entire message scan.

use anyhow::Result;
use log::info;

use crate::config::{SourceType, TableSpec};
use crate::fetch::FileSource;
use crate::format::{Row, get_row_iterator};
use crate::mailbox::Mailbox;
use crate::models::{Message, RetrievedFile};

/// Sampling bounds; the defaults match the tap's discovery behavior.
#[derive(Debug, Clone, Copy)]
pub struct SampleOptions {
    /// Keep rows whose zero-based index is a multiple of this
    pub sample_rate: usize,
    /// Stop a file once this many rows are kept
    pub max_records: usize,
    /// Stop the whole scan once this many resources were sampled
    pub max_files: usize,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            sample_rate: 10,
            max_records: 1000,
            max_files: 5,
        }
    }
}

/// Sample one decoded file: keep every row whose zero-based index is a
/// multiple of `sample_rate`, stopping at `max_records` kept rows.
pub fn sample_file(
    spec: &TableSpec,
    file: RetrievedFile,
    sample_rate: usize,
    max_records: usize,
) -> Result<Vec<Row>> {
    let mut kept = Vec::new();
    for (index, row) in get_row_iterator(spec, file)?.enumerate() {
        if kept.len() >= max_records {
            break;
        }
        if index % sample_rate == 0 {
            kept.push(row?);
        }
    }
    Ok(kept)
}

/// Sample rows across a table's resources, messages in the given order,
/// resources in document order within each message. The resource
/// counter is global across messages, so a message with many files can
/// exhaust the budget for everything after it.
pub fn sample_files(
    spec: &TableSpec,
    mailbox: &dyn Mailbox,
    messages: &[Message],
    options: SampleOptions,
) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    let mut files_sampled = 0usize;

    'messages: for message in messages {
        let sources: Vec<&dyn FileSource> = match spec.source {
            SourceType::Attachment => message
                .attachments
                .items()
                .iter()
                .map(|a| a as &dyn FileSource)
                .collect(),
            SourceType::Url => message
                .urls
                .items()
                .iter()
                .map(|u| u as &dyn FileSource)
                .collect(),
        };

        for source in sources {
            if files_sampled >= options.max_files {
                break 'messages;
            }
            info!("Sampling file: {}", source.display_name());
            let file = source.fetch_file(mailbox)?;
            rows.extend(sample_file(
                spec,
                file,
                options.sample_rate,
                options.max_records,
            )?);
            files_sampled += 1;
        }
    }

    info!(
        "Sampled {} rows from {} file(s) for table {}",
        rows.len(),
        files_sampled,
        spec.name
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableFormat;
    use crate::mailbox::InMemoryMailbox;
    use crate::models::{Attachment, ResourceList};

    fn spec() -> TableSpec {
        TableSpec {
            name: "orders".to_string(),
            pattern: ".".to_string(),
            key_properties: vec![],
            format: TableFormat::Delimited,
            source: SourceType::Attachment,
            unzip: false,
            delimiter: None,
            quoting: None,
            field_names: None,
            worksheet_name: None,
            schema_overrides: None,
        }
    }

    fn csv_with_rows(count: usize) -> Vec<u8> {
        let mut data = b"id\n".to_vec();
        for i in 0..count {
            data.extend_from_slice(format!("{i}\n").as_bytes());
        }
        data
    }

    #[test]
    fn test_sample_file_keeps_every_nth_row() {
        let file = RetrievedFile::new("orders.csv", csv_with_rows(10));
        let rows = sample_file(&spec(), file, 2, 3).unwrap();
        // indices 0, 2, 4 and then the max_records cap
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["0", "2", "4"]);
    }

    #[test]
    fn test_sample_file_exhausts_short_source() {
        let file = RetrievedFile::new("orders.csv", csv_with_rows(3));
        let rows = sample_file(&spec(), file, 2, 100).unwrap();
        assert_eq!(rows.len(), 2);
    }

    fn message_with_attachments(id: &str, names: &[&str]) -> Message {
        Message {
            id: id.into(),
            internal_date: 0,
            label_ids: vec![],
            attachments: ResourceList::Present(
                names
                    .iter()
                    .map(|name| Attachment::new(id, format!("att-{name}"), *name))
                    .collect(),
            ),
            urls: ResourceList::Absent,
            to: None,
            from: None,
            subject: None,
        }
    }

    #[test]
    fn test_sample_files_global_file_budget() {
        let mailbox = InMemoryMailbox::new();
        for name in ["a.csv", "b.csv", "c.csv"] {
            mailbox.add_attachment("m1", &format!("att-{name}"), &csv_with_rows(4));
        }
        mailbox.add_attachment("m2", "att-d.csv", &csv_with_rows(4));

        let messages = vec![
            message_with_attachments("m1", &["a.csv", "b.csv", "c.csv"]),
            message_with_attachments("m2", &["d.csv"]),
        ];

        let options = SampleOptions {
            sample_rate: 1,
            max_records: 100,
            max_files: 3,
        };
        let rows = sample_files(&spec(), &mailbox, &messages, options).unwrap();
        // only the first three resources are read; m2's file never is
        assert_eq!(rows.len(), 12);
    }

    #[test]
    fn test_sample_files_absent_list_is_empty() {
        let mailbox = InMemoryMailbox::new();
        let message = Message {
            attachments: ResourceList::Absent,
            ..message_with_attachments("m1", &[])
        };
        let rows = sample_files(&spec(), &mailbox, &[message], SampleOptions::default()).unwrap();
        assert!(rows.is_empty());
    }
}
