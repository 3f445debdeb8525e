//! mailtap - Incremental extraction of tabular files from a mailbox
//!
//! This crate provides the full pipeline for pulling delimited-text and
//! spreadsheet files out of email and emitting their rows as
//! line-delimited JSON:
//! - Gmail API client, OAuth token refresh, message normalization
//! - Paginated incremental search bounded by a per-table watermark
//! - Attachment and URL file retrieval with filename resolution
//! - Delimited (csv, optional gzip) and spreadsheet (xlsx) decoding
//! - Bounded sampling and schema inference for discovery
//! - Singer-style SCHEMA / RECORD / STATE output
//!
//! The binary lives in `mailtap-cli`; everything here is callable against
//! the [`Mailbox`] trait, so tests run against an in-memory double.

pub mod config;
pub mod fetch;
pub mod format;
pub mod gmail;
pub mod mailbox;
pub mod models;
pub mod sample;
pub mod schema;
pub mod sink;
pub mod state;
pub mod sync;

pub use config::{Quoting, SourceType, TableFormat, TableSpec, TapConfig};
pub use fetch::{FileNameUnresolvable, FileSource};
pub use format::{Row, RowIter, get_row_iterator, normalize_header};
pub use gmail::{CredentialError, GmailAuth, GmailClient, GmailCredentials, normalize_message};
pub use mailbox::{InMemoryMailbox, Mailbox, get_ordered_messages, search};
pub use models::{Attachment, Message, MessageId, ResourceList, RetrievedFile, Url};
pub use sample::{SampleOptions, sample_file, sample_files};
pub use schema::generate_schema;
pub use sink::{JsonLinesSink, MemorySink, RecordSink};
pub use state::{State, watermark_from_internal_date};
pub use sync::{SyncStats, do_discover, do_sync, sync_table};
