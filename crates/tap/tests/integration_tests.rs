//! End-to-end pipeline tests against the in-memory mailbox
//!
//! Exercises the whole flow the binary drives: incremental search,
//! resource filtering, schema inference, record emission with lineage
//! metadata, and watermark advancement across consecutive runs.

use mailtap::gmail::api::{GmailMessage, MessageBody, MessagePart, MessagePayload};
use mailtap::{
    InMemoryMailbox, MemorySink, Quoting, SourceType, State, TableFormat, TableSpec, TapConfig,
    do_sync,
};

// 2020-03-01T00:00:00 and 2020-03-02T00:00:00 UTC, epoch milliseconds
const DAY_ONE: i64 = 1583020800000;
const DAY_TWO: i64 = 1583107200000;

fn table_spec() -> TableSpec {
    TableSpec {
        name: "orders".to_string(),
        pattern: r"\.csv".to_string(),
        key_properties: vec!["id".to_string()],
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

fn config() -> TapConfig {
    TapConfig {
        email_address: "ops@example.com".to_string(),
        gmail_search_query: "from:reports@example.com".to_string(),
        start_date: "2020-01-01T00:00:00".to_string(),
        token_base64: None,
        tables: vec![table_spec()],
    }
}

fn message_with_csv(id: &str, internal_date: i64, file_name: &str) -> GmailMessage {
    GmailMessage {
        id: id.to_string(),
        thread_id: id.to_string(),
        internal_date: internal_date.to_string(),
        payload: Some(MessagePayload {
            parts: Some(vec![MessagePart {
                filename: Some(file_name.to_string()),
                body: Some(MessageBody {
                    attachment_id: Some(format!("att-{id}")),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn csv_rows(prefix: &str, count: usize) -> Vec<u8> {
    let mut data = b"id,name\n".to_vec();
    for i in 0..count {
        data.extend_from_slice(format!("{prefix}{i},{prefix}\n").as_bytes());
    }
    data
}

fn two_day_mailbox() -> InMemoryMailbox {
    let mailbox = InMemoryMailbox::new();
    // inserted newest-first: the upstream serves thread order, the
    // pipeline must still process oldest-first
    mailbox.add_message(message_with_csv("m2", DAY_TWO, "day2.csv"));
    mailbox.add_message(message_with_csv("m1", DAY_ONE, "day1.csv"));
    mailbox.add_attachment("m1", "att-m1", &csv_rows("a", 5));
    mailbox.add_attachment("m2", "att-m2", &csv_rows("b", 5));
    mailbox
}

#[test]
fn test_two_day_sync_emits_all_rows_oldest_first() {
    let mailbox = two_day_mailbox();
    let mut state = State::default();
    let mut sink = MemorySink::new();

    let stats = do_sync(&config(), &mailbox, &mut state, &mut sink, None).unwrap();

    assert_eq!(stats.tables_synced, 1);
    assert_eq!(stats.records_written, 10);
    assert_eq!(sink.records.len(), 10);

    // day-1 rows come before day-2 rows
    assert_eq!(sink.records[0].1["_email_source_file"], "day1.csv");
    assert_eq!(sink.records[0].1["id"], "a0");
    assert_eq!(sink.records[5].1["_email_source_file"], "day2.csv");
    assert_eq!(sink.records[9].1["id"], "b4");

    // one schema, one state message per file, watermark at day two
    assert_eq!(sink.schemas.len(), 1);
    assert_eq!(sink.states.len(), 2);
    assert_eq!(state.watermark("orders"), Some("2020-03-02T00:00:00"));
}

#[test]
fn test_second_run_finds_nothing_new() {
    let mailbox = two_day_mailbox();
    let mut state = State::default();
    let mut sink = MemorySink::new();

    do_sync(&config(), &mailbox, &mut state, &mut sink, None).unwrap();
    let after_first = sink.records.len();

    let stats = do_sync(&config(), &mailbox, &mut state, &mut sink, None).unwrap();
    assert_eq!(stats.records_written, 0);
    assert_eq!(sink.records.len(), after_first);
    assert_eq!(state.watermark("orders"), Some("2020-03-02T00:00:00"));
}

#[test]
fn test_new_message_after_watermark_is_picked_up() {
    let mailbox = two_day_mailbox();
    let mut state = State::default();
    let mut sink = MemorySink::new();
    do_sync(&config(), &mailbox, &mut state, &mut sink, None).unwrap();

    // a third day's report arrives
    let day_three = DAY_TWO + 86_400_000;
    mailbox.add_message(message_with_csv("m3", day_three, "day3.csv"));
    mailbox.add_attachment("m3", "att-m3", &csv_rows("c", 2));

    let stats = do_sync(&config(), &mailbox, &mut state, &mut sink, None).unwrap();
    assert_eq!(stats.records_written, 2);
    assert_eq!(state.watermark("orders"), Some("2020-03-03T00:00:00"));
}

#[test]
fn test_inferred_schema_covers_fields_and_lineage() {
    let mailbox = two_day_mailbox();
    let mut state = State::default();
    let mut sink = MemorySink::new();

    do_sync(&config(), &mailbox, &mut state, &mut sink, None).unwrap();

    let (stream, schema, key_properties) = &sink.schemas[0];
    assert_eq!(stream, "orders");
    assert_eq!(key_properties, &["id".to_string()]);

    let properties = schema["properties"].as_object().unwrap();
    assert_eq!(properties["name"]["_conversion_type"], "string");
    assert!(properties.contains_key("_email_source_address"));
    assert!(properties.contains_key("_email_source_lineno"));
}

#[test]
fn test_pattern_filter_scopes_each_table() {
    // a second table whose pattern matches nothing in the mailbox
    let mut config = config();
    let mut other = table_spec();
    other.name = "invoices".to_string();
    other.pattern = r"invoice.*\.csv".to_string();
    config.tables.push(other);

    let mailbox = two_day_mailbox();
    let mut state = State::default();
    let mut sink = MemorySink::new();

    let stats = do_sync(&config, &mailbox, &mut state, &mut sink, None).unwrap();
    assert_eq!(stats.tables_synced, 2);
    assert_eq!(stats.records_written, 10);
    assert!(sink.records.iter().all(|(stream, _)| stream == "orders"));
    assert_eq!(state.watermark("invoices"), None);
}

#[test]
fn test_quoting_and_delimiter_flow_through_config() {
    let mut spec = table_spec();
    spec.delimiter = Some("|".to_string());
    spec.quoting = Some(Quoting::None);
    let mut config = config();
    config.tables = vec![spec];

    let mailbox = InMemoryMailbox::new();
    mailbox.add_message(message_with_csv("m1", DAY_ONE, "day1.csv"));
    mailbox.add_attachment("m1", "att-m1", b"id|name\n1|\"q\"\n");

    let mut state = State::default();
    let mut sink = MemorySink::new();
    do_sync(&config, &mailbox, &mut state, &mut sink, None).unwrap();

    assert_eq!(sink.records[0].1["name"], "\"q\"");
}
