//! In-memory mailbox for tests
//!
//! Serves raw messages in insertion order (standing in for the upstream's
//! conversation-thread order) and implements just enough of the search
//! query surface for the pipeline tests: an `after:<epoch-seconds>` clause
//! is honored with exclusive boundary semantics; all other query text is
//! ignored.

use anyhow::{Context, Result};
use base64::prelude::*;
use std::cell::RefCell;
use std::collections::HashMap;

use super::Mailbox;
use crate::gmail::api::{
    AttachmentResponse, GmailMessage, ListMessagesResponse, MessageRef,
};

/// Test double serving canned messages and attachments.
#[derive(Default)]
pub struct InMemoryMailbox {
    messages: RefCell<Vec<GmailMessage>>,
    /// (message id, attachment id) -> base64url-encoded bytes
    attachments: RefCell<HashMap<(String, String), String>>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw message. Insertion order is the order `list_messages`
    /// serves results in.
    pub fn add_message(&self, message: GmailMessage) {
        self.messages.borrow_mut().push(message);
    }

    /// Register attachment bytes for a (message, attachment) pair.
    pub fn add_attachment(&self, message_id: &str, attachment_id: &str, data: &[u8]) {
        self.attachments.borrow_mut().insert(
            (message_id.to_string(), attachment_id.to_string()),
            BASE64_URL_SAFE.encode(data),
        );
    }

    /// Parse the `after:<epoch-seconds>` clause out of a query string.
    fn after_seconds(query: &str) -> Option<i64> {
        query
            .split_whitespace()
            .find_map(|tok| tok.strip_prefix("after:"))
            .and_then(|s| s.parse().ok())
    }

    fn matching_ids(&self, query: &str) -> Vec<MessageRef> {
        let after = Self::after_seconds(query);
        self.messages
            .borrow()
            .iter()
            .filter(|m| {
                let secs = m.internal_date.parse::<i64>().unwrap_or(0) / 1000;
                after.is_none_or(|a| secs > a)
            })
            .map(|m| MessageRef {
                id: m.id.clone(),
                thread_id: m.thread_id.clone(),
            })
            .collect()
    }
}

impl Mailbox for InMemoryMailbox {
    fn list_messages(
        &self,
        query: &str,
        results_per_page: usize,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse> {
        let matching = self.matching_ids(query);
        let offset: usize = page_token.map(|t| t.parse().unwrap_or(0)).unwrap_or(0);
        let page: Vec<MessageRef> = matching
            .iter()
            .skip(offset)
            .take(results_per_page)
            .cloned()
            .collect();
        let next_offset = offset + page.len();
        let next_page_token = (next_offset < matching.len()).then(|| next_offset.to_string());

        Ok(ListMessagesResponse {
            messages: (!page.is_empty()).then_some(page),
            next_page_token,
            result_size_estimate: Some(matching.len() as u32),
        })
    }

    fn get_message(&self, id: &str) -> Result<GmailMessage> {
        self.messages
            .borrow()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .with_context(|| format!("No such message: {id}"))
    }

    fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<AttachmentResponse> {
        let attachments = self.attachments.borrow();
        let data = attachments
            .get(&(message_id.to_string(), attachment_id.to_string()))
            .with_context(|| format!("No such attachment: {message_id}/{attachment_id}"))?;
        Ok(AttachmentResponse {
            size: Some(data.len() as u32),
            data: data.clone(),
        })
    }
}
