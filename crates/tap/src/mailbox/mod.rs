//! Mailbox abstraction and paginated search
//!
//! [`Mailbox`] is the seam between the pipeline and the raw mail API:
//! the real [`GmailClient`](crate::gmail::GmailClient) implements it over
//! HTTP, and [`InMemoryMailbox`] backs the tests. The free functions here
//! are the search paginator: they consume paged list responses and resolve
//! raw references into ordered, normalized [`Message`]s.

mod memory;

pub use memory::InMemoryMailbox;

use anyhow::Result;

use crate::gmail::api::{AttachmentResponse, GmailMessage, ListMessagesResponse, MessageRef};
use crate::gmail::normalize_message;
use crate::models::Message;

/// Page size used when the caller does not specify one
pub const DEFAULT_RESULTS_PER_PAGE: usize = 100;

/// Raw mailbox operations the pipeline needs.
///
/// Every method is a blocking call; failures propagate as fatal transport
/// errors with no internal retry.
pub trait Mailbox {
    /// List message references matching a free-text query, one page at a time
    fn list_messages(
        &self,
        query: &str,
        results_per_page: usize,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse>;

    /// Get full message details by ID
    fn get_message(&self, id: &str) -> Result<GmailMessage>;

    /// Get the base64url-encoded bytes of one attachment
    fn get_attachment(&self, message_id: &str, attachment_id: &str)
    -> Result<AttachmentResponse>;
}

/// Issue paged list calls for `query`, following the continuation token
/// until the upstream reports no further pages.
///
/// Stops emitting exactly at `max_results` even mid-page; no partial page
/// is over-yielded and no further page is requested once the cap is hit.
pub fn search(
    mailbox: &dyn Mailbox,
    query: &str,
    results_per_page: Option<usize>,
    max_results: Option<usize>,
) -> Result<Vec<MessageRef>> {
    let per_page = results_per_page.unwrap_or(DEFAULT_RESULTS_PER_PAGE);
    let mut refs: Vec<MessageRef> = Vec::new();
    let mut page_token: Option<String> = None;

    'pages: loop {
        let response = mailbox.list_messages(query, per_page, page_token.as_deref())?;

        if let Some(messages) = response.messages {
            for message in messages {
                if max_results.is_some_and(|max| refs.len() >= max) {
                    break 'pages;
                }
                refs.push(message);
            }
        }

        match response.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
        if max_results.is_some_and(|max| refs.len() >= max) {
            break;
        }
    }

    Ok(refs)
}

/// Search, resolve every reference into a [`Message`], and return them in
/// ascending `internal_date` order.
///
/// The re-sort is load-bearing: the upstream API returns results in
/// conversation-thread order, not chronological order, and the watermark
/// logic downstream requires oldest-first processing. The sort is stable,
/// so references with equal timestamps keep their upstream order.
pub fn get_ordered_messages(
    mailbox: &dyn Mailbox,
    query: &str,
    results_per_page: Option<usize>,
    max_results: Option<usize>,
) -> Result<Vec<Message>> {
    let refs = search(mailbox, query, results_per_page, max_results)?;

    let mut messages = Vec::with_capacity(refs.len());
    for msg_ref in refs {
        let raw = mailbox.get_message(&msg_ref.id)?;
        messages.push(normalize_message(raw));
    }

    messages.sort_by_key(|m| m.internal_date);
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::api::MessagePayload;

    fn raw_message(id: &str, internal_date: i64) -> GmailMessage {
        GmailMessage {
            id: id.to_string(),
            thread_id: id.to_string(),
            label_ids: None,
            internal_date: internal_date.to_string(),
            payload: Some(MessagePayload::default()),
        }
    }

    fn mailbox_with(count: usize) -> InMemoryMailbox {
        let mailbox = InMemoryMailbox::new();
        for i in 0..count {
            mailbox.add_message(raw_message(&format!("m{i}"), 1000 * i as i64));
        }
        mailbox
    }

    #[test]
    fn test_search_returns_all_across_pages() {
        let mailbox = mailbox_with(7);
        let refs = search(&mailbox, "", Some(3), None).unwrap();
        assert_eq!(refs.len(), 7);
    }

    #[test]
    fn test_search_stops_exactly_at_max_results_mid_page() {
        let mailbox = mailbox_with(10);
        let refs = search(&mailbox, "", Some(4), Some(5)).unwrap();
        assert_eq!(refs.len(), 5);
        assert_eq!(refs[4].id, "m4");
    }

    #[test]
    fn test_search_max_results_beyond_total() {
        let mailbox = mailbox_with(3);
        let refs = search(&mailbox, "", Some(2), Some(100)).unwrap();
        assert_eq!(refs.len(), 3);
    }

    #[test]
    fn test_search_max_results_at_page_boundary() {
        let mailbox = mailbox_with(8);
        let refs = search(&mailbox, "", Some(4), Some(4)).unwrap();
        assert_eq!(refs.len(), 4);
    }

    #[test]
    fn test_search_empty_mailbox() {
        let mailbox = InMemoryMailbox::new();
        let refs = search(&mailbox, "", None, None).unwrap();
        assert!(refs.is_empty());
    }

    #[test]
    fn test_ordered_messages_sorted_ascending_by_internal_date() {
        let mailbox = InMemoryMailbox::new();
        // upstream yields thread order, not chronological order
        mailbox.add_message(raw_message("m1", 300));
        mailbox.add_message(raw_message("m2", 100));
        mailbox.add_message(raw_message("m3", 200));

        let messages = get_ordered_messages(&mailbox, "", None, None).unwrap();
        let dates: Vec<i64> = messages.iter().map(|m| m.internal_date).collect();
        assert_eq!(dates, vec![100, 200, 300]);
    }
}
