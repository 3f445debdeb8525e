//! Gmail API HTTP client
//!
//! Implements [`Mailbox`] over the Gmail REST API. Uses synchronous HTTP
//! (ureq); every call blocks the calling thread and inherits the
//! transport's default timeouts. There is no retry here: a failed call
//! propagates upward and aborts the run, by design.

use anyhow::{Context, Result};

use super::GmailAuth;
use super::api::{AttachmentResponse, GmailMessage, ListMessagesResponse};
use crate::mailbox::Mailbox;

/// Gmail API client for one authenticated run.
///
/// Constructed once per run and shared (read-only by convention) across
/// all calls; not designed for concurrent use.
pub struct GmailClient {
    auth: GmailAuth,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Upstream cap on page size
    const MAX_PAGE_SIZE: usize = 500;

    /// Create a new Gmail client from an already-loaded auth handle
    pub fn new(auth: GmailAuth) -> Self {
        Self { auth }
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let access_token = self.auth.get_access_token()?;

        let mut response = ureq::get(url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .with_context(|| format!("Failed to send {what} request"))?;

        response
            .body_mut()
            .read_json()
            .with_context(|| format!("Failed to parse {what} response"))
    }
}

impl Mailbox for GmailClient {
    fn list_messages(
        &self,
        query: &str,
        results_per_page: usize,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse> {
        let mut url = format!(
            "{}/users/me/messages?q={}&maxResults={}",
            Self::BASE_URL,
            urlencoding::encode(query),
            results_per_page.min(Self::MAX_PAGE_SIZE)
        );

        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", token));
        }

        self.get_json(&url, "list messages")
    }

    fn get_message(&self, id: &str) -> Result<GmailMessage> {
        let url = format!("{}/users/me/messages/{}?format=full", Self::BASE_URL, id);
        self.get_json(&url, "get message")
    }

    fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<AttachmentResponse> {
        let url = format!(
            "{}/users/me/messages/{}/attachments/{}",
            Self::BASE_URL,
            message_id,
            attachment_id
        );
        self.get_json(&url, "get attachment")
    }
}
