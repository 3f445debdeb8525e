//! Gmail API response normalization
//!
//! Converts one raw message resource into the domain [`Message`]:
//! attachment references, hyperlinks from the HTML body, and the headers
//! the tap cares about.

use base64::prelude::*;
use regex::Regex;
use std::sync::LazyLock;

use super::api::{GmailMessage, MessagePart, MessagePayload};
use crate::models::{Attachment, Message, MessageId, ResourceList, Url};

/// Anchor-tag pattern: tolerates attributes and whitespace before `href`,
/// and matches either quote character (consistently).
static HREF_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid pattern")
});

/// Normalize a raw Gmail message into a domain [`Message`].
///
/// A message with no payload (or an unparsable internal date) still
/// normalizes; it just carries absent resource lists and a zero timestamp.
pub fn normalize_message(raw: GmailMessage) -> Message {
    let id = MessageId::new(&raw.id);
    let internal_date: i64 = raw.internal_date.parse().unwrap_or(0);
    let label_ids = raw.label_ids.unwrap_or_default();

    let (attachments, urls, to, from, subject) = match &raw.payload {
        Some(payload) => (
            extract_attachments(&raw.id, payload),
            extract_urls(&raw.id, payload),
            extract_header(payload, "To"),
            extract_header(payload, "From"),
            extract_header(payload, "Subject"),
        ),
        None => (ResourceList::Absent, ResourceList::Absent, None, None, None),
    };

    Message {
        id,
        internal_date,
        label_ids,
        attachments,
        urls,
        to,
        from,
        subject,
    }
}

/// Extract a header value by name, case-insensitively.
///
/// The first match wins; duplicate headers further down are ignored.
fn extract_header(payload: &MessagePayload, name: &str) -> Option<String> {
    payload.headers.as_ref()?.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            Some(h.value.clone())
        } else {
            None
        }
    })
}

/// Collect attachment references from the top-level body parts, in
/// document order.
///
/// Only one level of parts is scanned; nested multipart sections are not
/// recursed into. That single-level traversal is an observed upstream
/// contract, kept deliberately.
fn extract_attachments(message_id: &str, payload: &MessagePayload) -> ResourceList<Attachment> {
    let Some(parts) = &payload.parts else {
        return ResourceList::Absent;
    };

    ResourceList::Present(
        parts
            .iter()
            .filter_map(|part| attachment_from_part(message_id, part))
            .collect(),
    )
}

/// A part is an attachment when it has both a non-empty filename and a
/// backing attachment ID.
fn attachment_from_part(message_id: &str, part: &MessagePart) -> Option<Attachment> {
    let filename = part.filename.as_deref().filter(|f| !f.is_empty())?;
    let attachment_id = part.body.as_ref()?.attachment_id.as_deref()?;
    Some(Attachment::new(message_id, attachment_id, filename))
}

/// Extract every hyperlink target from the message's HTML body part.
///
/// Absent when the message has no HTML body at all. Duplicates are kept;
/// relative link targets are dropped since a [`Url`] resource must be
/// fetchable on its own.
fn extract_urls(message_id: &str, payload: &MessagePayload) -> ResourceList<Url> {
    let Some(html) = html_body(payload) else {
        return ResourceList::Absent;
    };

    ResourceList::Present(
        HREF_PATTERN
            .captures_iter(&html)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str())
            .filter(|href| url::Url::parse(href).is_ok())
            .map(|href| Url::new(message_id, href))
            .collect(),
    )
}

/// Locate and decode the HTML body: either the payload itself is
/// `text/html`, or one of the top-level parts is. Nested parts are not
/// scanned (same single-level boundary as attachments).
fn html_body(payload: &MessagePayload) -> Option<String> {
    if payload
        .mime_type
        .as_ref()
        .is_some_and(|m| m.starts_with("text/html"))
        && let Some(body) = &payload.body
        && let Some(data) = &body.data
    {
        return decode_base64_body(data);
    }

    for part in payload.parts.as_deref().unwrap_or(&[]) {
        if part
            .mime_type
            .as_ref()
            .is_some_and(|m| m.starts_with("text/html"))
            && let Some(body) = &part.body
            && let Some(data) = &body.data
            && let Some(html) = decode_base64_body(data)
        {
            return Some(html);
        }
    }

    None
}

/// Decode base64-encoded body data.
///
/// Gmail uses URL-safe base64 but padding can vary, so several decoders
/// are tried in turn.
fn decode_base64_body(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    for decoder in decoders {
        if let Ok(decoded) = decoder.decode(data)
            && let Ok(s) = String::from_utf8(decoded)
        {
            return Some(s);
        }
    }

    None
}
