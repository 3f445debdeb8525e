//! Message model representing one normalized mailbox entry

use regex::Regex;

use super::{Attachment, Url};

/// Unique identifier for a message (mailbox message ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A resource list that distinguishes "no resources of this kind exist"
/// from "resources existed but were filtered down to nothing".
///
/// Downstream logic branches on this distinction, so it is a tagged
/// container rather than a bare `Option<Vec<T>>` scattered through call
/// sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceList<T> {
    /// The message carries no resources of this kind at all
    Absent,
    /// The message carries resources of this kind (possibly filtered to zero)
    Present(Vec<T>),
}

impl<T> ResourceList<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, ResourceList::Absent)
    }

    /// Items to iterate over; an absent list yields nothing
    pub fn items(&self) -> &[T] {
        match self {
            ResourceList::Absent => &[],
            ResourceList::Present(items) => items,
        }
    }

    /// Keep only items matching the predicate. Absent stays absent;
    /// a present list with zero matches becomes present-but-empty.
    fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        if let ResourceList::Present(items) = self {
            items.retain(|item| keep(item));
        }
    }
}

impl<T> Default for ResourceList<T> {
    fn default() -> Self {
        ResourceList::Absent
    }
}

/// A normalized mailbox message: ordering timestamp, resource lists and
/// the few headers the tap cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Mailbox message ID
    pub id: MessageId,
    /// Source-provided internal timestamp, epoch milliseconds.
    /// This is the authoritative ordering key for the whole pipeline.
    pub internal_date: i64,
    /// Mailbox label IDs
    pub label_ids: Vec<String>,
    /// File attachments, in document order
    pub attachments: ResourceList<Attachment>,
    /// Hyperlinks extracted from the HTML body, in document order
    pub urls: ResourceList<Url>,
    /// "To" header value, if present
    pub to: Option<String>,
    /// "From" header value, if present
    pub from: Option<String>,
    /// "Subject" header value, if present
    pub subject: Option<String>,
}

impl Message {
    /// Narrow both resource lists to entries matching `pattern`.
    ///
    /// The pattern is applied with substring-search semantics (not a full
    /// match) against attachment display names and URL strings
    /// independently. Original order is preserved; an absent list stays
    /// absent.
    pub fn filter(&mut self, pattern: &Regex) {
        self.attachments.retain(|a| pattern.is_match(&a.name));
        self.urls.retain(|u| pattern.is_match(&u.url));
    }
}
