//! Resource value types: attachments, embedded URLs and retrieved files

use super::MessageId;

/// Reference to a file attached to a mailbox message.
///
/// Holds only the identifiers needed to retrieve the bytes later, never
/// the bytes themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// ID of the message this attachment belongs to
    pub message_id: MessageId,
    /// Attachment ID within that message
    pub attachment_id: String,
    /// Display name as it appears in the message
    pub name: String,
}

impl Attachment {
    pub fn new(
        message_id: impl Into<MessageId>,
        attachment_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            attachment_id: attachment_id.into(),
            name: name.into(),
        }
    }
}

/// An absolute URL extracted from a message's HTML body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    /// ID of the message the link was found in
    pub message_id: MessageId,
    /// The hyperlink target
    pub url: String,
}

impl Url {
    pub fn new(message_id: impl Into<MessageId>, url: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            url: url.into(),
        }
    }
}

/// Resolved filename plus byte payload for one fetched resource.
///
/// Produced per fetch and consumed once by the format decoder; never
/// cached or reused across fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedFile {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl RetrievedFile {
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            data,
        }
    }
}
