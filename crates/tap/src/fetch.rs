//! File retrieval for message resources
//!
//! One capability, two variants: attachments are fetched through the
//! mailbox API (one call, base64url payload, the attachment's own display
//! name), URLs are fetched over plain HTTP (one HEAD to resolve the
//! filename, then one GET for the body). No caching: every fetch performs
//! exactly its stated network calls.

use anyhow::{Context, Result};
use base64::prelude::*;

use crate::mailbox::Mailbox;
use crate::models::{Attachment, RetrievedFile, Url};

/// Accepted MIME strings per known file extension.
///
/// Matching is by substring containment against the lowercased
/// `content-type` header value.
const SUPPORTED_MIME_TYPES: &[(&str, &[&str])] = &[
    ("csv", &["text/csv", "text/plain"]),
    (
        "xls",
        &[
            "application/excel",
            "application/vnd.ms-excel",
            "application/x-excel",
            "application/x-msexcel",
        ],
    ),
    (
        "xlsx",
        &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
    ),
    (
        "zip",
        &[
            "application/zip",
            "application/x-compressed",
            "application/x-zip-compressed",
            "multipart/x-zip",
        ],
    ),
];

/// Error raised when no filename can be determined for a URL resource
/// by any fallback step.
///
/// Fatal for the current run. Arguably a single unretrievable resource
/// should be skippable instead; revisit if this aborts real syncs.
#[derive(Debug, thiserror::Error)]
#[error("Could not determine a filename for URL resource: {url}")]
pub struct FileNameUnresolvable {
    pub url: String,
}

/// A message resource whose bytes can be retrieved.
///
/// Keeps the caller uniform across attachment and URL resources; the
/// mailbox handle is only used by the attachment variant.
pub trait FileSource {
    /// Name to show in logs before the real filename is known
    fn display_name(&self) -> &str;

    /// Retrieve the resource bytes and a resolved filename
    fn fetch_file(&self, mailbox: &dyn Mailbox) -> Result<RetrievedFile>;
}

impl FileSource for Attachment {
    fn display_name(&self) -> &str {
        &self.name
    }

    /// One attachment-fetch API call; the payload is base64url-decoded
    /// and paired with the attachment's own display name.
    fn fetch_file(&self, mailbox: &dyn Mailbox) -> Result<RetrievedFile> {
        let response = mailbox.get_attachment(self.message_id.as_str(), &self.attachment_id)?;
        let data = decode_base64_payload(&response.data).with_context(|| {
            format!("Failed to decode attachment payload for {}", self.name)
        })?;
        Ok(RetrievedFile::new(&self.name, data))
    }
}

impl FileSource for Url {
    fn display_name(&self) -> &str {
        &self.url
    }

    /// One HEAD to resolve the filename, then one GET for the body.
    fn fetch_file(&self, _mailbox: &dyn Mailbox) -> Result<RetrievedFile> {
        let head = ureq::head(&self.url)
            .call()
            .with_context(|| format!("HEAD request failed for {}", self.url))?;

        let content_type = header_value(&head, "content-type");
        let disposition = header_value(&head, "content-disposition");
        let file_name = resolve_url_filename(
            content_type.as_deref(),
            disposition.as_deref(),
            &self.url,
        )?;

        let mut response = ureq::get(&self.url)
            .call()
            .with_context(|| format!("GET request failed for {}", self.url))?;
        let data = response
            .body_mut()
            .read_to_vec()
            .with_context(|| format!("Failed to read body for {}", self.url))?;

        Ok(RetrievedFile::new(file_name, data))
    }
}

fn header_value(response: &ureq::http::Response<ureq::Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Resolve a filename for a URL resource.
///
/// Fallback order: `filename=` token in `content-disposition`, then the
/// URL's final path segment with any `?query` suffix stripped. If the
/// `content-type` maps to a known extension and the resolved name lacks
/// it, the extension is appended.
fn resolve_url_filename(
    content_type: Option<&str>,
    disposition: Option<&str>,
    url: &str,
) -> Result<String, FileNameUnresolvable> {
    let mut file_name = disposition
        .and_then(filename_from_disposition)
        .or_else(|| filename_from_url(url))
        .ok_or_else(|| FileNameUnresolvable {
            url: url.to_string(),
        })?;

    if let Some(extension) = content_type.and_then(extension_for_content_type) {
        file_name = add_extension(&file_name, extension);
    }

    Ok(file_name)
}

/// Pull a `filename=` token out of a `content-disposition` header value.
fn filename_from_disposition(disposition: &str) -> Option<String> {
    for chunk in disposition.split(';') {
        if let Some((_, rest)) = chunk.split_once("filename=") {
            let name = rest.trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Derive a filename from the URL's final path segment, stripping any
/// `?query` suffix. None when the segment is empty or there is no path.
fn filename_from_url(url: &str) -> Option<String> {
    let (_, last) = url.rsplit_once('/')?;
    let name = last.split('?').next().unwrap_or("").trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Map a `content-type` header value to a known file extension.
fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let content_type = content_type.to_lowercase();
    for (extension, mime_types) in SUPPORTED_MIME_TYPES {
        if mime_types.iter().any(|m| content_type.contains(m)) {
            return Some(extension);
        }
    }
    None
}

/// Append `.<extension>` unless the name already ends with it.
fn add_extension(file_name: &str, extension: &str) -> String {
    let name = file_name.trim();
    let suffix = format!(".{extension}");
    if name.ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{name}{suffix}")
    }
}

/// Decode a base64url payload, tolerating padding variants.
fn decode_base64_payload(data: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    decoders.iter().find_map(|d| d.decode(data).ok())
}
