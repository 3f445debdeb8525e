//! Domain models for the tap

mod message;
mod resource;

pub use message::{Message, MessageId, ResourceList};
pub use resource::{Attachment, RetrievedFile, Url};
