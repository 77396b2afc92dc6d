//! Jetstream message types and the trigger payload derived from them.
//!
//! The [`StreamEvent`] struct mirrors one JSON message from the Jetstream
//! firehose. Only the fields the dispatcher inspects are modelled; the rest
//! of the record is kept as raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Collection type of a Bluesky post record.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Kind of a Jetstream message.
///
/// Anything other than `commit` (identity, account, ...) decodes to
/// [`EventKind::Other`].
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Commit,
    #[serde(other)]
    Other,
}

/// Mutation carried by a commit.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
    #[serde(other)]
    Other,
}

/// The commit body of a Jetstream message.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Commit {
    pub operation: Operation,

    /// Collection NSID (e.g., "app.bsky.feed.post")
    #[serde(default)]
    pub collection: String,

    /// Record payload; absent for deletes
    #[serde(default)]
    pub record: Value,
}

impl Commit {
    /// Text of the record, or an empty string when the record has none.
    pub fn text(&self) -> &str {
        self.record
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// One message received from the stream.
///
/// # Example
///
/// ```json
/// {
///   "kind": "commit",
///   "did": "did:plc:abc",
///   "commit": {
///     "operation": "create",
///     "collection": "app.bsky.feed.post",
///     "record": { "text": "hello" }
///   }
/// }
/// ```
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamEvent {
    pub kind: EventKind,

    /// DID of the account that emitted the event
    #[serde(default)]
    pub did: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<Commit>,
}

impl StreamEvent {
    /// Decode a raw stream message.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Payload sent to the workflow-trigger endpoint.
///
/// The field names on the wire are fixed by the control API.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TriggerPayload {
    /// Internal id of the author, in the shape the control API returned it
    #[serde(rename = "tweet_author_id")]
    pub subject_internal_id: Value,

    #[serde(rename = "tweet_content")]
    pub content_text: String,
}

impl TriggerPayload {
    pub fn new(subject_internal_id: Value, content_text: impl Into<String>) -> Self {
        Self {
            subject_internal_id,
            content_text: content_text.into(),
        }
    }
}
