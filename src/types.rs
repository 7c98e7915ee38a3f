//! Core types: activity records, export state and events

use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// Identifier of a conversation on the communication platform
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Prefix every conversation identifier starts with
    pub const PREFIX: &'static str = "CN";

    /// Resolve an identifier from a bare id or a conversation page URL
    ///
    /// The first path segment starting with `CN` wins, so
    /// `https://my.openphone.com/inbox/PN1/c/CNabc?tab=1` resolves to `CNabc`.
    pub fn resolve(input: &str) -> Result<Self> {
        let input = input.trim();

        let found = match url::Url::parse(input) {
            Ok(url) => url
                .path_segments()
                .and_then(|mut segments| segments.find(|s| Self::is_candidate(s)))
                .map(str::to_string),
            Err(_) => input
                .split('/')
                .find(|s| Self::is_candidate(s))
                .map(str::to_string),
        };

        found
            .map(Self)
            .ok_or_else(|| Error::MissingConversationIdentifier(input.to_string()))
    }

    fn is_candidate(segment: &str) -> bool {
        segment.len() > Self::PREFIX.len() && segment.starts_with(Self::PREFIX)
    }

    /// The identifier as sent to the API
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message direction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Received by the workspace
    Incoming,
    /// Sent from the workspace
    Outgoing,
}

impl Direction {
    /// Transcript marker: `<<<` for incoming, `>>>` otherwise
    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::Incoming => "<<<",
            Direction::Outgoing => ">>>",
        }
    }
}

/// Reference to a media attachment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaRef {
    /// Absolute URL of the binary content
    pub url: String,
    /// MIME type, empty when the API omitted it
    pub mime_type: String,
}

/// AI-generated call summary
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    /// Summary lines
    #[serde(default, deserialize_with = "null_as_default")]
    pub summary: Vec<String>,
    /// Follow-up actions
    #[serde(default, deserialize_with = "null_as_default")]
    pub next_steps: Vec<String>,
}

/// One speaker turn in a call transcript
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTurn {
    /// Speaker, if the platform identified one
    #[serde(default)]
    pub identifier: Option<String>,
    /// What was said
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
}

impl DialogueTurn {
    /// Speaker name, `Unknown` when absent
    pub fn speaker(&self) -> &str {
        self.identifier.as_deref().unwrap_or("Unknown")
    }
}

/// Call transcript
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTranscript {
    /// Speaker turns in order
    #[serde(default, deserialize_with = "null_as_default")]
    pub dialogue: Vec<DialogueTurn>,
}

/// Variant-specific part of an activity
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActivityKind {
    /// A text message
    Message {
        /// Incoming or outgoing
        direction: Direction,
        /// Text content, `None` for media-only messages
        body: Option<String>,
    },
    /// A phone call
    Call {
        /// Summary, if one was generated
        summary: Option<CallSummary>,
        /// Transcript, if one was generated
        transcript: Option<CallTranscript>,
    },
    /// Any other activity type (voicemail greetings, system notices, ...)
    Other {
        /// The raw `type` tag
        kind: String,
    },
}

/// One event in a conversation
///
/// Parsed from the API's JSON object; the original object is kept verbatim
/// so the full log can be dumped exactly as received.
#[derive(Clone, Debug)]
pub struct ActivityRecord {
    /// Opaque identifier
    pub id: String,
    /// When the activity happened
    pub created_at: DateTime<Utc>,
    /// Sender identifier (usually an E.164 phone number)
    pub from: Option<String>,
    /// Attached media in API order
    pub media: Vec<MediaRef>,
    /// Variant-specific fields
    pub kind: ActivityKind,
    raw: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireActivity {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    created_at: Option<serde_json::Value>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    media: Vec<WireMedia>,
    #[serde(default)]
    call_summary: Option<CallSummary>,
    #[serde(default)]
    call_transcript: Option<CallTranscript>,
}

#[derive(Deserialize)]
struct WireMedia {
    #[serde(default)]
    url: Option<String>,
    #[serde(rename = "type", alias = "mimeType", default)]
    mime_type: Option<String>,
}

impl ActivityRecord {
    /// Interpret one element of the API's `result` array
    pub fn from_value(raw: serde_json::Value) -> Result<Self> {
        let wire = WireActivity::deserialize(&raw).map_err(|e| Error::InvalidActivity {
            id: raw
                .get("id")
                .map(value_to_id)
                .unwrap_or_else(|| "<unknown>".to_string()),
            reason: e.to_string(),
        })?;

        let id = wire.id.as_ref().map(value_to_id).unwrap_or_default();
        let created_at = match &wire.created_at {
            Some(value) => parse_timestamp(value).ok_or_else(|| Error::InvalidActivity {
                id: id.clone(),
                reason: format!("unparseable createdAt {}", value),
            })?,
            None => {
                return Err(Error::InvalidActivity {
                    id,
                    reason: "missing createdAt".to_string(),
                });
            }
        };

        let media = wire
            .media
            .into_iter()
            .filter_map(|m| match m.url {
                Some(url) if !url.is_empty() => Some(MediaRef {
                    url,
                    mime_type: m.mime_type.unwrap_or_default(),
                }),
                _ => None,
            })
            .collect();

        let kind = match wire.kind.as_deref() {
            Some("message") => ActivityKind::Message {
                direction: match wire.direction.as_deref() {
                    Some("incoming") => Direction::Incoming,
                    _ => Direction::Outgoing,
                },
                body: wire.body,
            },
            Some("call") => ActivityKind::Call {
                summary: wire.call_summary,
                transcript: wire.call_transcript,
            },
            other => ActivityKind::Other {
                kind: other.unwrap_or_default().to_string(),
            },
        };

        Ok(Self {
            id,
            created_at,
            from: wire.from.filter(|f| !f.is_empty()),
            media,
            kind,
            raw,
        })
    }

    /// Sender for display, `System` when absent
    pub fn sender(&self) -> &str {
        self.from.as_deref().unwrap_or("System")
    }

    /// The JSON object exactly as the API returned it
    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }
}

impl Serialize for ActivityRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

fn value_to_id(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Accepts RFC 3339 strings and epoch milliseconds
fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Pagination block of an activity page
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Whether older records exist
    #[serde(default)]
    pub has_previous_page: bool,
    /// Identifier of the oldest record on this page (the next `before` cursor)
    #[serde(default)]
    pub start_id: Option<String>,
}

/// One response from the activity endpoint
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPage {
    /// Raw activity objects
    #[serde(default, deserialize_with = "null_as_default")]
    pub result: Vec<serde_json::Value>,
    /// Pagination info; absent means no further pages
    #[serde(default)]
    pub page_info: Option<PageInfo>,
}

/// Where an export run currently is
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    /// Ready to start a run
    #[default]
    Idle,
    /// Reading the credential
    FetchingCredential,
    /// Paging through the activity endpoint
    FetchingPages,
    /// Bucketing activities by date
    Classifying,
    /// Downloading media and rendering call summaries
    MaterializingAssets,
    /// Encoding and saving the ZIP
    Serializing,
    /// The run finished successfully
    Done,
    /// The run stopped on a fatal error
    Failed,
}

/// Event emitted during an export run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The run moved to a new state
    StateChanged {
        /// New state
        state: ExportState,
    },

    /// An activity page was fetched
    PageFetched {
        /// 1-based page number
        page: u32,
        /// Records fetched so far
        total: usize,
    },

    /// Pagination finished
    FetchComplete {
        /// Total records fetched
        total: usize,
    },

    /// A media fetch failed; the file is omitted from the archive
    AssetFailed {
        /// Media URL
        url: String,
        /// Error message
        error: String,
    },

    /// The archive was written
    Completed {
        /// Archive filename
        file_name: String,
        /// Where it was saved
        path: PathBuf,
        /// Number of activities exported
        activities: usize,
        /// Media files included
        media_written: usize,
        /// Media files that could not be fetched
        media_failed: usize,
    },

    /// The run stopped on a fatal error
    Failed {
        /// User-facing error message
        error: String,
    },
}
