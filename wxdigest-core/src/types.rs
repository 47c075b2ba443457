//! Core domain types for wxdigest
//!
//! These types are the canonical, store-independent data model that flows
//! through the digest pipeline.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Store** | The local SQLite database holding message history |
//! | **Account** | One per-user data directory under the chat data root |
//! | **Room** | A group conversation, identified by a stable internal id |
//! | **Canonical message** | A normalized message row, see [`CanonicalMessage`] |
//! | **Topic** | One extracted discussion unit, see [`Topic`] |
//! | **Instrument** | A stock or other financial instrument mentioned in a topic |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

// ============================================
// Accounts and rooms
// ============================================

/// A per-account data directory discovered under the chat data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountHandle {
    /// Directory name, usually the account's wxid
    pub id: String,
    /// Full path to the account directory
    pub path: PathBuf,
}

/// A group conversation as listed by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoomDescriptor {
    /// Stable join key into the message table
    pub id: String,
    /// Display name (may be empty)
    pub display_name: String,
    /// Alternative name such as a nickname (may be empty)
    pub alt_name: String,
}

impl RoomDescriptor {
    /// Best-effort human label: display name, then alt name, then id.
    pub fn label(&self) -> &str {
        [&self.display_name, &self.alt_name]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or(self.id.as_str())
    }

    /// Whether a user-supplied target (id or name fragment) selects this room.
    pub fn matches(&self, target: &str) -> bool {
        let target = target.trim();
        if target.is_empty() {
            return false;
        }
        self.id.contains(target)
            || self.display_name.contains(target)
            || self.alt_name.contains(target)
    }
}

/// A contact row, used to turn sender ids into readable names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    pub nickname: String,
    pub remark: String,
}

impl Contact {
    /// Remark (user-assigned) wins over nickname, then the raw id.
    pub fn label(&self) -> &str {
        [&self.remark, &self.nickname]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or(self.id.as_str())
    }
}

// ============================================
// Messages
// ============================================

/// Message type codes used by the store.
///
/// Unknown codes are kept as [`MessageType::Other`] rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum MessageType {
    Text,
    Image,
    Voice,
    Video,
    Sticker,
    /// Shared links, files and mini-program cards
    LinkOrFile,
    /// System notifications (joins, recalls, red packets ...)
    System,
    Other(i64),
}

impl MessageType {
    /// Reserved code for system notifications.
    pub const SYSTEM_CODE: i64 = 10000;

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => MessageType::Text,
            3 => MessageType::Image,
            34 => MessageType::Voice,
            43 => MessageType::Video,
            47 => MessageType::Sticker,
            49 => MessageType::LinkOrFile,
            Self::SYSTEM_CODE => MessageType::System,
            other => MessageType::Other(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            MessageType::Text => 1,
            MessageType::Image => 3,
            MessageType::Voice => 34,
            MessageType::Video => 43,
            MessageType::Sticker => 47,
            MessageType::LinkOrFile => 49,
            MessageType::System => Self::SYSTEM_CODE,
            MessageType::Other(code) => *code,
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            MessageType::Text => "text".to_string(),
            MessageType::Image => "image".to_string(),
            MessageType::Voice => "voice".to_string(),
            MessageType::Video => "video".to_string(),
            MessageType::Sticker => "sticker".to_string(),
            MessageType::LinkOrFile => "link/file".to_string(),
            MessageType::System => "system".to_string(),
            MessageType::Other(code) => format!("type {}", code),
        }
    }
}

impl From<i64> for MessageType {
    fn from(code: i64) -> Self {
        MessageType::from_code(code)
    }
}

impl From<MessageType> for i64 {
    fn from(t: MessageType) -> Self {
        t.code()
    }
}

/// A normalized message record.
///
/// Created once per raw store row by [`crate::normalize::normalize`] and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalMessage {
    /// Store-local id; not unique across rooms and may be empty
    pub id: String,
    /// Originating room, `None` for direct messages
    pub room_id: Option<String>,
    /// Human-readable sender
    pub sender: String,
    /// Text payload, empty for non-text types
    pub content: String,
    pub msg_type: MessageType,
    /// Seconds resolution; the Unix epoch marks a missing source value
    pub timestamp: DateTime<Utc>,
    /// Sent by the local account
    pub is_outgoing: bool,
}

impl CanonicalMessage {
    /// Whether the source row actually carried a timestamp.
    pub fn has_timestamp(&self) -> bool {
        self.timestamp.timestamp() > 0
    }
}

// ============================================
// Analysis results
// ============================================

/// A financial instrument mentioned in a topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Instrument {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    /// Ticker or exchange code; models sometimes emit these as numbers
    #[serde(deserialize_with = "lenient_string")]
    pub code: String,
    /// The group's view on the instrument
    #[serde(deserialize_with = "lenient_string")]
    pub view: String,
}

/// One extracted discussion topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topic {
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub discussion: String,
    #[serde(deserialize_with = "lenient_string")]
    pub conclusion: String,
    /// `None` when the model omitted the field, `Some(vec![])` when it said "none"
    #[serde(rename = "stocks", skip_serializing_if = "Option::is_none")]
    pub instruments: Option<Vec<Instrument>>,
}

/// Accepts `null`, numbers and booleans where a string is expected.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Structured result of a model analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub topics: Vec<Topic>,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}
