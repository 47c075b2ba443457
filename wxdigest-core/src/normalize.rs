//! Raw store rows to [`CanonicalMessage`]s.
//!
//! Store columns are loosely typed: the same logical field may arrive as an
//! integer, a real or a numeric string depending on the client version that
//! wrote it. Everything here is pure and never fails hard; a row that cannot
//! be understood yields `None` and the caller skips it.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;

use crate::types::{CanonicalMessage, MessageType};

/// Epoch values above this are taken to be milliseconds.
///
/// This is a heuristic: second-resolution timestamps stay below it until the
/// year 33658, while millisecond timestamps after September 2001 exceed it. A
/// store that switches to another epoch unit would be misclassified silently.
pub const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Suffix the store uses for group conversation ids.
pub const ROOM_ID_SUFFIX: &str = "@chatroom";

/// One message row as read from whichever table variant the store uses.
///
/// Columns a variant does not have are [`Value::Null`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessageRow {
    pub local_id: Value,
    /// Conversation id: a room id or the peer of a direct chat
    pub talker: Value,
    /// Explicit sender column, when the variant has one
    pub sender: Value,
    pub content: Value,
    pub msg_type: Value,
    pub create_time: Value,
    pub is_sender: Value,
}

impl Default for RawMessageRow {
    fn default() -> Self {
        Self {
            local_id: Value::Null,
            talker: Value::Null,
            sender: Value::Null,
            content: Value::Null,
            msg_type: Value::Null,
            create_time: Value::Null,
            is_sender: Value::Null,
        }
    }
}

/// Convert a raw row, or `None` if it should be skipped.
///
/// `allowed` limits the message types the run cares about; an empty slice
/// accepts every type, including codes this crate does not know.
pub fn normalize(raw: &RawMessageRow, allowed: &[MessageType]) -> Option<CanonicalMessage> {
    let msg_type = MessageType::from_code(value_as_i64(&raw.msg_type)?);
    if !allowed.is_empty() && !allowed.contains(&msg_type) {
        return None;
    }

    let timestamp = match &raw.create_time {
        Value::Null => DateTime::<Utc>::UNIX_EPOCH,
        other => epoch_to_datetime(value_as_i64(other)?)?,
    };

    let talker = value_as_string(&raw.talker);
    let room_id = talker
        .ends_with(ROOM_ID_SUFFIX)
        .then(|| talker.clone());
    let is_outgoing = value_as_i64(&raw.is_sender).is_some_and(|v| v == 1);

    let mut content = match msg_type {
        MessageType::Image | MessageType::Voice | MessageType::Video | MessageType::Sticker => {
            String::new()
        }
        _ => value_as_string(&raw.content),
    };

    // Only rows written by other members carry the sender prefix.
    let prefixed = room_id
        .as_ref()
        .filter(|_| !is_outgoing)
        .and_then(|_| split_sender_prefix(&content))
        .map(|(id, text)| (id.to_string(), text.to_string()));

    let explicit_sender = value_as_string(&raw.sender);
    let raw_sender = if let Some((id, text)) = prefixed {
        content = text;
        if explicit_sender.trim().is_empty() {
            id
        } else {
            explicit_sender
        }
    } else if !explicit_sender.trim().is_empty() {
        explicit_sender
    } else if is_outgoing {
        "me".to_string()
    } else {
        talker.clone()
    };

    Some(CanonicalMessage {
        id: value_as_string(&raw.local_id),
        room_id,
        sender: clean_sender(&raw_sender),
        content,
        msg_type,
        timestamp,
        is_outgoing,
    })
}

/// Keep the human-readable tail of a sender string.
///
/// Handles `technical-id\ndisplay-name` and `technical-id:display-name`; only
/// the first `:` separates the id, so names may contain colons.
pub fn clean_sender(raw: &str) -> String {
    let trimmed = raw.trim();
    let tail = if trimmed.contains('\n') {
        trimmed.lines().map(str::trim).filter(|l| !l.is_empty()).last()
    } else if let Some((id, name)) = trimmed.split_once(':') {
        [name.trim(), id.trim()].into_iter().find(|s| !s.is_empty())
    } else {
        None
    };
    tail.unwrap_or(trimmed).to_string()
}

/// Seconds since the epoch, dividing by 1000 when the value looks like
/// milliseconds (see [`MILLIS_THRESHOLD`]).
pub fn normalize_epoch(value: i64) -> i64 {
    if value > MILLIS_THRESHOLD {
        value / 1000
    } else {
        value
    }
}

fn epoch_to_datetime(value: i64) -> Option<DateTime<Utc>> {
    if value < 0 {
        return None;
    }
    DateTime::from_timestamp(normalize_epoch(value), 0)
}

/// Group rows written by other members carry `sender-id:\n` before the text.
fn split_sender_prefix(content: &str) -> Option<(&str, &str)> {
    let (prefix, rest) = content.split_once(":\n")?;
    let looks_like_id = !prefix.is_empty()
        && prefix.len() <= 64
        && !prefix.chars().any(char::is_whitespace);
    looks_like_id.then_some((prefix, rest))
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Real(f) if f.is_finite() => Some(*f as i64),
        Value::Text(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    }
}

pub(crate) fn value_as_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
    }
}
