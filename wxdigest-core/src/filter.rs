//! Filter chain over canonical messages.
//!
//! Every function here is a pure transform: it consumes a message list and
//! returns a new one, never reordering except for [`sort_by_time`].
//!
//! | Stage | Function | Keeps |
//! |-------|----------|-------|
//! | time | [`filter_by_time`] | timestamps inside the window (inclusive) |
//! | room | [`filter_by_room`] | messages from the listed rooms |
//! | type | [`filter_by_type`] | messages of the listed types |
//! | content | [`filter_content`] | trimmed content of at least `min_length` chars |
//! | system | [`filter_system_messages`] | everything except system notices |
//! | sort | [`sort_by_time`] | all, ascending by time (stable) |
//! | cap | [`limit_messages`] | at most `limit`, chosen by [`CapStrategy`] |
//!
//! [`apply`] runs the stages in that order using a [`FilterOptions`].

use serde::{Deserialize, Serialize};

use crate::types::{CanonicalMessage, MessageType};
use crate::window::TimeWindow;

/// How [`limit_messages`] picks survivors when over the cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapStrategy {
    /// The last `limit` messages
    #[default]
    Recent,
    /// The first `limit` messages
    Oldest,
    /// `limit` messages at evenly spaced indices
    Sample,
}

impl CapStrategy {
    /// Parse a strategy name, falling back to [`CapStrategy::Recent`] for
    /// anything unrecognized.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "oldest" => CapStrategy::Oldest,
            "sample" => CapStrategy::Sample,
            "recent" => CapStrategy::Recent,
            other => {
                tracing::debug!(strategy = other, "Unknown cap strategy, using recent");
                CapStrategy::Recent
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CapStrategy::Recent => "recent",
            CapStrategy::Oldest => "oldest",
            CapStrategy::Sample => "sample",
        }
    }
}

impl std::fmt::Display for CapStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for [`apply`].
///
/// Defaults: no room or type restriction, `min_content_length` 1,
/// `strategy` [`CapStrategy::Recent`], `max_messages` 500.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOptions {
    /// Room ids to keep; `None` keeps all rooms
    pub rooms: Option<Vec<String>>,
    /// Types to keep; `None` keeps all types
    pub types: Option<Vec<MessageType>>,
    pub min_content_length: usize,
    pub strategy: CapStrategy,
    pub max_messages: usize,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            rooms: None,
            types: None,
            min_content_length: 1,
            strategy: CapStrategy::Recent,
            max_messages: 500,
        }
    }
}

/// Run the full chain: time, room, type, content, system, sort, cap.
pub fn apply(
    messages: Vec<CanonicalMessage>,
    window: &TimeWindow,
    options: &FilterOptions,
) -> Vec<CanonicalMessage> {
    let input = messages.len();
    let mut out = filter_by_time(messages, window);
    if let Some(rooms) = &options.rooms {
        out = filter_by_room(out, rooms);
    }
    if let Some(types) = &options.types {
        out = filter_by_type(out, types);
    }
    out = filter_content(out, options.min_content_length);
    out = filter_system_messages(out);
    out = sort_by_time(out);
    out = limit_messages(out, options.max_messages, options.strategy);

    tracing::debug!(
        input,
        output = out.len(),
        strategy = %options.strategy,
        "Applied filter chain"
    );
    out
}

/// Keep messages whose timestamp lies in the window. Input order is kept.
pub fn filter_by_time(messages: Vec<CanonicalMessage>, window: &TimeWindow) -> Vec<CanonicalMessage> {
    messages
        .into_iter()
        .filter(|m| window.contains(&m.timestamp))
        .collect()
}

/// Keep messages from any of `room_ids`. Direct messages never match.
pub fn filter_by_room(messages: Vec<CanonicalMessage>, room_ids: &[String]) -> Vec<CanonicalMessage> {
    messages
        .into_iter()
        .filter(|m| {
            m.room_id
                .as_ref()
                .is_some_and(|id| room_ids.iter().any(|r| r == id))
        })
        .collect()
}

pub fn filter_by_type(messages: Vec<CanonicalMessage>, types: &[MessageType]) -> Vec<CanonicalMessage> {
    messages
        .into_iter()
        .filter(|m| types.contains(&m.msg_type))
        .collect()
}

/// Drop messages whose trimmed content has fewer than `min_length` characters.
pub fn filter_content(messages: Vec<CanonicalMessage>, min_length: usize) -> Vec<CanonicalMessage> {
    messages
        .into_iter()
        .filter(|m| m.content.trim().chars().count() >= min_length)
        .collect()
}

pub fn filter_system_messages(messages: Vec<CanonicalMessage>) -> Vec<CanonicalMessage> {
    messages
        .into_iter()
        .filter(|m| m.msg_type != MessageType::System)
        .collect()
}

/// Ascending by timestamp; equal timestamps keep their input order.
pub fn sort_by_time(mut messages: Vec<CanonicalMessage>) -> Vec<CanonicalMessage> {
    messages.sort_by_key(|m| m.timestamp);
    messages
}

/// Cap the list at `limit` entries without reordering.
///
/// Lists already within the cap are returned unchanged.
pub fn limit_messages(
    messages: Vec<CanonicalMessage>,
    limit: usize,
    strategy: CapStrategy,
) -> Vec<CanonicalMessage> {
    let len = messages.len();
    if len <= limit {
        return messages;
    }
    match strategy {
        CapStrategy::Recent => messages.into_iter().skip(len - limit).collect(),
        CapStrategy::Oldest => messages.into_iter().take(limit).collect(),
        CapStrategy::Sample => {
            let keep = sample_indices(len, limit);
            messages
                .into_iter()
                .enumerate()
                .filter(|(i, _)| keep.binary_search(i).is_ok())
                .map(|(_, m)| m)
                .collect()
        }
    }
}

/// `floor(i * len / limit)` for `i` in `0..limit`; strictly increasing when
/// `limit <= len`.
fn sample_indices(len: usize, limit: usize) -> Vec<usize> {
    (0..limit).map(|i| i * len / limit).collect()
}
