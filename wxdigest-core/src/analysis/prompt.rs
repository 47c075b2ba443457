//! Prompt construction for topic extraction.

use crate::types::CanonicalMessage;
use crate::window::TimeWindow;

/// Only this many messages are sent to the model; the rest are dropped.
pub const MAX_PROMPT_MESSAGES: usize = 500;

/// System role text sent with every analysis request.
pub const SYSTEM_PROMPT: &str = "You are a professional group-chat analyst. Read the discussion carefully and extract structured information exactly as requested.";

const NO_MESSAGES: &str = "(no messages)";

/// Build the user prompt for `messages` inside `window`.
///
/// Messages beyond [`MAX_PROMPT_MESSAGES`] are ignored. Each kept message is
/// rendered as `[HH:MM] sender: content` in the window's time zone; a message
/// without a timestamp shows `??:??`.
pub fn build(messages: &[CanonicalMessage], window: &TimeWindow) -> String {
    let lines: Vec<String> = messages
        .iter()
        .take(MAX_PROMPT_MESSAGES)
        .map(|m| format_line(m, window))
        .collect();
    let transcript = if lines.is_empty() {
        NO_MESSAGES.to_string()
    } else {
        lines.join("\n")
    };

    format!(
        r#"Analyze the following group discussion (time range: {bounds}) and extract:

Topics: every topic discussed, with a short title.
Discussion: the detailed discussion and the conclusion reached for each topic.
Instruments: every stock mentioned in each topic, with its name, ticker code and the group's view on it.

---
{transcript}
---

Return the result in exactly this JSON format, with no other text:
{{
    "topics": [
        {{
            "title": "topic title",
            "discussion": "detailed discussion",
            "conclusion": "conclusion",
            "stocks": [
                {{
                    "name": "stock name",
                    "code": "ticker code",
                    "view": "view on the stock"
                }}
            ]
        }}
    ]
}}
"#,
        bounds = window.format_bounds(),
        transcript = transcript
    )
}

fn format_line(message: &CanonicalMessage, window: &TimeWindow) -> String {
    let time = if message.has_timestamp() {
        message
            .timestamp
            .with_timezone(&window.tz())
            .format("%H:%M")
            .to_string()
    } else {
        "??:??".to_string()
    };
    let sender = if message.sender.trim().is_empty() {
        "unknown"
    } else {
        message.sender.as_str()
    };
    format!("[{}] {}: {}", time, sender, message.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageType;
    use chrono::{DateTime, TimeZone, Utc};

    fn message(ts: DateTime<Utc>, sender: &str, content: &str) -> CanonicalMessage {
        CanonicalMessage {
            id: String::new(),
            room_id: None,
            sender: sender.to_string(),
            content: content.to_string(),
            msg_type: MessageType::Text,
            timestamp: ts,
            is_outgoing: false,
        }
    }

    #[test]
    fn lines_use_window_time_zone() {
        let window = TimeWindow::specific_date("2024-08-20", chrono_tz::Asia::Shanghai).unwrap();
        // 01:30 UTC is 09:30 in Shanghai
        let ts = Utc.with_ymd_and_hms(2024, 8, 20, 1, 30, 0).unwrap();
        let prompt = build(&[message(ts, "Alice", "NVDA beat")], &window);

        assert!(prompt.contains("[09:30] Alice: NVDA beat"));
        assert!(prompt.contains("2024-08-20 00:00 - 23:59"));
        assert!(prompt.contains(r#""stocks""#));
    }

    #[test]
    fn missing_timestamp_renders_placeholder() {
        let window = TimeWindow::specific_date("2024-08-20", chrono_tz::UTC).unwrap();
        let prompt = build(&[message(DateTime::<Utc>::UNIX_EPOCH, "Bob", "hi")], &window);
        assert!(prompt.contains("[??:??] Bob: hi"));
    }

    #[test]
    fn truncates_to_prompt_cap() {
        let window = TimeWindow::specific_date("2024-08-20", chrono_tz::UTC).unwrap();
        let ts = window.start();
        let messages: Vec<_> = (0..MAX_PROMPT_MESSAGES + 20)
            .map(|i| message(ts, "u", &format!("msg-{i:04}")))
            .collect();
        let prompt = build(&messages, &window);

        assert!(prompt.contains("msg-0499"));
        assert!(!prompt.contains("msg-0500"));
    }

    #[test]
    fn empty_input_is_marked() {
        let window = TimeWindow::specific_date("2024-08-20", chrono_tz::UTC).unwrap();
        assert!(build(&[], &window).contains(NO_MESSAGES));
    }
}
