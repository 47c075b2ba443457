//! Known table layouts of the message store.
//!
//! Different client versions name tables and columns differently. Each layout
//! is a variant in a prioritized list; the reader probes them in order with
//! `PRAGMA table_info` and uses the first one whose required columns exist.
//! SQLite identifiers are case-insensitive, so `MSG.Type` and `msg.type` are
//! the same column.

use rusqlite::Connection;
use std::collections::HashSet;

/// Column map for a table that lists rooms.
#[derive(Debug, Clone, Copy)]
pub struct RoomVariant {
    pub table: &'static str,
    pub id: &'static str,
    pub display_name: Option<&'static str>,
    pub alt_name: Option<&'static str>,
    /// Extra `WHERE` condition, for tables that mix rooms with other rows
    pub condition: Option<&'static str>,
}

/// Room table layouts, most preferred first.
pub const ROOM_VARIANTS: &[RoomVariant] = &[
    RoomVariant {
        table: "ChatRoom",
        id: "ChatRoomName",
        display_name: Some("DisplayName"),
        alt_name: Some("nickname"),
        condition: None,
    },
    RoomVariant {
        table: "ChatRoomInfo",
        id: "ChatRoomName",
        display_name: Some("DisplayName"),
        alt_name: Some("nickname"),
        condition: None,
    },
    RoomVariant {
        table: "Contact",
        id: "UserName",
        display_name: Some("Remark"),
        alt_name: Some("NickName"),
        condition: Some("UserName LIKE '%@chatroom'"),
    },
];

/// Column map for a message table.
#[derive(Debug, Clone, Copy)]
pub struct MessageVariant {
    /// Short name used in logs
    pub name: &'static str,
    pub table: &'static str,
    pub id: &'static str,
    pub talker: &'static str,
    pub sender: Option<&'static str>,
    pub content: &'static str,
    pub msg_type: &'static str,
    pub create_time: &'static str,
    pub is_sender: Option<&'static str>,
}

impl MessageVariant {
    fn required(&self) -> [&'static str; 5] {
        [
            self.id,
            self.talker,
            self.content,
            self.msg_type,
            self.create_time,
        ]
    }

    /// Optional columns are only selected when the table actually has them.
    pub fn resolve(&self, columns: &HashSet<String>) -> Option<MessageVariant> {
        let has = |c: &str| columns.contains(&c.to_ascii_lowercase());
        if !self.required().iter().all(|c| has(c)) {
            return None;
        }
        Some(MessageVariant {
            sender: self.sender.filter(|c| has(c)),
            is_sender: self.is_sender.filter(|c| has(c)),
            ..*self
        })
    }
}

/// Message table layouts, most preferred first.
pub const MESSAGE_VARIANTS: &[MessageVariant] = &[
    // Desktop 3.x
    MessageVariant {
        name: "desktop",
        table: "MSG",
        id: "localId",
        talker: "StrTalker",
        sender: None,
        content: "StrContent",
        msg_type: "Type",
        create_time: "CreateTime",
        is_sender: Some("IsSender"),
    },
    // Older desktop exports
    MessageVariant {
        name: "desktop-legacy",
        table: "MSG",
        id: "localId",
        talker: "strTalker",
        sender: None,
        content: "StrContent",
        msg_type: "MsgType",
        create_time: "CreateTime",
        is_sender: Some("isSender"),
    },
    // Decrypted mobile database
    MessageVariant {
        name: "mobile",
        table: "message",
        id: "msgId",
        talker: "talker",
        sender: None,
        content: "content",
        msg_type: "type",
        create_time: "createTime",
        is_sender: Some("isSend"),
    },
];

/// Contact table used to resolve sender ids into names.
pub const CONTACT_TABLE: &str = "Contact";

/// Lowercased column names of `table`; empty if the table does not exist.
pub fn table_columns(conn: &Connection, table: &str) -> HashSet<String> {
    let sql = format!("PRAGMA table_info(\"{}\")", table);
    let mut columns = HashSet::new();
    let Ok(mut stmt) = conn.prepare(&sql) else {
        return columns;
    };
    let Ok(rows) = stmt.query_map([], |row| row.get::<_, String>("name")) else {
        return columns;
    };
    for name in rows.flatten() {
        columns.insert(name.to_ascii_lowercase());
    }
    columns
}
