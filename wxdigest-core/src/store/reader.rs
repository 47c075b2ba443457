//! Store reader
//!
//! Opens an account's message store read-only and exposes room listing and
//! filtered message retrieval. Schema lookups degrade across the variants in
//! [`super::schema`]; only the initial open reports hard failures.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OpenFlags};

use super::schema::{table_columns, MessageVariant, CONTACT_TABLE, MESSAGE_VARIANTS, ROOM_VARIANTS};
use crate::error::{Error, Result};
use crate::normalize::{normalize, value_as_string, RawMessageRow, MILLIS_THRESHOLD};
use crate::types::{AccountHandle, CanonicalMessage, Contact, MessageType, RoomDescriptor};

/// Directories under the data root that never hold an account.
pub const IGNORED_DIRS: &[&str] = &["All Users", "Applet", "WMPF", "msg"];

/// Subdirectory that marks a directory as an account.
pub const ACCOUNT_MARKER: &str = "MSG";

/// Store files to try, relative to the account directory.
pub const STORE_CANDIDATES: &[&str] = &["MSG/MSG.db", "MSG/MSG0.db", "MSG/MicroMsg.db"];

/// Scan `root` for account directories.
///
/// Returns an empty list (not an error) when no directory carries the account
/// marker. A missing `root` is reported as [`Error::DataDirNotFound`].
pub fn discover_accounts(root: &Path) -> Result<Vec<AccountHandle>> {
    if !root.is_dir() {
        return Err(Error::DataDirNotFound(root.to_path_buf()));
    }

    let pattern = format!(
        "{}/*/{}",
        glob::Pattern::escape(&root.to_string_lossy()),
        ACCOUNT_MARKER
    );
    let entries = glob::glob(&pattern)
        .map_err(|e| Error::Config(format!("invalid data directory pattern: {}", e)))?;

    let mut accounts = Vec::new();
    for marker in entries.flatten() {
        if !marker.is_dir() {
            continue;
        }
        let Some(account_dir) = marker.parent() else {
            continue;
        };
        let Some(name) = account_dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if IGNORED_DIRS.contains(&name.as_str()) {
            tracing::trace!(dir = %name, "Skipping system directory");
            continue;
        }
        accounts.push(AccountHandle {
            id: name,
            path: account_dir.to_path_buf(),
        });
    }

    accounts.sort_by(|a, b| a.id.cmp(&b.id));
    tracing::debug!(root = %root.display(), count = accounts.len(), "Discovered accounts");
    Ok(accounts)
}

/// Options for opening a store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Upper bound for any single query, including lock waits
    pub query_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(30),
        }
    }
}

/// Filters for [`StoreReader::fetch_messages`]. Every filter is optional and
/// active filters are ANDed.
#[derive(Debug, Clone)]
pub struct MessageQuery {
    pub room_id: Option<String>,
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Empty means all types
    pub types: Vec<MessageType>,
    pub limit: usize,
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            room_id: None,
            window: None,
            types: Vec::new(),
            limit: 500,
        }
    }
}

impl MessageQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.window = Some((start, end));
        self
    }

    pub fn types(mut self, types: &[MessageType]) -> Self {
        self.types = types.to_vec();
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// A read-only handle on one message store file.
///
/// The connection is released by [`StoreReader::close`] or on drop.
pub struct StoreReader {
    conn: Option<Connection>,
    path: PathBuf,
    query_timeout: Duration,
}

impl StoreReader {
    /// Find the store file of an account.
    pub fn locate(account: &AccountHandle) -> Result<PathBuf> {
        let candidates: Vec<PathBuf> = STORE_CANDIDATES
            .iter()
            .map(|rel| account.path.join(rel))
            .collect();
        candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or(Error::StoreNotFound(candidates))
    }

    /// Open the store of a discovered account.
    pub fn open(account: &AccountHandle, options: &StoreOptions) -> Result<Self> {
        let path = Self::locate(account)?;
        Self::open_path(&path, options)
    }

    /// Open an explicit store file.
    ///
    /// Fails with [`Error::StoreEncrypted`] when the file exists but SQLite
    /// cannot read it; key acquisition is left to the caller.
    pub fn open_path(path: &Path, options: &StoreOptions) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::StoreNotFound(vec![path.to_path_buf()]));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(options.query_timeout)?;

        // SQLite opens lazily; the first read is what detects an encrypted file.
        if let Err(e) = conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        }) {
            return match e.sqlite_error_code() {
                Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt) => {
                    Err(Error::StoreEncrypted {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })
                }
                _ => Err(Error::Database(e)),
            };
        }

        tracing::info!(path = %path.display(), "Opened message store");
        Ok(Self {
            conn: Some(conn),
            path: path.to_path_buf(),
            query_timeout: options.query_timeout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// List rooms from the first room-table variant that yields rows.
    ///
    /// Missing tables move on to the next variant; if none match the result is
    /// empty.
    pub fn list_rooms(&self) -> Vec<RoomDescriptor> {
        let Some(conn) = self.conn.as_ref() else {
            tracing::warn!("list_rooms called on a closed store");
            return vec![];
        };

        for variant in ROOM_VARIANTS {
            let columns = table_columns(conn, variant.table);
            if !columns.contains(&variant.id.to_ascii_lowercase()) {
                tracing::debug!(table = variant.table, "Room table variant not present");
                continue;
            }
            let optional = |col: Option<&str>| {
                col.filter(|c| columns.contains(&c.to_ascii_lowercase()))
                    .unwrap_or("''")
                    .to_string()
            };
            let mut sql = format!(
                "SELECT {}, {}, {} FROM {}",
                variant.id,
                optional(variant.display_name),
                optional(variant.alt_name),
                variant.table
            );
            if let Some(condition) = variant.condition {
                sql.push_str(" WHERE ");
                sql.push_str(condition);
            }

            let rows = self.with_deadline(conn, |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(RoomDescriptor {
                            id: value_as_string(&row.get::<_, Value>(0)?),
                            display_name: value_as_string(&row.get::<_, Value>(1)?),
                            alt_name: value_as_string(&row.get::<_, Value>(2)?),
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            });

            let rooms: Vec<RoomDescriptor> = match rows {
                Ok(rows) => rows.into_iter().filter(|r| !r.id.trim().is_empty()).collect(),
                Err(e) => {
                    tracing::debug!(table = variant.table, error = %e, "Room table variant failed");
                    continue;
                }
            };

            if !rooms.is_empty() {
                tracing::debug!(table = variant.table, count = rooms.len(), "Listed rooms");
                return self.fill_room_names(rooms);
            }
        }

        tracing::warn!(path = %self.path.display(), "No room table variant matched this store");
        vec![]
    }

    /// Contacts from the contact table; empty if the table is missing.
    pub fn list_contacts(&self) -> Vec<Contact> {
        let Some(conn) = self.conn.as_ref() else {
            return vec![];
        };
        let columns = table_columns(conn, CONTACT_TABLE);
        if !columns.contains("username") {
            return vec![];
        }
        let pick = |col: &'static str| -> &'static str {
            if columns.contains(&col.to_ascii_lowercase()) {
                col
            } else {
                "''"
            }
        };
        let sql = format!(
            "SELECT UserName, {}, {} FROM {}",
            pick("NickName"),
            pick("Remark"),
            CONTACT_TABLE
        );

        let result = self.with_deadline(conn, |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let contacts = stmt
                .query_map([], |row| {
                    Ok(Contact {
                        id: value_as_string(&row.get::<_, Value>(0)?),
                        nickname: value_as_string(&row.get::<_, Value>(1)?),
                        remark: value_as_string(&row.get::<_, Value>(2)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(contacts)
        });

        match result {
            Ok(contacts) => contacts.into_iter().filter(|c| !c.id.is_empty()).collect(),
            Err(e) => {
                tracing::debug!(error = %e, "Contact table unreadable");
                vec![]
            }
        }
    }

    /// Fetch messages matching `query`, oldest first.
    ///
    /// Selects the most recent `query.limit` matching rows. Time bounds are
    /// compared in seconds: stored values above
    /// [`MILLIS_THRESHOLD`](crate::normalize::MILLIS_THRESHOLD) are treated as
    /// milliseconds and divided by 1000 first. This is a heuristic tied to the
    /// store's epoch range, not a guarantee.
    pub fn fetch_messages(&self, query: &MessageQuery) -> Result<Vec<CanonicalMessage>> {
        let Some(conn) = self.conn.as_ref() else {
            return Err(Error::Config("message store is closed".to_string()));
        };

        let Some(variant) = self.message_variant(conn) else {
            tracing::warn!(path = %self.path.display(), "No message table variant matched this store");
            return Ok(vec![]);
        };

        // Some stores keep CreateTime as TEXT, which SQLite ranks above every
        // integer; compare on the integer value.
        let ts_expr = format!(
            "(CASE WHEN CAST({col} AS INTEGER) > {threshold} THEN CAST({col} AS INTEGER) / 1000 ELSE CAST({col} AS INTEGER) END)",
            col = variant.create_time,
            threshold = MILLIS_THRESHOLD
        );
        let mut sql = format!(
            "SELECT {}, {}, {}, {}, {}, {}, {} FROM {} WHERE 1=1",
            variant.id,
            variant.talker,
            variant.sender.unwrap_or("NULL"),
            variant.content,
            variant.msg_type,
            variant.create_time,
            variant.is_sender.unwrap_or("NULL"),
            variant.table
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(room_id) = &query.room_id {
            sql.push_str(&format!(" AND {} = ?", variant.talker));
            params.push(Box::new(room_id.clone()));
        }

        if let Some((start, end)) = &query.window {
            sql.push_str(&format!(" AND {ts} >= ? AND {ts} <= ?", ts = ts_expr));
            params.push(Box::new(start.timestamp()));
            params.push(Box::new(end.timestamp()));
        }

        if !query.types.is_empty() {
            let placeholders = vec!["?"; query.types.len()].join(", ");
            sql.push_str(&format!(" AND {} IN ({})", variant.msg_type, placeholders));
            for t in &query.types {
                params.push(Box::new(t.code()));
            }
        }

        sql.push_str(&format!(" ORDER BY {} DESC LIMIT ?", ts_expr));
        params.push(Box::new(query.limit as i64));

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let rows = self.with_deadline(conn, |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_refs.as_slice(), |row| {
                    Ok(RawMessageRow {
                        local_id: row.get(0)?,
                        talker: row.get(1)?,
                        sender: row.get(2)?,
                        content: row.get(3)?,
                        msg_type: row.get(4)?,
                        create_time: row.get(5)?,
                        is_sender: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let fetched = rows.len();
        let mut messages: Vec<CanonicalMessage> = rows
            .iter()
            .filter_map(|raw| normalize(raw, &query.types))
            .collect();
        messages.reverse();

        tracing::debug!(
            variant = variant.name,
            room = query.room_id.as_deref().unwrap_or("*"),
            fetched,
            kept = messages.len(),
            "Fetched messages"
        );
        Ok(messages)
    }

    /// Release the connection. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| Error::Database(e))?;
            tracing::debug!(path = %self.path.display(), "Closed message store");
        }
        Ok(())
    }

    fn message_variant(&self, conn: &Connection) -> Option<MessageVariant> {
        MESSAGE_VARIANTS.iter().find_map(|variant| {
            let columns = table_columns(conn, variant.table);
            variant.resolve(&columns)
        })
    }

    /// Fill empty room names from the contact table.
    fn fill_room_names(&self, mut rooms: Vec<RoomDescriptor>) -> Vec<RoomDescriptor> {
        if rooms
            .iter()
            .all(|r| !r.display_name.is_empty() || !r.alt_name.is_empty())
        {
            return rooms;
        }
        let contacts: HashMap<String, Contact> = self
            .list_contacts()
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        for room in rooms.iter_mut() {
            if let Some(contact) = contacts.get(&room.id) {
                if room.display_name.is_empty() {
                    room.display_name = contact.remark.clone();
                }
                if room.alt_name.is_empty() {
                    room.alt_name = contact.nickname.clone();
                }
            }
        }
        rooms
    }

    /// Run `f` with the query deadline armed; SQLite interrupts the statement
    /// once it passes.
    fn with_deadline<T>(
        &self,
        conn: &Connection,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> rusqlite::Result<T> {
        let deadline = Instant::now() + self.query_timeout;
        conn.progress_handler(1_000, Some(move || Instant::now() >= deadline));
        let result = f(conn);
        conn.progress_handler(0, None::<fn() -> bool>);
        result
    }
}

impl Drop for StoreReader {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close message store");
        }
    }
}

impl std::fmt::Debug for StoreReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreReader")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}
