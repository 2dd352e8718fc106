use crate::models::{MessageRow, UserRow};
use crate::{Database, format_timestamp};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str =
    "id, room_type, author_id, author_name, text, looking_for_companion, created_at";

impl Database {
    // -- Users --

    pub fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    /// Users are owned by the account service; this exists for seeding.
    pub fn upsert_user(
        &self,
        id: i64,
        name: Option<&str>,
        nickname: Option<&str>,
        reputation: Option<i64>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, nickname, reputation) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    nickname = excluded.nickname,
                    reputation = excluded.reputation",
                rusqlite::params![id, name, nickname, reputation],
            )?;
            Ok(())
        })
    }

    // -- Messages --

    /// Insert a message and return its assigned id.
    pub fn insert_message(
        &self,
        room_type: &str,
        author_id: i64,
        author_name: &str,
        text: &str,
        looking_for_companion: bool,
        created_at: &DateTime<Utc>,
    ) -> Result<i64> {
        let created_at = format_timestamp(created_at);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO group_messages (room_type, author_id, author_name, text, looking_for_companion, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![room_type, author_id, author_name, text, looking_for_companion, created_at],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Messages in a room with id greater than `after_id`, oldest first.
    pub fn get_messages_after(&self, room_type: &str, after_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM group_messages
                 WHERE room_type = ?1 AND id > ?2
                 ORDER BY id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![room_type, after_id], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Newest messages in a room, newest first, optionally only those created
    /// at or after `since`.
    pub fn get_recent_messages(
        &self,
        room_type: &str,
        limit: u32,
        since: Option<&DateTime<Utc>>,
    ) -> Result<Vec<MessageRow>> {
        let since = since.map(format_timestamp);
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM group_messages
                 WHERE room_type = ?1 AND (?2 IS NULL OR created_at >= ?2)
                 ORDER BY id DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![room_type, since, limit], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// All rooms, newest first, offset pagination.
    pub fn get_message_page(&self, offset: u64, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM group_messages
                 ORDER BY id DESC
                 LIMIT ?1 OFFSET ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let offset = i64::try_from(offset).unwrap_or(i64::MAX);
            let rows = stmt
                .query_map(rusqlite::params![limit, offset], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_messages_before(&self, cutoff: &DateTime<Utc>) -> Result<u64> {
        let cutoff = format_timestamp(cutoff);
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM group_messages WHERE created_at < ?1",
                [&cutoff],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Bulk delete everything created strictly before `cutoff`.
    pub fn delete_messages_before(&self, cutoff: &DateTime<Utc>) -> Result<u64> {
        let cutoff = format_timestamp(cutoff);
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM group_messages WHERE created_at < ?1", [&cutoff])?;
            Ok(deleted as u64)
        })
    }

    pub fn delete_all_messages(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM group_messages", [])?;
            Ok(deleted as u64)
        })
    }
}

fn query_user(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare("SELECT id, name, nickname, reputation FROM users WHERE id = ?1")?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                name: row.get(1)?,
                nickname: row.get(2)?,
                reputation: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_type: row.get(1)?,
        author_id: row.get(2)?,
        author_name: row.get(3)?,
        text: row.get(4)?,
        looking_for_companion: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
