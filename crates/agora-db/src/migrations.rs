use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY,
            name        TEXT,
            nickname    TEXT,
            reputation  INTEGER
        );

        -- AUTOINCREMENT: ids are never reused after retention deletes them
        CREATE TABLE IF NOT EXISTS group_messages (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            room_type               TEXT NOT NULL,
            author_id               INTEGER NOT NULL,
            author_name             TEXT NOT NULL,
            text                    TEXT NOT NULL,
            looking_for_companion   INTEGER NOT NULL DEFAULT 0,
            created_at              TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_group_messages_room
            ON group_messages(room_type, id);

        CREATE INDEX IF NOT EXISTS idx_group_messages_created
            ON group_messages(created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
