use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id           INTEGER PRIMARY KEY,
            email        TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            password     TEXT NOT NULL,
            color        TEXT NOT NULL,
            profile_pic  TEXT NOT NULL,
            bio          TEXT NOT NULL DEFAULT '',
            role         TEXT NOT NULL DEFAULT 'user'
        );

        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            position    INTEGER NOT NULL,
            name        TEXT NOT NULL,
            can_read    INTEGER NOT NULL,
            can_write   INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            position    INTEGER NOT NULL,
            user_id     INTEGER NOT NULL,
            channel_id  TEXT NOT NULL,
            content     TEXT NOT NULL,
            timestamp   TEXT NOT NULL,
            edited      INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_position
            ON messages(position);

        CREATE TABLE IF NOT EXISTS meta (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL
        );
        ",
    )?;

    // The general channel is seeded once. If an owner deletes it later,
    // a restart must not bring it back.
    let seeded: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = 'seeded'", [], |row| {
            row.get(0)
        })
        .optional()?;

    if seeded.is_none() {
        conn.execute_batch(
            "
            INSERT OR IGNORE INTO channels (id, position, name, can_read, can_write)
                VALUES ('general', 0, 'general', 1, 1);
            INSERT INTO meta (key, value) VALUES ('seeded', datetime('now'));
            ",
        )?;
        info!("Seeded default general channel");
    }

    info!("Database migrations complete");
    Ok(())
}
