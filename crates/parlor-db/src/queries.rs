use anyhow::Result;
use rusqlite::Connection;

use parlor_types::models::{Channel, Message, User};

use crate::Database;
use crate::models::{MessageRow, UserRow, role_str};
use crate::store::{DocumentStore, Snapshot};

impl DocumentStore for Database {
    fn read_all(&self) -> Result<Snapshot> {
        self.with_conn(|conn| {
            Ok(Snapshot {
                users: query_users(conn)?,
                channels: query_channels(conn)?,
                messages: query_messages(conn)?,
            })
        })
    }

    /// Replace every document in one SQL transaction.
    fn write_all(&self, snapshot: &Snapshot) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch("DELETE FROM messages; DELETE FROM channels; DELETE FROM users;")?;

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO users (id, email, display_name, password, color, profile_pic, bio, role)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for user in &snapshot.users {
                    stmt.execute(rusqlite::params![
                        i64::try_from(user.id)?,
                        user.email,
                        user.display_name,
                        user.password_hash,
                        user.color,
                        user.profile_pic,
                        user.bio,
                        role_str(user.role),
                    ])?;
                }

                let mut stmt = tx.prepare(
                    "INSERT INTO channels (id, position, name, can_read, can_write)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for (position, channel) in snapshot.channels.iter().enumerate() {
                    stmt.execute(rusqlite::params![
                        channel.id,
                        position as i64,
                        channel.name,
                        channel.can_read,
                        channel.can_write,
                    ])?;
                }

                let mut stmt = tx.prepare(
                    "INSERT INTO messages (id, position, user_id, channel_id, content, timestamp, edited)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for (position, message) in snapshot.messages.iter().enumerate() {
                    stmt.execute(rusqlite::params![
                        message.id,
                        position as i64,
                        i64::try_from(message.user_id)?,
                        message.channel_id,
                        message.content,
                        message.timestamp.to_rfc3339(),
                        message.edited,
                    ])?;
                }
            }

            tx.commit()?;
            Ok(())
        })
    }
}

fn query_users(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(
        "SELECT id, email, display_name, password, color, profile_pic, bio, role
         FROM users ORDER BY id",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                display_name: row.get(2)?,
                password: row.get(3)?,
                color: row.get(4)?,
                profile_pic: row.get(5)?,
                bio: row.get(6)?,
                role: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(User::try_from).collect()
}

fn query_channels(conn: &Connection) -> Result<Vec<Channel>> {
    let mut stmt =
        conn.prepare("SELECT id, name, can_read, can_write FROM channels ORDER BY position")?;

    let rows = stmt
        .query_map([], |row| {
            Ok(Channel {
                id: row.get(0)?,
                name: row.get(1)?,
                can_read: row.get(2)?,
                can_write: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_messages(conn: &Connection) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, channel_id, content, timestamp, edited
         FROM messages ORDER BY position",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                channel_id: row.get(2)?,
                content: row.get(3)?,
                timestamp: row.get(4)?,
                edited: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(Message::try_from).collect()
}
