/// Database row types. These map directly to SQLite rows and are converted
/// into parlor-types models at the edge of the crate.
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};

use parlor_types::models::{Message, Role, User};

pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub color: String,
    pub profile_pic: String,
    pub bio: String,
    pub role: String,
}

pub struct MessageRow {
    pub id: String,
    pub user_id: i64,
    pub channel_id: String,
    pub content: String,
    pub timestamp: String,
    pub edited: bool,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        let role: Role = row
            .role
            .parse()
            .map_err(|e| anyhow!("user {}: {}", row.id, e))?;
        Ok(User {
            id: u64::try_from(row.id)?,
            email: row.email,
            display_name: row.display_name,
            password_hash: row.password,
            color: row.color,
            profile_pic: row.profile_pic,
            bio: row.bio,
            role,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map_err(|e| anyhow!("corrupt timestamp '{}' on message '{}': {}", row.timestamp, row.id, e))?
            .with_timezone(&Utc);
        Ok(Message {
            id: row.id,
            user_id: u64::try_from(row.user_id)?,
            channel_id: row.channel_id,
            content: row.content,
            timestamp,
            edited: row.edited,
        })
    }
}

pub fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Owner => "owner",
    }
}
