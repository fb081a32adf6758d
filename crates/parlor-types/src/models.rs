use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = u64;

/// Id of the channel present at first boot.
pub const GENERAL_CHANNEL_ID: &str = "general";

pub const DEFAULT_COLOR: &str = "#ffffff";
pub const DEFAULT_PROFILE_PIC: &str = "/pfps/1.jpeg";

/// Display fallbacks used when a message author no longer resolves.
pub const UNKNOWN_AUTHOR_NAME: &str = "Unknown";
pub const UNKNOWN_AUTHOR_COLOR: &str = "#000";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Owner,
}

impl Role {
    pub fn is_owner(self) -> bool {
        matches!(self, Role::Owner)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "owner" => Ok(Role::Owner),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Stored user record. The password hash is persisted under `password`
/// but never sent to clients; see [`PublicUser`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    #[serde(rename = "password")]
    pub password_hash: String,
    pub color: String,
    pub profile_pic: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub role: Role,
}

impl User {
    pub fn new(id: UserId, email: String, display_name: String, password_hash: String) -> Self {
        Self {
            id,
            email,
            display_name,
            password_hash,
            color: DEFAULT_COLOR.to_string(),
            profile_pic: DEFAULT_PROFILE_PIC.to_string(),
            bio: String::new(),
            role: Role::User,
        }
    }
}

/// User projection safe to hand to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub color: String,
    pub profile_pic: String,
    pub bio: String,
    pub role: Role,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            color: user.color.clone(),
            profile_pic: user.profile_pic.clone(),
            bio: user.bio.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub can_read: bool,
    pub can_write: bool,
}

impl Channel {
    /// A fresh channel with a random id; readable and writable by everyone.
    pub fn new(name: String) -> Self {
        Self {
            id: new_token(),
            name,
            can_read: true,
            can_write: true,
        }
    }

    pub fn general() -> Self {
        Self {
            id: GENERAL_CHANNEL_ID.to_string(),
            name: GENERAL_CHANNEL_ID.to_string(),
            can_read: true,
            can_write: true,
        }
    }
}

/// Partial channel update; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_read: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_write: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub user_id: UserId,
    pub channel_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
}

/// A message joined with its author's display fields as of read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub username: String,
    pub color: String,
    pub profile_pic: String,
    pub role: Role,
}

impl EnrichedMessage {
    pub fn new(message: Message, author: Option<&User>) -> Self {
        match author {
            Some(user) => Self {
                message,
                username: user.display_name.clone(),
                color: user.color.clone(),
                profile_pic: user.profile_pic.clone(),
                role: user.role,
            },
            None => Self {
                message,
                username: UNKNOWN_AUTHOR_NAME.to_string(),
                color: UNKNOWN_AUTHOR_COLOR.to_string(),
                profile_pic: String::new(),
                role: Role::User,
            },
        }
    }
}

/// Opaque random id for messages and channels.
pub fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_hash_is_stored_as_password() {
        let user = User::new(0, "a@b.c".into(), "A".into(), "hash".into());
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["password"], "hash");
        assert_eq!(json["displayName"], "A");
        assert_eq!(json["role"], "user");

        let public = serde_json::to_value(PublicUser::from(&user)).unwrap();
        assert!(public.get("password").is_none());
    }

    #[test]
    fn enriched_message_flattens_wire_fields() {
        let message = Message {
            id: "m1".into(),
            user_id: 3,
            channel_id: "general".into(),
            content: "hi".into(),
            timestamp: Utc::now(),
            edited: false,
        };
        let json = serde_json::to_value(EnrichedMessage::new(message, None)).unwrap();
        assert_eq!(json["id"], "m1");
        assert_eq!(json["userId"], 3);
        assert_eq!(json["channelId"], "general");
        assert_eq!(json["username"], "Unknown");
        assert_eq!(json["color"], "#000");
        assert_eq!(json["profilePic"], "");
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn channel_flags_use_camel_case() {
        let json = serde_json::to_value(Channel::general()).unwrap();
        assert_eq!(json["canRead"], true);
        assert_eq!(json["canWrite"], true);
    }
}
