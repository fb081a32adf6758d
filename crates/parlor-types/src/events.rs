use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::models::{Channel, ChannelUpdate, EnrichedMessage, Message, UserId};

/// Events sent FROM server TO clients over the gateway.
/// Framed as `{"type": <event name>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full channel list
    Channels(Vec<Channel>),

    /// Message history for a joined channel, sent to the requester only
    Init(Vec<EnrichedMessage>),

    /// A new message was posted
    Message(EnrichedMessage),

    /// A message was edited
    Edit(Message),

    /// A message was removed
    Delete { id: String },

    /// Command failure acknowledgment, only sent when enabled
    Error(CommandFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFailure {
    pub command: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Request message history for a channel
    JoinChannel(JoinChannel),

    /// Post a message
    Message(SendMessage),

    CreateChannel(CreateChannel),
    UpdateChannel(UpdateChannel),
    DeleteChannel(DeleteChannel),

    /// Edit own message, or any message as owner
    Edit(EditMessage),

    /// Delete own message, or any message as owner
    Delete(DeleteMessage),
}

impl ClientCommand {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinChannel(_) => "join-channel",
            Self::Message(_) => "message",
            Self::CreateChannel(_) => "create-channel",
            Self::UpdateChannel(_) => "update-channel",
            Self::DeleteChannel(_) => "delete-channel",
            Self::Edit(_) => "edit",
            Self::Delete(_) => "delete",
        }
    }
}

/// Reference to the acting user. Clients send their whole user object;
/// only the id is read; role and profile come from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinChannel {
    pub channel_id: String,
    #[serde(default)]
    pub user: Option<UserRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub user_id: UserId,
    #[serde(default)]
    pub channel_id: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateChannel {
    pub name: String,
    pub user: UserRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateChannel {
    pub id: String,
    pub updates: ChannelUpdate,
    pub user: UserRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteChannel {
    pub id: String,
    pub user: UserRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessage {
    pub message_id: String,
    pub user_id: UserId,
    pub new_content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessage {
    pub message_id: String,
    pub user_id: UserId,
}
