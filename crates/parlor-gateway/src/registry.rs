//! Channel Registry: channel definitions and their read/write flags.
//! Every mutation is owner-only and is checked before anything changes.

use parlor_db::Snapshot;
use parlor_types::error::{ChatError, ChatResult};
use parlor_types::models::{Channel, ChannelUpdate, Role};

use crate::permissions;

pub const MAX_CHANNEL_NAME_CHARS: usize = 64;

pub fn list_channels(snapshot: &Snapshot) -> Vec<Channel> {
    snapshot.channels.clone()
}

pub fn create_channel(
    snapshot: &mut Snapshot,
    requestor: Option<Role>,
    name: &str,
) -> ChatResult<Channel> {
    require_owner(requestor)?;
    let name = validate_name(name)?;

    let channel = Channel::new(name);
    snapshot.channels.push(channel.clone());
    Ok(channel)
}

/// Merge the provided fields into an existing channel.
pub fn update_channel(
    snapshot: &mut Snapshot,
    requestor: Option<Role>,
    id: &str,
    updates: &ChannelUpdate,
) -> ChatResult<Channel> {
    require_owner(requestor)?;
    let name = updates.name.as_deref().map(validate_name).transpose()?;

    let channel = snapshot
        .channels
        .iter_mut()
        .find(|c| c.id == id)
        .ok_or_else(|| ChatError::not_found(format!("channel {}", id)))?;

    if let Some(name) = name {
        channel.name = name;
    }
    if let Some(can_read) = updates.can_read {
        channel.can_read = can_read;
    }
    if let Some(can_write) = updates.can_write {
        channel.can_write = can_write;
    }

    Ok(channel.clone())
}

/// Remove a channel and every message posted to it.
/// Returns how many messages went with it.
pub fn delete_channel(
    snapshot: &mut Snapshot,
    requestor: Option<Role>,
    id: &str,
) -> ChatResult<usize> {
    require_owner(requestor)?;

    let index = snapshot
        .channels
        .iter()
        .position(|c| c.id == id)
        .ok_or_else(|| ChatError::not_found(format!("channel {}", id)))?;
    snapshot.channels.remove(index);

    let before = snapshot.messages.len();
    snapshot.messages.retain(|m| m.channel_id != id);
    Ok(before - snapshot.messages.len())
}

fn require_owner(requestor: Option<Role>) -> ChatResult<()> {
    if permissions::can_administer(requestor) {
        Ok(())
    } else {
        Err(ChatError::forbidden("channel administration requires owner role"))
    }
}

fn validate_name(name: &str) -> ChatResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::validation("channel name is empty"));
    }
    if name.chars().count() > MAX_CHANNEL_NAME_CHARS {
        return Err(ChatError::validation(format!(
            "channel name longer than {} characters",
            MAX_CHANNEL_NAME_CHARS
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parlor_types::models::Message;

    fn snapshot() -> Snapshot {
        Snapshot {
            channels: vec![Channel::general()],
            ..Snapshot::default()
        }
    }

    fn message(id: &str, channel_id: &str) -> Message {
        Message {
            id: id.into(),
            user_id: 0,
            channel_id: channel_id.into(),
            content: "x".into(),
            timestamp: Utc::now(),
            edited: false,
        }
    }

    #[test]
    fn owner_creates_open_channel() {
        let mut snap = snapshot();
        let channel = create_channel(&mut snap, Some(Role::Owner), "  dev ").unwrap();
        assert_eq!(channel.name, "dev");
        assert!(channel.can_read && channel.can_write);
        assert_ne!(channel.id, "general");
        assert_eq!(snap.channels.len(), 2);
    }

    #[test]
    fn non_owner_cannot_create() {
        let mut snap = snapshot();
        let err = create_channel(&mut snap, Some(Role::User), "dev").unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        let err = create_channel(&mut snap, None, "dev").unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        assert_eq!(snap.channels.len(), 1);
    }

    #[test]
    fn blank_name_is_rejected() {
        let mut snap = snapshot();
        let err = create_channel(&mut snap, Some(Role::Owner), "   ").unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        let long = "x".repeat(MAX_CHANNEL_NAME_CHARS + 1);
        let err = create_channel(&mut snap, Some(Role::Owner), &long).unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[test]
    fn update_merges_only_given_fields() {
        let mut snap = snapshot();
        let updates = ChannelUpdate {
            can_write: Some(false),
            ..ChannelUpdate::default()
        };
        let channel = update_channel(&mut snap, Some(Role::Owner), "general", &updates).unwrap();
        assert_eq!(channel.name, "general");
        assert!(channel.can_read);
        assert!(!channel.can_write);
        assert_eq!(snap.channels[0], channel);

        let rename = ChannelUpdate {
            name: Some("lobby".into()),
            ..ChannelUpdate::default()
        };
        let channel = update_channel(&mut snap, Some(Role::Owner), "general", &rename).unwrap();
        assert_eq!(channel.name, "lobby");
        assert!(!channel.can_write);
    }

    #[test]
    fn update_checks_permission_before_existence() {
        let mut snap = snapshot();
        let err = update_channel(&mut snap, Some(Role::User), "nope", &ChannelUpdate::default())
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        let err = update_channel(&mut snap, Some(Role::Owner), "nope", &ChannelUpdate::default())
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[test]
    fn delete_cascades_to_messages() {
        let mut snap = snapshot();
        let dev = create_channel(&mut snap, Some(Role::Owner), "dev").unwrap();
        snap.messages.push(message("a", "general"));
        snap.messages.push(message("b", &dev.id));
        snap.messages.push(message("c", &dev.id));

        let removed = delete_channel(&mut snap, Some(Role::Owner), &dev.id).unwrap();
        assert_eq!(removed, 2);
        assert!(snap.channel(&dev.id).is_none());
        assert_eq!(snap.messages.len(), 1);
        assert_eq!(snap.messages[0].id, "a");
    }

    #[test]
    fn non_owner_delete_changes_nothing() {
        let mut snap = snapshot();
        snap.messages.push(message("a", "general"));
        let err = delete_channel(&mut snap, Some(Role::User), "general").unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        assert_eq!(snap.channels.len(), 1);
        assert_eq!(snap.messages.len(), 1);
    }
}
