//! Message Ledger: append-only per-channel sequence with in-place edits and
//! removals. Author display fields are joined in at read time, never stored.

use chrono::Utc;

use parlor_db::Snapshot;
use parlor_types::error::{ChatError, ChatResult};
use parlor_types::models::{EnrichedMessage, Message, UserId, new_token};

use crate::permissions;

pub const MAX_CONTENT_CHARS: usize = 4000;

/// Join a message with its author's current profile.
pub fn enrich(snapshot: &Snapshot, message: &Message) -> EnrichedMessage {
    EnrichedMessage::new(message.clone(), snapshot.user(message.user_id))
}

/// Messages of one channel in insertion order.
pub fn list_for_channel(snapshot: &Snapshot, channel_id: &str) -> Vec<EnrichedMessage> {
    snapshot
        .messages
        .iter()
        .filter(|m| m.channel_id == channel_id)
        .map(|m| enrich(snapshot, m))
        .collect()
}

pub fn append(
    snapshot: &mut Snapshot,
    user_id: UserId,
    channel_id: &str,
    content: &str,
) -> ChatResult<EnrichedMessage> {
    validate_content(content)?;

    let role = permissions::role_of(snapshot, user_id)
        .ok_or_else(|| ChatError::not_found(format!("user {}", user_id)))?;
    let channel = snapshot
        .channel(channel_id)
        .ok_or_else(|| ChatError::not_found(format!("channel {}", channel_id)))?;
    if !permissions::can_write(channel, Some(role)) {
        return Err(ChatError::forbidden(format!("channel {} is read-only", channel_id)));
    }

    let message = Message {
        id: new_token(),
        user_id,
        channel_id: channel_id.to_string(),
        content: content.to_string(),
        timestamp: Utc::now(),
        edited: false,
    };
    snapshot.messages.push(message.clone());

    Ok(enrich(snapshot, &message))
}

/// Replace a message's content and mark it edited. Re-sending the same
/// content still sets `edited`.
pub fn edit(
    snapshot: &mut Snapshot,
    editor_id: UserId,
    message_id: &str,
    new_content: &str,
) -> ChatResult<EnrichedMessage> {
    validate_content(new_content)?;

    let role = permissions::role_of(snapshot, editor_id)
        .ok_or_else(|| ChatError::not_found(format!("user {}", editor_id)))?;
    let message = snapshot
        .messages
        .iter_mut()
        .find(|m| m.id == message_id)
        .ok_or_else(|| ChatError::not_found(format!("message {}", message_id)))?;
    if !permissions::can_modify(message, editor_id, Some(role)) {
        return Err(ChatError::forbidden(format!(
            "user {} may not edit message {}",
            editor_id, message_id
        )));
    }

    message.content = new_content.to_string();
    message.edited = true;

    let message = message.clone();
    Ok(enrich(snapshot, &message))
}

/// Delete a message the requestor authored, or any message for an owner.
/// The requestor need not resolve to a user if they are the author.
pub fn remove(snapshot: &mut Snapshot, requestor_id: UserId, message_id: &str) -> ChatResult<String> {
    let role = permissions::role_of(snapshot, requestor_id);
    let index = snapshot
        .messages
        .iter()
        .position(|m| m.id == message_id)
        .ok_or_else(|| ChatError::not_found(format!("message {}", message_id)))?;
    if !permissions::can_modify(&snapshot.messages[index], requestor_id, role) {
        return Err(ChatError::forbidden(format!(
            "user {} may not delete message {}",
            requestor_id, message_id
        )));
    }

    Ok(snapshot.messages.remove(index).id)
}

fn validate_content(content: &str) -> ChatResult<()> {
    if content.trim().is_empty() {
        return Err(ChatError::validation("message content is empty"));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ChatError::validation(format!(
            "message content longer than {} characters",
            MAX_CONTENT_CHARS
        )));
    }
    Ok(())
}
