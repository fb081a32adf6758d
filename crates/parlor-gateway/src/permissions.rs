//! Authorization predicates. Roles always come from the store, never from
//! what a client claims about itself.

use parlor_db::Snapshot;
use parlor_types::models::{Channel, Message, Role, UserId};

/// Stored role of `user_id`, if the user exists.
pub fn role_of(snapshot: &Snapshot, user_id: UserId) -> Option<Role> {
    snapshot.user(user_id).map(|u| u.role)
}

pub fn is_owner(role: Option<Role>) -> bool {
    role.is_some_and(Role::is_owner)
}

/// Channel definitions are owner-only.
pub fn can_administer(role: Option<Role>) -> bool {
    is_owner(role)
}

pub fn can_read(channel: &Channel, role: Option<Role>) -> bool {
    channel.can_read || is_owner(role)
}

pub fn can_write(channel: &Channel, role: Option<Role>) -> bool {
    channel.can_write || is_owner(role)
}

/// Edit and delete rights: the author, or any owner.
pub fn can_modify(message: &Message, actor_id: UserId, role: Option<Role>) -> bool {
    message.user_id == actor_id || is_owner(role)
}
