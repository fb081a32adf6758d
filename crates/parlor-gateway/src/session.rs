use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use parlor_types::models::{Channel, UserId};

/// Per-connection state shared between a connection's send and receive tasks.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    user_id: Option<UserId>,
    /// Joined channel ids, and whether the join was made as an owner.
    /// Only consulted for channel-scoped broadcasts.
    joined: Arc<RwLock<HashMap<String, bool>>>,
}

impl Session {
    /// `user_id` is set when the connection presented a valid token.
    pub fn new(user_id: Option<UserId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            joined: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn join(&self, channel_id: &str, as_owner: bool) {
        self.joined
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel_id.to_string(), as_owner);
    }

    pub fn has_joined(&self, channel_id: &str) -> bool {
        self.joined
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(channel_id)
    }

    /// Joined `channel_id`, as an owner when `owners_only` is set.
    pub fn can_receive(&self, channel_id: &str, owners_only: bool) -> bool {
        self.joined
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel_id)
            .is_some_and(|as_owner| *as_owner || !owners_only)
    }

    /// Forget joined channels that no longer exist.
    pub fn retain_channels(&self, channels: &[Channel]) {
        self.joined
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|id, _| channels.iter().any(|c| &c.id == id));
    }
}
