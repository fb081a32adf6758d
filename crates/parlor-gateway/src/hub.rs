use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info};

use parlor_db::{Snapshot, Store};
use parlor_types::error::{ChatError, ChatResult};
use parlor_types::events::{
    ClientCommand, CommandFailure, CreateChannel, DeleteChannel, DeleteMessage, EditMessage,
    JoinChannel, SendMessage, ServerEvent, UpdateChannel,
};
use parlor_types::models::{Channel, GENERAL_CHANNEL_ID, UserId};

use crate::dispatcher::Dispatcher;
use crate::session::Session;
use crate::{ledger, permissions, registry};

/// Who receives message, edit and delete events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BroadcastScope {
    /// Every connected session
    #[default]
    Global,
    /// Only sessions that joined the message's channel
    Channel,
}

impl FromStr for BroadcastScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "channel" => Ok(Self::Channel),
            other => Err(format!("unknown broadcast scope '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HubOptions {
    pub scope: BroadcastScope,
    /// Send an `error` event back to the sender when a command fails.
    /// Off by default: failed commands are dropped silently.
    pub acknowledge_failures: bool,
}

/// Realtime Session Hub. Applies commands to the store after authorization
/// and fans the resulting state out through the dispatcher.
///
/// Every mutation runs inside one store transaction, and broadcasts happen
/// before the transaction is released, so clients see events in commit order.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    store: Store,
    dispatcher: Dispatcher,
    options: HubOptions,
}

impl Hub {
    pub fn new(store: Store, dispatcher: Dispatcher, options: HubOptions) -> Self {
        Self {
            inner: Arc::new(HubInner {
                store,
                dispatcher,
                options,
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Full channel list, sent to every new connection.
    pub fn channels(&self) -> ChatResult<Vec<Channel>> {
        let snapshot = self.inner.store.read()?;
        Ok(registry::list_channels(&snapshot))
    }

    /// Apply one client command. All output, including the sender's join
    /// history, goes out on the dispatcher's bus.
    pub fn handle(&self, session: &Session, cmd: ClientCommand) -> ChatResult<()> {
        match cmd {
            ClientCommand::JoinChannel(join) => self.join_channel(session, join),
            ClientCommand::Message(msg) => self.send_message(session, msg),
            ClientCommand::CreateChannel(create) => self.create_channel(session, create),
            ClientCommand::UpdateChannel(update) => self.update_channel(session, update),
            ClientCommand::DeleteChannel(delete) => self.delete_channel(session, delete),
            ClientCommand::Edit(edit) => self.edit_message(session, edit),
            ClientCommand::Delete(delete) => self.delete_message(session, delete),
        }
    }

    /// The `error` event for a failed command, if acknowledgments are enabled.
    pub fn failure_ack(&self, command: &str, err: &ChatError) -> Option<ServerEvent> {
        if !self.inner.options.acknowledge_failures {
            return None;
        }
        Some(ServerEvent::Error(CommandFailure {
            command: command.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }))
    }

    fn join_channel(&self, session: &Session, join: JoinChannel) -> ChatResult<()> {
        let actor = match join.user {
            Some(user) => Some(act_as(session, user.id)?),
            None => session.user_id(),
        };

        // Held until the reply is on the bus, so every message is either in
        // the history or broadcast after it.
        let tx = self.inner.store.begin()?;
        let role = actor.and_then(|id| permissions::role_of(&tx, id));
        let channel = tx
            .channel(&join.channel_id)
            .ok_or_else(|| ChatError::not_found(format!("channel {}", join.channel_id)))?;
        if !permissions::can_read(channel, role) {
            return Err(ChatError::forbidden(format!("channel {} is not readable", channel.id)));
        }

        let history = ledger::list_for_channel(&tx, &join.channel_id);
        session.join(&join.channel_id, permissions::is_owner(role));
        debug!(
            "session {} joined {} ({} messages)",
            session.id(),
            join.channel_id,
            history.len()
        );
        self.inner.dispatcher.reply(session.id(), ServerEvent::Init(history));
        Ok(())
    }

    fn send_message(&self, session: &Session, msg: SendMessage) -> ChatResult<()> {
        let user_id = act_as(session, msg.user_id)?;
        let channel_id = msg.channel_id.as_deref().unwrap_or(GENERAL_CHANNEL_ID);

        let mut tx = self.inner.store.begin()?;
        let message = ledger::append(&mut tx, user_id, channel_id, &msg.content)?;
        tx.commit()?;

        self.publish(&tx, Some(channel_id), ServerEvent::Message(message));
        Ok(())
    }

    fn create_channel(&self, session: &Session, create: CreateChannel) -> ChatResult<()> {
        let user_id = act_as(session, create.user.id)?;

        let mut tx = self.inner.store.begin()?;
        let role = permissions::role_of(&tx, user_id);
        let channel = registry::create_channel(&mut tx, role, &create.name)?;
        tx.commit()?;

        info!("user {} created channel {} ({})", user_id, channel.name, channel.id);
        self.inner
            .dispatcher
            .broadcast(ServerEvent::Channels(registry::list_channels(&tx)));
        Ok(())
    }

    fn update_channel(&self, session: &Session, update: UpdateChannel) -> ChatResult<()> {
        let user_id = act_as(session, update.user.id)?;

        let mut tx = self.inner.store.begin()?;
        let role = permissions::role_of(&tx, user_id);
        let channel = registry::update_channel(&mut tx, role, &update.id, &update.updates)?;
        tx.commit()?;

        info!(
            "user {} updated channel {} (read={}, write={})",
            user_id, channel.id, channel.can_read, channel.can_write
        );
        self.inner
            .dispatcher
            .broadcast(ServerEvent::Channels(registry::list_channels(&tx)));
        Ok(())
    }

    fn delete_channel(&self, session: &Session, delete: DeleteChannel) -> ChatResult<()> {
        let user_id = act_as(session, delete.user.id)?;

        let mut tx = self.inner.store.begin()?;
        let role = permissions::role_of(&tx, user_id);
        let removed = registry::delete_channel(&mut tx, role, &delete.id)?;
        tx.commit()?;

        info!(
            "user {} deleted channel {} and {} messages",
            user_id, delete.id, removed
        );
        self.inner
            .dispatcher
            .broadcast(ServerEvent::Channels(registry::list_channels(&tx)));
        Ok(())
    }

    fn edit_message(&self, session: &Session, edit: EditMessage) -> ChatResult<()> {
        let user_id = act_as(session, edit.user_id)?;

        let mut tx = self.inner.store.begin()?;
        let edited = ledger::edit(&mut tx, user_id, &edit.message_id, &edit.new_content)?;
        tx.commit()?;

        let channel_id = edited.message.channel_id.clone();
        self.publish(&tx, Some(channel_id.as_str()), ServerEvent::Edit(edited.message));
        Ok(())
    }

    fn delete_message(&self, session: &Session, delete: DeleteMessage) -> ChatResult<()> {
        let user_id = act_as(session, delete.user_id)?;

        let mut tx = self.inner.store.begin()?;
        let channel_id = tx.message(&delete.message_id).map(|m| m.channel_id.clone());
        let id = ledger::remove(&mut tx, user_id, &delete.message_id)?;
        tx.commit()?;

        self.publish(&tx, channel_id.as_deref(), ServerEvent::Delete { id });
        Ok(())
    }

    /// Fan out a message event. Channel scope checks readability at send
    /// time, so closing a channel stops delivery to non-owners who joined it.
    fn publish(&self, snapshot: &Snapshot, channel_id: Option<&str>, event: ServerEvent) {
        let channel = channel_id.and_then(|id| snapshot.channel(id));
        match (self.inner.options.scope, channel) {
            (BroadcastScope::Channel, Some(channel)) => {
                self.inner
                    .dispatcher
                    .broadcast_to_channel(&channel.id, !channel.can_read, event)
            }
            _ => self.inner.dispatcher.broadcast(event),
        }
    }
}

/// The user a command acts for. A token-bound session may only act as itself.
fn act_as(session: &Session, claimed: UserId) -> ChatResult<UserId> {
    match session.user_id() {
        Some(bound) if bound != claimed => Err(ChatError::forbidden(format!(
            "session is bound to user {}, not {}",
            bound, claimed
        ))),
        _ => Ok(claimed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_db::{MemoryStore, Snapshot};
    use parlor_types::error::ErrorKind;
    use parlor_types::events::UserRef;
    use parlor_types::models::{Role, User};
    use tokio::sync::broadcast::error::TryRecvError;

    use crate::dispatcher::Broadcast;

    fn hub_with(options: HubOptions) -> Hub {
        let mut owner = User::new(0, "o@x.io".into(), "Olive".into(), "h".into());
        owner.role = Role::Owner;
        let user = User::new(1, "u@x.io".into(), "Uma".into(), "h".into());
        let store = Store::new(MemoryStore::from_snapshot(Snapshot {
            users: vec![owner, user],
            channels: vec![Channel::general()],
            messages: vec![],
        }));
        Hub::new(store, Dispatcher::new(), options)
    }

    fn send(user_id: UserId, channel_id: Option<&str>, content: &str) -> ClientCommand {
        ClientCommand::Message(SendMessage {
            user_id,
            channel_id: channel_id.map(str::to_string),
            content: content.into(),
        })
    }

    fn next(rx: &mut tokio::sync::broadcast::Receiver<Broadcast>) -> Broadcast {
        rx.try_recv().expect("expected a broadcast")
    }

    #[test]
    fn message_without_channel_goes_to_general() {
        let hub = hub_with(HubOptions::default());
        let mut rx = hub.dispatcher().subscribe();
        let session = Session::new(None);

        hub.handle(&session, send(1, None, "hi")).unwrap();
        match next(&mut rx).event {
            ServerEvent::Message(msg) => {
                assert_eq!(msg.message.channel_id, "general");
                assert_eq!(msg.username, "Uma");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn join_replies_with_history_only_to_sender() {
        let hub = hub_with(HubOptions::default());
        let session = Session::new(None);
        hub.handle(&session, send(1, Some("general"), "one")).unwrap();

        let mut rx = hub.dispatcher().subscribe();
        hub.handle(
            &session,
            ClientCommand::JoinChannel(JoinChannel {
                channel_id: "general".into(),
                user: Some(UserRef { id: 1 }),
            }),
        )
        .unwrap();
        let reply = next(&mut rx);
        assert!(reply.reaches(&session));
        assert!(!reply.reaches(&Session::new(None)));
        match reply.event {
            ServerEvent::Init(history) => assert_eq!(history.len(), 1),
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(session.has_joined("general"));
    }

    #[test]
    fn unreadable_channel_requires_owner_from_store() {
        let hub = hub_with(HubOptions::default());
        let owner = Session::new(None);
        hub.handle(
            &owner,
            ClientCommand::UpdateChannel(UpdateChannel {
                id: "general".into(),
                updates: parlor_types::models::ChannelUpdate {
                    can_read: Some(false),
                    ..Default::default()
                },
                user: UserRef { id: 0 },
            }),
        )
        .unwrap();

        let join = |id| {
            ClientCommand::JoinChannel(JoinChannel {
                channel_id: "general".into(),
                user: Some(UserRef { id }),
            })
        };
        let err = hub.handle(&Session::new(None), join(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(hub.handle(&Session::new(None), join(0)).is_ok());
    }

    #[test]
    fn bound_session_cannot_impersonate() {
        let hub = hub_with(HubOptions::default());
        let session = Session::new(Some(1));
        let err = hub.handle(&session, send(0, None, "as owner")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(hub.store().read().unwrap().messages.is_empty());

        hub.handle(&session, send(1, None, "as myself")).unwrap();
        assert_eq!(hub.store().read().unwrap().messages.len(), 1);
    }

    #[test]
    fn channel_admin_broadcasts_full_list() {
        let hub = hub_with(HubOptions::default());
        let mut rx = hub.dispatcher().subscribe();
        let session = Session::new(None);

        hub.handle(
            &session,
            ClientCommand::CreateChannel(CreateChannel {
                name: "dev".into(),
                user: UserRef { id: 0 },
            }),
        )
        .unwrap();
        let created = match next(&mut rx).event {
            ServerEvent::Channels(list) => {
                assert_eq!(list.len(), 2);
                list[1].clone()
            }
            other => panic!("unexpected event {:?}", other),
        };

        hub.handle(
            &session,
            ClientCommand::DeleteChannel(DeleteChannel {
                id: created.id,
                user: UserRef { id: 0 },
            }),
        )
        .unwrap();
        match next(&mut rx).event {
            ServerEvent::Channels(list) => assert_eq!(list, vec![Channel::general()]),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn non_owner_channel_admin_is_dropped() {
        let hub = hub_with(HubOptions::default());
        let mut rx = hub.dispatcher().subscribe();
        let err = hub
            .handle(
                &Session::new(None),
                ClientCommand::CreateChannel(CreateChannel {
                    name: "dev".into(),
                    user: UserRef { id: 1 },
                }),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(hub.channels().unwrap().len(), 1);
    }

    #[test]
    fn channel_scope_tags_message_events() {
        let hub = hub_with(HubOptions {
            scope: BroadcastScope::Channel,
            acknowledge_failures: false,
        });
        let mut rx = hub.dispatcher().subscribe();
        let session = Session::new(None);

        hub.handle(&session, send(1, Some("general"), "hi")).unwrap();
        let message = next(&mut rx);
        assert_eq!(message.channel_id(), Some("general"));

        let id = match message.event {
            ServerEvent::Message(msg) => msg.message.id,
            other => panic!("unexpected event {:?}", other),
        };
        hub.handle(
            &session,
            ClientCommand::Delete(DeleteMessage {
                message_id: id.clone(),
                user_id: 1,
            }),
        )
        .unwrap();
        let deleted = next(&mut rx);
        assert_eq!(deleted.channel_id(), Some("general"));
        assert_eq!(deleted.event, ServerEvent::Delete { id });
    }

    #[test]
    fn closing_a_channel_stops_delivery_to_non_owners() {
        let hub = hub_with(HubOptions {
            scope: BroadcastScope::Channel,
            acknowledge_failures: false,
        });
        let join = |session: &Session, id| {
            hub.handle(
                session,
                ClientCommand::JoinChannel(JoinChannel {
                    channel_id: "general".into(),
                    user: Some(UserRef { id }),
                }),
            )
            .unwrap()
        };
        let member = Session::new(None);
        let owner = Session::new(None);
        join(&member, 1);
        join(&owner, 0);

        let mut rx = hub.dispatcher().subscribe();
        hub.handle(
            &owner,
            ClientCommand::UpdateChannel(UpdateChannel {
                id: "general".into(),
                updates: parlor_types::models::ChannelUpdate {
                    can_read: Some(false),
                    ..Default::default()
                },
                user: UserRef { id: 0 },
            }),
        )
        .unwrap();
        assert!(matches!(next(&mut rx).event, ServerEvent::Channels(_)));

        hub.handle(&owner, send(0, Some("general"), "owners only")).unwrap();
        let message = next(&mut rx);
        assert!(message.reaches(&owner));
        assert!(!message.reaches(&member));
    }

    #[test]
    fn failure_ack_follows_options() {
        let err = ChatError::forbidden("nope");
        assert!(hub_with(HubOptions::default()).failure_ack("edit", &err).is_none());

        let hub = hub_with(HubOptions {
            acknowledge_failures: true,
            ..HubOptions::default()
        });
        match hub.failure_ack("edit", &err) {
            Some(ServerEvent::Error(failure)) => {
                assert_eq!(failure.command, "edit");
                assert_eq!(failure.kind, ErrorKind::Forbidden);
            }
            other => panic!("unexpected ack {:?}", other),
        }
    }

    #[test]
    fn scope_parses_case_insensitively() {
        assert_eq!("Channel".parse::<BroadcastScope>().unwrap(), BroadcastScope::Channel);
        assert_eq!("global".parse::<BroadcastScope>().unwrap(), BroadcastScope::Global);
        assert!("room".parse::<BroadcastScope>().is_err());
    }
}
