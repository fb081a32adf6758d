use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use parlor_types::error::{ChatError, ChatResult};
use parlor_types::events::{ClientCommand, ServerEvent};
use parlor_types::models::UserId;

use crate::dispatcher::Broadcast;
use crate::hub::Hub;
use crate::session::Session;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one WebSocket connection until either side goes away.
/// `user_id` is set when the upgrade request carried a valid token.
pub async fn handle_connection(socket: WebSocket, hub: Hub, user_id: Option<UserId>) {
    let (mut sender, mut receiver) = socket.split();
    let dispatcher = hub.dispatcher().clone();
    let session = Session::new(user_id);

    let mut session_rx = dispatcher.register_session(session.id()).await;
    // Subscribe before the channel list goes out so no update slips between them.
    let mut broadcast_rx = dispatcher.subscribe();

    info!(
        "session {} connected (user {:?}, {} online)",
        session.id(),
        user_id,
        dispatcher.session_count().await
    );

    let channels = run_blocking(&hub, |hub| hub.channels()).await;
    let hello = match channels {
        Ok(list) => ServerEvent::Channels(list),
        Err(e) => {
            error!("session {}: failed to load channels: {}", session.id(), e);
            dispatcher.unregister_session(session.id()).await;
            return;
        }
    };
    let sent = match encode(&hello) {
        Some(frame) => sender.send(frame).await.is_ok(),
        None => false,
    };
    if !sent {
        dispatcher.unregister_session(session.id()).await;
        return;
    }

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward bus events + failure acks -> client, with heartbeat
    let send_session = session.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if !admit(&send_session, &msg) {
                        continue;
                    }

                    let Some(frame) = encode(&msg.event) else { continue };
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                result = session_rx.recv() => {
                    let Some(event) = result else { break };
                    let Some(frame) = encode(&event) else { continue };
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client, one at a time
    let recv_session = session.clone();
    let recv_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text(&recv_hub, &recv_session, text.as_str()).await;
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister_session(session.id()).await;
    info!("session {} disconnected", session.id());
}

async fn handle_text(hub: &Hub, session: &Session, text: &str) {
    let (name, result) = match serde_json::from_str::<ClientCommand>(text) {
        Ok(cmd) => {
            let name = cmd.name();
            let session = session.clone();
            (name, run_blocking(hub, move |hub| hub.handle(&session, cmd)).await)
        }
        Err(e) => {
            warn!(
                "session {} bad command: {} -- raw: {}",
                session.id(),
                e,
                truncate(text, 200)
            );
            ("unknown", Err(ChatError::validation(e.to_string())))
        }
    };

    if let Err(e) = result {
        match &e {
            ChatError::Store(_) => error!("session {} {}: {}", session.id(), name, e),
            _ => debug!("session {} {} dropped: {}", session.id(), name, e),
        }
        if let Some(ack) = hub.failure_ack(name, &e) {
            hub.dispatcher().send_to_session(session.id(), ack).await;
        }
    }
}

/// Whether a bus event goes out on this session's socket. A new channel
/// list also drops joined channels that were deleted.
fn admit(session: &Session, msg: &Broadcast) -> bool {
    if let ServerEvent::Channels(channels) = &msg.event {
        session.retain_channels(channels);
    }
    msg.reaches(session)
}

/// Run store-bound hub work off the async runtime.
async fn run_blocking<T, F>(hub: &Hub, f: F) -> ChatResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Hub) -> ChatResult<T> + Send + 'static,
{
    let hub = hub.clone();
    tokio::task::spawn_blocking(move || f(&hub))
        .await
        .map_err(|e| ChatError::Store(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
}

fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            error!("failed to encode event: {}", e);
            None
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_db::{MemoryStore, Snapshot, Store};
    use parlor_types::error::ErrorKind;
    use parlor_types::models::{Channel, User};

    use crate::dispatcher::{Audience, Dispatcher};
    use crate::hub::{BroadcastScope, HubOptions};

    fn hub(options: HubOptions) -> Hub {
        let store = Store::new(MemoryStore::from_snapshot(Snapshot {
            users: vec![User::new(0, "a@x.io".into(), "Ann".into(), "h".into())],
            channels: vec![Channel::general()],
            messages: vec![],
        }));
        Hub::new(store, Dispatcher::new(), options)
    }

    fn acking() -> HubOptions {
        HubOptions {
            scope: BroadcastScope::Channel,
            acknowledge_failures: true,
        }
    }

    #[tokio::test]
    async fn failed_command_is_acked_when_enabled() {
        let hub = hub(acking());
        let session = Session::new(None);
        let mut rx = hub.dispatcher().register_session(session.id()).await;

        handle_text(&hub, &session, "{\"type\":\"nonsense\"}").await;
        match rx.try_recv() {
            Ok(ServerEvent::Error(failure)) => {
                assert_eq!(failure.command, "unknown");
                assert_eq!(failure.kind, ErrorKind::Validation);
            }
            other => panic!("expected an error frame, got {:?}", other),
        }

        let join_missing = r#"{"type":"join-channel","data":{"channelId":"nope"}}"#;
        handle_text(&hub, &session, join_missing).await;
        match rx.try_recv() {
            Ok(ServerEvent::Error(failure)) => {
                assert_eq!(failure.command, "join-channel");
                assert_eq!(failure.kind, ErrorKind::NotFound);
            }
            other => panic!("expected an error frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_command_is_silent_by_default() {
        let hub = hub(HubOptions::default());
        let session = Session::new(None);
        let mut rx = hub.dispatcher().register_session(session.id()).await;

        handle_text(&hub, &session, "not json").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_history_arrives_on_the_bus() {
        let hub = hub(acking());
        let session = Session::new(None);
        let mut bus = hub.dispatcher().subscribe();

        handle_text(&hub, &session, r#"{"type":"join-channel","data":{"channelId":"general"}}"#).await;
        let reply = bus.try_recv().unwrap();
        assert_eq!(reply.audience, Audience::Session(session.id()));
        assert!(admit(&session, &reply));
        assert!(!admit(&Session::new(None), &reply));
    }

    #[test]
    fn admit_filters_channel_events_and_prunes_deleted_channels() {
        let session = Session::new(None);
        session.join("general", false);
        session.join("dev", false);

        let in_dev = Broadcast {
            audience: Audience::Channel {
                id: "dev".into(),
                owners_only: false,
            },
            event: ServerEvent::Delete { id: "m1".into() },
        };
        assert!(admit(&session, &in_dev));
        assert!(!admit(&Session::new(None), &in_dev));

        let list = Broadcast {
            audience: Audience::All,
            event: ServerEvent::Channels(vec![Channel::general()]),
        };
        assert!(admit(&session, &list));
        assert!(!session.has_joined("dev"));
        assert!(!admit(&session, &in_dev));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
