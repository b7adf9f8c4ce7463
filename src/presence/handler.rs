//! WebSocket bridge between remote clients and the presence hub

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;

use super::hub::{PresenceChannel, PresenceHub};
use super::protocol::{ActionEvent, BroadcastEnvelope, ClientMsg, ProtocolError, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub.clone()))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, hub: Arc<PresenceHub>) {
    let connection_id = Uuid::new_v4();
    info!(connection_id = %connection_id, "Relay connection opened");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        server_time: unix_millis(),
    };
    let roster = ServerMsg::RosterSync {
        sync: hub.roster(unix_millis()),
    };
    for msg in [welcome, roster] {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(connection_id = %connection_id, error = %e, "Failed to send greeting");
            return;
        }
    }

    let published = run_connection(connection_id, hub.clone(), ws_sink, ws_stream).await;

    // Liveness expiry would catch these anyway; leaving early keeps rosters tidy
    for player_id in published {
        hub.leave(player_id);
    }

    info!(connection_id = %connection_id, "Relay connection closed");
}

/// Pump messages both ways until the socket closes. Returns the player ids
/// this connection published for.
async fn run_connection(
    connection_id: Uuid,
    hub: Arc<PresenceHub>,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
) -> HashSet<Uuid> {
    let rate_limiter = ConnectionRateLimiter::new();
    let mut roster_rx = hub.subscribe();
    let mut action_rx = hub.subscribe_broadcast();
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMsg>(16);

    // Writer task: hub fan-out and direct replies -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                sync = roster_rx.recv() => match sync {
                    Ok(sync) => ServerMsg::RosterSync { sync },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Every sync is complete; the next one catches up
                        debug!(connection_id = %connection_id, lagged = n, "Roster receiver lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = action_rx.recv() => match event {
                    Ok(event) => ServerMsg::Action {
                        event: BroadcastEnvelope::from(&event),
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(connection_id = %connection_id, lagged = n, "Dropped {} actions", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(msg) => msg,
                    None => break,
                },
            };

            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    let mut published = HashSet::new();

    // Reader loop: WebSocket -> hub
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_message() {
                    warn!(connection_id = %connection_id, "Rate limited relay message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => {
                        if let Err(e) =
                            dispatch(&hub, &rate_limiter, &mut published, client_msg)
                        {
                            let _ = reply_tx.try_send(ServerMsg::Error {
                                code: e.code().to_string(),
                                message: e.to_string(),
                            });
                        }
                    }
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(connection_id = %connection_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(connection_id = %connection_id, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
    published
}

/// Apply one client message to the hub
fn dispatch(
    hub: &PresenceHub,
    rate_limiter: &ConnectionRateLimiter,
    published: &mut HashSet<Uuid>,
    msg: ClientMsg,
) -> Result<(), ProtocolError> {
    let now = unix_millis();
    match msg {
        ClientMsg::Publish { mut snapshot } => {
            snapshot.validate()?;
            // Relay clock decides liveness; client clocks drift
            snapshot.timestamp = now;
            published.insert(snapshot.player_id);
            hub.publish(snapshot);
        }
        ClientMsg::Action { mut event } => {
            if !rate_limiter.check_action() {
                debug!(player_id = %event.player_id, "Rate limited action");
                return Ok(());
            }
            event.timestamp = now;
            hub.send_action(ActionEvent::try_from(event)?);
        }
        ClientMsg::Heartbeat { player_id } => hub.heartbeat(player_id, now),
        ClientMsg::Leave { player_id } => {
            published.remove(&player_id);
            hub.leave(player_id);
        }
    }
    Ok(())
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::protocol::PlayerSnapshot;
    use crate::world::geometry::Vec3;
    use crate::world::player::{AvatarDescriptor, Role};
    use crate::world::rooms::Room;

    fn publish(id: Uuid, x: f32) -> ClientMsg {
        ClientMsg::Publish {
            snapshot: PlayerSnapshot {
                player_id: id,
                display_name: "ws".into(),
                position: Vec3::new(x, 0.0, 0.0),
                rotation: 0.0,
                room: Room::World,
                avatar: AvatarDescriptor::default(),
                role: Role::Member,
                timestamp: 0,
            },
        }
    }

    #[test]
    fn publish_is_restamped_and_tracked() {
        let hub = PresenceHub::new();
        let limiter = ConnectionRateLimiter::new();
        let mut published = HashSet::new();
        let id = Uuid::new_v4();

        dispatch(&hub, &limiter, &mut published, publish(id, 1.0)).unwrap();
        assert!(published.contains(&id));

        let roster = hub.roster(unix_millis());
        assert!(roster.players[&id].timestamp > 0);

        dispatch(&hub, &limiter, &mut published, ClientMsg::Leave { player_id: id }).unwrap();
        assert!(published.is_empty());
        assert!(hub.roster(unix_millis()).players.is_empty());
    }

    #[test]
    fn invalid_messages_surface_protocol_errors() {
        let hub = PresenceHub::new();
        let limiter = ConnectionRateLimiter::new();
        let mut published = HashSet::new();

        let err = dispatch(&hub, &limiter, &mut published, publish(Uuid::nil(), f32::INFINITY))
            .unwrap_err();
        assert_eq!(err.code(), "invalid_snapshot");

        let action = ClientMsg::Action {
            event: BroadcastEnvelope {
                player_id: Uuid::nil(),
                kind: "wave".into(),
                payload: None,
                timestamp: 0,
            },
        };
        let err = dispatch(&hub, &limiter, &mut published, action).unwrap_err();
        assert_eq!(err.code(), "unknown_action");
    }
}
