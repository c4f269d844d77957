//! WebSocket connection lifecycle.
//!
//! A connection authenticates via the `token` query parameter before the
//! upgrade completes, then enters the presence registry and subscribes to
//! the broadcast channel of every group the user belongs to at connect
//! time.  Group membership changes take effect on the next reconnect.
//!
//! Outbound traffic funnels through a single mpsc queue per connection so
//! direct pushes and room fan-out share one ordered path to the socket.
//! Inbound frames carry only typing signals; everything else arrives via
//! the REST surface.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use courier_shared::{ClientEvent, UserId};

use crate::api::AppState;
use crate::auth::authenticate_token;
use crate::error::ApiError;
use crate::presence::ConnectionHandle;
use crate::typing;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Upgrade handler for `GET /ws?token=<token>`.  Authentication happens
/// before the upgrade so an unknown caller never reaches the registry;
/// a missing token is a 401 like everywhere else, not an extractor 400.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .ok_or_else(|| ApiError::Unauthorized("Missing token".into()))?;
    let user = authenticate_token(&state.db, &token).await?;
    Ok(ws.on_upgrade(move |socket| handle_connection(state, user, socket)))
}

async fn handle_connection(state: AppState, user: UserId, socket: WebSocket) {
    let (handle, mut outbound) = ConnectionHandle::new();
    let connection_id = handle.id();

    state.presence.register(user, handle.clone()).await;
    info!(user = %user, connection = %connection_id, "websocket connected");

    // Join the room of every group the user is currently a member of,
    // forwarding room traffic into this connection's outbound queue.
    let groups = match state.db.lock().await.groups_for_user(user) {
        Ok(groups) => groups,
        Err(e) => {
            warn!(user = %user, error = %e, "failed to load groups for room subscription");
            Vec::new()
        }
    };

    let mut forwards = Vec::with_capacity(groups.len());
    for group in &groups {
        let rx = state.rooms.subscribe(group.id).await;
        forwards.push(tokio::spawn(forward_room(rx, handle.clone())));
    }
    debug!(user = %user, rooms = forwards.len(), "joined group rooms");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else { break };
                let frame = match event.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(user = %user, error = %e, "dropping unserializable event");
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match ClientEvent::from_json(text.as_str()) {
                            Ok(event) => typing::relay(&state.router, user, event).await,
                            Err(e) => {
                                debug!(user = %user, error = %e, "ignoring malformed client frame");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong are answered by axum; binary is ignored
                    Some(Err(e)) => {
                        debug!(user = %user, error = %e, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    for task in forwards {
        task.abort();
    }

    state.presence.unregister(user, connection_id).await;
    info!(user = %user, connection = %connection_id, "websocket disconnected");
}

/// Pump one room's broadcast receiver into a connection's outbound queue.
/// A lagged receiver skips the missed events and keeps going; typing and
/// seen deltas are ephemeral, and message history is recoverable via REST.
async fn forward_room(
    mut rx: broadcast::Receiver<courier_shared::ServerEvent>,
    handle: ConnectionHandle,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if !handle.push(event) {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "room subscriber lagged, skipping events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
