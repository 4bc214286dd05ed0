//! Per-connection signaling state machine.
//!
//! Each WebSocket connection moves `unjoined -> joined -> closed`. Requests
//! are processed in arrival order; every media-engine failure is converted
//! into a typed error for the requesting connection and never tears down
//! anyone else's session.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{
    ClientEnvelope, ClientMessage, ConsumerDescriptor, ErrorKind, ServerEnvelope, ServerMessage,
    TransportDirection,
};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::error::{Result, SignalError};
use crate::session::Room;
use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    // Channel for outbound messages; broadcasts from rooms and engine
    // callbacks land here alongside direct replies.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.connections.add_connection(connection_id, tx).await;
    state
        .connections
        .send_to_connection(connection_id, &ServerMessage::Welcome { connection_id })
        .await;

    tracing::info!("Connection {} accepted", connection_id);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Room this connection has joined, if any. `None` both before the join
    // and after an explicit leave.
    let mut joined_room: Option<String> = None;

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let envelope: ClientEnvelope = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!("Invalid message from {}: {}", connection_id, e);
                        send_reply(
                            &state,
                            connection_id,
                            None,
                            ServerMessage::Error {
                                kind: ErrorKind::BadRequest,
                                message: "invalid message format".to_string(),
                            },
                        )
                        .await;
                        continue;
                    }
                };

                let request_id = envelope.request_id;
                let leaving = matches!(envelope.message, ClientMessage::Leave);
                let result =
                    handle_request(&state, connection_id, &mut joined_room, envelope.message)
                        .await;
                // Leave is terminal only when it actually left a room; a
                // failed request never ends the connection.
                let left = leaving && result.is_ok();
                let reply = match result {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::debug!("Request from {} failed: {}", connection_id, e);
                        e.to_message()
                    }
                };
                send_reply(&state, connection_id, request_id, reply).await;

                if left {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!("WebSocket error for {}: {}", connection_id, e);
                break;
            }
            _ => {}
        }
    }

    // Transport-level disconnect behaves as leave.
    if let Some(room_id) = joined_room.take() {
        leave_room(&state, connection_id, &room_id).await;
    }
    state.connections.remove_connection(connection_id).await;
    send_task.abort();
    tracing::info!("Connection {} closed", connection_id);
}

async fn send_reply(
    state: &AppState,
    connection_id: Uuid,
    request_id: Option<u64>,
    message: ServerMessage,
) {
    let envelope = ServerEnvelope::reply(request_id, message);
    match serde_json::to_string(&envelope) {
        Ok(json) => state.connections.send_raw(connection_id, json).await,
        Err(e) => tracing::error!("Failed to serialize reply: {}", e),
    }
}

async fn handle_request(
    state: &AppState,
    connection_id: Uuid,
    joined_room: &mut Option<String>,
    message: ClientMessage,
) -> Result<ServerMessage> {
    match message {
        ClientMessage::Join { room_id } => {
            if let Some(existing) = joined_room {
                return Err(SignalError::AlreadyJoined(existing.clone()));
            }
            let room = state.registry.get_or_create_room(&room_id).await;
            let mut room = room.write().await;
            room.admit(connection_id).await;
            let router_rtp_capabilities = room.router_capabilities();
            // The participant is admitted; only now does the connection
            // count as joined. There is no half-joined state.
            *joined_room = Some(room_id);
            Ok(ServerMessage::Joined {
                router_rtp_capabilities,
            })
        }

        ClientMessage::CreateTransport { room_id, direction } => {
            require_joined(joined_room)?;
            let room = state
                .registry
                .room(&room_id)
                .await
                .ok_or(SignalError::RoomNotFound(room_id))?;
            let transport = room
                .write()
                .await
                .create_transport(connection_id, direction)
                .await?;
            Ok(ServerMessage::TransportCreated { transport })
        }

        ClientMessage::ConnectTransport {
            transport_id,
            dtls_parameters,
        } => {
            let room = joined_room_handle(state, joined_room).await?;
            let transport = {
                let mut room = room.write().await;
                room.participant_mut(connection_id)?.transport(&transport_id)
            };
            match transport {
                Some(transport) => {
                    transport.connect(dtls_parameters).await?;
                }
                None => {
                    // Stale id after teardown: acknowledged as a no-op.
                    tracing::debug!(
                        "connect_transport for unknown transport {} from {}",
                        transport_id,
                        connection_id
                    );
                }
            }
            Ok(ServerMessage::TransportConnected { transport_id })
        }

        ClientMessage::Produce {
            transport_id,
            kind,
            rtp_parameters,
        } => {
            let room_arc = joined_room_handle(state, joined_room).await?;
            // Registration and the new-producer broadcast happen under the
            // room lock, so no listing can observe a half-created producer
            // and no recipient sees the broadcast before the engine call
            // returned to us.
            let mut room = room_arc.write().await;
            let transport = room
                .participant_mut(connection_id)?
                .transport(&transport_id)
                .ok_or(SignalError::TransportNotFound(transport_id))?;

            let producer = transport.produce(kind, rtp_parameters).await?;
            let producer_id = producer.id();

            wire_producer_cleanup(&room_arc, connection_id, &producer_id, producer.as_ref());

            if let Some(superseded) = room
                .participant_mut(connection_id)?
                .add_producer(kind, producer)
            {
                // Last write wins per kind; the engine must not keep
                // forwarding the superseded stream.
                superseded.close();
            }

            room.broadcast_new_producer(producer_id.clone(), connection_id, kind)
                .await;
            let producers_exist = room.participant_count() > 1;

            tracing::info!(
                "Participant {} producing {} in room {} (producer {})",
                connection_id,
                kind,
                room.id,
                producer_id
            );
            Ok(ServerMessage::Produced {
                producer_id,
                producers_exist,
            })
        }

        ClientMessage::Consume {
            remote_producer_id,
            rtp_capabilities,
        } => {
            let room_arc = joined_room_handle(state, joined_room).await?;
            let mut room = room_arc.write().await;
            let router = room.router().ok_or(SignalError::RouterUnavailable)?;
            if !room.contains(connection_id) {
                return Err(SignalError::ParticipantNotFound(connection_id));
            }
            if !router.can_consume(&remote_producer_id, &rtp_capabilities) {
                return Err(SignalError::NotConsumable(remote_producer_id));
            }

            // The receive transport is created lazily on first need and
            // reused afterwards.
            let transport = match room.participant_mut(connection_id)?.recv_transport() {
                Some(transport) => transport,
                None => {
                    let transport = router.create_transport().await?;
                    room.participant_mut(connection_id)?
                        .add_transport(TransportDirection::Recv, transport.clone());
                    transport
                }
            };

            let consumer = transport
                .consume(&remote_producer_id, &rtp_capabilities)
                .await?;
            let descriptor = ConsumerDescriptor {
                consumer_id: consumer.id(),
                producer_id: remote_producer_id.clone(),
                kind: consumer.kind(),
                rtp_parameters: consumer.rtp_parameters(),
            };

            wire_consumer_cleanup(
                state,
                &room_arc,
                connection_id,
                &descriptor.consumer_id,
                &remote_producer_id,
                consumer.as_ref(),
            );
            room.participant_mut(connection_id)?.add_consumer(consumer);

            tracing::info!(
                "Participant {} consuming producer {} in room {} (consumer {}, paused)",
                connection_id,
                remote_producer_id,
                room.id,
                descriptor.consumer_id
            );
            Ok(ServerMessage::Consumed {
                consumer: descriptor,
            })
        }

        ClientMessage::ResumeConsumer { consumer_id } => {
            let room = joined_room_handle(state, joined_room).await?;
            let consumer = {
                let mut room = room.write().await;
                room.participant_mut(connection_id)?.consumer(&consumer_id)
            };
            if let Some(consumer) = consumer {
                consumer.resume().await?;
            } else {
                // Stale id after teardown: acknowledged as a no-op.
                tracing::debug!(
                    "resume for unknown consumer {} from {}",
                    consumer_id,
                    connection_id
                );
            }
            Ok(ServerMessage::ConsumerResumed { consumer_id })
        }

        ClientMessage::ListProducers { room_id } => {
            require_joined(joined_room)?;
            let producers = match state.registry.room(&room_id).await {
                Some(room) => room.read().await.list_producers(connection_id),
                None => Vec::new(),
            };
            Ok(ServerMessage::Producers { producers })
        }

        ClientMessage::Leave => {
            let room_id = joined_room.take().ok_or(SignalError::NotJoined)?;
            leave_room(state, connection_id, &room_id).await;
            Ok(ServerMessage::Left)
        }
    }
}

/// Removes the participant from its room and deletes the room if that made
/// it empty. Shared by explicit leave and transport-level disconnect.
async fn leave_room(state: &AppState, connection_id: Uuid, room_id: &str) {
    if let Some(room) = state.registry.room(room_id).await {
        room.write().await.remove(connection_id).await;
    }
    state.registry.remove_room_if_empty(room_id).await;
}

fn require_joined(joined_room: &Option<String>) -> Result<()> {
    if joined_room.is_none() {
        return Err(SignalError::NotJoined);
    }
    Ok(())
}

async fn joined_room_handle(
    state: &AppState,
    joined_room: &Option<String>,
) -> Result<Arc<RwLock<Room>>> {
    let room_id = joined_room.as_ref().ok_or(SignalError::NotJoined)?;
    state
        .registry
        .room(room_id)
        .await
        .ok_or_else(|| SignalError::RoomNotFound(room_id.clone()))
}

/// Keeps the owner's producer map consistent when the engine closes a
/// producer out-of-band. The callback runs on the engine's notification
/// path, so the actual pruning is spawned; by the time it runs the
/// participant may already be gone, which the prune tolerates.
fn wire_producer_cleanup(
    room: &Arc<RwLock<Room>>,
    owner_id: Uuid,
    producer_id: &str,
    producer: &dyn crate::engine::ProducerHandle,
) {
    let room = Arc::downgrade(room);
    let producer_id = producer_id.to_string();
    producer.on_close(Box::new(move || {
        if let Some(room) = room.upgrade() {
            tokio::spawn(async move {
                room.write().await.prune_producer(owner_id, &producer_id);
            });
        }
    }));
}

/// When the source producer closes, tells the consuming client to stop
/// rendering and drops the consumer from its owner's bookkeeping.
fn wire_consumer_cleanup(
    state: &AppState,
    room: &Arc<RwLock<Room>>,
    owner_id: Uuid,
    consumer_id: &str,
    producer_id: &str,
    consumer: &dyn crate::engine::ConsumerHandle,
) {
    let connections = state.connections.clone();
    let room = Arc::downgrade(room);
    let consumer_id = consumer_id.to_string();
    let producer_id = producer_id.to_string();
    consumer.on_producer_close(Box::new(move || {
        tokio::spawn(async move {
            connections
                .send_to_connection(owner_id, &ServerMessage::ProducerClosed { producer_id })
                .await;
            if let Some(room) = room.upgrade() {
                room.write().await.prune_consumer(owner_id, &consumer_id);
            }
        });
    }));
}
