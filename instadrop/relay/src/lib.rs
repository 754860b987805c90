//! Room relay for drop sessions.
//!
//! Each room holds at most one sender and one receiver. Messages from one
//! slot are forwarded verbatim, in order, to the other; messages for an
//! empty slot are dropped. Joins and departures are announced to the other
//! occupant with `peer-connected` / `peer-disconnected` control frames.
//!
//! Every slot drains through a bounded queue. When the peer stops reading,
//! forwarding waits on that queue, the relay stops reading from the
//! sending socket, and the backlog builds up on the sending side instead.

use std::{
    collections::HashMap,
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use axum::{
    Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
};
use futures::{SinkExt, StreamExt};
use instadropx_common::{ControlFrame, Role, RoomId};
use tokio::{
    net::TcpListener,
    sync::{Mutex, mpsc},
};
use tracing::{debug, error, info, trace, warn};

/// Messages queued towards one peer, about 4 MiB of full chunks.
pub const PEER_QUEUE_FRAMES: usize = 256;

type Outbox = mpsc::Sender<Message>;

struct Slot {
    id: u64,
    tx: Outbox,
}

#[derive(Default)]
struct Room {
    sender: Option<Slot>,
    receiver: Option<Slot>,
}

impl Room {
    fn slot(&self, role: Role) -> Option<&Slot> {
        match role {
            Role::Sender => self.sender.as_ref(),
            Role::Receiver => self.receiver.as_ref(),
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut Option<Slot> {
        match role {
            Role::Sender => &mut self.sender,
            Role::Receiver => &mut self.receiver,
        }
    }

    fn is_empty(&self) -> bool {
        self.sender.is_none() && self.receiver.is_none()
    }
}

/// Shared room table. Cloning is cheap and yields a handle on the same table.
#[derive(Clone, Default)]
pub struct Relay {
    rooms: Arc<Mutex<HashMap<RoomId, Room>>>,
    next_id: Arc<AtomicU64>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws/drop/{room_id}/{client_type}", any(connect))
            .with_state(self.clone())
    }

    /// Number of rooms with at least one occupant.
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    async fn handle(self, mut socket: WebSocket, room_id: RoomId, role: Role) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel(PEER_QUEUE_FRAMES);

        if let Err(reason) = self.join(&room_id, role, id, tx).await {
            warn!("Room {room_id}: rejecting {role}: {reason}");
            reject(&mut socket, reason).await;
            return;
        }
        info!("Room {room_id}: {role} joined");

        let (mut sink, mut stream) = socket.split();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    debug!("write failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(message) = stream.next().await {
            match message {
                Ok(message @ (Message::Text(_) | Message::Binary(_))) => {
                    self.forward(&room_id, role.peer(), message).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("Room {room_id}: {role} read failed: {e}");
                    break;
                }
            }
        }

        self.leave(&room_id, role, id).await;
        info!("Room {room_id}: {role} left");
        if let Err(e) = writer.await {
            error!("Room {room_id}: writer task failed: {e}");
        }
    }

    async fn join(
        &self,
        room_id: &RoomId,
        role: Role,
        id: u64,
        tx: Outbox,
    ) -> Result<(), String> {
        let peer = {
            let mut rooms = self.rooms.lock().await;
            let room = rooms.entry(room_id.clone()).or_default();
            if room.slot(role).is_some() {
                return Err(format!("room {room_id} already has a {role}"));
            }
            let peer = room.slot(role.peer()).map(|peer| peer.tx.clone());
            *room.slot_mut(role) = Some(Slot { id, tx: tx.clone() });
            peer
        };

        if let Some(peer) = peer {
            let joined = ControlFrame::PeerConnected {
                client_type: Some(role),
            };
            let present = ControlFrame::PeerConnected {
                client_type: Some(role.peer()),
            };
            send_control(&tx, &present).await;
            send_control(&peer, &joined).await;
        }
        Ok(())
    }

    /// Queues `message` for the `to` slot, waiting while its queue is full.
    async fn forward(&self, room_id: &RoomId, to: Role, message: Message) {
        let peer = {
            let rooms = self.rooms.lock().await;
            rooms
                .get(room_id)
                .and_then(|room| room.slot(to))
                .map(|slot| slot.tx.clone())
        };
        match peer {
            Some(tx) => {
                if tx.send(message).await.is_err() {
                    trace!("Room {room_id}: {to} went away, dropping message");
                }
            }
            None => trace!("Room {room_id}: no {to}, dropping message"),
        }
    }

    /// Frees the slot if it still belongs to connection `id`.
    async fn leave(&self, room_id: &RoomId, role: Role, id: u64) {
        let peer = {
            let mut rooms = self.rooms.lock().await;
            let Some(room) = rooms.get_mut(room_id) else {
                return;
            };

            let mut peer = None;
            if room.slot(role).is_some_and(|slot| slot.id == id) {
                *room.slot_mut(role) = None;
                peer = room.slot(role.peer()).map(|peer| peer.tx.clone());
            }
            if room.is_empty() {
                rooms.remove(room_id);
            }
            peer
        };

        if let Some(peer) = peer {
            let left = ControlFrame::PeerDisconnected {
                client_type: Some(role),
            };
            send_control(&peer, &left).await;
        }
    }
}

async fn connect(
    Path((room_id, client_type)): Path<(String, String)>,
    State(relay): State<Relay>,
    ws: WebSocketUpgrade,
) -> Response {
    let room_id = match RoomId::parse(&room_id) {
        Ok(room_id) => room_id,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };
    let role: Role = match client_type.parse() {
        Ok(role) => role,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    ws.on_upgrade(move |socket| relay.handle(socket, room_id, role))
}

async fn send_control(tx: &Outbox, frame: &ControlFrame) {
    match frame.encode() {
        Ok(text) => {
            let _ = tx.send(Message::Text(text.into())).await;
        }
        Err(e) => error!("failed to encode `{}`: {e}", frame.kind()),
    }
}

async fn reject(socket: &mut WebSocket, reason: String) {
    let frame = ControlFrame::Error {
        message: reason.clone(),
    };
    if let Ok(text) = frame.encode() {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let close = CloseFrame {
        code: close_code::POLICY,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(close))).await;
}

/// Serves the relay on `listener` until the task is dropped.
pub async fn serve(listener: TcpListener, relay: Relay) -> io::Result<()> {
    info!("Relay listening on {}", listener.local_addr()?);
    axum::serve(listener, relay.router()).await
}
