use anyhow::{Context, Result};
use instadropx_common::{
    ControlFrame, FileProjection, FrameChannel, FrameError, Inbound,
    RelayEndpoint, Role, RoomId, SessionEvent, SessionState, SessionStatus,
    TransitionError, WsChannel,
};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::{Reassembly, ReassemblyError, ReassemblyStep, ReceiverConfig};

pub struct ReceiveFilesRequest {
    pub room_id: RoomId,
    pub relay: RelayEndpoint,
    pub config: ReceiverConfig,
}

pub trait ReceiveFilesSubscriber: Send + Sync {
    fn get_id(&self) -> String;
    fn notify_connecting(&self, event: ReceiveFilesConnectingEvent);
    fn notify_receiving(&self, event: ReceiveFilesReceivingEvent);
    fn notify_file(&self, file: FileProjection);
    fn notify_state(&self, state: SessionState);
}

/// The sender is present in the room.
pub struct ReceiveFilesConnectingEvent {
    pub room_id: RoomId,
}

pub struct ReceiveFilesReceivingEvent {
    pub name: String,
    pub received: u64,
    pub size: u64,
    pub progress: u8,
}

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("transfer cancelled")]
    Cancelled,
    #[error("sender disconnected")]
    PeerDisconnected,
    #[error("relay rejected the session: {0}")]
    Relay(String),
    #[error("connection closed before the transfer finished")]
    Closed,
    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

type Subscribers =
    Arc<RwLock<HashMap<String, Arc<dyn ReceiveFilesSubscriber>>>>;

struct ReceiveFilesHandler {
    state: watch::Sender<SessionState>,
    finished: watch::Sender<bool>,
    files: RwLock<Vec<FileProjection>>,
    subscribers: Subscribers,
}

impl ReceiveFilesHandler {
    fn new() -> Self {
        Self {
            state: watch::Sender::new(SessionState::Idle),
            finished: watch::Sender::new(false),
            files: RwLock::new(Vec::new()),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn apply(
        &self,
        event: SessionEvent,
    ) -> Result<SessionState, TransitionError> {
        let mut outcome = Ok(SessionState::Idle);
        let changed = self.state.send_if_modified(|state| {
            match state.clone().apply(event) {
                Ok(next) => {
                    let changed = *state != next;
                    *state = next.clone();
                    outcome = Ok(next);
                    changed
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });

        if let Ok(state) = &outcome {
            if changed {
                self.notify(|s| s.notify_state(state.clone()));
            }
        }
        outcome
    }

    fn store(&self, file: FileProjection) {
        info!("Received `{}` ({} bytes)", file.name(), file.data.len());
        self.notify(|s| s.notify_file(file.clone()));
        if let Ok(mut files) = self.files.write() {
            files.push(file);
        }
    }

    fn notify(&self, f: impl Fn(&Arc<dyn ReceiveFilesSubscriber>)) {
        if let Ok(subscribers) = self.subscribers.read() {
            subscribers.values().for_each(f);
        }
    }
}

/// Handle on a running receiver session.
pub struct ReceiveFilesBubble {
    room_id: RoomId,
    handler: Arc<ReceiveFilesHandler>,
    cancel: watch::Sender<bool>,
}
impl ReceiveFilesBubble {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn state(&self) -> SessionState {
        self.handler.state.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state().status()
    }

    pub fn is_finished(&self) -> bool {
        *self.handler.finished.borrow()
    }

    /// Resolves with the terminal state once the channel is released.
    pub async fn wait(&self) -> SessionState {
        let mut finished = self.handler.finished.subscribe();
        let _ = finished.wait_for(|finished| *finished).await;
        self.state()
    }

    /// Files completed so far, in arrival order.
    pub fn files(&self) -> Vec<FileProjection> {
        self.handler
            .files
            .read()
            .map(|files| files.clone())
            .unwrap_or_default()
    }

    pub async fn cancel(&self) -> SessionState {
        info!("Cancelling file reception in room {}", self.room_id);
        self.cancel.send_replace(true);
        self.wait().await
    }

    pub fn subscribe(&self, subscriber: Arc<dyn ReceiveFilesSubscriber>) {
        if let Ok(mut subscribers) = self.handler.subscribers.write() {
            subscribers.insert(subscriber.get_id(), subscriber);
        }
    }

    pub fn unsubscribe(&self, subscriber: Arc<dyn ReceiveFilesSubscriber>) {
        if let Ok(mut subscribers) = self.handler.subscribers.write() {
            subscribers.remove(&subscriber.get_id());
        }
    }
}

/// Joins `request.room_id` as the receiver.
pub async fn receive_files(
    request: ReceiveFilesRequest,
) -> Result<ReceiveFilesBubble> {
    info!("Joining room {}", request.room_id);
    let channel =
        WsChannel::connect(&request.relay, &request.room_id, Role::Receiver)
            .await
            .with_context(|| {
                format!(
                    "failed to reach the relay at {}",
                    request.relay.as_str()
                )
            })?;

    receive_files_over(request.room_id, channel, request.config)
}

/// Same as [`receive_files`] over an already open channel.
pub fn receive_files_over<C>(
    room_id: RoomId,
    channel: C,
    config: ReceiverConfig,
) -> Result<ReceiveFilesBubble>
where
    C: FrameChannel + 'static,
{
    let handler = Arc::new(ReceiveFilesHandler::new());
    handler.apply(SessionEvent::RoomJoined(room_id.clone()))?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let carrier = Carrier {
        room_id: room_id.clone(),
        channel,
        reassembly: Reassembly::new(config.preallocate_limit),
        handler: handler.clone(),
        cancel: cancel_rx,
    };
    tokio::spawn(carrier.run());

    Ok(ReceiveFilesBubble {
        room_id,
        handler,
        cancel: cancel_tx,
    })
}

struct Carrier<C> {
    room_id: RoomId,
    channel: C,
    reassembly: Reassembly,
    handler: Arc<ReceiveFilesHandler>,
    cancel: watch::Receiver<bool>,
}

impl<C: FrameChannel> Carrier<C> {
    async fn run(mut self) {
        match self.receive_files().await {
            Ok(()) => info!("Room {}: file reception completed", self.room_id),
            Err(ReceiveError::Closed) => {
                warn!("Room {}: connection closed early", self.room_id);
                self.transition(SessionEvent::ChannelClosed);
            }
            Err(e) => {
                error!("Room {}: file reception failed: {e}", self.room_id);
                self.transition(SessionEvent::Failed(e.to_string()));
            }
        }

        let terminal = self.handler.state.borrow().is_terminal();
        if !terminal {
            self.transition(SessionEvent::Failed(
                "session ended before the transfer finished".to_owned(),
            ));
        }

        if let Err(e) = self.channel.close().await {
            debug!("Room {}: close failed: {e}", self.room_id);
        }
        self.handler.finished.send_replace(true);
    }

    async fn receive_files(&mut self) -> Result<(), ReceiveError> {
        loop {
            let frame = tokio::select! {
                frame = self.channel.recv() => frame,
                _ = cancelled(&mut self.cancel) => {
                    return Err(ReceiveError::Cancelled);
                }
            };
            let Some(frame) = frame else {
                return Err(ReceiveError::Closed);
            };

            let step = match Inbound::decode(frame) {
                Ok(Inbound::Chunk(bytes)) => {
                    trace!("received {} byte chunk", bytes.len());
                    self.reassembly.on_chunk(bytes)?
                }
                Ok(Inbound::Control(ControlFrame::PeerConnected { .. })) => {
                    info!("Room {}: sender connected", self.room_id);
                    self.transition(SessionEvent::PeerConnected);
                    self.handler.notify(|s| {
                        s.notify_connecting(ReceiveFilesConnectingEvent {
                            room_id: self.room_id.clone(),
                        })
                    });
                    continue;
                }
                Ok(Inbound::Control(ControlFrame::PeerDisconnected {
                    ..
                })) => return Err(ReceiveError::PeerDisconnected),
                Ok(Inbound::Control(ControlFrame::Error { message })) => {
                    return Err(ReceiveError::Relay(message));
                }
                Ok(Inbound::Control(frame)) => {
                    debug!("received `{}` frame", frame.kind());
                    self.reassembly.on_control(frame)?
                }
                Err(FrameError::UnknownType(tag)) => {
                    warn!("dropping control frame of unknown type `{tag}`");
                    continue;
                }
                Err(e) => {
                    debug!("dropping undecodable frame: {e}");
                    continue;
                }
            };

            match step {
                ReassemblyStep::Started(metadata) => {
                    info!(
                        "Receiving `{}` ({} bytes)",
                        metadata.name, metadata.size
                    );
                    self.transition(SessionEvent::MetadataReceived);
                }
                ReassemblyStep::Progress {
                    received,
                    size,
                    progress,
                } => {
                    self.transition(SessionEvent::Progress(progress));
                    let name = self
                        .reassembly
                        .open_file()
                        .map(|m| m.name.clone())
                        .unwrap_or_default();
                    self.handler.notify(|s| {
                        s.notify_receiving(ReceiveFilesReceivingEvent {
                            name: name.clone(),
                            received,
                            size,
                            progress,
                        })
                    });
                }
                ReassemblyStep::FileCompleted(file) => self.handler.store(file),
                ReassemblyStep::SessionCompleted(file) => {
                    if let Some(file) = file {
                        self.handler.store(file);
                    }
                    self.handler.apply(SessionEvent::Completed)?;
                    return Ok(());
                }
                ReassemblyStep::Ignored => {}
            }
        }
    }

    fn transition(&self, event: SessionEvent) {
        if let Err(e) = self.handler.apply(event) {
            debug!("Room {}: {e}", self.room_id);
        }
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
