use instadrop_entities::File;
use instadropx_common::{
    ChannelError, ControlFrame, FileMetadata, Frame, FrameChannel, FrameError,
    Inbound, RoomId, SessionEvent, SessionState, TransitionError, TryRecv,
    progress_pct,
};
use std::{
    collections::HashMap,
    io,
    sync::{Arc, RwLock},
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::{ChunkReader, SenderConfig, TransferMode};

pub trait SendFilesSubscriber: Send + Sync {
    fn get_id(&self) -> String;
    fn notify_connecting(&self, event: SendFilesConnectingEvent);
    fn notify_sending(&self, event: SendFilesSendingEvent);
    fn notify_state(&self, state: SessionState);
}

/// A receiver joined the room.
pub struct SendFilesConnectingEvent {
    pub room_id: RoomId,
}

pub struct SendFilesSendingEvent {
    pub name: String,
    pub index: u32,
    pub sent: u64,
    pub remaining: u64,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("transfer cancelled")]
    Cancelled,
    #[error("receiver disconnected")]
    PeerDisconnected,
    #[error("relay rejected the session: {0}")]
    Relay(String),
    #[error("connection closed before the transfer finished")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to read file: {0}")]
    Read(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl From<ChannelError> for SendError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Closed => Self::Closed,
            ChannelError::Transport(message) => Self::Transport(message),
        }
    }
}

type Subscribers = Arc<RwLock<HashMap<String, Arc<dyn SendFilesSubscriber>>>>;

/// Session state shared between the bubble and its carrier.
pub struct SendFilesHandler {
    state: watch::Sender<SessionState>,
    finished: watch::Sender<bool>,
    subscribers: Subscribers,
}

impl SendFilesHandler {
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(SessionState::Idle),
            finished: watch::Sender::new(false),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    pub fn watch_finished(&self) -> watch::Receiver<bool> {
        self.finished.subscribe()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn SendFilesSubscriber>) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.insert(subscriber.get_id(), subscriber);
        }
    }

    pub fn unsubscribe(&self, subscriber: Arc<dyn SendFilesSubscriber>) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.remove(&subscriber.get_id());
        }
    }

    /// Runs `event` through the session reducer and notifies subscribers
    /// when the state changed.
    pub fn apply(
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

    fn notify(&self, f: impl Fn(&Arc<dyn SendFilesSubscriber>)) {
        if let Ok(subscribers) = self.subscribers.read() {
            subscribers.values().for_each(f);
        }
    }

    fn finish(&self) {
        self.finished.send_replace(true);
    }
}

impl Default for SendFilesHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives one sender session over a [`FrameChannel`].
pub(crate) struct Carrier<C> {
    pub(crate) room_id: RoomId,
    pub(crate) channel: C,
    pub(crate) files: Vec<File>,
    pub(crate) mode: TransferMode,
    pub(crate) config: SenderConfig,
    pub(crate) handler: Arc<SendFilesHandler>,
    pub(crate) cancel: watch::Receiver<bool>,
}

impl<C: FrameChannel> Carrier<C> {
    pub(crate) async fn run(mut self) {
        match self.carry().await {
            Ok(()) => {
                info!("Room {}: all files sent", self.room_id);
                tokio::select! {
                    _ = tokio::time::sleep(self.config.close_grace) => {}
                    _ = cancelled(&mut self.cancel) => {}
                }
            }
            Err(SendError::Closed) => {
                warn!("Room {}: connection closed early", self.room_id);
                self.transition(SessionEvent::ChannelClosed);
            }
            Err(e) => {
                error!("Room {}: transfer failed: {e}", self.room_id);
                self.transition(SessionEvent::Failed(e.to_string()));
            }
        }

        if let Err(e) = self.channel.close().await {
            debug!("Room {}: close failed: {e}", self.room_id);
        }
        self.handler.finish();
    }

    async fn carry(&mut self) -> Result<(), SendError> {
        self.wait_for_peer().await?;
        self.transition(SessionEvent::PeerConnected);
        self.handler.notify(|s| {
            s.notify_connecting(SendFilesConnectingEvent {
                room_id: self.room_id.clone(),
            })
        });

        self.send_files().await?;
        self.transition(SessionEvent::Completed);
        Ok(())
    }

    async fn wait_for_peer(&mut self) -> Result<(), SendError> {
        info!("Room {}: waiting for a receiver", self.room_id);
        loop {
            let frame = tokio::select! {
                frame = self.channel.recv() => frame,
                _ = cancelled(&mut self.cancel) => {
                    return Err(SendError::Cancelled);
                }
            };
            let Some(frame) = frame else {
                return Err(SendError::Closed);
            };

            match Inbound::decode(frame) {
                Ok(Inbound::Control(ControlFrame::PeerConnected { .. })) => {
                    info!("Room {}: receiver connected", self.room_id);
                    return Ok(());
                }
                Ok(Inbound::Control(ControlFrame::Error { message })) => {
                    return Err(SendError::Relay(message));
                }
                Ok(inbound) => log_ignored(&inbound),
                Err(e) => log_undecodable(&e),
            }
        }
    }

    async fn send_files(&mut self) -> Result<(), SendError> {
        let total_count = self.files.len() as u32;
        let total_len: u64 = self.files.iter().map(File::len).sum();
        let mut total_sent = 0u64;

        for (index, file) in self.files.clone().into_iter().enumerate() {
            let index = index as u32;
            let metadata = match self.mode {
                TransferMode::Single => FileMetadata::single(
                    file.name.clone(),
                    file.len(),
                    file.mime_type.clone(),
                ),
                TransferMode::Batch => FileMetadata::batched(
                    file.name.clone(),
                    file.len(),
                    file.mime_type.clone(),
                    index,
                    total_count,
                ),
            };
            debug!("sending metadata for {file:?}");
            self.send_control(&ControlFrame::Metadata(metadata)).await?;

            let mut reader =
                ChunkReader::new(file.data.clone(), self.config.chunk_size);
            self.notify_sending(&file, index, &reader);

            loop {
                self.throttle().await?;
                let Some(chunk) = reader.next_chunk().await? else {
                    break;
                };
                self.poll_inbound()?;

                total_sent += chunk.len() as u64;
                trace!("sending {} byte chunk", chunk.len());
                self.channel.send(Frame::Binary(chunk)).await?;

                self.transition(SessionEvent::Progress(progress_pct(
                    total_sent, total_len,
                )));
                self.notify_sending(&file, index, &reader);
            }

            let terminator = match self.mode {
                TransferMode::Single => ControlFrame::Eof,
                TransferMode::Batch => ControlFrame::FileEof,
            };
            self.send_control(&terminator).await?;
        }

        if self.mode == TransferMode::Batch {
            self.send_control(&ControlFrame::BatchEof).await?;
        }
        Ok(())
    }

    /// Holds the next read while the channel queue is over the threshold.
    async fn throttle(&mut self) -> Result<(), SendError> {
        if *self.cancel.borrow() {
            return Err(SendError::Cancelled);
        }
        while self.channel.buffered_amount() > self.config.backpressure_threshold
        {
            trace!(
                "backpressure: {} bytes buffered",
                self.channel.buffered_amount()
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.backpressure_delay) => {}
                _ = cancelled(&mut self.cancel) => {
                    return Err(SendError::Cancelled);
                }
            }
            self.poll_inbound()?;
        }
        Ok(())
    }

    /// Drains inbound frames without waiting, failing on a departed peer.
    fn poll_inbound(&mut self) -> Result<(), SendError> {
        loop {
            let frame = match self.channel.try_recv() {
                TryRecv::Frame(frame) => frame,
                TryRecv::Empty => return Ok(()),
                TryRecv::Closed => return Err(SendError::Closed),
            };
            match Inbound::decode(frame) {
                Ok(Inbound::Control(ControlFrame::PeerDisconnected {
                    ..
                })) => return Err(SendError::PeerDisconnected),
                Ok(Inbound::Control(ControlFrame::Error { message })) => {
                    return Err(SendError::Relay(message));
                }
                Ok(inbound) => log_ignored(&inbound),
                Err(e) => log_undecodable(&e),
            }
        }
    }

    async fn send_control(
        &mut self,
        frame: &ControlFrame,
    ) -> Result<(), SendError> {
        self.channel.send(frame.to_frame()?).await?;
        Ok(())
    }

    fn notify_sending(&self, file: &File, index: u32, reader: &ChunkReader) {
        self.handler.notify(|s| {
            s.notify_sending(SendFilesSendingEvent {
                name: file.name.clone(),
                index,
                sent: reader.offset(),
                remaining: reader.remaining(),
            })
        });
    }

    fn transition(&self, event: SessionEvent) {
        if let Err(e) = self.handler.apply(event) {
            debug!("Room {}: {e}", self.room_id);
        }
    }
}

/// Resolves once cancellation is requested. Never resolves if the bubble
/// is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn log_ignored(inbound: &Inbound) {
    match inbound {
        Inbound::Control(frame) => debug!("ignoring `{}` frame", frame.kind()),
        Inbound::Chunk(bytes) => {
            debug!("ignoring {} byte binary frame", bytes.len())
        }
    }
}

fn log_undecodable(err: &FrameError) {
    match err {
        FrameError::UnknownType(tag) => {
            warn!("dropping control frame of unknown type `{tag}`")
        }
        other => debug!("dropping undecodable frame: {other}"),
    }
}
