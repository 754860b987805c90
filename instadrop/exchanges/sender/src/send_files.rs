mod handler;

use crate::{SenderConfig, SenderFile, TransferMode};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use handler::Carrier;
use instadrop_entities::File;
use instadropx_common::{
    FrameChannel, RelayEndpoint, Role, RoomId, SessionEvent, SessionState,
    SessionStatus, WsChannel,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

pub use handler::{
    SendError, SendFilesConnectingEvent, SendFilesHandler, SendFilesSendingEvent,
    SendFilesSubscriber,
};

pub struct SendFilesRequest {
    pub files: Vec<SenderFile>,
    pub mode: TransferMode,
    pub relay: RelayEndpoint,
    pub config: SenderConfig,
}

/// Handle on a running sender session.
pub struct SendFilesBubble {
    room_id: RoomId,
    handler: Arc<SendFilesHandler>,
    cancel: watch::Sender<bool>,
    created_at: DateTime<Utc>,
}
impl SendFilesBubble {
    fn new(
        room_id: RoomId,
        handler: Arc<SendFilesHandler>,
        cancel: watch::Sender<bool>,
    ) -> Self {
        Self {
            room_id,
            handler,
            cancel,
            created_at: Utc::now(),
        }
    }

    /// Code the receiver has to enter.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn state(&self) -> SessionState {
        self.handler.state()
    }

    pub fn status(&self) -> SessionStatus {
        self.handler.state().status()
    }

    /// Whether the session ended and its channel was released.
    pub fn is_finished(&self) -> bool {
        self.handler.is_finished()
    }

    /// Resolves with the terminal state once the channel is released.
    pub async fn wait(&self) -> SessionState {
        let mut finished = self.handler.watch_finished();
        // The handler owns the sender half, so this cannot fail while
        // `self` is alive.
        let _ = finished.wait_for(|finished| *finished).await;
        self.state()
    }

    /// Closes the channel. A session that has not reached `Done` ends in
    /// `Error`.
    pub async fn cancel(&self) -> SessionState {
        info!("Cancelling file transfer in room {}", self.room_id);
        self.cancel.send_replace(true);
        self.wait().await
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn subscribe(&self, subscriber: Arc<dyn SendFilesSubscriber>) {
        self.handler.subscribe(subscriber);
    }

    pub fn unsubscribe(&self, subscriber: Arc<dyn SendFilesSubscriber>) {
        self.handler.unsubscribe(subscriber);
    }
}

/// Creates a room, connects to the relay as the sender and starts streaming
/// once a receiver joins.
pub async fn send_files(request: SendFilesRequest) -> Result<SendFilesBubble> {
    validate(&request.files, request.mode)?;

    let room_id = RoomId::generate();
    info!(
        "Starting {:?} transfer of {} files in room {room_id}",
        request.mode,
        request.files.len()
    );

    let channel = WsChannel::connect(&request.relay, &room_id, Role::Sender)
        .await
        .with_context(|| {
            format!("failed to reach the relay at {}", request.relay.as_str())
        })?;

    send_files_over(
        room_id,
        channel,
        request.files,
        request.mode,
        request.config,
    )
}

/// Same as [`send_files`] over an already open channel.
pub fn send_files_over<C>(
    room_id: RoomId,
    channel: C,
    files: Vec<SenderFile>,
    mode: TransferMode,
    config: SenderConfig,
) -> Result<SendFilesBubble>
where
    C: FrameChannel + 'static,
{
    validate(&files, mode)?;
    debug!(
        "Sender config: chunk_size={}, backpressure_threshold={}",
        config.chunk_size, config.backpressure_threshold
    );

    let handler = Arc::new(SendFilesHandler::new());
    handler.apply(SessionEvent::RoomCreated(room_id.clone()))?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let carrier = Carrier {
        room_id: room_id.clone(),
        channel,
        files: files
            .into_iter()
            .map(|f| File {
                id: Uuid::new_v4().to_string(),
                name: f.name,
                mime_type: f.mime_type,
                data: f.data,
            })
            .collect(),
        mode,
        config,
        handler: handler.clone(),
        cancel: cancel_rx,
    };
    tokio::spawn(carrier.run());

    Ok(SendFilesBubble::new(room_id, handler, cancel_tx))
}

fn validate(files: &[SenderFile], mode: TransferMode) -> Result<()> {
    if files.is_empty() {
        bail!("no files to send");
    }
    if mode == TransferMode::Single && files.len() != 1 {
        bail!(
            "single-file mode needs exactly one file, got {}",
            files.len()
        );
    }
    Ok(())
}
