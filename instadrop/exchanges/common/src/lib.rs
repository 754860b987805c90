//! Shared vocabulary of a drop session: wire frames, room codes, the session
//! lifecycle and the channels both ends talk over.

mod channel;
mod frame;
mod projection;
mod room;
mod session;
mod ws;

use std::time::Duration;

pub use channel::{ChannelError, FrameChannel, MemoryChannel, TryRecv};
pub use frame::{ControlFrame, FileMetadata, Frame, FrameError, Inbound};
pub use projection::{FileProjection, progress_pct};
pub use room::{ROOM_ID_MAX, ROOM_ID_MIN, Role, RoleError, RoomId, RoomIdError};
pub use session::{SessionEvent, SessionState, SessionStatus, TransitionError};
pub use ws::{DEFAULT_API_URL, EndpointError, RelayEndpoint, WsChannel};

/// Maximum payload of one binary frame.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Sending pauses while more than this many bytes sit in the channel queue.
pub const BACKPRESSURE_THRESHOLD: u64 = 2 * 1024 * 1024;

/// Pause between two backpressure checks.
pub const BACKPRESSURE_DELAY: Duration = Duration::from_millis(50);

/// Time the sender keeps its channel open after the terminating frame.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);
