//! Lifecycle of one transfer attempt.
//!
//! Both roles share one sum type and one reducer, [`SessionState::apply`].
//! The lifecycle only moves forward: `Done` and `Error` are terminal, and a
//! retry means a new session with a new room code.
//!
//! Sender:   `Idle -> Waiting -> Transferring -> Done`
//! Receiver: `Idle -> Connecting -> Transferring (per file) -> Done`
//!
//! Any non-terminal state other than `Idle` can fall into `Error`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RoomId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Sender: room created, no receiver yet.
    Waiting { room_id: RoomId },
    /// Receiver: room joined, waiting for the first file.
    Connecting { room_id: RoomId },
    Transferring { progress: u8 },
    Done,
    Error { reason: String },
}

/// Flat projection of [`SessionState`] for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Disconnected,
    Waiting,
    Connecting,
    Transferring,
    Done,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    RoomCreated(RoomId),
    RoomJoined(RoomId),
    PeerConnected,
    MetadataReceived,
    Progress(u8),
    Completed,
    Failed(String),
    ChannelClosed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("session already finished as {0}")]
    Terminal(SessionStatus),
    #[error("`{event:?}` is not valid while {from}")]
    Invalid {
        from: SessionStatus,
        event: SessionEvent,
    },
}

impl SessionState {
    /// Applies `event`, returning the next state.
    pub fn apply(self, event: SessionEvent) -> Result<Self, TransitionError> {
        use SessionEvent as E;
        use SessionState as S;

        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.status()));
        }

        let next = match (self, event) {
            (S::Idle, E::RoomCreated(room_id)) => S::Waiting { room_id },
            (S::Idle, E::RoomJoined(room_id)) => S::Connecting { room_id },

            (S::Waiting { .. }, E::PeerConnected) => {
                S::Transferring { progress: 0 }
            }
            (state @ S::Connecting { .. }, E::PeerConnected) => state,
            (S::Connecting { .. }, E::MetadataReceived) => {
                S::Transferring { progress: 0 }
            }

            (S::Transferring { .. }, E::MetadataReceived) => {
                S::Transferring { progress: 0 }
            }
            (S::Transferring { .. }, E::Progress(progress)) => {
                S::Transferring {
                    progress: progress.min(100),
                }
            }
            (S::Transferring { .. }, E::Completed) => S::Done,

            (
                S::Waiting { .. } | S::Connecting { .. } | S::Transferring { .. },
                E::Failed(reason),
            ) => S::Error { reason },
            (
                S::Waiting { .. } | S::Connecting { .. } | S::Transferring { .. },
                E::ChannelClosed,
            ) => S::Error {
                reason: "connection closed before the transfer finished"
                    .to_owned(),
            },

            (from, event) => {
                return Err(TransitionError::Invalid {
                    from: from.status(),
                    event,
                });
            }
        };

        Ok(next)
    }

    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Idle => SessionStatus::Disconnected,
            Self::Waiting { .. } => SessionStatus::Waiting,
            Self::Connecting { .. } => SessionStatus::Connecting,
            Self::Transferring { .. } => SessionStatus::Transferring,
            Self::Done => SessionStatus::Done,
            Self::Error { .. } => SessionStatus::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }

    pub fn progress(&self) -> Option<u8> {
        match self {
            Self::Transferring { progress } => Some(*progress),
            Self::Done => Some(100),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Waiting => "waiting",
            Self::Connecting => "connecting",
            Self::Transferring => "transferring",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomId {
        RoomId::parse("123456").unwrap()
    }

    #[test]
    fn sender_lifecycle() {
        let state = SessionState::Idle
            .apply(SessionEvent::RoomCreated(room()))
            .unwrap();
        assert_eq!(state.status(), SessionStatus::Waiting);

        let state = state.apply(SessionEvent::PeerConnected).unwrap();
        assert_eq!(state, SessionState::Transferring { progress: 0 });

        let state = state.apply(SessionEvent::Progress(41)).unwrap();
        assert_eq!(state.progress(), Some(41));

        let state = state.apply(SessionEvent::Completed).unwrap();
        assert_eq!(state, SessionState::Done);
    }

    #[test]
    fn receiver_lifecycle() {
        let state = SessionState::Idle
            .apply(SessionEvent::RoomJoined(room()))
            .unwrap();
        assert_eq!(state.status(), SessionStatus::Connecting);

        let state = state.apply(SessionEvent::PeerConnected).unwrap();
        assert_eq!(state.status(), SessionStatus::Connecting);

        let state = state.apply(SessionEvent::MetadataReceived).unwrap();
        let state = state.apply(SessionEvent::Progress(100)).unwrap();
        let state = state.apply(SessionEvent::MetadataReceived).unwrap();
        assert_eq!(state, SessionState::Transferring { progress: 0 });

        assert_eq!(
            state.apply(SessionEvent::Completed).unwrap(),
            SessionState::Done
        );
    }

    #[test]
    fn closing_before_done_is_an_error() {
        let state = SessionState::Idle
            .apply(SessionEvent::RoomJoined(room()))
            .unwrap()
            .apply(SessionEvent::MetadataReceived)
            .unwrap()
            .apply(SessionEvent::ChannelClosed)
            .unwrap();
        assert_eq!(state.status(), SessionStatus::Error);
    }

    #[test]
    fn terminal_states_reject_events() {
        assert_eq!(
            SessionState::Done.apply(SessionEvent::ChannelClosed),
            Err(TransitionError::Terminal(SessionStatus::Done))
        );
        let failed = SessionState::Error {
            reason: "x".into(),
        };
        assert_eq!(
            failed.apply(SessionEvent::Completed),
            Err(TransitionError::Terminal(SessionStatus::Error))
        );
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let waiting = SessionState::Idle
            .apply(SessionEvent::RoomCreated(room()))
            .unwrap();
        assert!(matches!(
            waiting.clone().apply(SessionEvent::Completed),
            Err(TransitionError::Invalid { .. })
        ));
        assert!(matches!(
            SessionState::Idle.apply(SessionEvent::PeerConnected),
            Err(TransitionError::Invalid { .. })
        ));
        assert!(matches!(
            SessionState::Idle.apply(SessionEvent::ChannelClosed),
            Err(TransitionError::Invalid { .. })
        ));
    }

    #[test]
    fn progress_is_capped() {
        let state = SessionState::Transferring { progress: 0 }
            .apply(SessionEvent::Progress(250))
            .unwrap();
        assert_eq!(state.progress(), Some(100));
    }
}
