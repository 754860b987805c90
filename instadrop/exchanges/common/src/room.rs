//! Room codes and participant roles.
//!
//! A room code is the routing key on the relay: the sender generates it, the
//! receiver types it in (or scans it), and both open a channel addressed by
//! `(room, role)`. Uniqueness is probabilistic only; nothing on the client side
//! detects a collision.

use std::{fmt, str::FromStr};

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ROOM_ID_MIN: u32 = 100_000;
pub const ROOM_ID_MAX: u32 = 999_999;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomIdError {
    #[error("room code must be exactly 6 digits, got `{0}`")]
    Format(String),
    #[error("room code `{0}` is outside 100000..=999999")]
    Range(String),
}

/// Six-digit, human-shareable room code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    /// Uniform random code in `[100000, 999999]`.
    pub fn generate() -> Self {
        let code = rand::rng().random_range(ROOM_ID_MIN..=ROOM_ID_MAX);
        Self(code.to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, RoomIdError> {
        let raw = raw.trim();
        if raw.len() != 6 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RoomIdError::Format(raw.to_owned()));
        }
        let code: u32 = raw
            .parse()
            .map_err(|_| RoomIdError::Format(raw.to_owned()))?;
        if !(ROOM_ID_MIN..=ROOM_ID_MAX).contains(&code) {
            return Err(RoomIdError::Range(raw.to_owned()));
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomId {
    type Err = RoomIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Which end of a transfer a channel belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    /// The role on the other end of the room.
    pub fn peer(self) -> Self {
        match self {
            Self::Sender => Self::Receiver,
            Self::Receiver => Self::Sender,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Receiver => "receiver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown role `{0}`, expected `sender` or `receiver`")]
pub struct RoleError(pub String);

impl FromStr for Role {
    type Err = RoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sender" => Ok(Self::Sender),
            "receiver" => Ok(Self::Receiver),
            other => Err(RoleError(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn generated_codes_are_six_digits_in_range() {
        for _ in 0..1000 {
            let room = RoomId::generate();
            let code = room.as_str();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
            assert!(code >= "100000" && code <= "999999");
            assert_eq!(RoomId::parse(code).unwrap(), room);
        }
    }

    #[rstest]
    #[case("123456")]
    #[case("100000")]
    #[case("999999")]
    #[case(" 654321 ")]
    fn accepts_valid_codes(#[case] raw: &str) {
        assert_eq!(RoomId::parse(raw).unwrap().as_str(), raw.trim());
    }

    #[rstest]
    #[case("12345")]
    #[case("1234567")]
    #[case("12a456")]
    #[case("")]
    #[case("+12345")]
    fn rejects_malformed_codes(#[case] raw: &str) {
        assert!(matches!(RoomId::parse(raw), Err(RoomIdError::Format(_))));
    }

    #[test]
    fn rejects_leading_zero_codes() {
        assert_eq!(
            RoomId::parse("012345"),
            Err(RoomIdError::Range("012345".into()))
        );
    }

    #[test]
    fn roles_pair_up() {
        assert_eq!(Role::Sender.peer(), Role::Receiver);
        assert_eq!(Role::Receiver.peer(), Role::Sender);
        assert_eq!("receiver".parse::<Role>().unwrap(), Role::Receiver);
        assert!("viewer".parse::<Role>().is_err());
        assert_eq!(
            serde_json::to_string(&Role::Sender).unwrap(),
            "\"sender\""
        );
    }
}
