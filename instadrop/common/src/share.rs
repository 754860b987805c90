//! Join links and their QR rendering.

use anyhow::{Context, Result};
use instadropx_common::{RoomId, RoomIdError};
use qrcode::{QrCode, render::unicode};
use thiserror::Error;
use url::Url;

/// Query parameter carrying the room code.
pub const ROOM_PARAM: &str = "room";

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("not a valid link: {0}")]
    Url(#[from] url::ParseError),
    #[error("link has no `{ROOM_PARAM}` parameter")]
    MissingRoom,
    #[error(transparent)]
    Room(#[from] RoomIdError),
}

/// `base` with `room=<code>` appended to its query.
pub fn join_link(base: &str, room_id: &RoomId) -> Result<Url> {
    let mut url = Url::parse(base.trim())
        .with_context(|| format!("Invalid join link base: {base}"))?;
    url.query_pairs_mut()
        .append_pair(ROOM_PARAM, room_id.as_str());
    Ok(url)
}

/// Room code carried by a join link.
pub fn room_from_link(link: &str) -> Result<RoomId, ShareError> {
    let url = Url::parse(link.trim())?;
    let (_, code) = url
        .query_pairs()
        .find(|(key, _)| key == ROOM_PARAM)
        .ok_or(ShareError::MissingRoom)?;
    Ok(RoomId::parse(&code)?)
}

/// Renders `text` as a terminal QR code, light modules on a dark background.
pub fn render_qr(text: &str) -> Result<String> {
    let code =
        QrCode::new(text.as_bytes()).context("Failed to generate QR code")?;

    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}
