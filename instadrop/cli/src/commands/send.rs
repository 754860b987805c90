use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use instadrop_common::{AppConfig, FileData, join_link, render_qr};
use instadropx_common::{RoomId, SessionState};
use instadropx_sender::{
    SendFilesRequest, SenderConfig, SenderFile, TransferMode, send_files,
};
use url::Url;

use crate::progress::SendProgress;

#[derive(Clone, Debug, clap::Args)]
#[clap(name = "send", about = "Send files and print a room code to join")]
pub struct Send {
    #[clap(value_parser, required = true, help = "Files to send")]
    files: Vec<PathBuf>,
    #[clap(long, help = "Use batch framing even for a single file")]
    batch: bool,
    #[clap(long, value_name = "URL", help = "Backend to use for this run")]
    api_url: Option<String>,
}

impl Send {
    pub async fn run(&self) -> Result<()> {
        let config = AppConfig::load()?;
        let relay = super::relay_endpoint(&config, self.api_url.as_deref())?;

        let files = self
            .files
            .iter()
            .map(PathBuf::as_path)
            .map(sender_file)
            .collect::<Result<Vec<_>>>()?;
        let mode = if self.batch {
            TransferMode::Batch
        } else {
            TransferMode::for_files(files.len())
        };

        let request = SendFilesRequest {
            files,
            mode,
            relay,
            config: SenderConfig::default(),
        };
        let bubble = send_files(request)
            .await
            .context("Failed to initiate file sending")?;

        let link = join_link(&config.join_base_url, bubble.room_id())?;
        display_session_info(bubble.room_id(), &link);

        bubble.subscribe(Arc::new(SendProgress::new()));
        println!("Waiting for a receiver... (Press Ctrl+C to cancel)");

        let state = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Cancelling file transfer...");
                bubble.cancel().await;
                bail!("Transfer cancelled");
            }
            state = bubble.wait() => state,
        };

        match state {
            SessionState::Done => {
                println!("All files sent successfully!");
                Ok(())
            }
            SessionState::Error { reason } => {
                bail!("Transfer failed: {reason}")
            }
            other => bail!("Transfer ended unexpectedly in {other:?}"),
        }
    }
}

fn sender_file(path: &Path) -> Result<SenderFile> {
    let data = FileData::new(path)
        .with_context(|| format!("Cannot send {}", path.display()))?;
    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();

    Ok(SenderFile {
        name: data.file_name(),
        mime_type,
        data: Arc::new(data),
    })
}

/// Prints the QR code, room code and join link of a new room.
fn display_session_info(room_id: &RoomId, link: &Url) {
    println!("\n========================================");
    println!("InstaDrop - Sender");
    println!("========================================\n");

    match render_qr(link.as_str()) {
        Ok(qr) => println!("{qr}\n"),
        Err(e) => eprintln!("Warning: Could not generate QR code: {e}"),
    }

    println!("Room code: {room_id}");
    println!("Join link: {link}\n");
}
