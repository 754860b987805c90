use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use instadrop_common::{AppConfig, room_from_link};
use instadropx_common::{FileProjection, RoomId, SessionState};
use instadropx_receiver::{
    ReceiveFilesRequest, ReceiverConfig, receive_files,
};
use uuid::Uuid;

use super::{safe_file_name, unique_path};
use crate::progress::ReceiveProgress;

#[derive(Clone, Debug, clap::Args)]
#[clap(name = "receive", about = "Join a room and save the files sent to it")]
pub struct Receive {
    #[clap(value_parser, help = "Six-digit room code")]
    code: Option<String>,
    #[clap(long, value_name = "URL", conflicts_with = "code", help = "Join link")]
    link: Option<String>,
    #[clap(short, long, value_name = "DIR", help = "Output directory")]
    output: Option<PathBuf>,
    #[clap(
        long,
        requires = "output",
        help = "Remember the output directory as the default"
    )]
    save_output: bool,
    #[clap(long, value_name = "URL", help = "Backend to use for this run")]
    api_url: Option<String>,
}

impl Receive {
    pub async fn run(&self) -> Result<()> {
        let room_id = self.room_id()?;
        let mut config = AppConfig::load()?;
        let relay = super::relay_endpoint(&config, self.api_url.as_deref())?;

        let output_dir = match &self.output {
            Some(dir) => dir.clone(),
            None => config.get_default_out_dir(),
        };
        if self.save_output {
            config.set_default_out_dir(output_dir.clone())?;
            println!("Saved {} as the default output", output_dir.display());
        }

        let receiving_path = output_dir.join(Uuid::new_v4().to_string());
        fs::create_dir_all(&receiving_path).with_context(|| {
            format!(
                "Failed to create receiving directory: {}",
                receiving_path.display()
            )
        })?;

        let request = ReceiveFilesRequest {
            room_id,
            relay,
            config: ReceiverConfig::default(),
        };
        let bubble = receive_files(request)
            .await
            .context("Failed to initiate file receiving")?;
        bubble.subscribe(Arc::new(ReceiveProgress::new()));

        println!("Joined room {}", bubble.room_id());
        println!("Files will be saved to: {}", receiving_path.display());
        println!("Receiving files... (Press Ctrl+C to cancel)");

        let state = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Cancelling file transfer...");
                bubble.cancel().await
            }
            state = bubble.wait() => state,
        };

        // Completed files are kept even when the session failed later on.
        for path in save_files(&receiving_path, bubble.files())? {
            println!("Saved {}", path.display());
        }

        match state {
            SessionState::Done => {
                println!("All files received successfully!");
                Ok(())
            }
            SessionState::Error { reason } => {
                bail!("Transfer failed: {reason}")
            }
            other => bail!("Transfer ended unexpectedly in {other:?}"),
        }
    }

    fn room_id(&self) -> Result<RoomId> {
        match (&self.code, &self.link) {
            (Some(code), _) => RoomId::parse(code)
                .with_context(|| format!("Invalid room code `{code}`")),
            (None, Some(link)) => room_from_link(link)
                .with_context(|| format!("Invalid join link `{link}`")),
            (None, None) => bail!("Provide a room code or a join link (--link)"),
        }
    }
}

fn save_files(dir: &Path, files: Vec<FileProjection>) -> Result<Vec<PathBuf>> {
    files
        .into_iter()
        .enumerate()
        .map(|(i, file)| {
            let name = safe_file_name(file.name(), &format!("file-{}", i + 1));
            let path = unique_path(dir, &name);
            fs::write(&path, &file.data).with_context(|| {
                format!("Failed to write {}", path.display())
            })?;
            Ok(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use instadropx_common::FileMetadata;
    use tempfile::tempdir;

    fn projection(name: &str, data: &[u8]) -> FileProjection {
        FileProjection {
            metadata: FileMetadata::single(
                name.into(),
                data.len() as u64,
                "text/plain".into(),
            ),
            data: data.to_vec(),
        }
    }

    #[test]
    fn saves_files_without_clobbering() {
        let dir = tempdir().unwrap();
        let saved = save_files(
            dir.path(),
            vec![
                projection("a.txt", b"first"),
                projection("../a.txt", b"second"),
                projection("", b"third"),
            ],
        )
        .unwrap();

        assert_eq!(
            saved,
            vec![
                dir.path().join("a.txt"),
                dir.path().join("a (1).txt"),
                dir.path().join("file-3"),
            ]
        );
        assert_eq!(fs::read(&saved[1]).unwrap(), b"second");
    }
}
