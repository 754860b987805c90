use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use instadrop_backend::{BackendClient, ToolOutput, Upload};
use instadrop_common::{AppConfig, Gate};
use tracing::info;

use super::{safe_file_name, unique_path, usage};

#[derive(Clone, Debug, clap::Args)]
#[clap(name = "tool", about = "Run a document tool on the backend")]
pub struct Tool {
    #[clap(
        short,
        long,
        global = true,
        value_name = "DIR",
        help = "Where to write the result (default: current directory)"
    )]
    output: Option<PathBuf>,
    #[clap(long, global = true, value_name = "URL", help = "Backend to use")]
    api_url: Option<String>,
    #[clap(subcommand)]
    kind: ToolKind,
}

#[derive(Clone, Debug, Subcommand)]
enum ToolKind {
    #[command(about = "Shrink a PDF")]
    CompressPdf {
        file: PathBuf,
        #[clap(
            long,
            default_value_t = 50,
            value_parser = clap::value_parser!(u8).range(1..=100),
            help = "Target quality, 1-100"
        )]
        quality: u8,
    },
    #[command(about = "Shrink an image towards a target size")]
    CompressImage {
        file: PathBuf,
        #[clap(long, default_value_t = 50, help = "Target size in KB")]
        target_kb: u32,
    },
    #[command(about = "Extract text from an image")]
    Ocr { file: PathBuf },
    #[command(about = "Ask a question about a PDF")]
    Chat { file: PathBuf, query: String },
    #[command(about = "Split a PDF into page ranges")]
    Split {
        file: PathBuf,
        #[clap(long, help = "Page ranges such as 1-3,5")]
        ranges: String,
    },
    #[command(about = "Reorder the pages of a PDF")]
    Organize {
        file: PathBuf,
        #[clap(long, help = "New page order such as 3,1,2")]
        order: String,
    },
    #[command(about = "Remove the password from a PDF")]
    Unlock {
        file: PathBuf,
        #[clap(long, default_value = "")]
        password: String,
    },
    #[command(about = "Rebuild a damaged PDF")]
    Repair { file: PathBuf },
    #[command(about = "Convert a PDF to a Word document")]
    PdfToWord { file: PathBuf },
    #[command(about = "Convert an Office document to PDF")]
    OfficeToPdf { file: PathBuf },
    #[command(about = "Combine images into one PDF")]
    ImageToPdf {
        #[clap(required = true)]
        files: Vec<PathBuf>,
    },
}

enum Outcome {
    File(ToolOutput),
    Text(String),
}

impl Tool {
    pub async fn run(&self) -> Result<()> {
        let config = AppConfig::load()?;
        let api_url = self.api_url.clone().unwrap_or_else(|| config.api_url());
        let mut tracker = usage::tracker(&config, &api_url)?;
        if tracker.gate().await == Gate::Paywall {
            bail!(
                "You have used all {} free tool runs on this device. \
                 Upgrade to keep using the tools.",
                config.free_quota
            );
        }

        let client =
            BackendClient::new(&api_url).context("Invalid backend URL")?;

        let outcome = self.kind.call(&client).await?;
        let count = tracker.record().await;
        info!("tool run #{count} on this device");

        match outcome {
            Outcome::File(output) => {
                let dir = match &self.output {
                    Some(dir) => dir.clone(),
                    None => env::current_dir()
                        .context("Failed to resolve the current directory")?,
                };
                fs::create_dir_all(&dir).with_context(|| {
                    format!("Failed to create {}", dir.display())
                })?;
                let name = safe_file_name(&output.file_name, "output");
                let path = unique_path(&dir, &name);
                fs::write(&path, &output.data).with_context(|| {
                    format!("Failed to write {}", path.display())
                })?;
                println!("Saved {} ({} bytes)", path.display(), output.data.len());
            }
            Outcome::Text(text) => println!("{text}"),
        }
        println!("{} free runs left", tracker.remaining());
        Ok(())
    }
}

impl ToolKind {
    async fn call(&self, client: &BackendClient) -> Result<Outcome> {
        let output = match self {
            ToolKind::CompressPdf { file, quality } => {
                client.compress_pdf(upload(file).await?, *quality).await?
            }
            ToolKind::CompressImage { file, target_kb } => {
                client.compress_image(upload(file).await?, *target_kb).await?
            }
            ToolKind::Ocr { file } => {
                let ocr = client.ocr(upload(file).await?).await?;
                return Ok(Outcome::Text(ocr.extracted_text));
            }
            ToolKind::Chat { file, query } => {
                let chat = client.chat_pdf(upload(file).await?, query).await?;
                return Ok(Outcome::Text(chat.response));
            }
            ToolKind::Split { file, ranges } => {
                client.split_pdf(upload(file).await?, ranges).await?
            }
            ToolKind::Organize { file, order } => {
                client.organize_pdf(upload(file).await?, order).await?
            }
            ToolKind::Unlock { file, password } => {
                client.unlock_pdf(upload(file).await?, password).await?
            }
            ToolKind::Repair { file } => {
                client.repair_pdf(upload(file).await?).await?
            }
            ToolKind::PdfToWord { file } => {
                client.pdf_to_word(upload(file).await?).await?
            }
            ToolKind::OfficeToPdf { file } => {
                client.office_to_pdf(upload(file).await?).await?
            }
            ToolKind::ImageToPdf { files } => {
                let mut uploads = Vec::with_capacity(files.len());
                for file in files {
                    uploads.push(upload(file).await?);
                }
                client.image_to_pdf(uploads).await?
            }
        };
        Ok(Outcome::File(output))
    }
}

async fn upload(path: &Path) -> Result<Upload> {
    Upload::from_path(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}
