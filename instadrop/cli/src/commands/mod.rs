use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use instadrop_common::AppConfig;
use instadropx_common::RelayEndpoint;

mod config;
mod receive;
mod relay;
mod send;
mod tool;
mod usage;

#[derive(Debug, Subcommand)]
pub enum Commands {
    Send(send::Send),
    Receive(receive::Receive),
    Relay(relay::Relay),
    #[command(about = "Show or change the configuration")]
    Config {
        #[clap(subcommand)]
        subcommand: config::Config,
    },
    Usage(usage::Usage),
    Tool(tool::Tool),
}

impl Commands {
    pub async fn run(&self) -> Result<()> {
        match self {
            Commands::Send(send) => send.run().await,
            Commands::Receive(receive) => receive.run().await,
            Commands::Relay(relay) => relay.run().await,
            Commands::Config { subcommand } => subcommand.run(),
            Commands::Usage(usage) => usage.run().await,
            Commands::Tool(tool) => tool.run().await,
        }
    }
}

/// Relay for this run. `--api-url` replaces both the configured backend and
/// any explicit relay.
fn relay_endpoint(
    config: &AppConfig,
    api_url: Option<&str>,
) -> Result<RelayEndpoint> {
    match api_url {
        Some(url) => RelayEndpoint::from_api_url(url)
            .with_context(|| format!("Invalid API URL: {url}")),
        None => config.relay_endpoint(),
    }
}

/// Last path component of a peer supplied name, or `fallback` when nothing
/// usable is left.
fn safe_file_name(name: &str, fallback: &str) -> String {
    let name = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match name {
        "" | "." | ".." => fallback.to_owned(),
        name => name.to_owned(),
    }
}

/// `dir/name`, or `dir/stem (n).ext` when that is taken.
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_owned());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| dir.join(format!("{stem} ({n}){ext}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn strips_directories_from_peer_names() {
        assert_eq!(safe_file_name("report.pdf", "f"), "report.pdf");
        assert_eq!(safe_file_name("../../etc/passwd", "f"), "passwd");
        assert_eq!(safe_file_name("C:\\Users\\x\\a.txt", "f"), "a.txt");
        assert_eq!(safe_file_name("dir/..", "f"), "f");
        assert_eq!(safe_file_name("", "file-1"), "file-1");
    }

    #[test]
    fn numbers_taken_names() {
        let dir = tempdir().unwrap();
        assert_eq!(unique_path(dir.path(), "a.pdf"), dir.path().join("a.pdf"));

        fs::write(dir.path().join("a.pdf"), b"1").unwrap();
        fs::write(dir.path().join("a (1).pdf"), b"2").unwrap();
        assert_eq!(
            unique_path(dir.path(), "a.pdf"),
            dir.path().join("a (2).pdf")
        );

        fs::write(dir.path().join("notes"), b"3").unwrap();
        assert_eq!(
            unique_path(dir.path(), "notes"),
            dir.path().join("notes (1)")
        );
    }

    #[test]
    fn api_url_flag_overrides_config() {
        let config = AppConfig {
            relay_url: Some("ws://relay.internal:9000".into()),
            ..AppConfig::default()
        };
        assert_eq!(
            relay_endpoint(&config, Some("https://api.example.com"))
                .unwrap()
                .as_str(),
            "wss://api.example.com"
        );
        assert_eq!(
            relay_endpoint(&config, None).unwrap().as_str(),
            "ws://relay.internal:9000"
        );
    }
}
