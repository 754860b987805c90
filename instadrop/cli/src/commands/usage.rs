use anyhow::{Context, Result};
use instadrop_backend::{BackendClient, RemoteUsageStore};
use instadrop_common::{
    AppConfig, DeviceId, LocalUsageStore, UsageBackend, UsageError,
    UsageStatus, UsageStore, UsageTracker,
};

#[derive(Clone, Debug, clap::Args)]
#[clap(name = "usage", about = "Show free tool runs left on this device")]
pub struct Usage {}

impl Usage {
    pub async fn run(&self) -> Result<()> {
        let config = AppConfig::load()?;
        let mut tracker = tracker(&config, &config.api_url())?;

        println!("Device: {}", tracker.device());
        if let Err(e) = tracker.refresh().await {
            eprintln!("Warning: usage store unavailable: {e}");
        }
        println!("Used: {}", tracker.count());
        println!("Remaining: {} of {}", tracker.remaining(), config.free_quota);
        Ok(())
    }
}

/// Store selected by `usage_backend`.
pub(super) enum Metering {
    Local(LocalUsageStore),
    Remote(RemoteUsageStore),
}

impl UsageStore for Metering {
    async fn status(
        &self,
        device: &DeviceId,
    ) -> Result<UsageStatus, UsageError> {
        match self {
            Metering::Local(store) => store.status(device).await,
            Metering::Remote(store) => store.status(device).await,
        }
    }

    async fn record(&self, device: &DeviceId) -> Result<u32, UsageError> {
        match self {
            Metering::Local(store) => store.record(device).await,
            Metering::Remote(store) => store.record(device).await,
        }
    }
}

/// Tracker metering against `api_url` when the remote backend is selected.
pub(super) fn tracker(
    config: &AppConfig,
    api_url: &str,
) -> Result<UsageTracker<Metering>> {
    let store = metering(config, api_url)?;
    Ok(UsageTracker::new(store, DeviceId::local(), config.free_quota))
}

fn metering(config: &AppConfig, api_url: &str) -> Result<Metering> {
    Ok(match config.usage_backend {
        UsageBackend::Local => {
            Metering::Local(LocalUsageStore::in_config_dir(config.free_quota)?)
        }
        UsageBackend::Remote => {
            let client =
                BackendClient::new(api_url).context("Invalid backend URL")?;
            Metering::Remote(RemoteUsageStore::new(client, config.free_quota))
        }
    })
}
