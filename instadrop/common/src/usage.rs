//! Per-device usage metering.
//!
//! A [`UsageTracker`] is built once by the caller and handed to whatever needs
//! to gate tool runs. Where the count lives is decided by the [`UsageStore`]
//! it wraps: [`LocalUsageStore`] keeps it in a JSON file, the backend crate
//! provides a remote one.

use std::{
    collections::BTreeMap,
    env, fmt,
    future::Future,
    io,
    path::{Path, PathBuf},
};

use anyhow::Result;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{fs, sync::Mutex};
use tracing::{debug, warn};

use crate::AppConfig;

const DEVICE_ID_LEN: usize = 32;
const USAGE_FILE: &str = "usage.json";

/// Stable, coarse identifier of this machine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Base64 of the `|`-joined components, cut to 32 characters.
    pub fn fingerprint<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = components
            .into_iter()
            .map(|c| c.as_ref().to_owned())
            .collect::<Vec<_>>()
            .join("|");
        let mut encoded = STANDARD.encode(joined);
        encoded.truncate(DEVICE_ID_LEN);
        Self(encoded)
    }

    /// Fingerprint of the host name, user, OS and architecture.
    pub fn local() -> Self {
        let host = env::var("HOSTNAME")
            .or_else(|_| env::var("COMPUTERNAME"))
            .unwrap_or_default();
        let user = env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .unwrap_or_default();
        Self::fingerprint([
            host.as_str(),
            user.as_str(),
            env::consts::OS,
            env::consts::ARCH,
        ])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStatus {
    pub count: u32,
    pub remaining: u32,
}

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("usage store I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("usage store is corrupt: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("usage service failed: {0}")]
    Remote(String),
}

/// Persistence for per-device counts.
pub trait UsageStore: Send + Sync {
    fn status(
        &self,
        device: &DeviceId,
    ) -> impl Future<Output = Result<UsageStatus, UsageError>> + Send;

    /// Increments the count and returns the new value.
    fn record(
        &self,
        device: &DeviceId,
    ) -> impl Future<Output = Result<u32, UsageError>> + Send;
}

/// Counts kept in a JSON object mapping device id to count.
pub struct LocalUsageStore {
    path: PathBuf,
    quota: u32,
    lock: Mutex<()>,
}

impl LocalUsageStore {
    pub fn new(path: impl Into<PathBuf>, quota: u32) -> Self {
        Self {
            path: path.into(),
            quota,
            lock: Mutex::new(()),
        }
    }

    /// Store at `usage.json` next to the config file.
    pub fn in_config_dir(quota: u32) -> Result<Self> {
        Ok(Self::new(AppConfig::config_dir()?.join(USAGE_FILE), quota))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_counts(&self) -> Result<BTreeMap<String, u32>, UsageError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_counts(
        &self,
        counts: &BTreeMap<String, u32>,
    ) -> Result<(), UsageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(counts)?;
        fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

impl UsageStore for LocalUsageStore {
    async fn status(
        &self,
        device: &DeviceId,
    ) -> Result<UsageStatus, UsageError> {
        let counts = self.read_counts().await?;
        let count = counts.get(device.as_str()).copied().unwrap_or(0);
        Ok(UsageStatus {
            count,
            remaining: self.quota.saturating_sub(count),
        })
    }

    async fn record(&self, device: &DeviceId) -> Result<u32, UsageError> {
        let _guard = self.lock.lock().await;
        let mut counts = self.read_counts().await?;
        let count = counts.entry(device.as_str().to_owned()).or_insert(0);
        *count = count.saturating_add(1);
        let count = *count;
        self.write_counts(&counts).await?;
        debug!("recorded use #{count} for device {device}");
        Ok(count)
    }
}

/// Outcome of [`UsageTracker::gate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Allowed,
    /// Free quota exhausted.
    Paywall,
}

/// Usage context for one device.
pub struct UsageTracker<S> {
    store: S,
    device: DeviceId,
    quota: u32,
    count: u32,
}

impl<S: UsageStore> UsageTracker<S> {
    pub fn new(store: S, device: DeviceId, quota: u32) -> Self {
        Self {
            store,
            device,
            quota,
            count: 0,
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Last known count.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn can_use(&self) -> bool {
        self.count < self.quota
    }

    pub fn remaining(&self) -> u32 {
        self.quota.saturating_sub(self.count)
    }

    /// Reloads the count from the store.
    pub async fn refresh(&mut self) -> Result<UsageStatus, UsageError> {
        let status = self.store.status(&self.device).await?;
        self.count = status.count;
        Ok(status)
    }

    pub async fn record(&mut self) -> u32 {
        self.count = match self.store.record(&self.device).await {
            Ok(count) => count,
            Err(e) => {
                warn!("failed to record usage, counting locally: {e}");
                self.count.saturating_add(1)
            }
        };
        self.count
    }

    /// Re-checks the store before an action. Falls back to the cached count
    /// when the store is unreachable.
    pub async fn gate(&mut self) -> Gate {
        match self.refresh().await {
            Ok(status) if status.remaining == 0 => Gate::Paywall,
            Ok(_) => Gate::Allowed,
            Err(e) => {
                warn!("usage store unreachable, using cached count: {e}");
                if self.can_use() {
                    Gate::Allowed
                } else {
                    Gate::Paywall
                }
            }
        }
    }
}
