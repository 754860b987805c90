use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use instadropx_common::{DEFAULT_API_URL, RelayEndpoint};
use serde::{Deserialize, Serialize};

/// Overrides `api_url` from the config file when set.
pub const API_URL_ENV: &str = "INSTADROP_API_URL";

pub const DEFAULT_JOIN_BASE_URL: &str =
    "http://localhost:3000/tools/instant-drop";

pub const DEFAULT_FREE_QUOTA: u32 = 5;

const APP_DIR: &str = "instadrop";

/// Where the usage counter is kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageBackend {
    #[default]
    Local,
    Remote,
}

/// Configuration for the application.
///
/// This structure is persisted to TOML and stores user preferences such as
/// the backend location and the default directory for received files.
///
/// Storage location:
/// - Linux: $XDG_CONFIG_HOME/instadrop/config.toml or
///   $HOME/.config/instadrop/config.toml
/// - macOS: $HOME/Library/Application Support/instadrop/config.toml
/// - Windows: %APPDATA%\instadrop\config.toml
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Backend base URL. The relay is derived from it unless `relay_url` is
    /// set.
    pub api_url: Option<String>,
    pub relay_url: Option<String>,
    /// Web page that accepts `?room=<code>` join links.
    pub join_base_url: String,
    pub default_out_dir: Option<PathBuf>,
    pub usage_backend: UsageBackend,
    pub free_quota: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            relay_url: None,
            join_base_url: DEFAULT_JOIN_BASE_URL.to_owned(),
            default_out_dir: None,
            usage_backend: UsageBackend::Local,
            free_quota: DEFAULT_FREE_QUOTA,
        }
    }
}

impl AppConfig {
    /// `instadrop` under the platform config root.
    pub fn config_dir() -> Result<PathBuf> {
        platform_config_root()
            .map(|root| root.join(APP_DIR))
            .ok_or_else(|| {
                anyhow!(
                    "Unable to determine config directory (no home directory in the environment)"
                )
            })
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Loads the configuration from disk, or the defaults when no file exists.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(config_file: &Path) -> Result<Self> {
        if !config_file.exists() {
            return Ok(Self::default());
        }

        let config_content =
            fs::read_to_string(config_file).with_context(|| {
                format!("Failed to read config file: {}", config_file.display())
            })?;

        toml::from_str(&config_content).with_context(|| {
            format!("Failed to parse config file: {}", config_file.display())
        })
    }

    /// Saves the configuration, creating the directory if needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, config_file: &Path) -> Result<()> {
        if let Some(config_dir) = config_file.parent() {
            if !config_dir.exists() {
                fs::create_dir_all(config_dir).with_context(|| {
                    format!(
                        "Failed to create config directory: {}",
                        config_dir.display()
                    )
                })?;
            }
        }

        let config_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config")?;

        fs::write(config_file, config_content).with_context(|| {
            format!("Failed to write config file: {}", config_file.display())
        })
    }

    /// Backend base URL: `INSTADROP_API_URL`, then the config file, then
    /// the built-in default.
    pub fn api_url(&self) -> String {
        env::var(API_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_owned())
    }

    /// Relay to open transfer channels on.
    pub fn relay_endpoint(&self) -> Result<RelayEndpoint> {
        let base = match &self.relay_url {
            Some(relay_url) => relay_url.clone(),
            None => self.api_url(),
        };
        RelayEndpoint::from_api_url(&base)
            .with_context(|| format!("Invalid relay URL: {base}"))
    }

    /// Returns the saved default receive directory, or a suggested one.
    pub fn get_default_out_dir(&self) -> PathBuf {
        match &self.default_out_dir {
            Some(dir) => dir.clone(),
            None => suggested_default_out_dir(),
        }
    }

    pub fn set_default_out_dir(&mut self, dir: PathBuf) -> Result<()> {
        self.default_out_dir = Some(dir);
        self.save()
    }

    pub fn clear_default_out_dir(&mut self) -> Result<()> {
        self.default_out_dir = None;
        self.save()
    }

    pub fn set_api_url(&mut self, url: String) -> Result<()> {
        RelayEndpoint::from_api_url(&url)
            .with_context(|| format!("Invalid API URL: {url}"))?;
        self.api_url = Some(url.trim().trim_end_matches('/').to_owned());
        self.save()
    }

    pub fn set_join_base_url(&mut self, url: String) -> Result<()> {
        url::Url::parse(url.trim())
            .with_context(|| format!("Invalid join link base: {url}"))?;
        self.join_base_url = url.trim().to_owned();
        self.save()
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var_os(name)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn platform_config_root() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        env_path("APPDATA")
            .or_else(|| env_path("USERPROFILE").map(|home| home.join(".config")))
    } else if cfg!(target_os = "macos") {
        env_path("HOME")
            .map(|home| home.join("Library").join("Application Support"))
    } else {
        env_path("XDG_CONFIG_HOME")
            .or_else(|| env_path("HOME").map(|home| home.join(".config")))
    }
}

/// Suggested receive directory when no default is saved:
/// - Linux/macOS: $HOME/Downloads/InstaDrop
/// - Windows: %USERPROFILE%\Downloads\InstaDrop
pub fn suggested_default_out_dir() -> PathBuf {
    let home = if cfg!(target_os = "windows") {
        env_path("USERPROFILE")
    } else {
        env_path("HOME")
    };

    match home {
        Some(home) => home.join("Downloads").join("InstaDrop"),
        None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("config.toml"))
            .unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.free_quota, 5);
        assert_eq!(config.join_base_url, DEFAULT_JOIN_BASE_URL);
    }

    #[test]
    fn saves_and_loads() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("nested").join("config.toml");
        let config = AppConfig {
            api_url: Some("https://api.example.com".into()),
            default_out_dir: Some(PathBuf::from("/tmp/drops")),
            usage_backend: UsageBackend::Remote,
            ..AppConfig::default()
        };

        config.save_to(&file).unwrap();
        assert_eq!(AppConfig::load_from(&file).unwrap(), config);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("config.toml");
        fs::write(&file, "usage_backend = \"remote\"\n").unwrap();

        let config = AppConfig::load_from(&file).unwrap();
        assert_eq!(config.usage_backend, UsageBackend::Remote);
        assert_eq!(config.free_quota, DEFAULT_FREE_QUOTA);
        assert!(config.api_url.is_none());
    }

    #[test]
    fn rejects_garbage() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("config.toml");
        fs::write(&file, "free_quota = \"lots\"").unwrap();
        assert!(AppConfig::load_from(&file).is_err());
    }

    #[test]
    fn explicit_relay_wins_over_api_url() {
        let config = AppConfig {
            api_url: Some("https://api.example.com".into()),
            relay_url: Some("wss://relay.example.com/".into()),
            ..AppConfig::default()
        };
        assert_eq!(
            config.relay_endpoint().unwrap().as_str(),
            "wss://relay.example.com"
        );
    }

    #[test]
    fn saved_out_dir_wins_over_suggestion() {
        let config = AppConfig {
            default_out_dir: Some(PathBuf::from("/data/in")),
            ..AppConfig::default()
        };
        assert_eq!(config.get_default_out_dir(), PathBuf::from("/data/in"));
    }
}
