use std::{env, path::PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use instadrop_common::AppConfig;

#[derive(Subcommand, Debug)]
pub enum Config {
    #[command(about = "Print the current configuration")]
    Show,
    #[command(about = "Set the default output directory for received files")]
    SetOutput {
        #[clap(value_parser, help = "Output directory")]
        dir: PathBuf,
    },
    #[command(about = "Forget the default output directory")]
    ClearOutput,
    #[command(about = "Set the backend URL (the relay is derived from it)")]
    SetApi { url: String },
    #[command(about = "Set the web page used for join links")]
    SetJoinBase { url: String },
}

impl Config {
    pub fn run(&self) -> Result<()> {
        let mut config = AppConfig::load()?;

        match self {
            Config::Show => show(&config)?,
            Config::SetOutput { dir } => {
                let dir = if dir.is_absolute() {
                    dir.clone()
                } else {
                    env::current_dir()
                        .context("Failed to resolve the current directory")?
                        .join(dir)
                };
                config.set_default_out_dir(dir.clone())?;
                println!("Default output directory set to {}", dir.display());
            }
            Config::ClearOutput => {
                config.clear_default_out_dir()?;
                println!("Default output directory cleared");
            }
            Config::SetApi { url } => {
                config.set_api_url(url.clone())?;
                println!("Backend URL set to {}", config.api_url());
            }
            Config::SetJoinBase { url } => {
                config.set_join_base_url(url.clone())?;
                println!("Join links now point to {}", config.join_base_url);
            }
        }
        Ok(())
    }
}

fn show(config: &AppConfig) -> Result<()> {
    println!("Config file: {}", AppConfig::config_file()?.display());
    println!("Backend URL: {}", config.api_url());
    match config.relay_endpoint() {
        Ok(relay) => println!("Relay: {}", relay.as_str()),
        Err(e) => println!("Relay: invalid ({e})"),
    }
    println!("Join link base: {}", config.join_base_url);
    match &config.default_out_dir {
        Some(dir) => println!("Default output directory: {}", dir.display()),
        None => println!(
            "Default output directory: not set (using {})",
            config.get_default_out_dir().display()
        ),
    }
    println!("Usage backend: {:?}", config.usage_backend);
    println!("Free quota: {}", config.free_quota);
    Ok(())
}
