use std::net::SocketAddr;

use anyhow::{Context, Result};
use instadrop_relay::{Relay as RoomRelay, serve};
use tokio::net::TcpListener;

#[derive(Clone, Debug, clap::Args)]
#[clap(name = "relay", about = "Run a relay that pairs senders and receivers")]
pub struct Relay {
    #[clap(long, default_value = "0.0.0.0:8000", help = "Address to listen on")]
    bind: SocketAddr,
}

impl Relay {
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.bind)
            .await
            .with_context(|| format!("Failed to bind {}", self.bind))?;
        println!("Relay listening on {}", listener.local_addr()?);

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down relay");
                Ok(())
            }
            served = serve(listener, RoomRelay::new()) => {
                served.context("Relay stopped")
            }
        }
    }
}
