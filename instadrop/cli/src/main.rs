use anyhow::Result;
use instadrop_cli::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    run_cli().await
}
