use crate::commands::Commands;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(name = "instadrop", version)]
#[clap(about = "InstaDrop: send files to another device through a room code", long_about = None)]
pub struct Cli {
    #[clap(short, long, global = true, help = "Print debug logs")]
    pub verbose: bool,
    #[clap(subcommand)]
    pub command: Commands,
}
