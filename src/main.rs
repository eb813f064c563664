//! modlink - framed module IPC over UNIX domain sockets
//!
//! `modlink serve` runs the server; `modlink send` talks to it as a module.

use clap::Parser;
use modlink::cli;
use modlink::commands::Commands;

#[derive(Parser)]
#[command(name = "modlink", about = "Checksummed module IPC over UNIX sockets")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
