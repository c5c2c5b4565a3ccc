//! prioq - priority task queue broker.
//!
//! Main entry point for the prioq server and client.

mod cli;
mod client;
mod server;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::client::run_client;
use crate::server::run_server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        None => run_server(&cli.config, None, None).await,
        Some(Commands::Run { host, port }) => run_server(&cli.config, host, port).await,
        Some(Commands::Client(args)) => run_client(args).await,
    }
}
