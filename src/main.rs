use anyhow::Result;
use clap::Parser;

use minctx::{
    cli::{handle_command, Cli},
    utils::init_logger,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Logs go to stderr; stdout is reserved for command output and the protocol
    init_logger(cli.verbose);

    handle_command(&cli).await
}
