// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use switchboard::config::Config;

#[derive(Parser)]
#[command(name = "switchboard", version, about = "Agent session server for call distribution.")]
struct Cli {
    #[command(flatten)]
    config: Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    if let Err(e) = switchboard::run::run(cli.config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
