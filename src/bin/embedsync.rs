//! Embedsync CLI Binary
//!
//! Command-line interface for the embedding index sync system.

use clap::Parser;
use embedsync::logging::init_logging;
use embedsync::tooling::cli::{Cli, CliContext};
use std::process;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Create CLI context
    let context = match CliContext::new(cli.workspace.clone(), cli.config.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error initializing workspace: {}", e);
            process::exit(1);
        }
    };

    let logging = context
        .config()
        .logging
        .clone()
        .with_env()
        .with_overrides(&cli.logging_overrides());
    if let Err(e) = init_logging(&logging, Some(context.workspace_root())) {
        eprintln!("Error initializing logging: {}", e);
        process::exit(1);
    }

    // Execute command
    match context.execute(&cli.command).await {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
