// src/main.rs
mod backup;
mod cli;
mod companion;
mod config;
mod credentials;
mod crypto;
mod error;
mod export;
mod fsutil;
mod isolation;
mod manager;
mod token;

#[cfg(test)]
mod test_support;

use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli_args = cli::Cli::parse();

    let default_filter = if cli_args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
    log::info!("Starting claude-switch");

    match cli::handle_cli_command(cli_args) {
        Ok(()) => {
            log::info!("Command finished successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Command failed: {:#?}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
