use std::process::ExitCode;

use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    cli.global.init_tracing();

    let result = match cli.command {
        Commands::Create(args) => commands::create::execute(args, &cli.global).await,
        Commands::Network(args) => commands::network::execute(args, &cli.global).await,
        Commands::Address(args) => commands::address::execute(args, &cli.global).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}
