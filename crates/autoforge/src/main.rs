mod cli;
mod commands;
mod config;

use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = autoforge_core::logging::init(cli.log_level.as_deref(), cli.quiet) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let exit_code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", autoforge_core::errors::normalize_message(&e.to_string()));
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: &Cli) -> anyhow::Result<i32> {
    match &cli.command {
        Commands::Build(args) => {
            let loaded = config::load(cli.config.as_deref(), Some(&args.solution))?;
            commands::build::execute_build(&loaded, args, cli.json).await
        }
        Commands::Vars { action } => {
            let loaded = config::load(cli.config.as_deref(), None)?;
            commands::vars::execute_vars(&loaded, action, cli.json)
        }
        Commands::Solution { action } => {
            let loaded = config::load(cli.config.as_deref(), None)?;
            commands::solution::execute_solution(&loaded, action, cli.json)
        }
    }
}
