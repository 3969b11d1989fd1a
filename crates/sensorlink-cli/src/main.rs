use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod demo;
mod format;
mod links;

use cli::{Cli, Commands};
use commands::{WatchArgs, cmd_check, cmd_descriptors, cmd_init, cmd_watch};
use format::FormatOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "sensorlink", &mut io::stdout());
        return Ok(());
    }

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(!cli.no_color)
        .init();

    let opts = FormatOptions::new(cli.no_color);

    match cli.command {
        Commands::Watch {
            config,
            rate,
            count,
            format,
            connect_timeout,
            demo,
        } => {
            cmd_watch(WatchArgs {
                config: config.config,
                rate,
                count,
                format,
                connect_timeout,
                demo,
                opts: &opts,
            })
            .await?;
        }
        Commands::Check { config } => cmd_check(config.config.as_deref(), &opts)?,
        Commands::Init { config, force } => cmd_init(config.config.as_deref(), force)?,
        Commands::Descriptors { format } => cmd_descriptors(format, &opts)?,
        Commands::Completions { .. } => {
            // Already handled above
            unreachable!()
        }
    }

    Ok(())
}
