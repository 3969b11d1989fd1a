//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::builder::FalseyValueParser;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Reusable configuration file argument
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "SENSORLINK_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Parser)]
#[command(name = "sensorlink")]
#[command(author, version, about = "Sample Bluetooth sensor links at a fixed rate", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output (any non-empty NO_COLOR counts)
    #[arg(
        long,
        global = true,
        env = "NO_COLOR",
        value_parser = FalseyValueParser::new()
    )]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect every configured link and print one sample line per tick
    Watch {
        #[command(flatten)]
        config: ConfigArgs,

        /// Sampling rate in Hz (overrides config)
        #[arg(short, long)]
        rate: Option<f64>,

        /// Number of ticks to print (0 = until Ctrl-C)
        #[arg(short = 'n', long, default_value = "0")]
        count: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Seconds to wait for every link to connect (overrides config)
        #[arg(short = 'T', long)]
        connect_timeout: Option<u64>,

        /// Use simulated peers instead of the Bluetooth adapter
        #[arg(long)]
        demo: bool,
    },

    /// Validate and print the resolved configuration
    Check {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Write a starter configuration file
    Init {
        #[command(flatten)]
        config: ConfigArgs,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List the built-in attribute descriptors
    Descriptors {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_watch_defaults() {
        let cli = Cli::try_parse_from(["sensorlink", "watch"]).unwrap();
        match cli.command {
            Commands::Watch {
                rate,
                count,
                format,
                connect_timeout,
                demo,
                ..
            } => {
                assert_eq!(rate, None);
                assert_eq!(count, 0);
                assert_eq!(format, OutputFormat::Text);
                assert_eq!(connect_timeout, None);
                assert!(!demo);
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn test_watch_flags() {
        let cli = Cli::try_parse_from([
            "sensorlink",
            "watch",
            "--rate",
            "20",
            "-n",
            "5",
            "--format",
            "json",
            "--demo",
            "--config",
            "links.toml",
        ])
        .unwrap();
        match cli.command {
            Commands::Watch {
                config,
                rate,
                count,
                format,
                demo,
                ..
            } => {
                assert_eq!(rate, Some(20.0));
                assert_eq!(count, 5);
                assert_eq!(format, OutputFormat::Json);
                assert!(demo);
                assert_eq!(config.config, Some(PathBuf::from("links.toml")));
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn test_init_flags() {
        let cli = Cli::try_parse_from(["sensorlink", "init", "--force", "-c", "x.toml"]).unwrap();
        match cli.command {
            Commands::Init { config, force } => {
                assert!(force);
                assert_eq!(config.config, Some(PathBuf::from("x.toml")));
            }
            _ => panic!("expected init"),
        }
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(Cli::try_parse_from(["sensorlink", "descriptors", "--format", "csv"]).is_err());
    }
}
