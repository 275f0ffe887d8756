//! # Phenex CLI
//!
//! *"The Phoenix remakes what burns"*
//!
//! The command-line driver for the Phenex fine-tuning pipeline.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "phenex")]
#[command(author = "Daemoniorum Engineering")]
#[command(version)]
#[command(about = "Supervised fine-tuning for quantized causal language models", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a fine-tuning pipeline from a configuration file
    Run {
        /// Path to the JSON run configuration
        #[arg(short, long, default_value = config::TRAINING_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Display version and build info
    Version,

    /// Inspect run configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Path to the JSON run configuration
        #[arg(short, long, default_value = config::TRAINING_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Show the default config file path
    Path,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let log_config = seere::LogConfig::new("phenex").with_log_level(&cli.log_level);
    let log_config = if cli.json_logs {
        log_config.with_json_logs()
    } else {
        log_config
    };
    seere::init_logging(&log_config);

    match cli.command {
        Commands::Run { config } => {
            commands::run(&config)?;
        }

        Commands::Version => {
            commands::version();
        }

        Commands::Config { action } => match action {
            ConfigAction::Show { config } => {
                config::show_config(&config);
            }
            ConfigAction::Path => {
                println!("{}", config::TRAINING_CONFIG_PATH);
            }
        },
    }

    Ok(())
}
