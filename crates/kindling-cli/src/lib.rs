//! kindling CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kindling_common::config::load_config;

/// kindling - a local Kubernetes platform on kind
#[derive(Parser, Debug)]
#[command(name = "kindling")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to $KINDLING_CONFIG, then ~/.kindling/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an environment, or converge an existing one
    Create(commands::EnvironmentArgs),
    /// Re-apply configuration to an existing environment
    Update(commands::EnvironmentArgs),
    /// Delete an environment's kind cluster
    Delete(commands::EnvironmentArgs),
    /// Delete every kind cluster kindling created
    DeleteAll,
    /// Show nodes and UI credentials for a ready environment
    Info(commands::EnvironmentArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        match self.command {
            Commands::Create(args) => commands::create::run(args, &config).await,
            Commands::Update(args) => commands::update::run(args, &config).await,
            Commands::Delete(args) => commands::delete::run(args, &config).await,
            Commands::DeleteAll => commands::delete_all::run(&config).await,
            Commands::Info(args) => commands::info::run(args, &config).await,
        }
    }
}
