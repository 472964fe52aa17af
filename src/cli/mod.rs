//! Command-line interface for Splitpack
//!
//! A single `build` subcommand drives the engine from a splitpack.toml file.

mod build;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

pub use build::BuildCommand;

/// Splitpack - module graph, transform pipeline and chunk splitting for frontend builds
#[derive(Parser, Debug)]
#[command(name = "splitpack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to splitpack.toml config file
    #[arg(short, long, global = true, default_value = "splitpack.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the project
    Build(BuildCommand),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<()> {
        print_banner();

        match &self.command {
            Commands::Build(cmd) => cmd.execute(&self.config).await,
        }
    }
}

/// Print the Splitpack banner
fn print_banner() {
    eprintln!(
        "\n{} {} {}\n",
        "⚡".cyan(),
        "Splitpack".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
