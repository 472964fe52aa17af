//! Build command implementation

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tracing::info;

use crate::bundler::{BuildOptions, Bundler};
use crate::config::Config;
use crate::utils::{format_duration, format_size};

/// Build the project
#[derive(Args, Debug)]
pub struct BuildCommand {
    /// Output directory
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,

    /// Skip minification regardless of configuration
    #[arg(long)]
    pub no_minify: bool,
}

impl BuildCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        let start = Instant::now();

        info!("Loading configuration from {}", config_path);
        let config = Config::load(config_path)?;

        eprintln!("{} Building {}...", "→".blue(), config.project.name.bold());

        let bundler = Bundler::new(config, self.into())?;
        let result = bundler.build().await?;

        eprintln!(
            "\n{} Built {} modules into {} chunk(s) in {}\n",
            "✓".green().bold(),
            result.graph.len(),
            result.chunks.len(),
            format_duration(start.elapsed())
        );

        for asset in &result.assets {
            eprintln!(
                "  {} {} {}",
                "•".dimmed(),
                asset.output_path.display().to_string().cyan(),
                format_size(asset.size).dimmed()
            );
        }

        for (entry, files) in result.manifest.entries() {
            eprintln!("  {} {}: {}", "↳".dimmed(), entry.bold(), files.join(", "));
        }

        eprintln!();

        Ok(())
    }
}

impl From<&BuildCommand> for BuildOptions {
    fn from(cmd: &BuildCommand) -> Self {
        Self {
            outdir: cmd.outdir.clone(),
            minify: cmd.no_minify.then_some(false),
        }
    }
}
