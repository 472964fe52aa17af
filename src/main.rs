//! Splitpack - a code-splitting build engine for frontend assets
//!
//! # Features
//! - Module graph construction with concurrent, cached transform chains
//! - Cache-group chunk splitting with size constraints
//! - Unused export removal, stylesheet purification and minification
//! - Manifest of the files each entry needs, in load order

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use splitpack_lib::Cli;

/// Initialize the logging/tracing system
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("splitpack=debug,splitpack_lib=debug"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("splitpack=info,splitpack_lib=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

/// Grace period for blocking transforms still running when a build ends
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = runtime.block_on(cli.execute());
    // A timed-out build abandons its blocking transforms; do not wait for them
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}
