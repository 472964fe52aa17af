//! Splitpack library
//!
//! Build engine for frontend assets: resolves and transforms a module graph
//! from named entries, partitions it into chunks, optimizes and emits them
//! with a manifest.

pub mod bundler;
pub mod cli;
pub mod config;
pub mod emitter;
pub mod error;
pub mod optimizer;
pub mod plugins;
pub mod resolver;
pub mod transform;
pub mod utils;

pub use bundler::{BuildContext, BuildOptions, BuildResult, Bundler};
pub use cli::Cli;
pub use config::Config;
pub use error::{BuildError, Result};
