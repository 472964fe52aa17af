//! Whole-chunk optimization
//!
//! Runs after splitting, one chunk at a time: unused export removal and
//! identifier mangling per module, then rendering, then minification of the
//! rendered script and purification and minification of the stylesheet.

mod exports;
pub(crate) mod lexer;
mod minify;
mod purify;

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, instrument, warn};

use crate::bundler::render::{dependency_order, render_script, render_stylesheet};
use crate::bundler::{Chunk, ChunkSet, ModuleGraph, ModuleId, ModuleType};
use crate::config::{Config, OptimizationConfig, OutputFormat};
use crate::error::Result;

pub use exports::{shake, LiveExports, UsedExports};
pub use minify::{collapse_css, mangle, minify_css, minify_js};
pub use purify::{purify_css, selector_used, ContentTokens};

/// Rendered and optimized output of one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizedChunk {
    /// Index of the chunk in its `ChunkSet`
    pub index: usize,
    /// Chunk id
    pub name: String,
    pub script: Option<String>,
    pub stylesheet: Option<String>,
}

/// Applies the configured optimizations to chunks
pub struct AssetOptimizer {
    root: PathBuf,
    format: OutputFormat,
    options: OptimizationConfig,
    minimize: bool,
    reserved: HashSet<String>,
    live: Option<LiveExports>,
    tokens: Option<ContentTokens>,
}

impl AssetOptimizer {
    /// Prepare graph-wide state: export liveness and purify tokens
    pub fn new(config: &Config, graph: &ModuleGraph, minimize: bool) -> Result<Self> {
        let options = config.optimization.clone();

        let live = options.used_exports.then(|| LiveExports::collect(graph));

        let tokens = if options.purify.enabled {
            let mut tokens = ContentTokens::new();
            for module in graph.modules().filter(|m| !m.module_type.is_stylesheet()) {
                tokens.scan(&module.transformed);
            }
            tokens.scan_globs(&config.root, &options.purify.content)?;
            if let Some(html) = &config.html {
                match fs::read_to_string(config.root.join(&html.template)) {
                    Ok(template) => tokens.scan(&template),
                    Err(e) => warn!("Cannot scan HTML template {}: {}", html.template, e),
                }
            }
            debug!("Purify token set holds {} tokens", tokens.len());
            Some(tokens)
        } else {
            None
        };

        Ok(Self {
            root: config.root.clone(),
            format: config.output.format,
            reserved: options.reserved.iter().cloned().collect(),
            options,
            minimize,
            live,
            tokens,
        })
    }

    /// Optimize every chunk of a set
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub fn optimize_all(&self, chunks: &ChunkSet, graph: &ModuleGraph) -> Result<Vec<OptimizedChunk>> {
        chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| self.optimize(index, chunk, graph))
            .collect()
    }

    /// Optimize one chunk
    pub fn optimize(&self, index: usize, chunk: &Chunk, graph: &ModuleGraph) -> Result<OptimizedChunk> {
        let ordered = dependency_order(chunk, graph);

        let mut scripts: Vec<(&ModuleId, String)> = Vec::new();
        let mut stylesheets: Vec<String> = Vec::new();

        for id in ordered {
            let Some(module) = graph.get_module(id) else { continue };
            if module.module_type.is_stylesheet() {
                stylesheets.push(module.transformed.clone());
                continue;
            }

            let mut content = module.transformed.clone();
            if module.module_type == ModuleType::Script {
                if let Some(live) = &self.live {
                    content = shake(&content, &live.used(id));
                }
                if self.options.mangle {
                    content = mangle(&content, &self.reserved);
                }
            }
            scripts.push((id, content));
        }

        let script = (!scripts.is_empty()).then(|| {
            let rendered = render_script(chunk, &scripts, graph, &self.root, self.format);
            if self.minimize {
                minify_js(&rendered)
            } else {
                rendered
            }
        });

        let stylesheet = if stylesheets.is_empty() {
            None
        } else {
            let mut css = render_stylesheet(&stylesheets);
            if let Some(tokens) = &self.tokens {
                css = purify_css(&css, tokens);
            }
            if self.minimize {
                css = minify_css(&css).unwrap_or_else(|e| {
                    warn!("Falling back to plain CSS compaction for chunk '{}': {}", chunk.id, e);
                    collapse_css(&css)
                });
            }
            Some(css)
        };

        debug!("Optimized chunk '{}'", chunk.id);

        Ok(OptimizedChunk {
            index,
            name: chunk.id.clone(),
            script,
            stylesheet,
        })
    }
}
