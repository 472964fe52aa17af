//! Core bundler implementation
//!
//! Handles the module graph, chunk splitting and the build orchestration.
//! A build runs its stages as barriers: graph construction, splitting,
//! optimization, emission. All state lives in a [`BuildContext`], so several
//! builds can run side by side.

mod builder;
mod chunk;
mod interop;
pub(crate) mod graph;
pub(crate) mod render;
mod split;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::emitter::{AssetInfo, BuildManifest, BuildStats, Emitter};
use crate::error::{BuildError, Result};
use crate::optimizer::AssetOptimizer;
use crate::plugins::{Plugin, PluginManager};
use crate::resolver::Resolver;
use crate::transform::{Transform, TransformCache, TransformPipeline, TransformRegistry};

pub use builder::GraphBuilder;
pub use chunk::{AssetType, Chunk, ChunkKind, ChunkSet};
pub use graph::{Module, ModuleGraph, ModuleId, ModuleType};
pub use render::{dependency_order, module_name, render_script, render_stylesheet};
pub use split::{
    rules_from_config, CacheGroupRule, ChunkSplitter, MatchContext, ModuleMatcher, SizeConstraints,
};

/// Everything a build needs, passed explicitly
pub struct BuildContext {
    /// Project configuration
    pub config: Arc<Config>,

    /// Module resolver
    pub resolver: Resolver,

    /// Transform chains
    pub pipeline: TransformPipeline,

    /// Lifecycle hooks
    pub plugins: PluginManager,

    /// Cache groups, configured ones first
    pub cache_groups: Vec<CacheGroupRule>,

    /// Transform cache shared with the pipeline
    pub cache: Arc<TransformCache>,
}

impl BuildContext {
    /// Context with the built-in transforms and the configured plugins
    pub fn new(mut config: Config) -> Result<Self> {
        if let Ok(root) = config.root.canonicalize() {
            config.root = root;
        }

        let cache = Arc::new(match config.cache_dir() {
            Some(dir) => TransformCache::persistent(dir),
            None => TransformCache::in_memory(),
        });
        let pipeline =
            TransformPipeline::new(&config, TransformRegistry::with_builtins())?.with_cache(cache.clone());
        let plugins = PluginManager::from_config(&config)?;
        let cache_groups = rules_from_config(&config.split_chunks, &config.root)?;

        Ok(Self {
            resolver: Resolver::new(&config),
            pipeline,
            plugins,
            cache_groups,
            cache,
            config: Arc::new(config),
        })
    }

    /// Register an additional transform
    pub fn with_transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.pipeline.register(transform);
        self
    }

    /// Register a plugin after the configured ones
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.register(plugin);
        self
    }

    /// Add a cache group after the configured ones
    pub fn with_cache_group(mut self, rule: CacheGroupRule) -> Self {
        self.cache_groups.push(rule);
        self
    }

    /// Share a transform cache, e.g. between consecutive builds
    pub fn with_cache(mut self, cache: Arc<TransformCache>) -> Self {
        self.pipeline = self.pipeline.with_cache(cache.clone());
        self.cache = cache;
        self
    }

    pub fn size_constraints(&self) -> SizeConstraints {
        SizeConstraints::from_config(&self.config.split_chunks)
    }
}

/// Command-line overrides for a build
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Output directory instead of `output.dir`
    pub outdir: Option<PathBuf>,

    /// Override `optimization.minimize`
    pub minify: Option<bool>,
}

/// Result of a build operation
#[derive(Debug)]
pub struct BuildResult {
    pub graph: ModuleGraph,
    pub chunks: ChunkSet,
    pub manifest: BuildManifest,
    /// Written files
    pub assets: Vec<AssetInfo>,
    pub stats: BuildStats,
}

/// The main bundler
pub struct Bundler {
    ctx: Arc<BuildContext>,
    options: BuildOptions,
}

impl Bundler {
    /// Create a new bundler instance
    pub fn new(config: Config, options: BuildOptions) -> Result<Self> {
        Ok(Self::with_context(BuildContext::new(config)?, options))
    }

    pub fn with_context(ctx: BuildContext, options: BuildOptions) -> Self {
        Self {
            ctx: Arc::new(ctx),
            options,
        }
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    fn output_dir(&self) -> PathBuf {
        self.options
            .outdir
            .clone()
            .unwrap_or_else(|| self.ctx.config.output_dir())
    }

    /// Build the project
    #[instrument(skip_all, fields(project = %self.ctx.config.project.name))]
    pub async fn build(&self) -> Result<BuildResult> {
        let start = Instant::now();
        self.ctx.plugins.run_build_start().await?;

        info!("Building module graph...");
        let graph = self.build_graph().await?;

        info!("Splitting chunks...");
        let chunks = self.split(&graph)?;

        info!("Optimizing chunks...");
        let minimize = self
            .options
            .minify
            .unwrap_or(self.ctx.config.optimization.minimize);
        let optimizer = AssetOptimizer::new(&self.ctx.config, &graph, minimize)?;
        let optimized = optimizer.optimize_all(&chunks, &graph)?;

        info!("Writing output...");
        let emitter = Emitter::new(&self.ctx.config, self.output_dir());
        let mut plan = emitter.plan(&chunks, &optimized)?;
        self.ctx.plugins.pre_emit(&mut plan).await?;
        let assets = emitter.write_assets(&plan)?;

        let stats = BuildStats::collect(
            &graph,
            &chunks,
            &assets,
            self.ctx.pipeline.stats(),
            (self.ctx.cache.hits(), self.ctx.cache.misses()),
            start.elapsed(),
        );
        if self.ctx.config.output.stats {
            let path = emitter.write_stats(&stats)?;
            debug!("Stats written to {}", path.display());
        }

        self.ctx.plugins.run_build_end().await?;

        // Last: a manifest on disk means every step above succeeded
        emitter.write_manifest(&plan.manifest)?;
        debug!("Build completed in {:?}", start.elapsed());

        Ok(BuildResult {
            graph,
            chunks,
            manifest: plan.manifest,
            assets,
            stats,
        })
    }

    /// Build the module graph from the configured entrypoints
    pub async fn build_graph(&self) -> Result<ModuleGraph> {
        let entries = self.ctx.config.all_entrypoints();
        let builder = GraphBuilder::new(self.ctx.clone());

        match self.ctx.config.build_timeout() {
            Some(limit) => tokio::time::timeout(limit, builder.build(&entries))
                .await
                .map_err(|_| BuildError::BuildTimeout(limit))?,
            None => builder.build(&entries).await,
        }
    }

    /// Split a graph with the context's cache groups
    pub fn split(&self, graph: &ModuleGraph) -> Result<ChunkSet> {
        ChunkSplitter::new(&self.ctx.cache_groups, self.ctx.size_constraints()).split(graph)
    }
}
