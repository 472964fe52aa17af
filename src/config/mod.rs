//! Configuration handling for Splitpack
//!
//! Parses and manages splitpack.toml configuration files.

mod schema;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use schema::*;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project metadata
    pub project: ProjectConfig,

    /// Entry points for bundling (name -> path relative to the root)
    #[serde(default)]
    pub entrypoints: IndexMap<String, String>,

    /// Module resolution settings
    #[serde(default)]
    pub resolve: ResolveConfig,

    /// Transform rules, applied in declaration order
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Chunk splitting settings
    #[serde(default)]
    pub split_chunks: SplitChunksConfig,

    /// Whole-asset optimization toggles
    #[serde(default)]
    pub optimization: OptimizationConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Transform cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Build execution limits
    #[serde(default)]
    pub build: BuildConfig,

    /// Compile-time constants substituted into script modules
    #[serde(default)]
    pub define: IndexMap<String, String>,

    /// Imports dropped before resolution
    #[serde(default)]
    pub ignore: Vec<IgnoreConfig>,

    /// HTML page generation
    #[serde(default)]
    pub html: Option<HtmlConfig>,

    /// Root directory (computed from config file location)
    #[serde(skip)]
    pub root: PathBuf,
}

impl Config {
    /// Load configuration from a file path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let canonical_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let content = fs::read_to_string(&canonical_path)
            .with_context(|| format!("Failed to read config file: {}", canonical_path.display()))?;

        let mut config = Self::parse(&content)?;

        // Set root directory to the directory containing the config file
        config.root = canonical_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).with_context(|| "Failed to parse splitpack.toml")?;
        config.root = PathBuf::from(".");
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            project: ProjectConfig {
                name: "my-app".to_string(),
                version: "0.1.0".to_string(),
            },
            entrypoints: {
                let mut map = IndexMap::new();
                map.insert("main".to_string(), "src/index.js".to_string());
                map
            },
            resolve: ResolveConfig::default(),
            rules: Vec::new(),
            split_chunks: SplitChunksConfig::default(),
            optimization: OptimizationConfig::default(),
            output: OutputConfig::default(),
            cache: CacheConfig::default(),
            build: BuildConfig::default(),
            define: IndexMap::new(),
            ignore: Vec::new(),
            html: None,
            root: PathBuf::from("."),
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.entrypoints.is_empty() {
            anyhow::bail!("At least one entrypoint must be specified in splitpack.toml");
        }

        if let Some(max) = self.split_chunks.max_size {
            if max < self.split_chunks.min_size {
                anyhow::bail!(
                    "split_chunks.max_size ({}) is smaller than split_chunks.min_size ({})",
                    max,
                    self.split_chunks.min_size
                );
            }
        }

        if self.build.concurrency == Some(0) {
            anyhow::bail!("build.concurrency must be at least 1");
        }

        Ok(())
    }

    /// Get the absolute output directory path
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.output.dir)
    }

    /// Get all entrypoints in declaration order
    pub fn all_entrypoints(&self) -> Vec<(String, String)> {
        self.entrypoints
            .iter()
            .map(|(name, path)| (name.clone(), path.clone()))
            .collect()
    }

    /// Overall graph traversal timeout, if any
    pub fn build_timeout(&self) -> Option<Duration> {
        self.build.timeout_secs.map(Duration::from_secs)
    }

    /// Maximum number of transforms running at once
    pub fn concurrency(&self) -> usize {
        self.build.concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Directory of the persistent transform cache, if enabled
    pub fn cache_dir(&self) -> Option<PathBuf> {
        if !self.cache.enabled {
            return None;
        }
        self.cache.dir.as_ref().map(|dir| self.root.join(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::ModuleType;

    const SAMPLE: &str = r#"
[project]
name = "shop"

[entrypoints]
main = "src/index.js"
admin = "src/admin.js"

[resolve]
extensions = [".js", ".jsx", ".json"]
alias = { "@" = "src" }

[[rules]]
test = '\.js$'
include = "src"
exclude = "node_modules"
use = [{ name = "script" }]
cache = true

[[rules]]
test = '\.txt$'
use = ["uppercase", "raw"]

[split_chunks]
min_size = 5120000
max_size = 10240000

[[split_chunks.cache_groups]]
name = "styles"
test = { type = "kind", kind = "stylesheet" }
min_chunks = 1
enforce = true

[define]
ENVIROMENT = '"production"'

[[ignore]]
resource = '^\./locale$'
context = "moment$"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(SAMPLE).unwrap();

        assert_eq!(config.project.name, "shop");
        let names: Vec<_> = config.entrypoints.keys().cloned().collect();
        assert_eq!(names, vec!["main", "admin"]);
        assert_eq!(config.resolve.alias.get("@").map(String::as_str), Some("src"));
        assert_eq!(config.rules.len(), 2);
        assert!(config.rules[0].cache);
        assert_eq!(config.rules[1].uses[0].name(), "uppercase");
        assert_eq!(config.rules[1].uses[1].name(), "raw");

        let group = &config.split_chunks.cache_groups[0];
        assert!(group.enforce);
        assert!(matches!(
            group.test,
            MatcherConfig::Kind { kind: ModuleType::Stylesheet }
        ));
        assert_eq!(config.split_chunks.max_size, Some(10240000));
        assert_eq!(config.define.get("ENVIROMENT").map(String::as_str), Some("\"production\""));
        assert_eq!(config.ignore[0].context.as_deref(), Some("moment$"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse("[project]\nname = \"x\"\n[entrypoints]\nmain = \"a.js\"\n").unwrap();

        assert_eq!(config.output.filename, "[name].js");
        assert_eq!(config.output.css_filename, "[name].css");
        assert!(config.output.manifest);
        assert!(config.optimization.used_exports);
        assert!(!config.optimization.mangle);
        assert_eq!(config.split_chunks.min_size, 0);
        assert_eq!(config.split_chunks.max_size, None);
        assert_eq!(config.output.format, OutputFormat::Runtime);
    }

    #[test]
    fn test_rejects_missing_entrypoints() {
        let err = Config::parse("[project]\nname = \"x\"\n").unwrap_err();
        assert!(err.to_string().contains("entrypoint"));
    }

    #[test]
    fn test_rejects_inverted_size_constraints() {
        let content = "[project]\nname = \"x\"\n[entrypoints]\nmain = \"a.js\"\n[split_chunks]\nmin_size = 10\nmax_size = 5\n";
        assert!(Config::parse(content).is_err());
    }
}
