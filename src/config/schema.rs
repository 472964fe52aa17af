//! Configuration schema definitions

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::bundler::ModuleType;

/// Project metadata configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Project version
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_true() -> bool {
    true
}

/// Module resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// Extensions tried, in priority order, for specifiers without one
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Specifier prefix -> directory (relative to the project root)
    #[serde(default)]
    pub alias: IndexMap<String, String>,

    /// Directory names searched for bare specifiers
    #[serde(default = "default_module_dirs")]
    pub modules: Vec<String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            alias: IndexMap::new(),
            modules: default_module_dirs(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    [".js", ".jsx", ".json"].iter().map(|s| s.to_string()).collect()
}

fn default_module_dirs() -> Vec<String> {
    vec!["node_modules".to_string()]
}

/// A transform rule: which modules it applies to and the transforms it runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Regex tested against the module path
    pub test: String,

    /// Only apply to modules under this directory (relative to the root)
    #[serde(default)]
    pub include: Option<String>,

    /// Skip modules whose path matches this regex
    #[serde(default)]
    pub exclude: Option<String>,

    /// Transforms to run, in order
    #[serde(rename = "use")]
    pub uses: Vec<TransformUseConfig>,

    /// Consult the transform cache before running these transforms
    #[serde(default)]
    pub cache: bool,
}

/// Reference to a registered transform, optionally with options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransformUseConfig {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        options: toml::Table,
    },
}

impl TransformUseConfig {
    /// Registered transform name
    pub fn name(&self) -> &str {
        match self {
            TransformUseConfig::Name(name) => name,
            TransformUseConfig::Detailed { name, .. } => name,
        }
    }

    /// Options passed to the transform
    pub fn options(&self) -> toml::Table {
        match self {
            TransformUseConfig::Name(_) => toml::Table::new(),
            TransformUseConfig::Detailed { options, .. } => options.clone(),
        }
    }
}

/// Chunk splitting configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitChunksConfig {
    /// Minimum aggregate size (bytes) for a non-enforced cache group chunk
    #[serde(default)]
    pub min_size: u64,

    /// Maximum size (bytes) before a cache group chunk is subdivided
    #[serde(default)]
    pub max_size: Option<u64>,

    /// Cache group rules
    #[serde(default)]
    pub cache_groups: Vec<CacheGroupConfig>,
}

/// A named rule collecting modules into a dedicated chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheGroupConfig {
    /// Chunk name
    pub name: String,

    /// Which modules belong to the group
    #[serde(default)]
    pub test: MatcherConfig,

    /// Minimum number of entry chunks that must reach a module
    #[serde(default = "default_min_chunks")]
    pub min_chunks: usize,

    /// Keep the chunk regardless of size thresholds
    #[serde(default)]
    pub enforce: bool,

    /// Higher priority groups claim modules first
    #[serde(default)]
    pub priority: i32,
}

fn default_min_chunks() -> usize {
    1
}

/// Serializable form of a cache group matcher
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatcherConfig {
    #[default]
    Any,
    Extension {
        extensions: Vec<String>,
    },
    PathPrefix {
        prefix: String,
    },
    Pattern {
        pattern: String,
    },
    Kind {
        kind: ModuleType,
    },
    MinImporters {
        count: usize,
    },
}

/// Whole-asset optimization toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Drop exports no other module imports
    #[serde(default = "default_true")]
    pub used_exports: bool,

    /// Strip whitespace and comments
    #[serde(default = "default_true")]
    pub minimize: bool,

    /// Shorten module-local identifiers
    #[serde(default)]
    pub mangle: bool,

    /// Names that must never be renamed
    #[serde(default)]
    pub reserved: Vec<String>,

    /// Stylesheet purification
    #[serde(default)]
    pub purify: PurifyConfig,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            used_exports: true,
            minimize: true,
            mangle: false,
            reserved: Vec::new(),
            purify: PurifyConfig::default(),
        }
    }
}

/// Stylesheet purification configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurifyConfig {
    /// Remove rules whose selectors are never referenced
    #[serde(default)]
    pub enabled: bool,

    /// Extra glob patterns (relative to the root) scanned for selector tokens
    #[serde(default)]
    pub content: Vec<String>,
}

/// How chunk scripts are laid out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Modules registered in a small runtime and required by id
    #[default]
    Runtime,
    /// Module contents concatenated verbatim
    Concat,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// Public URL prefix for assets
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Script file name pattern ([name], [id], [contenthash])
    #[serde(default = "default_filename")]
    pub filename: String,

    /// Stylesheet file name pattern
    #[serde(default = "default_css_filename")]
    pub css_filename: String,

    /// Script layout
    #[serde(default)]
    pub format: OutputFormat,

    /// Generate manifest.json
    #[serde(default = "default_true")]
    pub manifest: bool,

    /// Generate stats.json
    #[serde(default)]
    pub stats: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            public_url: default_public_url(),
            filename: default_filename(),
            css_filename: default_css_filename(),
            format: OutputFormat::default(),
            manifest: true,
            stats: false,
        }
    }
}

fn default_output_dir() -> String {
    "dist".to_string()
}

fn default_public_url() -> String {
    "/".to_string()
}

fn default_filename() -> String {
    "[name].js".to_string()
}

fn default_css_filename() -> String {
    "[name].css".to_string()
}

/// Transform cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Keep transform results across builds
    #[serde(default)]
    pub enabled: bool,

    /// Persist results under this directory (relative to the root)
    #[serde(default)]
    pub dir: Option<String>,
}

/// Build execution limits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Fail the build if graph traversal takes longer than this
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Maximum concurrent transforms (defaults to available parallelism)
    #[serde(default)]
    pub concurrency: Option<usize>,
}

/// Imports matching these patterns are dropped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Regex tested against the import specifier
    pub resource: String,

    /// Regex tested against the importing module's directory
    #[serde(default)]
    pub context: Option<String>,
}

/// HTML page generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtmlConfig {
    /// Template path (relative to the root)
    pub template: String,

    /// Output file name
    #[serde(default = "default_html_filename")]
    pub filename: String,

    /// Collapse whitespace and remove comments
    #[serde(default)]
    pub minify: bool,
}

fn default_html_filename() -> String {
    "index.html".to_string()
}
