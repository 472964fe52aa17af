//! Chunk splitting
//!
//! Partitions a finished module graph into chunks. Entry modules anchor their
//! entry chunks, cache-group rules claim modules in priority order, and
//! whatever is left goes to the entry chunk (single importer entry) or to an
//! implicit shared chunk per set of entries reaching it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;
use tracing::{debug, instrument, warn};

use super::chunk::{AssetType, Chunk, ChunkKind, ChunkSet};
use super::{Module, ModuleGraph, ModuleId, ModuleType};
use crate::config::{CacheGroupConfig, MatcherConfig, SplitChunksConfig};
use crate::error::{BuildError, Result};
use crate::transform::compile_regex;

/// Chunk size thresholds in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeConstraints {
    pub min_size: u64,
    /// `None` means unbounded
    pub max_size: Option<u64>,
}

impl SizeConstraints {
    pub fn unbounded() -> Self {
        Self {
            min_size: 0,
            max_size: None,
        }
    }

    pub fn from_config(config: &SplitChunksConfig) -> Self {
        Self {
            min_size: config.min_size,
            max_size: config.max_size,
        }
    }
}

impl Default for SizeConstraints {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// What a matcher knows about a module besides the module itself
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    /// Names of the entries whose chunks reach the module
    pub entries: &'a [String],
    /// Number of distinct modules importing it
    pub importers: usize,
}

pub type MatchFn = dyn Fn(&Module, &MatchContext<'_>) -> bool + Send + Sync;

/// Module predicate of a cache group
#[derive(Clone)]
pub enum ModuleMatcher {
    Any,
    Extension(Vec<String>),
    PathPrefix(PathBuf),
    Pattern(Regex),
    Kind(ModuleType),
    MinImporters(usize),
    Custom(Arc<MatchFn>),
}

impl fmt::Debug for ModuleMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::Extension(exts) => f.debug_tuple("Extension").field(exts).finish(),
            Self::PathPrefix(prefix) => f.debug_tuple("PathPrefix").field(prefix).finish(),
            Self::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            Self::Kind(kind) => f.debug_tuple("Kind").field(kind).finish(),
            Self::MinImporters(n) => f.debug_tuple("MinImporters").field(n).finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl ModuleMatcher {
    /// Wrap a closure
    pub fn custom(f: impl Fn(&Module, &MatchContext<'_>) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Compile a configured matcher; path prefixes are relative to `root`
    pub fn from_config(config: &MatcherConfig, root: &Path) -> Result<Self> {
        Ok(match config {
            MatcherConfig::Any => Self::Any,
            MatcherConfig::Extension { extensions } => Self::Extension(
                extensions
                    .iter()
                    .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                    .collect(),
            ),
            MatcherConfig::PathPrefix { prefix } => Self::PathPrefix(root.join(prefix)),
            MatcherConfig::Pattern { pattern } => {
                Self::Pattern(compile_regex(pattern, "split_chunks.cache_groups.test.pattern")?)
            }
            MatcherConfig::Kind { kind } => Self::Kind(*kind),
            MatcherConfig::MinImporters { count } => Self::MinImporters(*count),
        })
    }

    pub fn matches(&self, module: &Module, ctx: &MatchContext<'_>) -> bool {
        match self {
            Self::Any => true,
            Self::Extension(exts) => module
                .id
                .extension()
                .is_some_and(|ext| exts.iter().any(|e| *e == ext)),
            Self::PathPrefix(prefix) => module.id.path().starts_with(prefix),
            Self::Pattern(re) => re.is_match(module.id.as_str()),
            Self::Kind(kind) => module.module_type == *kind,
            Self::MinImporters(n) => ctx.importers >= *n,
            Self::Custom(f) => f(module, ctx),
        }
    }
}

/// Named cache group
#[derive(Debug, Clone)]
pub struct CacheGroupRule {
    pub name: String,
    pub matcher: ModuleMatcher,
    pub min_chunks: usize,
    pub enforce: bool,
    pub priority: i32,
}

impl CacheGroupRule {
    pub fn new(name: impl Into<String>, matcher: ModuleMatcher) -> Self {
        Self {
            name: name.into(),
            matcher,
            min_chunks: 1,
            enforce: false,
            priority: 0,
        }
    }

    pub fn min_chunks(mut self, min_chunks: usize) -> Self {
        self.min_chunks = min_chunks;
        self
    }

    pub fn enforce(mut self, enforce: bool) -> Self {
        self.enforce = enforce;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn from_config(config: &CacheGroupConfig, root: &Path) -> Result<Self> {
        Ok(Self::new(config.name.clone(), ModuleMatcher::from_config(&config.test, root)?)
            .min_chunks(config.min_chunks)
            .enforce(config.enforce)
            .priority(config.priority))
    }
}

/// Splits a module graph into chunks
pub struct ChunkSplitter<'a> {
    rules: &'a [CacheGroupRule],
    sizes: SizeConstraints,
}

impl<'a> ChunkSplitter<'a> {
    pub fn new(rules: &'a [CacheGroupRule], sizes: SizeConstraints) -> Self {
        Self { rules, sizes }
    }

    #[instrument(skip_all, fields(modules = graph.len()))]
    pub fn split(&self, graph: &ModuleGraph) -> Result<ChunkSet> {
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut claimed: HashMap<ModuleId, usize> = HashMap::new();

        // Phase 1: one chunk per distinct entry module
        let mut entry_chunk_of: HashMap<ModuleId, usize> = HashMap::new();
        for (name, id) in graph.entries() {
            if let Some(&index) = entry_chunk_of.get(id) {
                chunks[index].entry_names.push(name.clone());
                continue;
            }
            let index = chunks.len();
            chunks.push(Chunk::entry(name.clone(), id.clone(), vec![name.clone()]));
            entry_chunk_of.insert(id.clone(), index);
            claimed.insert(id.clone(), index);
        }
        let entry_count = chunks.len();

        // Entry chunks reaching each module, in entry order
        let mut reached_by: HashMap<ModuleId, Vec<usize>> = HashMap::new();
        for (index, chunk) in chunks.iter().enumerate() {
            if let Some(entry) = &chunk.entry {
                for id in graph.reachable_from(entry) {
                    reached_by.entry(id).or_default().push(index);
                }
            }
        }
        let entry_names_of = |id: &ModuleId| -> Vec<String> {
            reached_by
                .get(id)
                .map(|indices| indices.iter().map(|&i| chunks[i].id.clone()).collect())
                .unwrap_or_default()
        };
        let reach_names: HashMap<ModuleId, Vec<String>> = graph
            .module_ids()
            .iter()
            .map(|id| (id.clone(), entry_names_of(id)))
            .collect();
        let importers = graph.importer_counts();

        // Phase 2: cache groups by descending priority
        let mut rules: Vec<&CacheGroupRule> = self.rules.iter().collect();
        rules.sort_by_key(|rule| std::cmp::Reverse(rule.priority));

        for rule in rules {
            let candidates: Vec<&Module> = graph
                .modules()
                .filter(|module| !claimed.contains_key(&module.id))
                .filter(|module| {
                    let entries = reach_names.get(&module.id).map(Vec::as_slice).unwrap_or_default();
                    let ctx = MatchContext {
                        entries,
                        importers: importers.get(&module.id).copied().unwrap_or(0),
                    };
                    entries.len() >= rule.min_chunks && rule.matcher.matches(module, &ctx)
                })
                .collect();

            if candidates.is_empty() {
                continue;
            }

            let size: u64 = candidates.iter().map(|m| m.size()).sum();
            let pieces = if rule.enforce {
                vec![candidates]
            } else if size < self.sizes.min_size {
                warn!(
                    "Cache group '{}' dropped: {} bytes is below the minimum of {}",
                    rule.name, size, self.sizes.min_size
                );
                continue;
            } else {
                match self.sizes.max_size {
                    Some(max) if size > max => subdivide(candidates, max),
                    _ => vec![candidates],
                }
            };

            let numbered = pieces.len() > 1;
            for (n, piece) in pieces.into_iter().enumerate() {
                let id = if numbered {
                    format!("{}-{}", rule.name, n + 1)
                } else {
                    rule.name.clone()
                };
                let index = chunks.len();
                debug!("Cache group chunk '{}' with {} modules", id, piece.len());
                for module in &piece {
                    claimed.insert(module.id.clone(), index);
                }
                chunks.push(Chunk::shared(id, piece.into_iter().map(|m| m.id.clone())));
            }
        }

        // Phase 3: leftovers
        let mut implicit: HashMap<Vec<usize>, usize> = HashMap::new();
        for id in graph.module_ids() {
            if claimed.contains_key(id) {
                continue;
            }
            let reach = reached_by.get(id).cloned().unwrap_or_default();
            let index = match reach.as_slice() {
                [single] => *single,
                _ => *implicit.entry(reach.clone()).or_insert_with(|| {
                    let name = if reach.is_empty() {
                        "detached".to_string()
                    } else {
                        reach.iter().map(|&i| chunks[i].id.as_str()).collect::<Vec<_>>().join("~")
                    };
                    chunks.push(Chunk::shared(name, []));
                    chunks.len() - 1
                }),
            };
            chunks[index].modules.insert(id.clone());
            claimed.insert(id.clone(), index);
        }

        for chunk in chunks.iter_mut().skip(entry_count) {
            let all_stylesheets = chunk
                .modules
                .iter()
                .all(|id| graph.get_module(id).is_some_and(|m| m.module_type.is_stylesheet()));
            if all_stylesheets && !chunk.is_empty() {
                chunk.kind = ChunkKind::Asset(AssetType::Stylesheet);
            }
        }

        // Chunk ids become file names
        if let Some(duplicate) = duplicate_id(&chunks) {
            return Err(BuildError::Config(format!(
                "chunk name '{}' is used by more than one chunk; rename the cache group",
                duplicate
            )));
        }

        let entry_chunks = load_order(graph, &chunks, &claimed, &entry_chunk_of);
        let set = ChunkSet::new(chunks, entry_chunks, graph)?;

        debug!("Split {} modules into {} chunks", graph.len(), set.len());
        Ok(set)
    }
}

fn duplicate_id(chunks: &[Chunk]) -> Option<&str> {
    let mut seen = HashSet::new();
    chunks.iter().map(|c| c.id.as_str()).find(|id| !seen.insert(*id))
}

/// Split an oversized group into pieces no larger than `max` where possible
fn subdivide(mut modules: Vec<&Module>, max: u64) -> Vec<Vec<&Module>> {
    modules.sort_by(|a, b| a.id.cmp(&b.id));

    let total: u64 = modules.iter().map(|m| m.size()).sum();
    let pieces = total.div_ceil(max.max(1)).max(1);
    let target = total.div_ceil(pieces);

    let mut result = Vec::new();
    let mut current: Vec<&Module> = Vec::new();
    let mut current_size = 0u64;

    for module in modules {
        let size = module.size();
        if !current.is_empty() && (current_size + size > max || current_size >= target) {
            result.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current.push(module);
        current_size += size;
    }
    if !current.is_empty() {
        result.push(current);
    }

    result
}

/// Per entry name, the chunks holding its reachable modules, entry chunk last
fn load_order(
    graph: &ModuleGraph,
    chunks: &[Chunk],
    assignment: &HashMap<ModuleId, usize>,
    entry_chunk_of: &HashMap<ModuleId, usize>,
) -> IndexMap<String, Vec<usize>> {
    let mut result = IndexMap::new();

    for (name, entry) in graph.entries() {
        let Some(&own) = entry_chunk_of.get(entry) else {
            continue;
        };
        let needed: HashSet<usize> = graph
            .reachable_from(entry)
            .iter()
            .filter_map(|id| assignment.get(id).copied())
            .filter(|&index| index != own && !chunks[index].is_empty())
            .collect();

        let mut order: Vec<usize> = needed.into_iter().collect();
        order.sort_unstable();
        order.push(own);
        result.insert(name.clone(), order);
    }

    result
}

impl ChunkSet {
    /// Split `graph` with the given rules and size constraints
    pub fn split(graph: &ModuleGraph, rules: &[CacheGroupRule], sizes: SizeConstraints) -> Result<Self> {
        ChunkSplitter::new(rules, sizes).split(graph)
    }
}

/// Cache group rules declared in configuration
pub fn rules_from_config(config: &SplitChunksConfig, root: &Path) -> Result<Vec<CacheGroupRule>> {
    config
        .cache_groups
        .iter()
        .map(|group| CacheGroupRule::from_config(group, root))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::tests::{graph_of, id};
    use pretty_assertions::assert_eq;

    fn members(set: &ChunkSet, chunk: &str) -> Vec<String> {
        let mut names: Vec<String> = set
            .find(chunk)
            .map(|c| {
                c.modules
                    .iter()
                    .map(|m| m.path().file_name().unwrap().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// A imports B and C, both import D
    fn diamond() -> ModuleGraph {
        graph_of(
            &[("a.js", "aaaa"), ("b.js", "bbbb"), ("c.js", "cccc"), ("d.js", "dddd")],
            &[("a.js", "b.js"), ("a.js", "c.js"), ("b.js", "d.js"), ("c.js", "d.js")],
            &[("main", "a.js")],
        )
    }

    #[test]
    fn test_shared_dependency_group() {
        let rules = vec![CacheGroupRule::new("shared", ModuleMatcher::MinImporters(2))];
        let set = ChunkSet::split(&diamond(), &rules, SizeConstraints::unbounded()).unwrap();

        assert_eq!(members(&set, "main"), vec!["a.js", "b.js", "c.js"]);
        assert_eq!(members(&set, "shared"), vec!["d.js"]);
        assert_eq!(set.entry_chunks()["main"], vec![1, 0]);
    }

    #[test]
    fn test_group_named_like_entry_rejected() {
        let rules = vec![CacheGroupRule::new("main", ModuleMatcher::MinImporters(2))];
        let err = ChunkSet::split(&diamond(), &rules, SizeConstraints::unbounded()).unwrap_err();
        assert!(matches!(err, BuildError::Config(ref message) if message.contains("'main'")));

        let rules = vec![
            CacheGroupRule::new("lib", ModuleMatcher::Pattern(Regex::new("b\\.js").unwrap())),
            CacheGroupRule::new("lib", ModuleMatcher::Pattern(Regex::new("c\\.js").unwrap())),
        ];
        let err = ChunkSet::split(&diamond(), &rules, SizeConstraints::unbounded()).unwrap_err();
        assert!(matches!(err, BuildError::Config(_)));
    }

    #[test]
    fn test_no_rules_single_entry_chunk() {
        let set = ChunkSet::split(&diamond(), &[], SizeConstraints::unbounded()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(members(&set, "main"), vec!["a.js", "b.js", "c.js", "d.js"]);
    }

    #[test]
    fn test_multi_entry_leftovers_share_a_chunk() {
        let graph = graph_of(
            &[("one.js", ""), ("two.js", ""), ("common.js", "x"), ("only-one.js", "y")],
            &[("one.js", "common.js"), ("two.js", "common.js"), ("one.js", "only-one.js")],
            &[("one", "one.js"), ("two", "two.js")],
        );
        let set = ChunkSet::split(&graph, &[], SizeConstraints::unbounded()).unwrap();

        assert_eq!(members(&set, "one"), vec!["one.js", "only-one.js"]);
        assert_eq!(members(&set, "two"), vec!["two.js"]);
        assert_eq!(members(&set, "one~two"), vec!["common.js"]);
        assert_eq!(set.find("one~two").unwrap().kind, ChunkKind::Shared);
    }

    #[test]
    fn test_entry_never_claimed_by_group() {
        let graph = graph_of(
            &[("one.js", ""), ("two.js", "")],
            &[("one.js", "two.js")],
            &[("one", "one.js"), ("two", "two.js")],
        );
        let rules = vec![CacheGroupRule::new("everything", ModuleMatcher::Any).enforce(true)];
        let set = ChunkSet::split(&graph, &rules, SizeConstraints::unbounded()).unwrap();

        assert_eq!(members(&set, "two"), vec!["two.js"]);
        assert!(set.find("everything").is_none());
        assert_eq!(set.entry_chunks()["one"], vec![1, 0]);
    }

    #[test]
    fn test_priority_and_min_chunks() {
        let graph = graph_of(
            &[("one.js", ""), ("two.js", ""), ("lib.css", "x"), ("util.js", "y")],
            &[("one.js", "lib.css"), ("two.js", "lib.css"), ("one.js", "util.js"), ("two.js", "util.js")],
            &[("one", "one.js"), ("two", "two.js")],
        );
        let rules = vec![
            CacheGroupRule::new("common", ModuleMatcher::Any).min_chunks(2),
            CacheGroupRule::new("styles", ModuleMatcher::Kind(ModuleType::Stylesheet)).priority(10),
        ];
        let set = ChunkSet::split(&graph, &rules, SizeConstraints::unbounded()).unwrap();

        assert_eq!(members(&set, "styles"), vec!["lib.css"]);
        assert_eq!(set.find("styles").unwrap().kind, ChunkKind::Asset(AssetType::Stylesheet));
        assert_eq!(members(&set, "common"), vec!["util.js"]);
    }

    #[test]
    fn test_undersized_group_released() {
        let rules = vec![
            CacheGroupRule::new("tiny", ModuleMatcher::Pattern(Regex::new(r"d\.js$").unwrap())).priority(1),
            CacheGroupRule::new("fallback", ModuleMatcher::MinImporters(2)),
        ];
        let sizes = SizeConstraints { min_size: 4, max_size: None };
        let set = ChunkSet::split(&diamond(), &rules, sizes).unwrap();
        assert_eq!(members(&set, "tiny"), vec!["d.js"]);

        let sizes = SizeConstraints { min_size: 5, max_size: None };
        let set = ChunkSet::split(&diamond(), &rules, sizes).unwrap();
        assert!(set.find("tiny").is_none());
        assert!(set.find("fallback").is_none());
        assert_eq!(members(&set, "main"), vec!["a.js", "b.js", "c.js", "d.js"]);
    }

    #[test]
    fn test_enforce_keeps_empty_group() {
        let graph = graph_of(
            &[("a.js", "x"), ("empty.css", "")],
            &[("a.js", "empty.css")],
            &[("main", "a.js")],
        );
        let rules = vec![CacheGroupRule::new("css", ModuleMatcher::Extension(vec!["css".into()])).enforce(true)];
        let sizes = SizeConstraints { min_size: 100, max_size: Some(1) };
        let set = ChunkSet::split(&graph, &rules, sizes).unwrap();

        assert_eq!(members(&set, "css"), vec!["empty.css"]);
    }

    #[test]
    fn test_oversized_group_subdivided() {
        let graph = graph_of(
            &[
                ("index.js", ""),
                ("v1.js", &"1".repeat(30)),
                ("v2.js", &"2".repeat(30)),
                ("v3.js", &"3".repeat(30)),
                ("v4.js", &"4".repeat(30)),
            ],
            &[("index.js", "v4.js"), ("index.js", "v2.js"), ("index.js", "v3.js"), ("index.js", "v1.js")],
            &[("main", "index.js")],
        );
        let rules = vec![CacheGroupRule::new("vendor", ModuleMatcher::Pattern(Regex::new("/v").unwrap()))];
        let sizes = SizeConstraints { min_size: 0, max_size: Some(70) };
        let set = ChunkSet::split(&graph, &rules, sizes).unwrap();

        assert_eq!(members(&set, "vendor-1"), vec!["v1.js", "v2.js"]);
        assert_eq!(members(&set, "vendor-2"), vec!["v3.js", "v4.js"]);
        assert_eq!(set.entry_chunks()["main"], vec![1, 2, 0]);
    }

    #[test]
    fn test_every_module_in_exactly_one_chunk() {
        let graph = graph_of(
            &[("a.js", "1"), ("b.js", "22"), ("c.js", "333"), ("x.js", "4444")],
            &[("a.js", "b.js"), ("b.js", "a.js"), ("c.js", "b.js"), ("c.js", "x.js")],
            &[("a", "a.js"), ("c", "c.js"), ("alias", "a.js")],
        );
        let rules = vec![CacheGroupRule::new("big", ModuleMatcher::custom(|m, _| m.size() > 3))];
        let set = ChunkSet::split(&graph, &rules, SizeConstraints::unbounded()).unwrap();

        for id in graph.module_ids() {
            let holding = set.iter().filter(|c| c.contains(id)).count();
            assert_eq!(holding, 1, "{}", id);
        }
        assert_eq!(set.find("a").unwrap().entry_names, vec!["a", "alias"]);
        assert_eq!(set.entry_chunks()["alias"], set.entry_chunks()["a"]);
        assert_eq!(members(&set, "a~c"), vec!["b.js"]);
        assert!(set.chunk_of(&id("x.js")).is_some());
    }
}
