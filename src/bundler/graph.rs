//! Module graph data structures

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize, Serializer};

use crate::utils::path_to_module_id;

/// Canonical absolute identity of a module
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(Arc<str>);

impl ModuleId {
    /// Build an id from an absolute path
    pub fn from_path(path: &Path) -> Self {
        Self(Arc::from(path_to_module_id(path)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn path(&self) -> &Path {
        Path::new(&*self.0)
    }

    /// Lowercased file extension, without the dot
    pub fn extension(&self) -> Option<String> {
        self.path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
    }

    /// Directory containing the module
    pub fn dir(&self) -> &Path {
        self.path().parent().unwrap_or_else(|| Path::new("/"))
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ModuleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Types of modules the bundler can handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    Script,
    Stylesheet,
    Json,
    Text,
    Unknown,
}

impl ModuleType {
    /// Determine module type from file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "js" | "mjs" | "cjs" | "jsx" | "ts" | "mts" | "cts" | "tsx" => ModuleType::Script,
            "css" | "scss" | "sass" | "less" => ModuleType::Stylesheet,
            "json" => ModuleType::Json,
            "txt" | "md" | "html" | "svg" => ModuleType::Text,
            _ => ModuleType::Unknown,
        }
    }

    /// Detect module type from a module id
    pub fn of(id: &ModuleId) -> Self {
        id.extension()
            .map(|ext| Self::from_extension(&ext))
            .unwrap_or(ModuleType::Unknown)
    }

    /// Whether the module is emitted into a stylesheet asset
    pub fn is_stylesheet(&self) -> bool {
        matches!(self, ModuleType::Stylesheet)
    }
}

/// A module in the dependency graph
#[derive(Debug, Clone)]
pub struct Module {
    /// Canonical identity
    pub id: ModuleId,

    /// Module type
    pub module_type: ModuleType,

    /// Source as read from disk
    pub raw_content: String,

    /// Output of the transform chain
    pub transformed: String,

    /// Import specifiers discovered by the transform chain, in order
    pub import_specifiers: Vec<String>,

    /// Order in which traversal first visited the module
    pub discovered_at: usize,

    /// Whether some entrypoint names this module
    pub is_entry: bool,
}

impl Module {
    /// Size used for chunk size constraints
    pub fn size(&self) -> u64 {
        self.transformed.len() as u64
    }
}

/// The module dependency graph
#[derive(Debug, Default)]
pub struct ModuleGraph {
    /// All modules indexed by their ID
    modules: HashMap<ModuleId, Module>,

    /// Module ids in discovery order
    order: Vec<ModuleId>,

    /// Dependency edges: module ID -> ordered set of dependency IDs
    edges: HashMap<ModuleId, IndexSet<ModuleId>>,

    /// Specifier -> resolved target, per importer
    specifiers: HashMap<ModuleId, IndexMap<String, ModuleId>>,

    /// Entry name -> entry module
    entries: IndexMap<String, ModuleId>,
}

impl ModuleGraph {
    /// Create a new empty module graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module to the graph, keeping the first copy of an id
    pub fn add_module(&mut self, mut module: Module) -> ModuleId {
        let id = module.id.clone();
        if self.modules.contains_key(&id) {
            return id;
        }

        if self.entries.values().any(|entry| *entry == id) {
            module.is_entry = true;
        }

        self.order.push(id.clone());
        self.edges.entry(id.clone()).or_default();
        self.modules.insert(id.clone(), module);
        id
    }

    /// Record an import edge discovered in `from`
    pub fn add_edge(&mut self, from: &ModuleId, specifier: &str, to: ModuleId) {
        self.specifiers
            .entry(from.clone())
            .or_default()
            .entry(specifier.to_string())
            .or_insert_with(|| to.clone());
        self.edges.entry(from.clone()).or_default().insert(to);
    }

    /// Register a named entry
    pub fn add_entry(&mut self, name: &str, id: ModuleId) {
        self.entries.insert(name.to_string(), id.clone());
        if let Some(module) = self.modules.get_mut(&id) {
            module.is_entry = true;
        }
    }

    /// Get a module by ID
    pub fn get_module(&self, id: &ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    /// Get a mutable reference to a module
    pub fn get_module_mut(&mut self, id: &ModuleId) -> Option<&mut Module> {
        self.modules.get_mut(id)
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.modules.contains_key(id)
    }

    /// All module IDs in discovery order
    pub fn module_ids(&self) -> &[ModuleId] {
        &self.order
    }

    /// All modules in discovery order
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.order.iter().filter_map(|id| self.modules.get(id))
    }

    /// Direct dependencies of a module, in discovery order
    pub fn dependencies(&self, id: &ModuleId) -> impl Iterator<Item = &ModuleId> {
        self.edges.get(id).into_iter().flatten()
    }

    /// Target a specifier resolved to when imported from `from`
    pub fn resolved_import(&self, from: &ModuleId, specifier: &str) -> Option<&ModuleId> {
        self.specifiers.get(from).and_then(|map| map.get(specifier))
    }

    /// Specifier -> target map of a module
    pub fn resolved_imports(&self, from: &ModuleId) -> Option<&IndexMap<String, ModuleId>> {
        self.specifiers.get(from)
    }

    /// Named entries in declaration order
    pub fn entries(&self) -> &IndexMap<String, ModuleId> {
        &self.entries
    }

    /// Number of distinct modules importing each module
    pub fn importer_counts(&self) -> HashMap<ModuleId, usize> {
        let mut counts: HashMap<ModuleId, usize> = HashMap::new();
        for (from, targets) in &self.edges {
            for target in targets {
                if target != from {
                    *counts.entry(target.clone()).or_default() += 1;
                }
            }
        }
        counts
    }

    /// Get all modules reachable from a given module (BFS, discovery order of edges)
    pub fn reachable_from(&self, start: &ModuleId) -> Vec<ModuleId> {
        let mut visited = HashSet::new();
        let mut result = Vec::new();
        let mut queue = VecDeque::new();

        queue.push_back(start);
        visited.insert(start);

        while let Some(id) = queue.pop_front() {
            result.push(id.clone());

            for dep in self.dependencies(id) {
                if visited.insert(dep) {
                    queue.push_back(dep);
                }
            }
        }

        result
    }

    /// Check that every edge target is a node
    pub fn is_closed(&self) -> bool {
        self.edges
            .iter()
            .all(|(from, targets)| self.contains(from) && targets.iter().all(|t| self.contains(t)))
    }

    /// Total number of modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if graph is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn id(name: &str) -> ModuleId {
        ModuleId::from_path(Path::new(&format!("/app/src/{}", name)))
    }

    pub(crate) fn module(name: &str, content: &str, discovered_at: usize) -> Module {
        let id = id(name);
        Module {
            module_type: ModuleType::of(&id),
            id,
            raw_content: content.to_string(),
            transformed: content.to_string(),
            import_specifiers: Vec::new(),
            discovered_at,
            is_entry: false,
        }
    }

    /// Build a graph from (module, content) nodes and (from, to) edges
    pub(crate) fn graph_of(
        nodes: &[(&str, &str)],
        edges: &[(&str, &str)],
        entries: &[(&str, &str)],
    ) -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        for (index, (name, content)) in nodes.iter().enumerate() {
            graph.add_module(module(name, content, index));
        }
        for (from, to) in edges {
            graph.add_edge(&id(from), &format!("./{}", to), id(to));
        }
        for (entry, name) in entries {
            graph.add_entry(entry, id(name));
        }
        graph
    }

    #[test]
    fn test_module_type_detection() {
        assert_eq!(ModuleType::from_extension("js"), ModuleType::Script);
        assert_eq!(ModuleType::from_extension("tsx"), ModuleType::Script);
        assert_eq!(ModuleType::from_extension("less"), ModuleType::Stylesheet);
        assert_eq!(ModuleType::from_extension("CSS"), ModuleType::Stylesheet);
        assert_eq!(ModuleType::from_extension("json"), ModuleType::Json);
        assert_eq!(ModuleType::from_extension("txt"), ModuleType::Text);
        assert_eq!(ModuleType::from_extension("xyz"), ModuleType::Unknown);
    }

    #[test]
    fn test_module_graph_basic() {
        let mut graph = ModuleGraph::new();

        let added = graph.add_module(module("main.js", "console.log('test')", 0));
        assert_eq!(graph.len(), 1);
        assert!(graph.get_module(&added).is_some());

        // Second copy of the same id is ignored
        graph.add_module(module("main.js", "other", 1));
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.get_module(&added).unwrap().raw_content, "console.log('test')");
    }

    #[test]
    fn test_edges_keep_discovery_order() {
        let graph = graph_of(
            &[("a.js", ""), ("c.js", ""), ("b.js", "")],
            &[("a.js", "c.js"), ("a.js", "b.js"), ("a.js", "c.js")],
            &[("main", "a.js")],
        );

        let deps: Vec<_> = graph.dependencies(&id("a.js")).cloned().collect();
        assert_eq!(deps, vec![id("c.js"), id("b.js")]);
        assert_eq!(graph.resolved_import(&id("a.js"), "./b.js"), Some(&id("b.js")));
        assert!(graph.get_module(&id("a.js")).unwrap().is_entry);
    }

    #[test]
    fn test_reachable_tolerates_cycles() {
        let graph = graph_of(
            &[("a.js", ""), ("b.js", ""), ("c.js", ""), ("d.js", "")],
            &[("a.js", "b.js"), ("b.js", "c.js"), ("c.js", "a.js")],
            &[("main", "a.js")],
        );

        let reachable = graph.reachable_from(&id("a.js"));
        assert_eq!(reachable, vec![id("a.js"), id("b.js"), id("c.js")]);
        assert!(graph.is_closed());
    }

    #[test]
    fn test_importer_counts_ignore_self_imports() {
        let graph = graph_of(
            &[("a.js", ""), ("b.js", ""), ("c.js", "")],
            &[("a.js", "c.js"), ("b.js", "c.js"), ("c.js", "c.js")],
            &[],
        );

        let counts = graph.importer_counts();
        assert_eq!(counts.get(&id("c.js")), Some(&2));
        assert_eq!(counts.get(&id("a.js")), None);
    }
}
