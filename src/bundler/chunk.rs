//! Chunks: the groups of modules emitted together

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use super::{ModuleGraph, ModuleId};
use crate::error::{BuildError, Result};

/// Asset chunk flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Stylesheet,
}

/// Type of chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Entry point chunk - holds the entry module and what only it needs
    Entry,
    /// Shared chunk - a cache group or modules needed by several entries
    Shared,
    /// Chunk made only of non-script modules
    Asset(AssetType),
}

/// A chunk is a group of modules that will be bundled together
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    /// Chunk name (used for output filename)
    pub id: String,

    /// Type of chunk
    pub kind: ChunkKind,

    /// Member modules, in discovery order
    pub modules: IndexSet<ModuleId>,

    /// Entry module for entry chunks
    pub entry: Option<ModuleId>,

    /// Entry names served by this chunk's entry module
    pub entry_names: Vec<String>,
}

impl Chunk {
    /// Create a new entry chunk
    pub fn entry(id: String, entry: ModuleId, entry_names: Vec<String>) -> Self {
        let mut modules = IndexSet::new();
        modules.insert(entry.clone());
        Self {
            id,
            kind: ChunkKind::Entry,
            modules,
            entry: Some(entry),
            entry_names,
        }
    }

    /// Create a new shared chunk
    pub fn shared(id: String, modules: impl IntoIterator<Item = ModuleId>) -> Self {
        Self {
            id,
            kind: ChunkKind::Shared,
            modules: modules.into_iter().collect(),
            entry: None,
            entry_names: Vec::new(),
        }
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.modules.contains(id)
    }

    /// Check if chunk is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Number of modules in chunk
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Sum of member sizes
    pub fn size(&self, graph: &ModuleGraph) -> u64 {
        self.modules
            .iter()
            .filter_map(|id| graph.get_module(id))
            .map(|m| m.size())
            .sum()
    }
}

/// Partition of a module graph into chunks
#[derive(Debug, Clone, Default)]
pub struct ChunkSet {
    chunks: Vec<Chunk>,
    chunk_of: HashMap<ModuleId, usize>,
    /// Entry name -> chunk indices in load order (entry chunk last)
    entry_chunks: IndexMap<String, Vec<usize>>,
}

impl ChunkSet {
    /// Assemble a chunk set, checking it partitions `graph`
    pub fn new(
        chunks: Vec<Chunk>,
        entry_chunks: IndexMap<String, Vec<usize>>,
        graph: &ModuleGraph,
    ) -> Result<Self> {
        let mut chunk_of = HashMap::new();

        for (index, chunk) in chunks.iter().enumerate() {
            for id in &chunk.modules {
                if !graph.contains(id) {
                    return Err(BuildError::PartitionInvariantViolation(format!(
                        "chunk '{}' holds {} which is not in the graph",
                        chunk.id, id
                    )));
                }
                if let Some(previous) = chunk_of.insert(id.clone(), index) {
                    return Err(BuildError::PartitionInvariantViolation(format!(
                        "{} is in both '{}' and '{}'",
                        id, chunks[previous].id, chunk.id
                    )));
                }
            }
        }

        if let Some(missing) = graph.module_ids().iter().find(|id| !chunk_of.contains_key(*id)) {
            return Err(BuildError::PartitionInvariantViolation(format!(
                "{} is not assigned to any chunk",
                missing
            )));
        }

        Ok(Self {
            chunks,
            chunk_of,
            entry_chunks,
        })
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn get(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub fn find(&self, id: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.id == id)
    }

    /// Chunk holding a module
    pub fn chunk_of(&self, module: &ModuleId) -> Option<&Chunk> {
        self.chunk_of.get(module).map(|&i| &self.chunks[i])
    }

    /// Entry name -> chunk indices in load order
    pub fn entry_chunks(&self) -> &IndexMap<String, Vec<usize>> {
        &self.entry_chunks
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::graph::tests::{graph_of, id};

    fn graph() -> ModuleGraph {
        graph_of(&[("a.js", ""), ("b.js", "")], &[("a.js", "b.js")], &[("main", "a.js")])
    }

    #[test]
    fn test_partition_accepted() {
        let chunks = vec![
            Chunk::entry("main".into(), id("a.js"), vec!["main".into()]),
            Chunk::shared("vendor".into(), [id("b.js")]),
        ];
        let set = ChunkSet::new(chunks, IndexMap::new(), &graph()).unwrap();
        assert_eq!(set.chunk_of(&id("b.js")).map(|c| c.id.as_str()), Some("vendor"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_duplicate_assignment_rejected() {
        let mut entry = Chunk::entry("main".into(), id("a.js"), vec!["main".into()]);
        entry.modules.insert(id("b.js"));
        let chunks = vec![entry, Chunk::shared("vendor".into(), [id("b.js")])];

        let err = ChunkSet::new(chunks, IndexMap::new(), &graph()).unwrap_err();
        assert!(matches!(err, BuildError::PartitionInvariantViolation(_)));
    }

    #[test]
    fn test_missing_module_rejected() {
        let chunks = vec![Chunk::entry("main".into(), id("a.js"), vec!["main".into()])];
        let err = ChunkSet::new(chunks, IndexMap::new(), &graph()).unwrap_err();
        assert!(err.to_string().contains("b.js"));
    }
}
