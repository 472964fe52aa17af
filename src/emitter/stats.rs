//! Build statistics (`stats.json`)

use std::time::Duration;

use serde::Serialize;

use super::{AssetInfo, AssetKind};
use crate::bundler::{ChunkKind, ChunkSet, ModuleGraph};
use crate::transform::TransformStats;

#[derive(Debug, Clone, Serialize)]
pub struct ChunkStats {
    pub id: String,
    pub kind: ChunkKind,
    pub modules: usize,
    /// Sum of transformed module sizes
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetStats {
    pub file: String,
    pub kind: AssetKind,
    pub size: usize,
}

/// Summary of a finished build
#[derive(Debug, Clone, Serialize)]
pub struct BuildStats {
    pub modules: usize,
    pub chunks: Vec<ChunkStats>,
    pub assets: Vec<AssetStats>,
    pub transforms: Vec<TransformStats>,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub duration_ms: f64,
}

impl BuildStats {
    pub fn collect(
        graph: &ModuleGraph,
        chunks: &ChunkSet,
        assets: &[AssetInfo],
        transforms: Vec<TransformStats>,
        cache: (usize, usize),
        duration: Duration,
    ) -> Self {
        Self {
            modules: graph.len(),
            chunks: chunks
                .iter()
                .map(|chunk| ChunkStats {
                    id: chunk.id.clone(),
                    kind: chunk.kind,
                    modules: chunk.len(),
                    size: chunk.size(graph),
                })
                .collect(),
            assets: assets
                .iter()
                .map(|asset| AssetStats {
                    file: asset.file_name.clone(),
                    kind: asset.kind,
                    size: asset.size,
                })
                .collect(),
            transforms,
            cache_hits: cache.0,
            cache_misses: cache.1,
            duration_ms: duration.as_secs_f64() * 1000.0,
        }
    }

    /// Total bytes written
    pub fn total_size(&self) -> usize {
        self.assets.iter().map(|a| a.size).sum()
    }
}
