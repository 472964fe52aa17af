//! Output emission
//!
//! Names and writes chunk files, then the manifest. Emission first builds an
//! [`EmitPlan`] that pre-emit hooks can inspect and extend, then writes it.
//! A stale manifest is removed before anything is written and the new one is
//! written last, so a manifest on disk always describes a complete build.

mod stats;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::bundler::ChunkSet;
use crate::config::Config;
use crate::error::{BuildError, Result};
use crate::optimizer::OptimizedChunk;
use crate::utils::hash_content;

pub use stats::{AssetStats, BuildStats, ChunkStats};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const STATS_FILE: &str = "stats.json";

/// Entry name -> files to load, in load order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildManifest {
    entries: IndexMap<String, Vec<String>>,
}

impl BuildManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: impl Into<String>, files: Vec<String>) {
        self.entries.insert(entry.into(), files);
    }

    pub fn get(&self, entry: &str) -> Option<&[String]> {
        self.entries.get(entry).map(Vec::as_slice)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }

    /// All referenced files, first occurrence order
    pub fn files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = Vec::new();
        for file in self.entries.values().flatten() {
            if !files.contains(&file.as_str()) {
                files.push(file);
            }
        }
        files
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Kind of an emitted file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Script,
    Stylesheet,
    Html,
    Other,
}

/// A file about to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedAsset {
    /// Path relative to the output directory
    pub file_name: String,
    pub content: String,
    pub kind: AssetKind,
    /// Chunk the asset was rendered from
    pub chunk: Option<String>,
}

/// Everything a build will write
#[derive(Debug, Clone, Default)]
pub struct EmitPlan {
    pub assets: Vec<EmittedAsset>,
    pub manifest: BuildManifest,
}

impl EmitPlan {
    pub fn add_asset(&mut self, asset: EmittedAsset) {
        self.assets.push(asset);
    }

    pub fn find(&self, file_name: &str) -> Option<&EmittedAsset> {
        self.assets.iter().find(|a| a.file_name == file_name)
    }
}

/// Information about a written file
#[derive(Debug, Clone)]
pub struct AssetInfo {
    /// Output file path
    pub output_path: PathBuf,
    pub file_name: String,
    pub kind: AssetKind,
    /// Size in bytes
    pub size: usize,
}

/// Names and writes build output
pub struct Emitter {
    output_dir: PathBuf,
    filename: String,
    css_filename: String,
    write_manifest: bool,
}

impl Emitter {
    pub fn new(config: &Config, output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            filename: config.output.filename.clone(),
            css_filename: config.output.css_filename.clone(),
            write_manifest: config.output.manifest,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Name every chunk file and derive the manifest
    pub fn plan(&self, chunks: &ChunkSet, optimized: &[OptimizedChunk]) -> Result<EmitPlan> {
        let mut plan = EmitPlan::default();
        let mut files_of: Vec<Vec<String>> = vec![Vec::new(); chunks.len()];

        for chunk in optimized {
            if let Some(script) = &chunk.script {
                let file_name = file_name(&self.filename, &chunk.name, chunk.index, script);
                files_of[chunk.index].push(file_name.clone());
                plan.add_asset(EmittedAsset {
                    file_name,
                    content: script.clone(),
                    kind: AssetKind::Script,
                    chunk: Some(chunk.name.clone()),
                });
            }
            if let Some(css) = &chunk.stylesheet {
                let file_name = file_name(&self.css_filename, &chunk.name, chunk.index, css);
                files_of[chunk.index].push(file_name.clone());
                plan.add_asset(EmittedAsset {
                    file_name,
                    content: css.clone(),
                    kind: AssetKind::Stylesheet,
                    chunk: Some(chunk.name.clone()),
                });
            }
        }

        for (entry, indices) in chunks.entry_chunks() {
            let files = indices
                .iter()
                .flat_map(|&index| files_of[index].iter().cloned())
                .collect();
            plan.manifest.insert(entry.clone(), files);
        }

        check_unique_files(&plan.assets)?;
        Ok(plan)
    }

    /// Write a plan: stale manifest removed, assets, then the new manifest
    pub fn write(&self, plan: &EmitPlan) -> Result<Vec<AssetInfo>> {
        let written = self.write_assets(plan)?;
        self.write_manifest(&plan.manifest)?;
        Ok(written)
    }

    /// Remove a stale manifest and write every asset of a plan
    #[instrument(skip_all, fields(assets = plan.assets.len()))]
    pub fn write_assets(&self, plan: &EmitPlan) -> Result<Vec<AssetInfo>> {
        check_unique_files(&plan.assets)?;

        fs::create_dir_all(&self.output_dir).map_err(|source| BuildError::Write {
            path: self.output_dir.clone(),
            source,
        })?;

        let manifest_path = self.output_dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            fs::remove_file(&manifest_path).map_err(|source| BuildError::Write {
                path: manifest_path.clone(),
                source,
            })?;
        }

        let mut written = Vec::with_capacity(plan.assets.len());
        for asset in &plan.assets {
            let output_path = self.output_dir.join(&asset.file_name);
            write_file(&output_path, asset.content.as_bytes())?;
            debug!("Wrote {} ({} bytes)", output_path.display(), asset.content.len());

            written.push(AssetInfo {
                output_path,
                file_name: asset.file_name.clone(),
                kind: asset.kind,
                size: asset.content.len(),
            });
        }

        Ok(written)
    }

    /// Write `manifest.json`; must be the last write of a build
    pub fn write_manifest(&self, manifest: &BuildManifest) -> Result<Option<PathBuf>> {
        if !self.write_manifest {
            return Ok(None);
        }

        let path = self.output_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(manifest).map_err(|e| BuildError::Write {
            path: path.clone(),
            source: e.into(),
        })?;
        write_file(&path, json.as_bytes())?;
        info!("Manifest written to {}", path.display());
        Ok(Some(path))
    }

    /// Plan and write in one step, without hooks
    pub fn emit(&self, chunks: &ChunkSet, optimized: &[OptimizedChunk]) -> Result<BuildManifest> {
        let plan = self.plan(chunks, optimized)?;
        self.write(&plan)?;
        Ok(plan.manifest)
    }

    /// Write `stats.json`
    pub fn write_stats(&self, stats: &BuildStats) -> Result<PathBuf> {
        let path = self.output_dir.join(STATS_FILE);
        let json = serde_json::to_string_pretty(stats).map_err(|e| BuildError::Write {
            path: path.clone(),
            source: e.into(),
        })?;
        write_file(&path, json.as_bytes())?;
        Ok(path)
    }
}

/// Expand `[name]`, `[id]` and `[contenthash]` in a file name pattern
pub fn file_name(pattern: &str, name: &str, index: usize, content: &str) -> String {
    let mut result = pattern.replace("[name]", name).replace("[id]", &index.to_string());
    if result.contains("[contenthash]") {
        result = result.replace("[contenthash]", &hash_content(content.as_bytes()));
    }
    result
}

/// Two assets writing the same path would silently lose one of them
fn check_unique_files(assets: &[EmittedAsset]) -> Result<()> {
    let mut owners: HashMap<&str, Option<&str>> = HashMap::new();
    for asset in assets {
        if let Some(previous) = owners.insert(&asset.file_name, asset.chunk.as_deref()) {
            return Err(BuildError::Config(format!(
                "output file '{}' is produced by both {} and {}",
                asset.file_name,
                describe_owner(previous),
                describe_owner(asset.chunk.as_deref())
            )));
        }
    }
    Ok(())
}

fn describe_owner(chunk: Option<&str>) -> String {
    match chunk {
        Some(name) => format!("chunk '{}'", name),
        None => "a plugin".to_string(),
    }
}

fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| BuildError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, content).map_err(|source| BuildError::Write {
        path: path.to_path_buf(),
        source,
    })
}
