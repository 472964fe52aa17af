//! Content-addressed transform cache
//!
//! Keys combine the hash of a step's input content with the transform name
//! and its options, so a hit is always safe to reuse. The only state shared
//! between builds.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tracing::warn;

use super::TransformOutput;
use crate::utils::hash_parts;

/// Cache of transform outputs
#[derive(Debug, Default)]
pub struct TransformCache {
    entries: DashMap<String, TransformOutput>,

    /// Directory entries are persisted to, if any
    dir: Option<PathBuf>,

    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl TransformCache {
    /// Cache that lives as long as the value
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Cache that also reads and writes `<dir>/<key>.json`
    pub fn persistent(dir: PathBuf) -> Self {
        Self {
            dir: Some(dir),
            ..Self::default()
        }
    }

    /// Cache key for running `transform` with `signature` options over `content`
    pub fn key(content: &str, transform: &str, signature: &str) -> String {
        hash_parts(&[content.as_bytes(), transform.as_bytes(), signature.as_bytes()])
    }

    pub fn get(&self, key: &str) -> Option<TransformOutput> {
        if let Some(found) = self.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(found.clone());
        }

        if let Some(found) = self.read_persisted(key) {
            self.entries.insert(key.to_string(), found.clone());
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(found);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: String, output: TransformOutput) {
        if let Some(dir) = &self.dir {
            // Persisting is best-effort
            let written = fs::create_dir_all(dir).and_then(|_| {
                let json = serde_json::to_vec(&output)?;
                fs::write(dir.join(format!("{}.json", key)), json)
            });
            if let Err(e) = written {
                warn!("Failed to persist transform cache entry {}: {}", key, e);
            }
        }
        self.entries.insert(key, output);
    }

    fn read_persisted(&self, key: &str) -> Option<TransformOutput> {
        let dir = self.dir.as_ref()?;
        let bytes = fs::read(dir.join(format!("{}.json", key))).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
