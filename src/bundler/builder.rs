//! Module graph construction
//!
//! Breadth-first traversal from the entries. Resolution, hooks and graph
//! mutation happen on the driving task; transforms run concurrently on
//! blocking workers. Finished transforms are committed strictly in discovery
//! order, so the resulting graph and the first reported error do not depend
//! on how long individual transforms take.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument};

use super::{BuildContext, Module, ModuleGraph, ModuleId, ModuleType};
use crate::error::{BuildError, Result};
use crate::transform::TransformOutput;

/// An import waiting to be resolved
struct PendingImport {
    specifier: String,
    importer: Option<ModuleId>,
    /// Entry name when this is an entrypoint
    entry: Option<String>,
}

/// A transform that finished, waiting for its turn to be committed
struct Completed {
    id: ModuleId,
    module_type: ModuleType,
    outcome: Result<(String, TransformOutput)>,
}

/// Visited modules and the discovery counter
#[derive(Default)]
struct VisitState {
    seen: HashSet<ModuleId>,
    next_order: usize,
}

#[derive(Default)]
struct VisitedSet {
    inner: Mutex<VisitState>,
}

impl VisitedSet {
    /// Mark `id` visited; returns its discovery number the first time only
    fn claim(&self, id: &ModuleId) -> Option<usize> {
        let mut state = self.inner.lock();
        if !state.seen.insert(id.clone()) {
            return None;
        }
        let order = state.next_order;
        state.next_order += 1;
        Some(order)
    }
}

/// Builds a module graph from named entries
pub struct GraphBuilder {
    ctx: Arc<BuildContext>,
}

impl GraphBuilder {
    pub fn new(ctx: Arc<BuildContext>) -> Self {
        Self { ctx }
    }

    /// Traverse from `entries` (name, path relative to the root)
    #[instrument(skip_all, fields(entries = entries.len()))]
    pub async fn build(&self, entries: &[(String, String)]) -> Result<ModuleGraph> {
        let mut graph = ModuleGraph::new();
        let visited = VisitedSet::default();
        let semaphore = Arc::new(Semaphore::new(self.ctx.config.concurrency()));
        let mut in_flight: JoinSet<(usize, Completed)> = JoinSet::new();
        let mut ready: BTreeMap<usize, Completed> = BTreeMap::new();
        let mut next_commit = 0usize;

        let mut queue: VecDeque<PendingImport> = entries
            .iter()
            .map(|(name, path)| PendingImport {
                specifier: path.clone(),
                importer: None,
                entry: Some(name.clone()),
            })
            .collect();

        loop {
            // Resolve everything known so far and start transforms
            while let Some(pending) = queue.pop_front() {
                let Some(id) = self.resolve(&pending).await? else {
                    continue;
                };

                match (&pending.importer, &pending.entry) {
                    (Some(importer), _) => graph.add_edge(importer, &pending.specifier, id.clone()),
                    (None, Some(name)) => graph.add_entry(name, id.clone()),
                    (None, None) => {}
                }

                if let Some(order) = visited.claim(&id) {
                    debug!("Discovered #{} {}", order, id);
                    self.spawn_transform(&mut in_flight, &semaphore, order, id);
                }
            }

            // Commit finished transforms in discovery order
            while let Some(completed) = ready.remove(&next_commit) {
                self.commit(&mut graph, &mut queue, next_commit, completed).await?;
                next_commit += 1;
            }

            if !queue.is_empty() {
                continue;
            }

            match in_flight.join_next().await {
                Some(joined) => {
                    let (order, completed) = joined.map_err(|e| BuildError::Transform {
                        transform: "<worker>".to_string(),
                        module: ModuleId::from_path(&self.ctx.config.root),
                        cause: anyhow::anyhow!("transform task failed: {}", e),
                    })?;
                    ready.insert(order, completed);
                }
                None if ready.is_empty() => break,
                None => {
                    // Unreachable unless a discovery number was skipped
                    return Err(BuildError::PartitionInvariantViolation(format!(
                        "transform #{} never completed",
                        next_commit
                    )));
                }
            }
        }

        debug_assert!(graph.is_closed());
        info!("Module graph built: {} modules", graph.len());
        Ok(graph)
    }

    /// Run pre-resolve hooks and the resolver; `None` when a hook drops the import
    async fn resolve(&self, pending: &PendingImport) -> Result<Option<ModuleId>> {
        let Some(specifier) = self
            .ctx
            .plugins
            .pre_resolve(&pending.specifier, pending.importer.as_ref())
            .await?
        else {
            debug!("Import '{}' dropped by a plugin", pending.specifier);
            return Ok(None);
        };

        self.ctx
            .resolver
            .resolve(&specifier, pending.importer.as_ref())
            .map(Some)
    }

    fn spawn_transform(
        &self,
        in_flight: &mut JoinSet<(usize, Completed)>,
        semaphore: &Arc<Semaphore>,
        order: usize,
        id: ModuleId,
    ) {
        let ctx = self.ctx.clone();
        let semaphore = semaphore.clone();
        let module_type = ModuleType::of(&id);

        in_flight.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let task_id = id.clone();
            let outcome = tokio::task::spawn_blocking(move || transform_module(&ctx, &task_id, module_type))
                .await
                .unwrap_or_else(|e| {
                    Err(BuildError::Transform {
                        transform: "<worker>".to_string(),
                        module: id.clone(),
                        cause: anyhow::anyhow!("transform panicked: {}", e),
                    })
                });

            (order, Completed { id, module_type, outcome })
        });
    }

    /// Add a transformed module to the graph and queue its imports
    async fn commit(
        &self,
        graph: &mut ModuleGraph,
        queue: &mut VecDeque<PendingImport>,
        order: usize,
        completed: Completed,
    ) -> Result<()> {
        let Completed { id, module_type, outcome } = completed;
        let (raw, mut output) = outcome?;

        self.ctx.plugins.post_transform(&id, module_type, &mut output).await?;

        for specifier in &output.imports {
            queue.push_back(PendingImport {
                specifier: specifier.clone(),
                importer: Some(id.clone()),
                entry: None,
            });
        }

        graph.add_module(Module {
            id,
            module_type,
            raw_content: raw,
            transformed: output.content,
            import_specifiers: output.imports,
            discovered_at: order,
            is_entry: false,
        });

        Ok(())
    }
}

/// Read and transform one module on a blocking worker
fn transform_module(
    ctx: &BuildContext,
    id: &ModuleId,
    module_type: ModuleType,
) -> Result<(String, TransformOutput)> {
    let raw = fs::read_to_string(id.path()).map_err(|source| BuildError::Read {
        module: id.clone(),
        source,
    })?;
    let output = ctx.pipeline.run(id, module_type, &raw)?;
    Ok((raw, output))
}
