use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mdp_core::{Source, SourceConfig, SourceId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::pipeline::Pipeline;

struct WorkerEntry {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    source_id: SourceId,
    generation: u64,
}

/// Live workers by name, plus cancelled ones whose tasks have not ended yet.
#[derive(Default)]
struct Registry {
    running: HashMap<String, WorkerEntry>,
    stopping: HashMap<String, WorkerEntry>,
}

impl Registry {
    // drops the entry only if it still belongs to `generation`
    fn forget(&mut self, name: &str, generation: u64) {
        for map in [&mut self.running, &mut self.stopping] {
            if map.get(name).is_some_and(|e| e.generation == generation) {
                map.remove(name);
                return;
            }
        }
    }
}

/// Registry of running workers, keyed by name.
///
/// At most one worker task is live per name, including a stopped worker that
/// is still winding down. The registry lock is held only while an entry is
/// inserted or removed, never while a worker runs or is awaited.
pub struct WorkerManager {
    registry: Arc<Mutex<Registry>>,
    next_generation: AtomicU64,
    pipeline: Arc<Pipeline>,
    client: reqwest::Client,
    channel_capacity: usize,
}

impl WorkerManager {
    pub fn new(pipeline: Arc<Pipeline>, client: reqwest::Client, channel_capacity: usize) -> Self {
        Self {
            registry: Arc::default(),
            next_generation: AtomicU64::new(0),
            pipeline,
            client,
            channel_capacity,
        }
    }

    /// Starts the connector described by `config` under `config.name`.
    pub fn start(&self, config: &SourceConfig) {
        let source = mdp_io::build_source(config, &self.client);
        info!(worker = %config.name, source_id = config.source_id, kind = config.kind.label(), "starting worker");
        self.start_source(&config.name, config.source_id, source);
    }

    /// Runs `source` as the worker `name`.
    ///
    /// A worker already registered under `name` is cancelled, and the new one
    /// begins only after the old task has finished. The same holds for a
    /// worker under `name` that was stopped but has not ended yet.
    pub fn start_source(&self, name: &str, source_id: SourceId, source: Box<dyn Source>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let mut registry = self.lock();
        let previous = match registry.running.remove(name) {
            Some(prev) => {
                prev.cancel.cancel();
                Some(prev)
            }
            None => registry.stopping.remove(name),
        };

        let shared = Arc::clone(&self.registry);
        let pipeline = Arc::clone(&self.pipeline);
        let worker_name = name.to_string();
        let token = cancel.clone();
        let capacity = self.channel_capacity;
        let handle = tokio::spawn(async move {
            if let Some(prev) = previous {
                if let Err(e) = prev.handle.await {
                    warn!(worker = %worker_name, error = %e, "replaced worker panicked");
                }
                info!(worker = %worker_name, source_id = prev.source_id, "replaced worker stopped");
            }
            if !token.is_cancelled() {
                let outcome = pipeline
                    .run_worker(worker_name.clone(), source_id, source, token, capacity)
                    .await;
                if let Err(e) = outcome {
                    error!(worker = %worker_name, error = %e, "worker ended");
                }
            }
            // a one-shot source ends on its own; forget it unless it was replaced
            shared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .forget(&worker_name, generation);
        });

        registry.running.insert(
            name.to_string(),
            WorkerEntry {
                cancel,
                handle,
                source_id,
                generation,
            },
        );
    }

    /// Signals the worker `name` to stop. Returns `false` if no such worker
    /// was running.
    ///
    /// The worker leaves [`names`](Self::names) at once; its task is still
    /// tracked until it ends so a restart or [`stop_all`](Self::stop_all)
    /// can wait for it.
    pub fn stop(&self, name: &str) -> bool {
        let mut registry = self.lock();
        let Some(entry) = registry.running.remove(name) else {
            return false;
        };
        entry.cancel.cancel();
        info!(worker = %name, source_id = entry.source_id, "worker stop requested");
        // a name is only re-stopped after a restart took over the older task
        registry.stopping.insert(name.to_string(), entry);
        true
    }

    /// Stops every worker and waits for all of them to finish, including
    /// workers stopped earlier that are still winding down.
    pub async fn stop_all(&self) {
        let drained: Vec<(String, WorkerEntry)> = {
            let mut registry = self.lock();
            let running: Vec<_> = registry.running.drain().collect();
            registry.stopping.drain().chain(running).collect()
        };
        for (_, entry) in &drained {
            entry.cancel.cancel();
        }
        for (name, entry) in drained {
            if let Err(e) = entry.handle.await {
                warn!(worker = %name, error = %e, "worker panicked");
            }
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().running.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.lock().running.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().running.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
