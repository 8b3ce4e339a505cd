//! Persisted configuration and the operations that apply it.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use mdp_core::{ConfigDocument, ConfigError, ConfigKind, RoutingTable};
use mdp_io::dispatch::Dispatcher;
use tracing::{info, warn};

use crate::pipeline::Pipeline;
use crate::workers::WorkerManager;
use crate::RuntimeOptions;

/// One YAML file per configuration kind inside `dir`.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: ConfigKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// Validates `doc` and persists it as the last applied document of `kind`.
    ///
    /// Nothing is written when the document is empty or invalid.
    pub async fn update(&self, kind: ConfigKind, doc: &ConfigDocument) -> Result<(), ConfigError> {
        doc.validate(kind)?;
        let yaml = doc.to_yaml()?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| ConfigError::Io {
                path: self.dir.clone(),
                source,
            })?;
        let path = self.path(kind);
        // replace the file in one rename so a reader never sees half a document
        let staging = path.with_extension("yaml.tmp");
        tokio::fs::write(&staging, yaml)
            .await
            .map_err(|source| ConfigError::Io {
                path: staging.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
        info!(kind = %kind, path = %path.display(), entries = doc.source_data.len(), "configuration stored");
        Ok(())
    }

    pub async fn load(&self, kind: ConfigKind) -> Result<ConfigDocument, ConfigError> {
        let path = self.path(kind);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ConfigError::NotFound(path)),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        ConfigDocument::from_yaml(&text)
    }
}

/// Applies persisted configuration to the routing table and the workers.
pub struct Controller {
    store: ConfigStore,
    routes: Arc<RoutingTable>,
    workers: WorkerManager,
}

impl Controller {
    pub fn new(store: ConfigStore, options: RuntimeOptions) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.http_timeout)
            .build()
            .context("build HTTP client")?;
        let routes = Arc::new(RoutingTable::new());
        let dispatcher = Dispatcher::new(Arc::clone(&routes), client.clone(), options.producer_timeout);
        let pipeline = Arc::new(Pipeline::new(dispatcher, options.max_in_flight));
        let workers = WorkerManager::new(pipeline, client, options.channel_capacity);
        Ok(Self {
            store,
            routes,
            workers,
        })
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn routes(&self) -> &Arc<RoutingTable> {
        &self.routes
    }

    pub fn workers(&self) -> &WorkerManager {
        &self.workers
    }

    pub async fn update_configuration(
        &self,
        kind: ConfigKind,
        doc: &ConfigDocument,
    ) -> Result<(), ConfigError> {
        self.store.update(kind, doc).await
    }

    pub async fn load_configuration(&self, kind: ConfigKind) -> Result<ConfigDocument, ConfigError> {
        self.store.load(kind).await
    }

    /// Applies the stored document of `kind`.
    ///
    /// A destination document replaces the routing table. A source document
    /// restarts a worker for every configured endpoint and stops the workers
    /// that are no longer configured.
    pub async fn refresh_configuration(&self, kind: ConfigKind) -> Result<(), ConfigError> {
        let doc = self.store.load(kind).await?;
        match kind {
            ConfigKind::Destination => {
                let entries = doc.destinations()?;
                self.routes.replace(entries);
            }
            ConfigKind::Source => {
                let sources = doc.sources()?;
                let wanted: HashSet<&str> = sources.iter().map(|s| s.name.as_str()).collect();
                for name in self.workers.names() {
                    if !wanted.contains(name.as_str()) {
                        self.workers.stop(&name);
                    }
                }
                for source in &sources {
                    self.workers.start(source);
                }
                info!(workers = sources.len(), "sources refreshed");
            }
        }
        Ok(())
    }

    /// Rebuilds routing and workers from the persisted documents.
    ///
    /// Destinations are applied first so the restarted workers find their
    /// routes. A missing or invalid file is logged and skipped.
    pub async fn restore(&self) {
        for kind in [ConfigKind::Destination, ConfigKind::Source] {
            match self.refresh_configuration(kind).await {
                Ok(()) => info!(kind = %kind, "configuration restored"),
                Err(ConfigError::NotFound(path)) => {
                    info!(kind = %kind, path = %path.display(), "no stored configuration")
                }
                Err(e) => warn!(kind = %kind, error = %e, "stored configuration not applied"),
            }
        }
    }

    pub fn health(&self) -> &'static str {
        "up"
    }

    /// Cancels every worker and waits for them to finish.
    pub async fn shutdown(&self) {
        info!(workers = self.workers.len(), "shutting down workers");
        self.workers.stop_all().await;
    }
}
