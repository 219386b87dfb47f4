//! Owned runtime context
//!
//! `TableflowContext` wires the registry, store, projector, query engine
//! and bus together. Everything hangs off this value; there is no global
//! state. `shutdown` stops the projector task and drains the pipeline.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::bus::{BusConfig, FilterSpec, NotificationBus};
use crate::metrics::Metrics;
use crate::projection::{spawn_projector_task, MutationEvent, ProjectionStore, Projector, ProjectorConfig};
use crate::query::{QueryConfig, QueryEngine};
use crate::schema::SchemaRegistry;
use crate::session::{LocalConnector, SessionConfig, SubscriptionSession};
use crate::types::ProjectionError;

/// Tunables for every component
#[derive(Debug, Clone, Default)]
pub struct ContextConfig {
    pub bus: BusConfig,
    pub query: QueryConfig,
    pub projector: ProjectorConfig,
}

pub struct TableflowContext {
    pub registry: Arc<SchemaRegistry>,
    pub store: Arc<ProjectionStore>,
    pub bus: Arc<NotificationBus>,
    pub projector: Arc<Projector>,
    pub query: Arc<QueryEngine>,
    pub metrics: Arc<Metrics>,
    ingest_tx: mpsc::Sender<MutationEvent>,
    ingest_rx: Mutex<Option<mpsc::Receiver<MutationEvent>>>,
    projector_task: Mutex<Option<JoinHandle<()>>>,
}

impl TableflowContext {
    pub fn new(registry: Arc<SchemaRegistry>, config: ContextConfig) -> Self {
        let metrics = Arc::new(Metrics::new());
        let store = Arc::new(ProjectionStore::new());
        let bus = Arc::new(NotificationBus::new(
            Arc::clone(&registry),
            Arc::clone(&metrics),
            config.bus,
        ));
        let projector = Arc::new(Projector::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&metrics),
        ));
        let query = Arc::new(QueryEngine::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::clone(&metrics),
            config.query,
        ));
        let (ingest_tx, ingest_rx) = mpsc::channel(config.projector.queue_capacity.max(1));

        Self {
            registry,
            store,
            bus,
            projector,
            query,
            metrics,
            ingest_tx,
            ingest_rx: Mutex::new(Some(ingest_rx)),
            projector_task: Mutex::new(None),
        }
    }

    /// Spawn the projector task; later calls are no-ops
    pub async fn start(&self) {
        let Some(rx) = self.ingest_rx.lock().await.take() else {
            return;
        };
        let handle = spawn_projector_task(Arc::clone(&self.projector), rx);
        *self.projector_task.lock().await = Some(handle);
        info!(tables = self.registry.list_tables().len(), "Pipeline started");
    }

    pub async fn is_running(&self) -> bool {
        self.projector_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Handle for feeding events into the ingest queue
    pub fn ingest_sender(&self) -> mpsc::Sender<MutationEvent> {
        self.ingest_tx.clone()
    }

    /// Queue one event, waiting for room
    pub async fn ingest(&self, event: MutationEvent) -> Result<(), ProjectionError> {
        self.ingest_tx
            .send(event)
            .await
            .map_err(|_| ProjectionError::Shutdown)
    }

    /// In-process subscription session on this context's bus
    pub fn subscribe(&self, filter: FilterSpec, config: SessionConfig) -> SubscriptionSession {
        SubscriptionSession::open(
            Arc::new(LocalConnector::new(Arc::clone(&self.bus))),
            filter,
            config,
        )
    }

    /// Stop the projector task and wait for it to exit
    pub async fn shutdown(&self) {
        self.projector.shutdown();
        if let Some(handle) = self.projector_task.lock().await.take() {
            let _ = handle.await;
        }
        info!(
            last_applied = ?self.projector.last_applied_seq(),
            "Pipeline stopped"
        );
    }
}
