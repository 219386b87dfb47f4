//! Projector - single-writer application of mutation events
//!
//! The projector owns the write side of the projection. Events are applied
//! one at a time under a mutex, in strictly increasing `seq` order:
//!
//! ```text
//!  MutationEvent ──▶ resolve descriptor ──▶ decode key + values ──▶ store
//!                                                                    │
//!                                        NotificationBus ◀── TableChange
//! ```
//!
//! A change is published only after it is visible in the store. Decode and
//! shape failures halt the affected table until an operator resumes it;
//! other tables keep flowing.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::event::{ChangeKind, MutationEvent, MutationKind, TableChange};
use super::store::{ProjectionStore, Record};
use crate::bus::NotificationBus;
use crate::codec::{self, FieldValue};
use crate::metrics::Metrics;
use crate::schema::{SchemaRegistry, TableDescriptor};
use crate::types::{ProjectionError, SchemaError};

/// Projector configuration
#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    /// Capacity of the ingest queue feeding the projector task
    pub queue_capacity: usize,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self { queue_capacity: 4096 }
    }
}

/// A table that stopped accepting events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HaltedTable {
    pub table: String,
    pub seq: u64,
    pub reason: String,
}

#[derive(Debug, Default)]
struct ApplyState {
    last_applied: Option<u64>,
}

pub struct Projector {
    registry: Arc<SchemaRegistry>,
    store: Arc<ProjectionStore>,
    bus: Arc<NotificationBus>,
    metrics: Arc<Metrics>,
    state: Mutex<ApplyState>,
    halted: DashMap<String, HaltedTable>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Projector {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        store: Arc<ProjectionStore>,
        bus: Arc<NotificationBus>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            registry,
            store,
            bus,
            metrics,
            state: Mutex::new(ApplyState::default()),
            halted: DashMap::new(),
            shutdown_tx,
        }
    }

    /// Get a shutdown receiver for graceful termination
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown to the projector task
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn last_applied_seq(&self) -> Option<u64> {
        self.store.applied_seq()
    }

    pub fn halted_tables(&self) -> Vec<HaltedTable> {
        let mut halted: Vec<_> = self.halted.iter().map(|e| e.value().clone()).collect();
        halted.sort_by(|a, b| a.table.cmp(&b.table));
        halted
    }

    /// Clear a halted table; returns whether it was halted
    pub fn resume_table(&self, table: &str) -> bool {
        let resumed = self.halted.remove(table).is_some();
        if resumed {
            info!(table = table, "Table resumed by operator");
        }
        resumed
    }

    /// Apply one mutation event.
    ///
    /// On error nothing is written, nothing is published and the last
    /// applied seq is unchanged.
    pub async fn apply(&self, event: MutationEvent) -> Result<(), ProjectionError> {
        let mut state = self.state.lock().await;

        if let Some(last_applied) = state.last_applied {
            if event.seq <= last_applied {
                warn!(
                    seq = event.seq,
                    last_applied = last_applied,
                    table = %event.table,
                    "Rejecting out-of-order event"
                );
                self.metrics.record_sequence_violation();
                self.metrics.record_rejected();
                return Err(ProjectionError::SequenceViolation {
                    seq: event.seq,
                    last_applied,
                });
            }
        }

        if let Some(halted) = self.halted.get(&event.table) {
            self.metrics.record_rejected();
            return Err(ProjectionError::TableHalted {
                table: event.table.clone(),
                reason: halted.reason.clone(),
            });
        }

        let descriptor = self.registry.resolve(&event.table).map_err(|e| {
            self.metrics.record_rejected();
            warn!(table = %event.table, seq = event.seq, "Event for unknown table");
            match e {
                SchemaError::UnknownTable(t) => ProjectionError::UnknownTable(t),
                other => ProjectionError::InvalidMutation {
                    table: event.table.clone(),
                    reason: other.to_string(),
                },
            }
        })?;

        let change = match self.project(&descriptor, &event) {
            Ok(change) => change,
            Err(err) => {
                if err.halts_table() {
                    self.halt(&event, &err);
                } else {
                    self.metrics.record_rejected();
                }
                return Err(err);
            }
        };

        state.last_applied = Some(event.seq);
        self.store.set_applied_seq(event.seq);
        self.metrics.record_applied();

        if let Some(change) = change {
            let delivered = self.bus.publish(Arc::new(change));
            debug!(
                table = %event.table,
                seq = event.seq,
                kind = event.kind_str(),
                delivered = delivered,
                "Event applied"
            );
        } else {
            debug!(table = %event.table, seq = event.seq, "Delete of absent record, nothing to publish");
        }
        Ok(())
    }

    fn halt(&self, event: &MutationEvent, err: &ProjectionError) {
        self.metrics.record_decode_error();
        self.metrics.record_rejected();
        error!(
            table = %event.table,
            seq = event.seq,
            error = %err,
            "Halting table, events are rejected until it is resumed"
        );
        self.halted.insert(
            event.table.clone(),
            HaltedTable {
                table: event.table.clone(),
                seq: event.seq,
                reason: err.to_string(),
            },
        );
    }

    /// Decode and write one event; `None` when there is nothing to publish
    fn project(
        &self,
        descriptor: &Arc<TableDescriptor>,
        event: &MutationEvent,
    ) -> Result<Option<TableChange>, ProjectionError> {
        let table = descriptor.name.as_str();
        let key = decode_key(descriptor, &event.key)?;

        let (kind, record) = match &event.kind {
            MutationKind::Set { values } => {
                let arity = descriptor.fields.len() - descriptor.key_arity();
                if values.len() != arity {
                    return Err(ProjectionError::InvalidMutation {
                        table: table.to_string(),
                        reason: format!("expected {} values, got {}", arity, values.len()),
                    });
                }
                let mut key_iter = key.iter();
                let mut value_iter = values.iter();
                let mut fields = Vec::with_capacity(descriptor.fields.len());
                for field in &descriptor.fields {
                    let value = if field.is_key {
                        key_iter.next().cloned()
                    } else {
                        match value_iter.next() {
                            Some(bytes) => Some(decode_field(table, &field.name, bytes, &field.type_tag)?),
                            None => None,
                        }
                    };
                    let value = value.ok_or_else(|| ProjectionError::InvalidMutation {
                        table: table.to_string(),
                        reason: format!("no value for field {}", field.name),
                    })?;
                    fields.push((field.name.clone(), value));
                }
                let record = Record {
                    key,
                    fields,
                    last_mutation_seq: event.seq,
                    deleted: false,
                    updated_at: event.timestamp,
                };
                (ChangeKind::Set, self.store.upsert(table, record))
            }
            MutationKind::SetField { field_index, value } => {
                let field = descriptor.value_field(*field_index as usize).ok_or_else(|| {
                    ProjectionError::InvalidMutation {
                        table: table.to_string(),
                        reason: format!("no value field at index {}", field_index),
                    }
                })?;
                let decoded = decode_field(table, &field.name, value, &field.type_tag)?;
                let current = self
                    .store
                    .get_raw(table, &key)
                    .filter(|r| !r.deleted)
                    .ok_or_else(|| ProjectionError::MissingRecord {
                        table: table.to_string(),
                    })?;
                let mut record = Record::clone(&current);
                if let Some(slot) = record.fields.iter_mut().find(|(n, _)| n == &field.name) {
                    slot.1 = decoded;
                }
                record.last_mutation_seq = event.seq;
                record.updated_at = event.timestamp;
                (ChangeKind::SetField, self.store.upsert(table, record))
            }
            MutationKind::Delete => match self.store.tombstone(table, &key, event.seq, event.timestamp) {
                Some(record) => (ChangeKind::Delete, record),
                None => return Ok(None),
            },
        };

        Ok(Some(TableChange {
            seq: event.seq,
            table: table.to_string(),
            kind,
            record,
            descriptor: Arc::clone(descriptor),
            timestamp: event.timestamp,
        }))
    }
}

fn decode_field(
    table: &str,
    field: &str,
    bytes: &[u8],
    tag: &codec::TypeTag,
) -> Result<FieldValue, ProjectionError> {
    codec::decode(bytes, tag).map_err(|source| ProjectionError::DecodeError {
        table: table.to_string(),
        field: field.to_string(),
        source,
    })
}

fn decode_key(descriptor: &TableDescriptor, raw: &[Vec<u8>]) -> Result<Vec<FieldValue>, ProjectionError> {
    let arity = descriptor.key_arity();
    if raw.len() != arity {
        return Err(ProjectionError::InvalidMutation {
            table: descriptor.name.clone(),
            reason: format!("expected {} key values, got {}", arity, raw.len()),
        });
    }
    descriptor
        .key_fields()
        .zip(raw)
        .map(|(field, bytes)| decode_field(&descriptor.name, &field.name, bytes, &field.type_tag))
        .collect()
}

/// Start the projector with an ingest queue
///
/// This spawns a task that applies queued events in arrival order. Rejected
/// events are logged and skipped.
pub fn spawn_projector_task(
    projector: Arc<Projector>,
    mut event_rx: mpsc::Receiver<MutationEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown_rx = projector.shutdown_receiver();

        info!("Projector started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Projector shutting down");
                    break;
                }
                event = event_rx.recv() => {
                    match event {
                        Some(event) => {
                            let seq = event.seq;
                            if let Err(e) = projector.apply(event).await {
                                warn!(seq = seq, error = %e, "Event rejected");
                            }
                        }
                        None => {
                            info!("Ingest queue closed, projector stopping");
                            break;
                        }
                    }
                }
            }
        }

        info!(last_applied = ?projector.last_applied_seq(), "Projector stopped");
    })
}
