//! Notification Bus - in-process change fanout
//!
//! A `BusConnection` stands for one physical transport (a WebSocket, or an
//! in-process session) and owns one bounded delivery queue. Any number of
//! logical subscriptions ride on it. The bus keeps a routing table keyed by
//! table name (plus one all-tables slot) and pushes each published change
//! to the queue of every matching subscription.
//!
//! Delivery never waits: when a connection's queue is full the connection
//! is dropped and its subscriptions are removed. The receiver then drains
//! what was already queued and observes the end of the stream.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::filter::{FilterSpec, SubscriptionFilter};
use crate::metrics::Metrics;
use crate::projection::TableChange;
use crate::schema::SchemaRegistry;
use crate::types::BusError;

/// Subscription identifier, unique across connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One change addressed to one subscription
#[derive(Debug, Clone)]
pub struct Delivery {
    pub subscription_id: SubscriptionId,
    pub change: Arc<TableChange>,
}

/// Bus configuration
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Per-connection delivery queue capacity
    pub queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { queue_capacity: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RouteKey {
    Table(String),
    All,
}

impl RouteKey {
    fn for_filter(filter: &SubscriptionFilter) -> Self {
        match &filter.table {
            Some(t) => Self::Table(t.clone()),
            None => Self::All,
        }
    }
}

struct Route {
    connection: Uuid,
    filter: SubscriptionFilter,
    /// Last delivered seq
    cursor: Option<u64>,
}

struct ConnectionEntry {
    tx: mpsc::Sender<Delivery>,
    subscriptions: HashSet<SubscriptionId>,
}

pub struct NotificationBus {
    registry: Arc<SchemaRegistry>,
    metrics: Arc<Metrics>,
    config: BusConfig,
    routes: DashMap<RouteKey, HashMap<SubscriptionId, Route>>,
    connections: DashMap<Uuid, ConnectionEntry>,
    /// Highest published seq, meaningful once `has_published` is set
    last_published: AtomicU64,
    has_published: AtomicBool,
}

impl NotificationBus {
    pub fn new(registry: Arc<SchemaRegistry>, metrics: Arc<Metrics>, config: BusConfig) -> Self {
        Self {
            registry,
            metrics,
            config,
            routes: DashMap::new(),
            connections: DashMap::new(),
            last_published: AtomicU64::new(0),
            has_published: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Attach a new transport
    pub fn connect(self: &Arc<Self>) -> BusConnection {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            ConnectionEntry {
                tx,
                subscriptions: HashSet::new(),
            },
        );
        self.metrics.connection_opened();
        debug!(connection = %id, "Bus connection opened");
        BusConnection {
            id,
            bus: Arc::clone(self),
            rx,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.routes.iter().map(|r| r.value().len()).sum()
    }

    fn last_published(&self) -> Option<u64> {
        self.has_published
            .load(Ordering::Acquire)
            .then(|| self.last_published.load(Ordering::Acquire))
    }

    fn subscribe(&self, connection: Uuid, filter: SubscriptionFilter) -> Result<SubscriptionId, BusError> {
        filter.validate(&self.registry)?;
        let id = SubscriptionId::new();
        {
            let mut conn = self
                .connections
                .get_mut(&connection)
                .ok_or(BusError::ConnectionClosed)?;
            conn.subscriptions.insert(id);
            // counted here so a concurrent disconnect balances it
            self.metrics.subscription_opened();
        }
        let key = RouteKey::for_filter(&filter);
        let route = Route {
            connection,
            filter,
            cursor: self.last_published(),
        };
        self.routes.entry(key.clone()).or_default().insert(id, route);

        // a disconnect that raced the insert above has already swept routes
        let attached = self
            .connections
            .get(&connection)
            .is_some_and(|c| c.subscriptions.contains(&id));
        if !attached {
            self.remove_routes(&HashSet::from([id]));
            return Err(BusError::ConnectionClosed);
        }
        info!(connection = %connection, subscription = %id, route = ?key, "Subscription opened");
        Ok(id)
    }

    fn unsubscribe(&self, connection: Uuid, id: SubscriptionId) -> bool {
        let owned = self
            .connections
            .get_mut(&connection)
            .map(|mut c| c.subscriptions.remove(&id))
            .unwrap_or(false);
        if !owned {
            return false;
        }
        self.remove_routes(&HashSet::from([id]));
        self.metrics.subscriptions_closed(1);
        debug!(connection = %connection, subscription = %id, "Subscription closed");
        true
    }

    fn remove_routes(&self, ids: &HashSet<SubscriptionId>) {
        self.routes.retain(|_, routes| {
            routes.retain(|id, _| !ids.contains(id));
            !routes.is_empty()
        });
    }

    /// Detach a transport and every subscription on it
    fn disconnect(&self, connection: Uuid) {
        let Some((_, entry)) = self.connections.remove(&connection) else {
            return;
        };
        if !entry.subscriptions.is_empty() {
            self.remove_routes(&entry.subscriptions);
            self.metrics.subscriptions_closed(entry.subscriptions.len() as u64);
        }
        self.metrics.connection_closed();
        debug!(
            connection = %connection,
            subscriptions = entry.subscriptions.len(),
            "Bus connection closed"
        );
    }

    /// Fan a committed change out to every matching subscription.
    ///
    /// Returns the number of deliveries queued.
    pub fn publish(&self, change: Arc<TableChange>) -> usize {
        let seq = change.seq;
        self.last_published.fetch_max(seq, Ordering::AcqRel);
        self.has_published.store(true, Ordering::Release);

        let mut targets: Vec<(Uuid, SubscriptionId)> = Vec::new();
        for key in [RouteKey::Table(change.table.clone()), RouteKey::All] {
            let Some(mut routes) = self.routes.get_mut(&key) else {
                continue;
            };
            for (id, route) in routes.iter_mut() {
                if route.cursor.is_some_and(|c| seq <= c) || !route.filter.matches(&change) {
                    continue;
                }
                route.cursor = Some(seq);
                targets.push((route.connection, *id));
            }
        }

        let mut delivered = 0;
        let mut overflowed: Vec<Uuid> = Vec::new();
        let mut closed: Vec<Uuid> = Vec::new();
        for (connection, subscription_id) in targets {
            if overflowed.contains(&connection) || closed.contains(&connection) {
                continue;
            }
            let Some(entry) = self.connections.get(&connection) else {
                continue;
            };
            let delivery = Delivery {
                subscription_id,
                change: Arc::clone(&change),
            };
            match entry.tx.try_send(delivery) {
                Ok(()) => {
                    delivered += 1;
                    self.metrics.record_delivery();
                }
                Err(TrySendError::Full(_)) => overflowed.push(connection),
                Err(TrySendError::Closed(_)) => closed.push(connection),
            }
        }

        for connection in overflowed {
            warn!(connection = %connection, seq = seq, "Delivery queue full, dropping connection");
            self.metrics.record_dropped_connection();
            self.disconnect(connection);
        }
        for connection in closed {
            self.disconnect(connection);
        }
        delivered
    }
}

/// One physical transport attached to the bus.
///
/// Dropping it detaches the transport and removes its subscriptions.
pub struct BusConnection {
    id: Uuid,
    bus: Arc<NotificationBus>,
    rx: mpsc::Receiver<Delivery>,
}

impl BusConnection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the bus still routes to this connection
    pub fn is_attached(&self) -> bool {
        self.bus.connections.contains_key(&self.id)
    }

    pub fn subscribe(&self, filter: SubscriptionFilter) -> Result<SubscriptionId, BusError> {
        self.bus.subscribe(self.id, filter)
    }

    /// Resolve a wire filter against the registry and subscribe
    pub fn subscribe_spec(&self, spec: &FilterSpec) -> Result<SubscriptionId, BusError> {
        let filter = spec.resolve(&self.bus.registry)?;
        self.subscribe(filter)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(self.id, id)
    }

    /// Next delivery; `None` once the bus has dropped this connection
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }
}

impl Drop for BusConnection {
    fn drop(&mut self) {
        self.bus.disconnect(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::KeyPredicate;
    use crate::codec::{FieldValue, TypeTag};
    use crate::projection::{ChangeKind, Record};
    use crate::schema::{FieldDescriptor, TableDescriptor};
    use chrono::Utc;

    fn setup(capacity: usize) -> Arc<NotificationBus> {
        let registry = Arc::new(SchemaRegistry::new());
        for name in ["a", "b"] {
            registry
                .register(
                    TableDescriptor::new(
                        name,
                        vec![
                            FieldDescriptor::key("id", TypeTag::U32),
                            FieldDescriptor::value("v", TypeTag::U32),
                        ],
                    )
                    .unwrap(),
                )
                .unwrap();
        }
        Arc::new(NotificationBus::new(
            registry,
            Arc::new(Metrics::new()),
            BusConfig { queue_capacity: capacity },
        ))
    }

    fn change(bus: &NotificationBus, table: &str, id: u32, seq: u64) -> Arc<TableChange> {
        Arc::new(TableChange {
            seq,
            table: table.to_string(),
            kind: ChangeKind::Set,
            record: Arc::new(Record {
                key: vec![FieldValue::U32(id)],
                fields: vec![("id".into(), FieldValue::U32(id)), ("v".into(), FieldValue::U32(0))],
                last_mutation_seq: seq,
                deleted: false,
                updated_at: Utc::now(),
            }),
            descriptor: bus.registry.resolve(table).unwrap(),
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_routes_by_table_and_key() {
        let bus = setup(16);
        let mut conn = bus.connect();
        let only_a = conn.subscribe(SubscriptionFilter::table("a")).unwrap();
        let a_key_2 = conn
            .subscribe(SubscriptionFilter::table("a").with_key(KeyPredicate::Exact(vec![FieldValue::U32(2)])))
            .unwrap();
        let all = conn.subscribe(SubscriptionFilter::all_tables()).unwrap();

        assert_eq!(bus.publish(change(&bus, "a", 1, 1)), 2);
        assert_eq!(bus.publish(change(&bus, "a", 2, 2)), 3);
        assert_eq!(bus.publish(change(&bus, "b", 2, 3)), 1);

        let mut got = Vec::new();
        while let Some(d) = conn.try_recv() {
            got.push((d.subscription_id, d.change.seq));
        }
        assert_eq!(got.iter().filter(|(id, _)| *id == only_a).count(), 2);
        assert_eq!(got.iter().filter(|(id, _)| *id == a_key_2).map(|(_, s)| *s).collect::<Vec<_>>(), vec![2]);
        assert_eq!(got.iter().filter(|(id, _)| *id == all).count(), 3);
    }

    #[tokio::test]
    async fn test_never_redelivers_older_seq() {
        let bus = setup(16);
        bus.publish(change(&bus, "a", 1, 5));
        let mut conn = bus.connect();
        conn.subscribe(SubscriptionFilter::table("a")).unwrap();
        // at or below the seq already published when the subscription opened
        bus.publish(change(&bus, "a", 1, 5));
        bus.publish(change(&bus, "a", 1, 6));
        bus.publish(change(&bus, "a", 1, 6));
        assert_eq!(conn.try_recv().unwrap().change.seq, 6);
        assert!(conn.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_overflow_drops_only_slow_connection() {
        let bus = setup(2);
        let mut slow = bus.connect();
        slow.subscribe(SubscriptionFilter::table("a")).unwrap();
        let mut fast = bus.connect();
        fast.subscribe(SubscriptionFilter::table("a")).unwrap();

        for seq in 1..=3 {
            bus.publish(change(&bus, "a", 1, seq));
            if seq < 3 {
                assert_eq!(fast.recv().await.unwrap().change.seq, seq);
            }
        }
        assert!(!slow.is_attached());
        assert!(fast.is_attached());
        assert_eq!(fast.recv().await.unwrap().change.seq, 3);

        // slow drains what was queued, then sees the end
        assert_eq!(slow.recv().await.unwrap().change.seq, 1);
        assert_eq!(slow.recv().await.unwrap().change.seq, 2);
        assert!(slow.recv().await.is_none());
        assert_eq!(bus.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_and_drop() {
        let bus = setup(4);
        let conn = bus.connect();
        let id = conn.subscribe(SubscriptionFilter::table("a")).unwrap();
        conn.subscribe(SubscriptionFilter::table("b")).unwrap();
        assert!(conn.unsubscribe(id));
        assert!(!conn.unsubscribe(id));
        assert_eq!(bus.subscription_count(), 1);
        drop(conn);
        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(bus.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_max_seq_is_not_redelivered() {
        let bus = setup(4);
        bus.publish(change(&bus, "a", 1, u64::MAX));
        let mut conn = bus.connect();
        conn.subscribe(SubscriptionFilter::table("a")).unwrap();
        bus.publish(change(&bus, "a", 1, u64::MAX));
        assert!(conn.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_on_detached_connection() {
        let bus = setup(4);
        let conn = bus.connect();
        let id = conn.id();
        drop(conn);
        assert_eq!(
            bus.subscribe(id, SubscriptionFilter::table("a")).unwrap_err(),
            BusError::ConnectionClosed
        );
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_subscribe_racing_disconnect_leaves_no_routes() {
        let bus = setup(4);
        let mut handles = Vec::new();
        for _ in 0..64 {
            let conn = bus.connect();
            let id = conn.id();
            let subscriber = Arc::clone(&bus);
            handles.push(tokio::spawn(async move {
                let _ = subscriber.subscribe(id, SubscriptionFilter::table("a"));
            }));
            handles.push(tokio::spawn(async move { drop(conn) }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(bus.connection_count(), 0);
        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(bus.metrics.snapshot().active_subscriptions, 0);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_table() {
        let bus = setup(4);
        let conn = bus.connect();
        assert_eq!(
            conn.subscribe(SubscriptionFilter::table("zzz")).unwrap_err(),
            BusError::UnknownTable("zzz".into())
        );
    }
}
