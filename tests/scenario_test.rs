//! End-to-end projection scenarios through the public API

use std::sync::Arc;

use serde_json::json;
use tableflow::bus::FilterSpec;
use tableflow::codec::{FieldValue, TypeTag};
use tableflow::projection::{ChangeKind, MutationEvent};
use tableflow::protocol::Notification;
use tableflow::schema::{FieldDescriptor, SchemaRegistry, TableDescriptor, TableKind};
use tableflow::types::{ProjectionError, SchemaError};
use tableflow::{ContextConfig, TableflowContext};

fn counter_context() -> TableflowContext {
    let registry = Arc::new(SchemaRegistry::new());
    registry
        .register(
            TableDescriptor::new("counter", vec![FieldDescriptor::value("value", TypeTag::U32)])
                .unwrap()
                .with_kind(TableKind::Resource),
        )
        .unwrap();
    registry
        .register(
            TableDescriptor::new(
                "position",
                vec![
                    FieldDescriptor::key("player", TypeTag::Address),
                    FieldDescriptor::value("x", TypeTag::I32),
                    FieldDescriptor::value("y", TypeTag::I32),
                ],
            )
            .unwrap(),
        )
        .unwrap();
    TableflowContext::new(registry, ContextConfig::default())
}

fn set_counter(seq: u64, value: u32) -> MutationEvent {
    MutationEvent::set(seq, "counter", vec![], vec![value.to_le_bytes().to_vec()])
}

fn counter_filter() -> FilterSpec {
    FilterSpec {
        table: Some("counter".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_counter_lifecycle_and_late_subscriber() {
    let ctx = counter_context();

    let mut early = ctx.bus.connect();
    early.subscribe_spec(&counter_filter()).unwrap();

    ctx.projector.apply(set_counter(1, 5)).await.unwrap();
    ctx.projector.apply(set_counter(2, 6)).await.unwrap();

    let current = ctx.query.get("counter", &[]).unwrap().unwrap();
    assert_eq!(current.get("value"), Some(&FieldValue::U32(6)));
    assert_eq!(current.last_mutation_seq, 2);

    let mut late = ctx.bus.connect();
    late.subscribe_spec(&counter_filter()).unwrap();

    ctx.projector
        .apply(MutationEvent::delete(3, "counter", vec![]))
        .await
        .unwrap();
    assert!(ctx.query.get("counter", &[]).unwrap().is_none());
    assert_eq!(ctx.projector.last_applied_seq(), Some(3));

    let mut seen = Vec::new();
    while let Some(delivery) = early.try_recv() {
        seen.push(Notification::from(&delivery));
    }
    assert_eq!(
        seen.iter().map(|n| (n.seq, n.kind)).collect::<Vec<_>>(),
        vec![(1, ChangeKind::Set), (2, ChangeKind::Set), (3, ChangeKind::Delete)]
    );
    assert_eq!(seen[0].fields, json!({"value": 5}));
    assert_eq!(seen[1].fields, json!({"value": 6}));
    assert!(seen[2].fields.is_null());

    let only = late.try_recv().unwrap();
    assert_eq!(only.change.seq, 3);
    assert!(late.try_recv().is_none());
}

#[tokio::test]
async fn test_sequence_violation_leaves_state_untouched() {
    let ctx = counter_context();
    ctx.projector.apply(set_counter(1, 5)).await.unwrap();

    let err = ctx.projector.apply(set_counter(1, 9)).await.unwrap_err();
    assert!(matches!(err, ProjectionError::SequenceViolation { .. }));

    let current = ctx.query.get("counter", &[]).unwrap().unwrap();
    assert_eq!(current.get("value"), Some(&FieldValue::U32(5)));
    assert_eq!(ctx.metrics.snapshot().sequence_violations, 1);
}

#[tokio::test]
async fn test_decode_failure_halts_only_that_table() {
    let ctx = counter_context();
    let player = vec![0xab; 32];

    // one byte short for an i32
    let bad = MutationEvent::set(
        1,
        "position",
        vec![player.clone()],
        vec![vec![1, 0, 0], 2i32.to_le_bytes().to_vec()],
    );
    let err = ctx.projector.apply(bad).await.unwrap_err();
    assert!(err.halts_table());
    assert_eq!(ctx.projector.halted_tables()[0].table, "position");

    // other tables keep flowing
    ctx.projector.apply(set_counter(2, 1)).await.unwrap();

    let good = MutationEvent::set(
        3,
        "position",
        vec![player.clone()],
        vec![1i32.to_le_bytes().to_vec(), 2i32.to_le_bytes().to_vec()],
    );
    assert!(matches!(
        ctx.projector.apply(good.clone()).await,
        Err(ProjectionError::TableHalted { .. })
    ));

    assert!(ctx.projector.resume_table("position"));
    let good = MutationEvent { seq: 4, ..good };
    ctx.projector.apply(good).await.unwrap();

    let row = ctx
        .query
        .get("position", &[FieldValue::Address([0xab; 32])])
        .unwrap()
        .unwrap();
    assert_eq!(row.get("y"), Some(&FieldValue::I32(2)));
}

#[tokio::test]
async fn test_unknown_table_rejected_without_halt() {
    let ctx = counter_context();
    let err = ctx
        .projector
        .apply(MutationEvent::delete(1, "ghost", vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, ProjectionError::UnknownTable(_)));
    assert!(ctx.projector.halted_tables().is_empty());
}

#[tokio::test]
async fn test_conflicting_registration() {
    let ctx = counter_context();

    // identical shape is idempotent
    ctx.registry
        .register(
            TableDescriptor::new("counter", vec![FieldDescriptor::value("value", TypeTag::U32)])
                .unwrap()
                .with_kind(TableKind::Resource),
        )
        .unwrap();

    let err = ctx
        .registry
        .register(
            TableDescriptor::new("counter", vec![FieldDescriptor::value("value", TypeTag::U64)])
                .unwrap(),
        )
        .unwrap_err();
    assert!(matches!(err, SchemaError::SchemaConflict(_)));

    let kept = ctx.registry.resolve("counter").unwrap();
    assert_eq!(kept.field("value").unwrap().type_tag, TypeTag::U32);
}

#[tokio::test]
async fn test_tombstone_stays_retrievable_internally() {
    let ctx = counter_context();
    ctx.projector.apply(set_counter(1, 5)).await.unwrap();
    ctx.projector
        .apply(MutationEvent::delete(2, "counter", vec![]))
        .await
        .unwrap();

    assert!(ctx.query.get("counter", &[]).unwrap().is_none());
    let tombstone = ctx.store.get_raw("counter", &[]).unwrap();
    assert!(tombstone.deleted);
    assert_eq!(tombstone.last_mutation_seq, 2);
}

#[tokio::test]
async fn test_pipeline_through_ingest_queue() {
    let ctx = counter_context();
    ctx.start().await;

    let mut session = ctx.subscribe(counter_filter(), Default::default());
    session
        .wait_for(tableflow::session::SessionState::Active)
        .await
        .unwrap();

    for (seq, value) in [(1, 10u32), (2, 11), (3, 12)] {
        ctx.ingest(set_counter(seq, value)).await.unwrap();
    }

    let mut last = None;
    for _ in 0..3 {
        last = session.next().await;
    }
    let last = last.unwrap();
    assert_eq!(last.seq, 3);
    assert_eq!(last.fields, json!({"value": 12}));

    session.close().await;
    ctx.shutdown().await;
    assert!(!ctx.is_running().await);
}
