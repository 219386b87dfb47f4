//! Scan pagination against a projection that changes between pages

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tableflow::codec::{FieldValue, TypeTag};
use tableflow::projection::MutationEvent;
use tableflow::query::{FilterCondition, FilterOp, OrderBy, ScanRequest};
use tableflow::schema::{FieldDescriptor, SchemaRegistry, TableDescriptor};
use tableflow::types::QueryError;
use tableflow::{ContextConfig, TableflowContext};

fn score_event(seq: u64, id: u32, points: u64) -> MutationEvent {
    MutationEvent::set(
        seq,
        "score",
        vec![id.to_le_bytes().to_vec()],
        vec![points.to_le_bytes().to_vec()],
    )
}

async fn scores(n: u32) -> TableflowContext {
    let registry = Arc::new(SchemaRegistry::new());
    registry
        .register(
            TableDescriptor::new(
                "score",
                vec![
                    FieldDescriptor::key("id", TypeTag::U32),
                    FieldDescriptor::value("points", TypeTag::U64),
                ],
            )
            .unwrap(),
        )
        .unwrap();
    let ctx = TableflowContext::new(registry, ContextConfig::default());
    for id in 0..n {
        // duplicate point values force key tie-breaks
        ctx.projector
            .apply(score_event(id as u64 + 1, id, (id / 3) as u64))
            .await
            .unwrap();
    }
    ctx
}

fn id_of(record: &tableflow::projection::Record) -> u32 {
    match record.key[0] {
        FieldValue::U32(id) => id,
        ref other => panic!("unexpected key {:?}", other),
    }
}

#[tokio::test]
async fn test_pages_cover_every_row_once() {
    let ctx = scores(10).await;
    let mut seen = Vec::new();
    let mut request = ScanRequest::new("score")
        .order_by(OrderBy::desc("points"))
        .limit(3);

    loop {
        let page = ctx.query.scan(&request).unwrap();
        seen.extend(page.data.iter().map(|r| id_of(r)));
        match page.next_cursor {
            Some(cursor) if page.has_more => request = request.after(cursor),
            _ => break,
        }
    }

    assert_eq!(seen.len(), 10);
    assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 10);
    // points descending, ties by id descending
    assert_eq!(&seen[..4], &[9, 8, 7, 6]);
}

#[tokio::test]
async fn test_rows_inserted_before_cursor_are_not_repeated() {
    let ctx = scores(6).await;
    let first = ctx
        .query
        .scan(&ScanRequest::new("score").order_by(OrderBy::asc("points")).limit(4))
        .unwrap();
    let first_ids: Vec<_> = first.data.iter().map(|r| id_of(r)).collect();
    assert_eq!(first_ids, vec![0, 1, 2, 3]);

    // lands before the cursor position; must not show up on the next page
    ctx.projector.apply(score_event(7, 100, 0)).await.unwrap();
    // lands after it; must show up
    ctx.projector.apply(score_event(8, 101, 9)).await.unwrap();

    let second = ctx
        .query
        .scan(
            &ScanRequest::new("score")
                .order_by(OrderBy::asc("points"))
                .after(first.next_cursor.unwrap())
                .limit(10),
        )
        .unwrap();
    let second_ids: Vec<_> = second.data.iter().map(|r| id_of(r)).collect();
    assert_eq!(second_ids, vec![4, 5, 101]);
    assert!(!second.has_more);
    assert!(second.next_cursor.is_none());
}

#[tokio::test]
async fn test_filters_combine() {
    let ctx = scores(9).await;
    let page = ctx
        .query
        .scan(
            &ScanRequest::new("score")
                .filter(FilterCondition::new("points", FilterOp::Gte, json!(1)))
                .filter(FilterCondition::new("id", FilterOp::NotIn, json!([4, 7])))
                .order_by(OrderBy::asc("id")),
        )
        .unwrap();
    let ids: Vec<_> = page.data.iter().map(|r| id_of(r)).collect();
    assert_eq!(ids, vec![3, 5, 6, 8]);
}

#[tokio::test]
async fn test_cursor_from_another_ordering_is_rejected() {
    let ctx = scores(4).await;
    let page = ctx
        .query
        .scan(&ScanRequest::new("score").order_by(OrderBy::asc("points")).limit(1))
        .unwrap();
    let err = ctx
        .query
        .scan(
            &ScanRequest::new("score")
                .order_by(OrderBy::desc("points"))
                .after(page.next_cursor.unwrap()),
        )
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidCursor(_)));
}

#[tokio::test]
async fn test_unknown_field_in_filter() {
    let ctx = scores(1).await;
    let err = ctx
        .query
        .scan(&ScanRequest::new("score").filter(FilterCondition::new(
            "nope",
            FilterOp::Eq,
            json!(1),
        )))
        .unwrap_err();
    assert!(matches!(err, QueryError::UnknownField { .. }));
}
