//! Query Engine - point lookups and paginated scans
//!
//! Every query runs against a `TableSnapshot`, so a long scan never blocks
//! the projector and never sees a half-applied event. Pagination is
//! position based: the cursor carries the sort value and key of the last
//! row returned, and the next page starts strictly after that position in
//! whatever snapshot is current when it is requested.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use super::cursor::Cursor;
use crate::codec::FieldValue;
use crate::metrics::Metrics;
use crate::projection::{ProjectionStore, Record};
use crate::schema::{SchemaRegistry, TableDescriptor};
use crate::types::{QueryError, SchemaError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
}

/// One conjunct of a scan predicate; `value` is JSON typed by the field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOp,
    pub value: JsonValue,
}

impl FilterCondition {
    pub fn new(field: impl Into<String>, op: FilterOp, value: JsonValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub table: String,
    #[serde(default)]
    pub filters: Vec<FilterCondition>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ScanRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn filter(mut self, condition: FilterCondition) -> Self {
        self.filters.push(condition);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by = Some(order);
        self
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One page of scan results
#[derive(Debug, Clone)]
pub struct Page {
    pub descriptor: Arc<TableDescriptor>,
    pub data: Vec<Arc<Record>>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    /// Applied seq of the snapshot the page was read from
    pub seq: Option<u64>,
}

impl Page {
    /// `{data, next_cursor, has_more}` envelope
    pub fn to_json(&self) -> JsonValue {
        json!({
            "data": self.data.iter().map(|r| record_json(&self.descriptor, r)).collect::<Vec<_>>(),
            "next_cursor": self.next_cursor,
            "has_more": self.has_more,
            "seq": self.seq,
        })
    }
}

/// JSON form of a record: typed fields plus projection metadata
pub fn record_json(descriptor: &TableDescriptor, record: &Record) -> JsonValue {
    let key: Vec<JsonValue> = descriptor
        .key_fields()
        .zip(&record.key)
        .map(|(f, v)| v.to_json(&f.type_tag))
        .collect();
    json!({
        "key": key,
        "fields": record.to_json_map(descriptor),
        "last_mutation_seq": record.last_mutation_seq,
        "updated_at": record.updated_at.to_rfc3339(),
    })
}

/// Page size limits
#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 1000,
        }
    }
}

enum Predicate {
    Compare(usize, FilterOp, FieldValue),
    Member(usize, bool, Vec<FieldValue>),
}

impl Predicate {
    fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Compare(idx, op, expected) => {
                let actual = &record.fields[*idx].1;
                match op {
                    FilterOp::Eq => actual == expected,
                    FilterOp::Ne => actual != expected,
                    FilterOp::Gt => actual > expected,
                    FilterOp::Gte => actual >= expected,
                    FilterOp::Lt => actual < expected,
                    FilterOp::Lte => actual <= expected,
                    FilterOp::In | FilterOp::NotIn => false,
                }
            }
            Self::Member(idx, negate, set) => set.contains(&record.fields[*idx].1) != *negate,
        }
    }
}

pub struct QueryEngine {
    registry: Arc<SchemaRegistry>,
    store: Arc<ProjectionStore>,
    metrics: Arc<Metrics>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        store: Arc<ProjectionStore>,
        metrics: Arc<Metrics>,
        config: QueryConfig,
    ) -> Self {
        Self {
            registry,
            store,
            metrics,
            config,
        }
    }

    fn resolve(&self, table: &str) -> Result<Arc<TableDescriptor>, QueryError> {
        self.registry.resolve(table).map_err(|e| match e {
            SchemaError::UnknownTable(t) => QueryError::UnknownTable(t),
            other => QueryError::InvalidValue {
                field: table.to_string(),
                reason: other.to_string(),
            },
        })
    }

    /// Live record for a typed key
    pub fn get(&self, table: &str, key: &[FieldValue]) -> Result<Option<Arc<Record>>, QueryError> {
        self.metrics.record_query();
        let descriptor = self.resolve(table)?;
        if key.len() != descriptor.key_arity() {
            return Err(QueryError::InvalidValue {
                field: "key".into(),
                reason: format!("expected {} key values, got {}", descriptor.key_arity(), key.len()),
            });
        }
        Ok(self.store.snapshot(table).get(key).cloned())
    }

    /// Live record for a key given as JSON values
    pub fn get_json(&self, table: &str, key: &[JsonValue]) -> Result<Option<Arc<Record>>, QueryError> {
        let descriptor = self.resolve(table)?;
        if key.len() != descriptor.key_arity() {
            return Err(QueryError::InvalidValue {
                field: "key".into(),
                reason: format!("expected {} key values, got {}", descriptor.key_arity(), key.len()),
            });
        }
        let typed = descriptor
            .key_fields()
            .zip(key)
            .map(|(f, v)| {
                FieldValue::from_json(v, &f.type_tag).map_err(|e| QueryError::InvalidValue {
                    field: f.name.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.get(table, &typed)
    }

    fn compile(&self, descriptor: &TableDescriptor, condition: &FilterCondition) -> Result<Predicate, QueryError> {
        let idx = descriptor
            .fields
            .iter()
            .position(|f| f.name == condition.field)
            .ok_or_else(|| QueryError::UnknownField {
                table: descriptor.name.clone(),
                field: condition.field.clone(),
            })?;
        let tag = &descriptor.fields[idx].type_tag;
        let typed = |v: &JsonValue| {
            FieldValue::from_json(v, tag).map_err(|e| QueryError::InvalidValue {
                field: condition.field.clone(),
                reason: e.to_string(),
            })
        };
        match condition.op {
            FilterOp::In | FilterOp::NotIn => {
                let items = condition.value.as_array().ok_or_else(|| QueryError::InvalidValue {
                    field: condition.field.clone(),
                    reason: "in/not_in expects an array".into(),
                })?;
                let set = items.iter().map(typed).collect::<Result<Vec<_>, _>>()?;
                Ok(Predicate::Member(idx, condition.op == FilterOp::NotIn, set))
            }
            op => Ok(Predicate::Compare(idx, op, typed(&condition.value)?)),
        }
    }

    /// Scan one page of a table
    pub fn scan(&self, request: &ScanRequest) -> Result<Page, QueryError> {
        self.metrics.record_query();
        let descriptor = self.resolve(&request.table)?;

        let predicates = request
            .filters
            .iter()
            .map(|c| self.compile(&descriptor, c))
            .collect::<Result<Vec<_>, _>>()?;

        let (sort_idx, direction) = match &request.order_by {
            Some(order) => {
                let idx = descriptor
                    .fields
                    .iter()
                    .position(|f| f.name == order.field)
                    .ok_or_else(|| QueryError::UnknownField {
                        table: descriptor.name.clone(),
                        field: order.field.clone(),
                    })?;
                (Some(idx), order.direction)
            }
            None => (None, SortDirection::Asc),
        };
        let order_field = sort_idx.map(|i| descriptor.fields[i].name.clone());

        // limits above the configured maximum are clamped to it
        let limit = match request.limit {
            Some(0) => {
                return Err(QueryError::InvalidValue {
                    field: "limit".into(),
                    reason: "must be at least 1".into(),
                })
            }
            Some(n) => n,
            None => self.config.default_limit,
        }
        .clamp(1, self.config.max_limit.max(1));

        let after = match &request.cursor {
            Some(raw) => {
                let cursor = Cursor::decode(raw, &descriptor)?;
                if cursor.order_field != order_field || cursor.direction != direction {
                    return Err(QueryError::InvalidCursor(
                        "cursor was issued for a different ordering".into(),
                    ));
                }
                Some(cursor)
            }
            None => None,
        };

        let snapshot = self.store.snapshot(&descriptor.name);
        let sort_value = |r: &Record| sort_idx.map(|i| r.fields[i].1.clone());
        let position = |a: (&Option<FieldValue>, &[FieldValue]), b: (&Option<FieldValue>, &[FieldValue])| {
            let ord = a.0.cmp(b.0).then_with(|| a.1.cmp(b.1));
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        };

        let mut rows: Vec<(Option<FieldValue>, &Arc<Record>)> = snapshot
            .live()
            .filter(|r| predicates.iter().all(|p| p.matches(r)))
            .map(|r| (sort_value(r), r))
            .filter(|(sv, r)| match &after {
                Some(c) => {
                    position((sv, r.key.as_slice()), (&c.sort_value, c.key.as_slice())) == Ordering::Greater
                }
                None => true,
            })
            .collect();
        rows.sort_by(|a, b| position((&a.0, a.1.key.as_slice()), (&b.0, b.1.key.as_slice())));

        let has_more = rows.len() > limit;
        rows.truncate(limit);

        let scan_seq = after.as_ref().map_or(snapshot.seq, |c| c.seq);
        let next_cursor = match (has_more, rows.last()) {
            (true, Some((sv, last))) => Some(
                Cursor {
                    table: descriptor.name.clone(),
                    order_field: order_field.clone(),
                    direction,
                    seq: scan_seq,
                    sort_value: sv.clone(),
                    key: last.key.clone(),
                }
                .encode(&descriptor),
            ),
            _ => None,
        };

        debug!(
            table = %descriptor.name,
            returned = rows.len(),
            has_more = has_more,
            "Scan page"
        );

        Ok(Page {
            data: rows.into_iter().map(|(_, r)| Arc::clone(r)).collect(),
            descriptor,
            next_cursor,
            has_more,
            seq: snapshot.seq,
        })
    }
}
