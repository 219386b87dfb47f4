//! Query engine over projection snapshots

pub mod cursor;
pub mod engine;

pub use cursor::Cursor;
pub use engine::{
    record_json, FilterCondition, FilterOp, OrderBy, Page, QueryConfig, QueryEngine, ScanRequest,
    SortDirection,
};
