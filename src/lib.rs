//! tableflow - typed ledger tables as a queryable, subscribable projection
//!
//! Ordered mutation events (raw key and value bytes per table) are decoded
//! against registered table schemas, applied to an in-memory projection and
//! fanned out to live subscribers. Reads go through a query engine with
//! cursor pagination; subscriptions are exposed in-process and over
//! WebSocket.

pub mod bus;
pub mod codec;
pub mod config;
pub mod context;
pub mod metrics;
pub mod projection;
pub mod protocol;
pub mod query;
pub mod routes;
pub mod schema;
pub mod server;
pub mod session;
pub mod types;

pub use config::Args;
pub use context::{ContextConfig, TableflowContext};
pub use server::{run, AppState};
pub use types::{Result, TableflowError};
