//! Shared types for tableflow

pub mod error;

pub use error::{
    BusError, CodecError, ProjectionError, QueryError, Result, SchemaError, SessionError,
    TableflowError,
};
