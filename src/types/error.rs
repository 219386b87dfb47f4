//! Error types for tableflow
//!
//! Each layer owns a small error enum; `TableflowError` aggregates them for
//! the HTTP surface and maps every variant to a status code.

use hyper::StatusCode;

/// Field codec failures (encode-side misuse or corrupt bytes)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Malformed encoding for {type_name}: {reason}")]
    MalformedEncoding { type_name: String, reason: String },

    #[error("Unknown type: {0}")]
    UnknownType(String),
}

impl CodecError {
    pub(crate) fn malformed(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEncoding {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }
}

/// Schema registry failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Schema conflict for table {0}: a different field list is already registered")]
    SchemaConflict(String),

    #[error("Invalid descriptor for table {table}: {reason}")]
    InvalidDescriptor { table: String, reason: String },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Record projector failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Decode error in {table}.{field}: {source}")]
    DecodeError {
        table: String,
        field: String,
        #[source]
        source: CodecError,
    },

    #[error("Mutation shape error in {table}: {reason}")]
    InvalidMutation { table: String, reason: String },

    #[error("No live record in {table} for the given key")]
    MissingRecord { table: String },

    #[error("Sequence violation: seq {seq} is not after last applied seq {last_applied}")]
    SequenceViolation { seq: u64, last_applied: u64 },

    #[error("Table {table} is halted after a decode failure: {reason}")]
    TableHalted { table: String, reason: String },

    #[error("Projector is shut down")]
    Shutdown,
}

impl ProjectionError {
    /// Whether this error halts further applies for the table.
    pub fn halts_table(&self) -> bool {
        matches!(
            self,
            Self::DecodeError { .. } | Self::InvalidMutation { .. } | Self::MissingRecord { .. }
        )
    }
}

/// Query engine failures (per request)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown field {field} in table {table}")]
    UnknownField { table: String, field: String },

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Notification bus failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Subscription session failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Subscription rejected: {0}")]
    Rejected(String),

    #[error("Session closed")]
    Closed,
}

/// Main error type for the HTTP and WebSocket surface
#[derive(Debug, thiserror::Error)]
pub enum TableflowError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TableflowError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Schema(SchemaError::UnknownTable(_)) => StatusCode::NOT_FOUND,
            Self::Schema(SchemaError::SchemaConflict(_)) => StatusCode::CONFLICT,
            Self::Schema(_) => StatusCode::BAD_REQUEST,
            Self::Projection(ProjectionError::UnknownTable(_)) => StatusCode::NOT_FOUND,
            Self::Projection(ProjectionError::SequenceViolation { .. }) => StatusCode::CONFLICT,
            Self::Projection(ProjectionError::Shutdown) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Projection(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Query(QueryError::UnknownTable(_)) => StatusCode::NOT_FOUND,
            Self::Query(_) => StatusCode::BAD_REQUEST,
            Self::Bus(BusError::UnknownTable(_)) => StatusCode::NOT_FOUND,
            Self::Bus(BusError::InvalidFilter(_)) => StatusCode::BAD_REQUEST,
            Self::Bus(BusError::ConnectionClosed) => StatusCode::GONE,
            Self::WebSocket(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = serde_json::json!({ "error": self.to_string() }).to_string();
        (status, body)
    }
}

impl From<std::io::Error> for TableflowError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for TableflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for TableflowError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TableflowError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// Result type alias for tableflow operations
pub type Result<T> = std::result::Result<T, TableflowError>;
