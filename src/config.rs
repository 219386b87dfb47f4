//! Configuration for tableflow
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::bus::BusConfig;
use crate::context::ContextConfig;
use crate::projection::ProjectorConfig;
use crate::query::QueryConfig;

/// tableflow - typed ledger table projection with queries and live subscriptions
#[derive(Parser, Debug, Clone)]
#[command(name = "tableflow")]
#[command(about = "Projects ledger table mutations into queryable tables with live subscriptions")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// JSON table configuration (components, resources, enums)
    #[arg(long, env = "TABLES_CONFIG", default_value = "tables.json")]
    pub tables_config: PathBuf,

    /// Structural metadata file, read at startup and rewritten whenever a
    /// table is registered
    #[arg(long, env = "METADATA_FILE")]
    pub metadata: Option<PathBuf>,

    /// JSON-lines mutation events to replay at startup
    #[arg(long, env = "EVENTS_FILE")]
    pub events: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Per-connection notification queue; a subscriber that falls this far
    /// behind is disconnected
    #[arg(long, env = "SUBSCRIBER_QUEUE_CAPACITY", default_value = "1024")]
    pub subscriber_queue_capacity: usize,

    /// Pending events between ingest and the projector
    #[arg(long, env = "INGEST_QUEUE_CAPACITY", default_value = "4096")]
    pub ingest_queue_capacity: usize,

    /// Page size used when a scan gives no limit
    #[arg(long, env = "DEFAULT_PAGE_SIZE", default_value = "100")]
    pub default_page_size: usize,

    /// Upper bound on any scan limit
    #[arg(long, env = "MAX_PAGE_SIZE", default_value = "1000")]
    pub max_page_size: usize,

    /// Seconds between WebSocket heartbeats
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value = "30")]
    pub heartbeat_interval_secs: u64,

    /// Enable development mode (ready even with no tables configured)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(format!(
                "LOG_FORMAT must be 'text' or 'json', got '{}'",
                self.log_format
            ));
        }

        if self.subscriber_queue_capacity == 0 {
            return Err("SUBSCRIBER_QUEUE_CAPACITY must be at least 1".to_string());
        }

        if self.ingest_queue_capacity == 0 {
            return Err("INGEST_QUEUE_CAPACITY must be at least 1".to_string());
        }

        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err("Page sizes must be at least 1".to_string());
        }

        if self.default_page_size > self.max_page_size {
            return Err("DEFAULT_PAGE_SIZE must be less than or equal to MAX_PAGE_SIZE".to_string());
        }

        if self.heartbeat_interval_secs == 0 {
            return Err("HEARTBEAT_INTERVAL_SECS must be at least 1".to_string());
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format == "json"
    }

    /// Component tunables derived from the CLI
    pub fn context_config(&self) -> ContextConfig {
        ContextConfig {
            bus: BusConfig {
                queue_capacity: self.subscriber_queue_capacity,
            },
            query: QueryConfig {
                default_limit: self.default_page_size,
                max_limit: self.max_page_size,
            },
            projector: ProjectorConfig {
                queue_capacity: self.ingest_queue_capacity,
            },
        }
    }
}
