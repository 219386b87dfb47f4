//! Record projection: events, store and the single-writer projector

pub mod engine;
pub mod event;
pub mod store;

pub use engine::{spawn_projector_task, HaltedTable, Projector, ProjectorConfig};
pub use event::{ChangeKind, EventLine, MutationEvent, MutationKind, TableChange};
pub use store::{ProjectionStore, Record, TableSnapshot, TableStats};
