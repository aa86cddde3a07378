//! Persistent store: one SQLite file per brain, WAL mode, one writer plus
//! parallel readers, deferred-write batches applied transactionally.

pub mod deferred;
pub mod migrations;
pub mod sqlite;

pub use deferred::{DeferredBatch, SynapseUpdate};
pub use sqlite::{
    ActionEvent, CoActivationCount, EncodeBatch, NeuronFilter, Result, SqliteStore, StorageError,
    StoreStats,
};
