//! Error taxonomy for the orchestrator.

use thiserror::Error;

/// Errors raised by the orchestrator and its collaborators.
///
/// Topology, sharding, split and move failures are fatal for the run. Worker
/// and cleanup errors are logged where they happen and never reach `main`.
#[derive(Error, Debug)]
pub enum SimError {
    /// MongoDB connection or command error.
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    /// The entry point reported no usable cluster type.
    #[error("invalid cluster type: {0:?}")]
    InvalidTopology(String),

    /// The shard list of a sharded cluster could not be read.
    #[error("failed to enumerate shards: {0}")]
    ShardEnumeration(String),

    /// enableSharding / shardCollection or cluster metadata lookups failed.
    #[error("sharding failed: {0}")]
    Sharding(String),

    /// A chunk split failed.
    #[error("split of {ns} at {key} failed: {reason}")]
    Split {
        ns: String,
        key: String,
        reason: String,
    },

    /// A chunk migration failed.
    #[error("moving chunk {chunk} of {ns} to {to} failed: {reason}")]
    MoveChunk {
        ns: String,
        chunk: String,
        to: String,
        reason: String,
    },

    /// The key domain cannot be partitioned across the requested shards.
    #[error("partition error: {0}")]
    Partition(String),

    /// The transaction or document template is unusable.
    #[error("template error: {0}")]
    Template(String),

    /// Invalid run configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A cluster metadata document is missing an expected field.
    #[error("metadata field error: {0}")]
    Metadata(#[from] bson::document::ValueAccessError),

    /// Population step error.
    #[error("populate error: {0}")]
    Populate(#[from] sim_populate_mongodb::MongoDBPopulatorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
