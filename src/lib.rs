//! keyhole-sim Library
//!
//! A phased load generator and shard pre-balancer for MongoDB clusters.
//!
//! # Features
//!
//! - Topology resolution: standalone, replica set or sharded, with one
//!   connection per shard
//! - Shard pre-balancing: split the A-Z `email` key space across shards and
//!   migrate one chunk to each
//! - Phased load: population, steady, burst and cool-down phases per worker
//! - Per-node statistics collection while the load runs
//! - Exactly-once shutdown on timer, signal or peek deadline, with a gzipped
//!   metrics snapshot
//!
//! # CLI Usage
//!
//! ```bash
//! # Five minute run with 10 connections at 20 tps each
//! keyhole-sim run mongodb://localhost:27017/_KEYHOLE_88800 --conn 10 --tps 20 --duration 5
//!
//! # Replay a transaction template without loading data first
//! keyhole-sim run mongodb://localhost:27017/shop --simonly --tx transactions.yaml -y
//!
//! # Preview the split points for 3 non-primary shards
//! keyhole-sim plan --shards 3
//! ```

pub mod backend;
pub mod config;
pub mod connect;
pub mod error;
pub mod metrics;
pub mod partition;
pub mod phase;
pub mod runner;
pub mod stats;
pub mod template;
pub mod termination;
pub mod topology;
pub mod worker;

pub use config::{RunArgs, RunConfig};
pub use error::{Result, SimError};
pub use runner::{Runner, StartOutcome};
