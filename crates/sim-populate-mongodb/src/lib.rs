//! MongoDB population step for keyhole-sim.
//!
//! Bulk-generates synthetic documents with [`sim_generator::DocumentGenerator`]
//! and inserts them in batches into a single collection.

pub mod error;
pub mod insert;
pub mod populator;

pub use error::MongoDBPopulatorError;
pub use insert::DEFAULT_BATCH_SIZE;
pub use populator::{MongoDBPopulator, PopulateMetrics};
