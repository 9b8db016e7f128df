//! Error types for the MongoDB populator.

use thiserror::Error;

/// Errors that can occur during MongoDB population.
#[derive(Error, Debug)]
pub enum MongoDBPopulatorError {
    /// MongoDB connection or query error.
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    /// Generator error.
    #[error("Generator error: {0}")]
    Generator(#[from] sim_generator::GeneratorError),
}
