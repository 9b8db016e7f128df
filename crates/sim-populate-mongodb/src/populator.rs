//! MongoDB populator for load runs.

use crate::error::MongoDBPopulatorError;
use crate::insert::{insert_batch, DEFAULT_BATCH_SIZE};
use bson::Document;
use mongodb::{Collection, Database};
use sim_generator::DocumentGenerator;
use std::time::{Duration, Instant};
use tracing::debug;

/// Metrics from a populate operation.
#[derive(Debug, Clone, Default)]
pub struct PopulateMetrics {
    /// Number of documents inserted.
    pub rows_inserted: u64,
    /// Time to generate and insert the batch.
    pub total_duration: Duration,
}

impl PopulateMetrics {
    /// Calculate rows per second.
    pub fn rows_per_second(&self) -> f64 {
        if self.total_duration.as_secs_f64() > 0.0 {
            self.rows_inserted as f64 / self.total_duration.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// MongoDB populator that generates and inserts synthetic documents into one
/// collection.
pub struct MongoDBPopulator {
    collection: Collection<Document>,
    generator: DocumentGenerator,
    batch_size: usize,
}

impl MongoDBPopulator {
    /// Create a populator for `collection_name` in an existing database handle.
    pub fn with_database(
        database: &Database,
        collection_name: &str,
        generator: DocumentGenerator,
    ) -> Self {
        Self {
            collection: database.collection(collection_name),
            generator,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Create a populator whose documents follow `template` when one is
    /// given, or the generator's built-in example shape otherwise.
    pub fn with_template(
        database: &Database,
        collection_name: &str,
        template: Option<Document>,
        seed: u64,
    ) -> Result<Self, MongoDBPopulatorError> {
        let generator = match template {
            Some(template) => DocumentGenerator::with_template(template, seed)?,
            None => DocumentGenerator::new(seed),
        };
        Ok(Self::with_database(database, collection_name, generator))
    }

    /// Set the batch size for INSERT operations.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Mutable access to the generator, e.g. to randomize filters with the
    /// same seeded sequence.
    pub fn generator_mut(&mut self) -> &mut DocumentGenerator {
        &mut self.generator
    }

    /// The collection being populated.
    pub fn collection(&self) -> &Collection<Document> {
        &self.collection
    }

    /// Generate and insert a single batch of `batch_size` documents.
    pub async fn insert_next_batch(&mut self) -> Result<PopulateMetrics, MongoDBPopulatorError> {
        let start_time = Instant::now();

        let documents: Vec<Document> = self.generator.documents(self.batch_size as u64).collect();
        let inserted = insert_batch(&self.collection, documents).await?;

        debug!(
            "Batch into '{}' complete: {} documents inserted (next index {})",
            self.collection.name(),
            inserted,
            self.generator.current_index()
        );

        Ok(PopulateMetrics {
            rows_inserted: inserted,
            total_duration: start_time.elapsed(),
        })
    }
}
