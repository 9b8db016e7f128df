//! Batched INSERT logic for MongoDB population.

use crate::error::MongoDBPopulatorError;
use bson::Document;
use mongodb::Collection;

/// Default batch size for INSERT operations.
pub const DEFAULT_BATCH_SIZE: usize = 512;

/// Insert a batch of documents into a MongoDB collection.
///
/// The insert is unordered so that one rejected document does not stop the
/// rest of the batch from landing.
pub async fn insert_batch(
    collection: &Collection<Document>,
    documents: Vec<Document>,
) -> Result<u64, MongoDBPopulatorError> {
    if documents.is_empty() {
        return Ok(0);
    }

    let result = collection.insert_many(documents).ordered(false).await?;

    Ok(result.inserted_ids.len() as u64)
}
