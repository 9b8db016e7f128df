//! Database operations the orchestrator and its workers depend on.

use crate::connect::{connect, ConnectionDescriptor};
use crate::error::Result;
use crate::stats::print_server_status;
use crate::template::{OperationKind, TransactionSpec};
use async_trait::async_trait;
use bson::Document;
use futures::TryStreamExt;
use mongodb::{Client, Collection, IndexModel};
use sim_generator::DocumentGenerator;
use sim_populate_mongodb::{MongoDBPopulator, DEFAULT_BATCH_SIZE};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Rows returned per `find` during simulation.
const FIND_LIMIT: i64 = 20;

/// Run-level operations against the target cluster.
#[async_trait]
pub trait SimulationBackend: Send + Sync {
    async fn drop_collection(&self, database: &str, collection: &str) -> Result<()>;

    async fn drop_database(&self, database: &str) -> Result<()>;

    /// Create one index per key document, in order.
    async fn create_indexes(
        &self,
        database: &str,
        collection: &str,
        keys: &[Document],
    ) -> Result<()>;

    /// A session for one worker, with a connection of its own.
    async fn open_session(&self, worker: usize) -> Result<Box<dyn WorkerSession>>;

    /// Write the final `serverStatus` of one node into `dir`.
    async fn dump_server_status(
        &self,
        connection: &ConnectionDescriptor,
        dir: &Path,
        timestamp: &str,
    ) -> Result<PathBuf>;
}

/// What one worker does against the database.
#[async_trait]
pub trait WorkerSession: Send {
    /// Insert one batch of synthetic documents, returning how many.
    async fn populate_batch(&mut self) -> Result<u64>;

    async fn execute(&mut self, transaction: &TransactionSpec) -> Result<()>;
}

/// Backend over a live MongoDB deployment.
pub struct MongoBackend {
    client: Client,
    connection: ConnectionDescriptor,
    database: String,
    collection: String,
    document_template: Option<Document>,
    seed: u64,
    batch_size: usize,
}

impl MongoBackend {
    pub fn new(
        client: Client,
        connection: ConnectionDescriptor,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            client,
            connection,
            database: database.into(),
            collection: collection.into(),
            document_template: None,
            seed: 42,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_document_template(mut self, template: Option<Document>) -> Self {
        self.document_template = template;
        self
    }

    /// Worker `i` generates with `seed + i`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[async_trait]
impl SimulationBackend for MongoBackend {
    async fn drop_collection(&self, database: &str, collection: &str) -> Result<()> {
        self.client
            .database(database)
            .collection::<Document>(collection)
            .drop()
            .await?;
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> Result<()> {
        self.client.database(database).drop().await?;
        Ok(())
    }

    async fn create_indexes(
        &self,
        database: &str,
        collection: &str,
        keys: &[Document],
    ) -> Result<()> {
        let collection = self
            .client
            .database(database)
            .collection::<Document>(collection);
        for key in keys {
            let index = IndexModel::builder().keys(key.clone()).build();
            let created = collection.create_index(index).await?;
            info!("Created index {} on {}", created.index_name, collection.namespace());
        }
        Ok(())
    }

    async fn open_session(&self, worker: usize) -> Result<Box<dyn WorkerSession>> {
        let client = connect(&self.connection).await?;
        let database = client.database(&self.database);
        let populator = MongoDBPopulator::with_template(
            &database,
            &self.collection,
            self.document_template.clone(),
            self.seed.wrapping_add(worker as u64),
        )?
        .with_batch_size(self.batch_size);
        debug!("Worker {worker} session opened on {}", self.connection.masked());
        Ok(Box::new(MongoSession { populator }))
    }

    async fn dump_server_status(
        &self,
        connection: &ConnectionDescriptor,
        dir: &Path,
        timestamp: &str,
    ) -> Result<PathBuf> {
        print_server_status(connection, dir, timestamp).await
    }
}

/// One worker's connection plus its seeded document generator.
struct MongoSession {
    populator: MongoDBPopulator,
}

impl MongoSession {
    fn collection(&self) -> &Collection<Document> {
        self.populator.collection()
    }
}

/// The documents one transaction sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
    Insert(Document),
    Find(Document),
    Update { filter: Document, update: Document },
    Delete(Document),
    Aggregate(Vec<Document>),
    Count(Document),
}

/// Build the request for `transaction`.
///
/// Filters and update documents are randomized by `generator`. Pipeline
/// stages are sent as written, except `$match` stages whose literal operands
/// are randomized like a filter.
pub fn prepare(transaction: &TransactionSpec, generator: &mut DocumentGenerator) -> Prepared {
    let filter = transaction.filter.as_ref();
    match transaction.kind {
        OperationKind::Insert => Prepared::Insert(generator.next_document()),
        OperationKind::Find => Prepared::Find(randomized(filter, generator)),
        OperationKind::Update => Prepared::Update {
            filter: randomized(filter, generator),
            update: randomized(transaction.op.as_ref(), generator),
        },
        OperationKind::Delete => Prepared::Delete(randomized(filter, generator)),
        OperationKind::Aggregate => Prepared::Aggregate(
            transaction
                .pipeline
                .iter()
                .flatten()
                .map(|stage| {
                    if stage.contains_key("$match") {
                        generator.randomize(stage)
                    } else {
                        stage.clone()
                    }
                })
                .collect(),
        ),
        OperationKind::Count => Prepared::Count(randomized(filter, generator)),
    }
}

fn randomized(template: Option<&Document>, generator: &mut DocumentGenerator) -> Document {
    template.map_or_else(Document::new, |template| generator.randomize(template))
}

#[async_trait]
impl WorkerSession for MongoSession {
    async fn populate_batch(&mut self) -> Result<u64> {
        let metrics = self.populator.insert_next_batch().await?;
        debug!(
            "Inserted {} documents at {:.0} docs/s",
            metrics.rows_inserted,
            metrics.rows_per_second()
        );
        Ok(metrics.rows_inserted)
    }

    async fn execute(&mut self, transaction: &TransactionSpec) -> Result<()> {
        match prepare(transaction, self.populator.generator_mut()) {
            Prepared::Insert(document) => {
                self.collection().insert_one(document).await?;
            }
            Prepared::Find(filter) => {
                let cursor = self.collection().find(filter).limit(FIND_LIMIT).await?;
                let _: Vec<Document> = cursor.try_collect().await?;
            }
            Prepared::Update { filter, update } => {
                self.collection().update_one(filter, update).await?;
            }
            Prepared::Delete(filter) => {
                self.collection().delete_one(filter).await?;
            }
            Prepared::Aggregate(pipeline) => {
                let cursor = self.collection().aggregate(pipeline).await?;
                let _: Vec<Document> = cursor.try_collect().await?;
            }
            Prepared::Count(filter) => {
                self.collection().count_documents(filter).await?;
            }
        }
        Ok(())
    }
}
