//! In-memory stand-ins for the cluster.

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use keyhole_sim::backend::{SimulationBackend, WorkerSession};
use keyhole_sim::connect::ConnectionDescriptor;
use keyhole_sim::partition::{ChunkInfo, ShardAdmin};
use keyhole_sim::template::TransactionSpec;
use keyhole_sim::topology::{ClusterTopology, ClusterType, ShardInfo};
use keyhole_sim::{Result, SimError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const OP_LATENCY: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    DropCollection(String, String),
    DropDatabase(String),
    CreateIndexes(Vec<Document>),
    OpenSession(usize),
    DumpStatus(String),
}

/// Records every call; sessions record `(worker, offset)` per executed
/// operation, measured from the backend's creation.
pub struct FakeBackend {
    created: Instant,
    pub calls: Mutex<Vec<BackendCall>>,
    pub executions: Arc<Mutex<Vec<(usize, Duration)>>>,
    pub fail_drops: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            created: Instant::now(),
            calls: Mutex::new(Vec::new()),
            executions: Arc::new(Mutex::new(Vec::new())),
            fail_drops: false,
        }
    }

    pub fn failing_drops() -> Self {
        Self {
            fail_drops: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sessions(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, BackendCall::OpenSession(_)))
            .count()
    }

    pub fn executions(&self) -> Vec<(usize, Duration)> {
        self.executions.lock().unwrap().clone()
    }

    fn push(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }
}

struct FakeSession {
    worker: usize,
    created: Instant,
    executions: Arc<Mutex<Vec<(usize, Duration)>>>,
}

#[async_trait]
impl WorkerSession for FakeSession {
    async fn populate_batch(&mut self) -> Result<u64> {
        tokio::time::sleep(OP_LATENCY).await;
        Ok(512)
    }

    async fn execute(&mut self, _transaction: &TransactionSpec) -> Result<()> {
        tokio::time::sleep(OP_LATENCY).await;
        self.executions
            .lock()
            .unwrap()
            .push((self.worker, self.created.elapsed()));
        Ok(())
    }
}

#[async_trait]
impl SimulationBackend for FakeBackend {
    async fn drop_collection(&self, database: &str, collection: &str) -> Result<()> {
        self.push(BackendCall::DropCollection(
            database.to_string(),
            collection.to_string(),
        ));
        if self.fail_drops {
            return Err(SimError::Config(format!("cannot drop {collection}")));
        }
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> Result<()> {
        self.push(BackendCall::DropDatabase(database.to_string()));
        if self.fail_drops {
            return Err(SimError::Config(format!("cannot drop {database}")));
        }
        Ok(())
    }

    async fn create_indexes(&self, _: &str, _: &str, keys: &[Document]) -> Result<()> {
        self.push(BackendCall::CreateIndexes(keys.to_vec()));
        Ok(())
    }

    async fn open_session(&self, worker: usize) -> Result<Box<dyn WorkerSession>> {
        self.push(BackendCall::OpenSession(worker));
        Ok(Box::new(FakeSession {
            worker,
            created: self.created,
            executions: Arc::clone(&self.executions),
        }))
    }

    async fn dump_server_status(
        &self,
        connection: &ConnectionDescriptor,
        dir: &Path,
        timestamp: &str,
    ) -> Result<PathBuf> {
        self.push(BackendCall::DumpStatus(connection.uri.clone()));
        let index = self
            .calls()
            .iter()
            .filter(|call| matches!(call, BackendCall::DumpStatus(_)))
            .count();
        let path = dir.join(format!("keyhole_stats.{timestamp}-node{index}.json.gz"));
        std::fs::write(&path, b"{}")?;
        Ok(path)
    }
}

pub fn standalone_topology(uri: &str) -> ClusterTopology {
    let connection = ConnectionDescriptor::new(uri);
    ClusterTopology {
        cluster_type: ClusterType::Standalone,
        primary_connection: connection.clone(),
        shard_connections: vec![connection],
    }
}

pub fn sharded_topology(uri: &str, shards: usize) -> ClusterTopology {
    let connection = ConnectionDescriptor::new(uri);
    let shard_connections = (0..shards)
        .map(|i| connection.with_uri(format!("mongodb://shard{i}.example.net:27018/?replicaSet=shard{i}")))
        .collect();
    ClusterTopology {
        cluster_type: ClusterType::Sharded,
        primary_connection: connection,
        shard_connections,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCall {
    EnableSharding(String),
    ShardCollection(String, String),
    Split(String),
    Move(String, String),
}

/// A chunk map for one collection. A chunk is identified by its lower bound;
/// `None` stands for MinKey.
struct ChunkMap {
    chunks: Vec<(Option<String>, String)>,
    calls: Vec<AdminCall>,
}

pub struct FakeShardAdmin {
    primary: String,
    shards: Vec<ShardInfo>,
    shard_key: String,
    state: Mutex<ChunkMap>,
    pub fail_split_at: Option<String>,
    pub fail_moves: bool,
    pub fail_shard_collection: bool,
}

impl FakeShardAdmin {
    /// `primary` plus `others` non-primary shards, all data on the primary.
    pub fn new(primary: &str, others: usize) -> Self {
        let mut shards = vec![ShardInfo {
            id: primary.to_string(),
            host: format!("{primary}/{primary}.example.net:27018"),
        }];
        for i in 1..=others {
            let id = format!("shard{i:02}");
            shards.push(ShardInfo {
                host: format!("{id}/{id}.example.net:27018"),
                id,
            });
        }
        Self {
            primary: primary.to_string(),
            shards,
            shard_key: "email".to_string(),
            state: Mutex::new(ChunkMap {
                chunks: vec![(None, primary.to_string())],
                calls: Vec::new(),
            }),
            fail_split_at: None,
            fail_moves: false,
            fail_shard_collection: false,
        }
    }

    pub fn calls(&self) -> Vec<AdminCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn splits(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                AdminCall::Split(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    /// `(lower bound, shard)` ascending, with `"MinKey"` for the first chunk.
    pub fn chunk_map(&self) -> Vec<(String, String)> {
        let state = self.state.lock().unwrap();
        let mut chunks: Vec<_> = state
            .chunks
            .iter()
            .map(|(min, shard)| (min.clone().unwrap_or_else(|| "MinKey".to_string()), shard.clone()))
            .collect();
        chunks.sort_by(|a, b| match (a.0.as_str(), b.0.as_str()) {
            ("MinKey", _) => std::cmp::Ordering::Less,
            (_, "MinKey") => std::cmp::Ordering::Greater,
            (a, b) => a.cmp(b),
        });
        chunks
    }

    fn min_document(&self, min: &Option<String>) -> Document {
        match min {
            Some(key) => doc! { self.shard_key.as_str(): key.as_str() },
            None => doc! { self.shard_key.as_str(): Bson::MinKey },
        }
    }
}

#[async_trait]
impl ShardAdmin for FakeShardAdmin {
    async fn primary_shard(&self, _database: &str) -> Result<String> {
        Ok(self.primary.clone())
    }

    async fn enable_sharding(&self, database: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(AdminCall::EnableSharding(database.to_string()));
        Ok(())
    }

    async fn shard_collection(&self, ns: &str, key: &str) -> Result<()> {
        if self.fail_shard_collection {
            return Err(SimError::Config("not authorized".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(AdminCall::ShardCollection(ns.to_string(), key.to_string()));
        Ok(())
    }

    async fn list_shards(&self) -> Result<Vec<ShardInfo>> {
        Ok(self.shards.clone())
    }

    async fn list_chunks(&self, _ns: &str) -> Result<Vec<ChunkInfo>> {
        // Descending by bound, MinKey last.
        let chunks = self
            .chunk_map()
            .into_iter()
            .rev()
            .map(|(min, shard)| {
                let min = (min != "MinKey").then_some(min);
                ChunkInfo {
                    shard,
                    min: self.min_document(&min),
                }
            })
            .collect();
        Ok(chunks)
    }

    async fn split_at(&self, _ns: &str, _key: &str, value: &str) -> Result<()> {
        if self.fail_split_at.as_deref() == Some(value) {
            return Err(SimError::Config("split failed".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        if state.chunks.iter().any(|(min, _)| min.as_deref() == Some(value)) {
            return Err(SimError::Config(format!("{value} is already a chunk bound")));
        }
        // The new chunk stays on the shard of the chunk it was cut from.
        let owner = state
            .chunks
            .iter()
            .filter(|(min, _)| min.as_deref().map_or(true, |min| min < value))
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, shard)| shard.clone())
            .unwrap_or_else(|| self.primary.clone());
        state.chunks.push((Some(value.to_string()), owner));
        state.calls.push(AdminCall::Split(value.to_string()));
        Ok(())
    }

    async fn move_chunk(&self, _ns: &str, min: &Document, to: &str) -> Result<()> {
        if self.fail_moves {
            return Err(SimError::Config("migration aborted".to_string()));
        }
        let bound = min.get_str(&self.shard_key).ok().map(str::to_string);
        let mut state = self.state.lock().unwrap();
        let Some(chunk) = state.chunks.iter_mut().find(|(min, _)| *min == bound) else {
            return Err(SimError::Config("no such chunk".to_string()));
        };
        chunk.1 = to.to_string();
        let label = bound.unwrap_or_else(|| "MinKey".to_string());
        state.calls.push(AdminCall::Move(label, to.to_string()));
        Ok(())
    }
}
