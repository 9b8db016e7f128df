//! Cluster topology resolution.
//!
//! The entry connection is probed once at start-up. Sharded clusters expand
//! into one connection descriptor per shard; everything else resolves to the
//! entry connection alone.

use crate::connect::ConnectionDescriptor;
use crate::error::{Result, SimError};
use async_trait::async_trait;
use bson::{doc, Document};
use mongodb::Client;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterType {
    Standalone,
    ReplicaSet,
    Sharded,
}

impl FromStr for ClusterType {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "standalone" => Ok(ClusterType::Standalone),
            "replica" => Ok(ClusterType::ReplicaSet),
            "sharded" => Ok(ClusterType::Sharded),
            other => Err(SimError::InvalidTopology(other.to_string())),
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClusterType::Standalone => "standalone",
            ClusterType::ReplicaSet => "replica",
            ClusterType::Sharded => "sharded",
        };
        f.write_str(name)
    }
}

/// A shard as listed by the cluster metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    pub id: String,
    /// `rs/host:port,...` or `host:port`.
    pub host: String,
}

impl TryFrom<&Document> for ShardInfo {
    type Error = SimError;

    fn try_from(doc: &Document) -> Result<Self> {
        Ok(Self {
            id: doc.get_str("_id")?.to_string(),
            host: doc.get_str("host")?.to_string(),
        })
    }
}

/// Cluster-level questions asked of the entry point.
#[async_trait]
pub trait TopologyProbe: Send + Sync {
    /// `"standalone"`, `"replica"`, `"sharded"`, or empty when unknown.
    async fn cluster_type(&self) -> Result<String>;

    /// Shards of a sharded cluster, in metadata order.
    async fn list_shards(&self) -> Result<Vec<ShardInfo>>;
}

/// Immutable after resolution.
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    pub cluster_type: ClusterType,
    pub primary_connection: ConnectionDescriptor,
    /// One per shard, or the primary connection alone when not sharded.
    pub shard_connections: Vec<ConnectionDescriptor>,
}

impl ClusterTopology {
    pub fn is_sharded(&self) -> bool {
        self.cluster_type == ClusterType::Sharded
    }
}

/// Probe `entry` and build the topology.
pub async fn resolve(
    entry: &ConnectionDescriptor,
    probe: &dyn TopologyProbe,
) -> Result<ClusterTopology> {
    let reported = probe.cluster_type().await?;
    let cluster_type: ClusterType = reported.parse()?;
    info!("Cluster type: {cluster_type}");

    let shard_connections = match cluster_type {
        ClusterType::Sharded => {
            let shards = probe
                .list_shards()
                .await
                .map_err(|e| SimError::ShardEnumeration(e.to_string()))?;
            if shards.is_empty() {
                return Err(SimError::ShardEnumeration(
                    "cluster is sharded but lists no shards".to_string(),
                ));
            }
            shards
                .iter()
                .map(|shard| {
                    let descriptor = entry.for_shard(&shard.host)?;
                    debug!("Shard {} -> {}", shard.id, descriptor.masked());
                    Ok(descriptor)
                })
                .collect::<Result<Vec<_>>>()?
        }
        ClusterType::Standalone | ClusterType::ReplicaSet => vec![entry.clone()],
    };

    Ok(ClusterTopology {
        cluster_type,
        primary_connection: entry.clone(),
        shard_connections,
    })
}

/// Probe backed by a live client.
pub struct MongoTopologyProbe {
    client: Client,
}

impl MongoTopologyProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TopologyProbe for MongoTopologyProbe {
    async fn cluster_type(&self) -> Result<String> {
        let reply = self
            .client
            .database("admin")
            .run_command(doc! { "isMaster": 1 })
            .await?;
        Ok(cluster_type_from_is_master(&reply).to_string())
    }

    async fn list_shards(&self) -> Result<Vec<ShardInfo>> {
        let reply = self
            .client
            .database("admin")
            .run_command(doc! { "listShards": 1 })
            .await?;
        reply
            .get_array("shards")?
            .iter()
            .filter_map(|entry| entry.as_document())
            .map(ShardInfo::try_from)
            .collect()
    }
}

fn cluster_type_from_is_master(reply: &Document) -> &'static str {
    if reply.get_str("msg").is_ok_and(|msg| msg == "isdbgrid") {
        "sharded"
    } else if reply.contains_key("setName") {
        "replica"
    } else {
        "standalone"
    }
}
