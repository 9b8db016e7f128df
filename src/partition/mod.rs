//! Shard key-space partitioning and chunk migration.
//!
//! The alphabetic key domain A..Z is cut into `m + 1` buckets for `m`
//! non-primary shards. After splitting at the bucket boundaries, chunks are
//! walked in descending `_id` order and handed out to the non-primary shards
//! in enumeration order, one chunk each.

pub mod mongo;

use crate::error::{Result, SimError};
use crate::topology::ShardInfo;
use async_trait::async_trait;
use bson::Document;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

/// The ordered key domain used for the `email` shard key.
pub const KEY_DOMAIN: [&str; 26] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R", "S",
    "T", "U", "V", "W", "X", "Y", "Z",
];

/// One end of a key range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyBound {
    Min,
    Key(String),
    Max,
}

impl fmt::Display for KeyBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyBound::Min => f.write_str("MinKey"),
            KeyBound::Key(key) => f.write_str(key),
            KeyBound::Max => f.write_str("MaxKey"),
        }
    }
}

/// Intended placement of one key range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRangeAssignment {
    pub shard_id: String,
    /// Inclusive.
    pub range_start: KeyBound,
    /// Exclusive.
    pub range_end: KeyBound,
}

/// Split points plus the range each shard should end up owning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    pub split_keys: Vec<String>,
    /// Ascending by range; the primary keeps the lowest range.
    pub assignments: Vec<ShardRangeAssignment>,
}

impl PartitionPlan {
    /// Plan for `shard_ids` (primary excluded, in enumeration order) over
    /// `domain`.
    ///
    /// Chunks are handed out from the top of the key space, so the first
    /// enumerated shard receives the highest range.
    pub fn new(primary: &str, shard_ids: &[String], domain: &[&str]) -> Result<Self> {
        let boundaries = split_boundaries(domain.len(), shard_ids.len())?;
        let split_keys: Vec<String> = boundaries.iter().map(|&b| domain[b].to_string()).collect();

        let mut assignments = Vec::with_capacity(shard_ids.len() + 1);
        assignments.push(ShardRangeAssignment {
            shard_id: primary.to_string(),
            range_start: KeyBound::Min,
            range_end: split_keys
                .first()
                .map_or(KeyBound::Max, |key| KeyBound::Key(key.clone())),
        });
        for (j, key) in split_keys.iter().enumerate() {
            let shard_id = &shard_ids[shard_ids.len() - 1 - j];
            assignments.push(ShardRangeAssignment {
                shard_id: shard_id.clone(),
                range_start: KeyBound::Key(key.clone()),
                range_end: split_keys
                    .get(j + 1)
                    .map_or(KeyBound::Max, |next| KeyBound::Key(next.clone())),
            });
        }

        Ok(Self {
            split_keys,
            assignments,
        })
    }
}

/// `1 + floor(domain_len / (shard_count + 1))`.
pub fn divider(domain_len: usize, shard_count: usize) -> usize {
    1 + domain_len / (shard_count + 1)
}

/// Domain indices to split at, one per non-primary shard, strictly
/// increasing.
///
/// Fails when a boundary would fall outside `[1, domain_len - 1]`, i.e. the
/// domain is too small for that many shards.
pub fn split_boundaries(domain_len: usize, shard_count: usize) -> Result<Vec<usize>> {
    let divider = divider(domain_len, shard_count);
    (0..shard_count)
        .map(|i| {
            let boundary = (i + 1) * divider;
            if boundary < domain_len {
                Ok(boundary)
            } else {
                Err(SimError::Partition(format!(
                    "cannot split a key domain of {domain_len} values across {shard_count} shards \
                     (boundary {boundary} out of range)"
                )))
            }
        })
        .collect()
}

/// A chunk as listed by the cluster metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkInfo {
    pub shard: String,
    pub min: Document,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMove {
    pub min: Document,
    pub from: String,
    pub to: String,
}

/// Walk `chunks` (already in descending `_id` order) and fill `shards` one
/// chunk each, in order. A chunk already on the shard being filled counts
/// without a move.
pub fn plan_chunk_moves(chunks: &[ChunkInfo], shards: &[ShardInfo]) -> Vec<ChunkMove> {
    let mut moves = Vec::new();
    let mut fill = shards.iter();
    let mut target = fill.next();
    for chunk in chunks {
        let Some(shard) = target else { break };
        if chunk.shard != shard.id {
            moves.push(ChunkMove {
                min: chunk.min.clone(),
                from: chunk.shard.clone(),
                to: shard.id.clone(),
            });
        }
        target = fill.next();
    }
    moves
}

/// Cluster administration used by partitioning.
#[async_trait]
pub trait ShardAdmin: Send + Sync {
    /// Shard holding the unsharded data of `database`.
    async fn primary_shard(&self, database: &str) -> Result<String>;
    async fn enable_sharding(&self, database: &str) -> Result<()>;
    async fn shard_collection(&self, ns: &str, key: &str) -> Result<()>;
    async fn list_shards(&self) -> Result<Vec<ShardInfo>>;
    /// Chunks of `ns`, descending by `_id`.
    async fn list_chunks(&self, ns: &str) -> Result<Vec<ChunkInfo>>;
    async fn split_at(&self, ns: &str, key: &str, value: &str) -> Result<()>;
    async fn move_chunk(&self, ns: &str, min: &Document, to: &str) -> Result<()>;
}

/// What a partitioning pass did.
#[derive(Debug, Clone, Default)]
pub struct PartitionReport {
    pub primary: String,
    pub plan: Option<PartitionPlan>,
    pub splits: Vec<String>,
    /// Boundaries that already existed as a chunk bound.
    pub skipped_splits: Vec<String>,
    pub moves: Vec<ChunkMove>,
}

/// Shards `database.collection` on `shard_key` and pre-balances it across
/// every non-primary shard. Any failure aborts the pass.
pub async fn partition_collection(
    admin: &dyn ShardAdmin,
    database: &str,
    collection: &str,
    shard_key: &str,
    settle: Duration,
) -> Result<PartitionReport> {
    let ns = format!("{database}.{collection}");
    let primary = admin
        .primary_shard(database)
        .await
        .map_err(|e| SimError::Sharding(format!("primary shard of {database}: {e}")))?;

    info!("Sharding collection: {ns}");
    admin
        .enable_sharding(database)
        .await
        .map_err(|e| SimError::Sharding(format!("enableSharding {database}: {e}")))?;
    admin
        .shard_collection(&ns, shard_key)
        .await
        .map_err(|e| SimError::Sharding(format!("shardCollection {ns}: {e}")))?;

    let shards: Vec<ShardInfo> = admin
        .list_shards()
        .await
        .map_err(|e| SimError::Sharding(format!("listing shards: {e}")))?
        .into_iter()
        .filter(|shard| shard.id != primary)
        .collect();

    let mut report = PartitionReport {
        primary: primary.clone(),
        ..Default::default()
    };
    if shards.is_empty() {
        warn!("No shards besides primary {primary}, nothing to split");
        return Ok(report);
    }

    let shard_ids: Vec<String> = shards.iter().map(|s| s.id.clone()).collect();
    let plan = PartitionPlan::new(&primary, &shard_ids, &KEY_DOMAIN)?;

    info!("splitting chunks...");
    let existing = admin
        .list_chunks(&ns)
        .await
        .map_err(|e| SimError::Sharding(format!("listing chunks of {ns}: {e}")))?;
    for key in &plan.split_keys {
        let already_split = existing
            .iter()
            .any(|chunk| chunk.min.get_str(shard_key).is_ok_and(|min| min == key));
        if already_split {
            info!("{ns} is already split at {shard_key}: {key}");
            report.skipped_splits.push(key.clone());
            continue;
        }
        admin
            .split_at(&ns, shard_key, key)
            .await
            .map_err(|e| SimError::Split {
                ns: ns.clone(),
                key: key.clone(),
                reason: e.to_string(),
            })?;
        report.splits.push(key.clone());
    }

    info!("moving chunks...");
    let chunks = admin
        .list_chunks(&ns)
        .await
        .map_err(|e| SimError::Sharding(format!("listing chunks of {ns}: {e}")))?;
    let moves = plan_chunk_moves(&chunks, &shards);
    for chunk_move in &moves {
        info!(
            "moving {} from {} to {}",
            chunk_move.min, chunk_move.from, chunk_move.to
        );
        admin
            .move_chunk(&ns, &chunk_move.min, &chunk_move.to)
            .await
            .map_err(|e| SimError::MoveChunk {
                ns: ns.clone(),
                chunk: chunk_move.min.to_string(),
                to: chunk_move.to.clone(),
                reason: e.to_string(),
            })?;
    }

    report.plan = Some(plan);
    report.moves = moves;
    tokio::time::sleep(settle).await;
    Ok(report)
}
