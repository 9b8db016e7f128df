//! `ShardAdmin` over a mongos connection.

use super::{ChunkInfo, ShardAdmin};
use crate::error::{Result, SimError};
use crate::topology::ShardInfo;
use async_trait::async_trait;
use bson::{doc, Document};
use futures::TryStreamExt;
use mongodb::{Client, Collection};

pub struct MongoShardAdmin {
    client: Client,
}

impl MongoShardAdmin {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn config_collection(&self, name: &str) -> Collection<Document> {
        self.client.database("config").collection(name)
    }

    async fn admin_command(&self, command: Document) -> Result<Document> {
        Ok(self.client.database("admin").run_command(command).await?)
    }

    async fn chunks_matching(&self, filter: Document) -> Result<Vec<ChunkInfo>> {
        let mut cursor = self
            .config_collection("chunks")
            .find(filter)
            .sort(doc! { "_id": -1 })
            .await?;
        let mut chunks = Vec::new();
        while let Some(chunk) = cursor.try_next().await? {
            chunks.push(ChunkInfo {
                shard: chunk.get_str("shard")?.to_string(),
                min: chunk.get_document("min")?.clone(),
            });
        }
        Ok(chunks)
    }
}

#[async_trait]
impl ShardAdmin for MongoShardAdmin {
    async fn primary_shard(&self, database: &str) -> Result<String> {
        let entry = self
            .config_collection("databases")
            .find_one(doc! { "_id": database })
            .await?
            .ok_or_else(|| {
                SimError::Sharding(format!("database {database} not found in config.databases"))
            })?;
        Ok(entry.get_str("primary")?.to_string())
    }

    async fn enable_sharding(&self, database: &str) -> Result<()> {
        self.admin_command(doc! { "enableSharding": database }).await?;
        Ok(())
    }

    async fn shard_collection(&self, ns: &str, key: &str) -> Result<()> {
        self.admin_command(doc! { "shardCollection": ns, "key": { key: 1 } })
            .await?;
        Ok(())
    }

    async fn list_shards(&self) -> Result<Vec<ShardInfo>> {
        let mut cursor = self.config_collection("shards").find(doc! {}).await?;
        let mut shards = Vec::new();
        while let Some(shard) = cursor.try_next().await? {
            shards.push(ShardInfo::try_from(&shard)?);
        }
        Ok(shards)
    }

    async fn list_chunks(&self, ns: &str) -> Result<Vec<ChunkInfo>> {
        let chunks = self.chunks_matching(doc! { "ns": ns }).await?;
        if !chunks.is_empty() {
            return Ok(chunks);
        }

        // Newer servers key chunks by collection UUID instead of namespace.
        let Some(collection) = self
            .config_collection("collections")
            .find_one(doc! { "_id": ns })
            .await?
        else {
            return Ok(chunks);
        };
        match collection.get("uuid") {
            Some(uuid) => self.chunks_matching(doc! { "uuid": uuid.clone() }).await,
            None => Ok(chunks),
        }
    }

    async fn split_at(&self, ns: &str, key: &str, value: &str) -> Result<()> {
        self.admin_command(doc! { "split": ns, "middle": { key: value } })
            .await?;
        Ok(())
    }

    async fn move_chunk(&self, ns: &str, min: &Document, to: &str) -> Result<()> {
        self.admin_command(doc! { "moveChunk": ns, "find": min.clone(), "to": to })
            .await?;
        Ok(())
    }
}
