//! Per-node statistics collection.
//!
//! One collector runs per shard connection. It publishes human-readable
//! progress lines on a shared channel (drained and logged by the termination
//! coordinator) and keeps polling `serverStatus` until the process exits.

use crate::connect::{connect, ConnectionDescriptor};
use crate::error::Result;
use crate::metrics::{now_millis, write_gzipped, MetricsStore};
use bson::{doc, Bson, Document};
use mongodb::Client;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Category for opcounter rates computed by the first collector.
pub const SERVER_STATUS_CATEGORY: &str = "server_status";

const OPCOUNTERS: [&str; 6] = ["insert", "query", "update", "delete", "getmore", "command"];

#[derive(Clone)]
pub struct ServerStatsCollector {
    client: Client,
    host: String,
    progress: UnboundedSender<String>,
    interval: Duration,
}

impl ServerStatsCollector {
    /// Open a dedicated client for `connection`.
    pub async fn connect(
        connection: &ConnectionDescriptor,
        progress: UnboundedSender<String>,
        interval: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: connect(connection).await?,
            host: host_label(connection),
            progress,
            interval,
        })
    }

    /// Spawn the one-off reports and the polling loop. Opcounter rates are
    /// recorded into `metrics` when given.
    pub fn start(self, database: String, metrics: Option<MetricsStore>) {
        let reports = self.clone();
        tokio::spawn(async move {
            reports.report(reports.db_stats(&database).await, "dbStats");
            reports.report(reports.replica_set_status().await, "replSetGetStatus");
            reports.report(reports.command_line().await, "getCmdLineOpts");
        });
        tokio::spawn(async move { self.poll_server_status(metrics).await });
    }

    fn publish(&self, message: String) {
        // The receiver is gone only once shutdown has begun.
        let _ = self.progress.send(format!("[{}] {message}", self.host));
    }

    fn report(&self, outcome: Result<String>, what: &str) {
        match outcome {
            Ok(line) => self.publish(line),
            Err(e) => debug!("[{}] {what} unavailable: {e}", self.host),
        }
    }

    async fn db_stats(&self, database: &str) -> Result<String> {
        let stats = self
            .client
            .database(database)
            .run_command(doc! { "dbStats": 1 })
            .await?;
        Ok(format!(
            "dbStats {database}: collections={}, objects={}, dataSize={}, indexes={}",
            number(&stats, "collections").unwrap_or(0.0),
            number(&stats, "objects").unwrap_or(0.0),
            number(&stats, "dataSize").unwrap_or(0.0),
            number(&stats, "indexes").unwrap_or(0.0),
        ))
    }

    async fn replica_set_status(&self) -> Result<String> {
        let status = self
            .client
            .database("admin")
            .run_command(doc! { "replSetGetStatus": 1 })
            .await?;
        let members: Vec<String> = status
            .get_array("members")?
            .iter()
            .filter_map(Bson::as_document)
            .map(|m| {
                format!(
                    "{} {}",
                    m.get_str("name").unwrap_or("?"),
                    m.get_str("stateStr").unwrap_or("?")
                )
            })
            .collect();
        Ok(format!(
            "replica set {}: {}",
            status.get_str("set").unwrap_or("?"),
            members.join(", ")
        ))
    }

    async fn command_line(&self) -> Result<String> {
        let opts = self
            .client
            .database("admin")
            .run_command(doc! { "getCmdLineOpts": 1 })
            .await?;
        let parsed = opts.get_document("parsed").cloned().unwrap_or_default();
        Ok(format!("config options: {parsed}"))
    }

    async fn poll_server_status(self, metrics: Option<MetricsStore>) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut previous: Option<Document> = None;
        loop {
            ticker.tick().await;
            let status = match self.server_status().await {
                Ok(status) => status,
                Err(e) => {
                    warn!("[{}] serverStatus failed: {e}", self.host);
                    continue;
                }
            };
            if let Some(line) = summarize(&status) {
                self.publish(line);
            }
            if let (Some(metrics), Some(prev)) = (&metrics, &previous) {
                if let Some(rates) = opcounter_rates(prev, &status) {
                    metrics.record(SERVER_STATUS_CATEGORY, rates).await;
                }
            }
            previous = Some(status);
        }
    }

    async fn server_status(&self) -> Result<Document> {
        Ok(self
            .client
            .database("admin")
            .run_command(doc! { "serverStatus": 1 })
            .await?)
    }
}

/// File-name friendly label for the first host of a connection.
pub fn host_label(connection: &ConnectionDescriptor) -> String {
    let after_scheme = connection
        .uri
        .split_once("://")
        .map_or(connection.uri.as_str(), |(_, rest)| rest);
    let authority = after_scheme
        .split(|c: char| c == '/' || c == '?')
        .next()
        .unwrap_or_default();
    let hosts = authority
        .rsplit_once('@')
        .map_or(authority, |(_, hosts)| hosts);
    let first = hosts.split(',').next().unwrap_or_default();
    first.replace(':', "-")
}

/// Final `serverStatus` of one node, gzipped as
/// `keyhole_stats.<timestamp>-<host>.json.gz`.
pub async fn print_server_status(
    connection: &ConnectionDescriptor,
    dir: &Path,
    timestamp: &str,
) -> Result<PathBuf> {
    let client = connect(connection).await?;
    let status = client
        .database("admin")
        .run_command(doc! { "serverStatus": 1 })
        .await?;
    let buf = serde_json::to_vec(&Bson::Document(status).into_relaxed_extjson())?;
    let path = dir.join(format!(
        "keyhole_stats.{timestamp}-{}.json.gz",
        host_label(connection)
    ));
    write_gzipped(&path, &buf)?;
    Ok(path)
}

fn number(doc: &Document, key: &str) -> Option<f64> {
    match doc.get(key)? {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

fn local_time_millis(status: &Document) -> Option<i64> {
    status
        .get_datetime("localTime")
        .ok()
        .map(|t| t.timestamp_millis())
}

fn summarize(status: &Document) -> Option<String> {
    let connections = status.get_document("connections").ok()?;
    let opcounters = status.get_document("opcounters").ok()?;
    let counters: Vec<String> = OPCOUNTERS
        .iter()
        .map(|op| format!("{op}={}", number(opcounters, op).unwrap_or(0.0)))
        .collect();
    Some(format!(
        "serverStatus: connections={}, {}",
        number(connections, "current").unwrap_or(0.0),
        counters.join(", ")
    ))
}

/// Per-second opcounter rates between two `serverStatus` samples, or `None`
/// when the samples are unusable (missing fields, no time elapsed).
pub fn opcounter_rates(previous: &Document, current: &Document) -> Option<Value> {
    let elapsed_ms = local_time_millis(current)? - local_time_millis(previous)?;
    if elapsed_ms <= 0 {
        return None;
    }
    let seconds = elapsed_ms as f64 / 1000.0;
    let before = previous.get_document("opcounters").ok()?;
    let after = current.get_document("opcounters").ok()?;

    let mut rates = serde_json::Map::new();
    for op in OPCOUNTERS {
        let delta = number(after, op)? - number(before, op)?;
        rates.insert(op.to_string(), json!(delta / seconds));
    }
    Some(json!({ "ts": now_millis(), "seconds": seconds, "rates": rates }))
}
