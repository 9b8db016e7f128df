//! The simulation orchestrator.
//!
//! ```text
//! Runner::connect ── resolve topology ──► shard connections
//!       │                                   │            │
//!   start():                          stats collectors   │
//!     confirm → cleanup? → indexes          │            │
//!     → partition (sharded) → workers       ▼            ▼
//!                                     MetricsStore ◄── TerminationCoordinator
//! ```

use crate::backend::{MongoBackend, SimulationBackend};
use crate::config::{RunConfig, EXAMPLES_COLLECTION, KEYHOLE_DB};
use crate::connect::connect;
use crate::error::Result;
use crate::metrics::{file_timestamp, MetricsStore};
use crate::partition::mongo::MongoShardAdmin;
use crate::partition::{partition_collection, PartitionReport, ShardAdmin};
use crate::phase::{from_minutes, PhasePlan};
use crate::stats::ServerStatsCollector;
use crate::template::{load_document_template, TransactionTemplate, DEFAULT_SHARD_KEY};
use crate::termination::{ShutdownReport, TerminationCoordinator};
use crate::topology::{resolve, ClusterTopology, MongoTopologyProbe};
use crate::worker::{WorkerContext, WorkerPool};
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

/// Pause after cleanup and after chunk migration.
const SETTLE_AFTER_ADMIN: Duration = Duration::from_secs(1);

const PROMPT: &str = "Begin a load test [y/N]: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Peek mode drives no load.
    Peeking,
    /// The operator answered anything but `y`.
    Declined,
    Started { workers: usize },
}

pub struct Runner {
    config: Arc<RunConfig>,
    topology: ClusterTopology,
    backend: Arc<dyn SimulationBackend>,
    shard_admin: Option<Arc<dyn ShardAdmin>>,
    template: TransactionTemplate,
    plan: Arc<PhasePlan>,
    metrics: MetricsStore,
    coordinator: TerminationCoordinator,
    progress_tx: mpsc::UnboundedSender<String>,
    progress_rx: Option<mpsc::UnboundedReceiver<String>>,
    peek_deadline: Option<JoinHandle<()>>,
}

impl Runner {
    /// Connect to the cluster named by `config`, resolve its topology and wire
    /// up the MongoDB-backed collaborators.
    pub async fn connect(config: RunConfig) -> Result<Self> {
        info!("Connecting to {}", config.connection.masked());
        let client = connect(&config.connection).await?;
        let topology = resolve(&config.connection, &MongoTopologyProbe::new(client.clone())).await?;

        let document_template = config
            .template_path
            .as_deref()
            .map(load_document_template)
            .transpose()?;
        let template = TransactionTemplate::load_or_default(config.transactions_path.as_deref())?;

        let backend = MongoBackend::new(
            client.clone(),
            config.connection.clone(),
            config.database.clone(),
            config.collection.clone(),
        )
        .with_document_template(document_template)
        .with_seed(config.seed);
        let shard_admin: Option<Arc<dyn ShardAdmin>> = if topology.is_sharded() {
            Some(Arc::new(MongoShardAdmin::new(client)))
        } else {
            None
        };

        Ok(Self::new(
            config,
            topology,
            Arc::new(backend),
            shard_admin,
            template,
        ))
    }

    /// Assemble a runner from resolved parts. In peek mode this schedules the
    /// peek deadline, so it must be called inside a Tokio runtime.
    pub fn new(
        config: RunConfig,
        topology: ClusterTopology,
        backend: Arc<dyn SimulationBackend>,
        shard_admin: Option<Arc<dyn ShardAdmin>>,
        template: TransactionTemplate,
    ) -> Self {
        let config = Arc::new(config);
        let plan = Arc::new(PhasePlan::new(
            config.duration_minutes,
            config.simulate_only,
            config.tps,
            &config.phase_table,
        ));
        let metrics = MetricsStore::new();
        let coordinator = TerminationCoordinator::new(
            Arc::clone(&backend),
            Arc::clone(&config),
            topology.shard_connections.clone(),
            metrics.clone(),
            file_timestamp(),
        );
        let peek_deadline = config.peek.then(|| {
            coordinator.schedule_peek_deadline(from_minutes(config.duration_minutes))
        });
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        Self {
            config,
            topology,
            backend,
            shard_admin,
            template,
            plan,
            metrics,
            coordinator,
            progress_tx,
            progress_rx: Some(progress_rx),
            peek_deadline,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn topology(&self) -> &ClusterTopology {
        &self.topology
    }

    pub fn plan(&self) -> &PhasePlan {
        &self.plan
    }

    pub fn metrics(&self) -> &MetricsStore {
        &self.metrics
    }

    pub fn coordinator(&self) -> &TerminationCoordinator {
        &self.coordinator
    }

    /// Whether a peek deadline task was scheduled.
    pub fn has_peek_deadline(&self) -> bool {
        self.peek_deadline.is_some()
    }

    /// Ask for confirmation (reading from `input`), prepare the collection and
    /// spawn the workers.
    pub async fn start<R: BufRead>(&self, input: R) -> Result<StartOutcome> {
        let config = &self.config;
        if config.peek {
            return Ok(StartOutcome::Peeking);
        }
        if !config.auto_confirm && !confirm(input)? {
            return Ok(StartOutcome::Declined);
        }

        info!("Duration in minute(s): {}", config.duration_minutes);
        info!(
            "Total TPS: {} ({} tps/conn * {} conns), duration: {} (mins)",
            u64::from(config.tps) * config.connections as u64,
            config.tps,
            config.connections,
            config.duration_minutes
        );

        if config.drop_first {
            if let Err(e) = cleanup(self.backend.as_ref(), config).await {
                warn!("Cleanup before start failed: {e}");
            }
        }

        if !config.simulate_only {
            self.create_indexes().await?;
            if self.topology.is_sharded() && self.template.uses_default_indexes() {
                self.partition().await?;
            }
        }

        let pool = WorkerPool::new(WorkerContext {
            backend: Arc::clone(&self.backend),
            metrics: self.metrics.clone(),
            plan: Arc::clone(&self.plan),
            transactions: Arc::new(self.template.transactions.clone()),
            simulate_only: config.simulate_only,
            started: Instant::now(),
        });
        for index in 0..config.connections {
            // Workers are supervised by logging only.
            drop(pool.spawn(index));
        }
        Ok(StartOutcome::Started {
            workers: config.connections,
        })
    }

    async fn create_indexes(&self) -> Result<()> {
        let keys = self.template.index_keys();
        self.backend
            .create_indexes(&self.config.database, &self.config.collection, &keys)
            .await
    }

    async fn partition(&self) -> Result<Option<PartitionReport>> {
        let Some(admin) = &self.shard_admin else {
            warn!("Cluster is sharded but no shard admin is configured, skipping partitioning");
            return Ok(None);
        };
        let report = partition_collection(
            admin.as_ref(),
            &self.config.database,
            &self.config.collection,
            DEFAULT_SHARD_KEY,
            SETTLE_AFTER_ADMIN,
        )
        .await?;
        Ok(Some(report))
    }

    /// One statistics collector per shard connection; the first also records
    /// opcounter rates. A node that cannot be reached is logged and skipped.
    pub async fn start_stats_collectors(&self) {
        for (i, connection) in self.topology.shard_connections.iter().enumerate() {
            match ServerStatsCollector::connect(
                connection,
                self.progress_tx.clone(),
                self.config.stats_interval,
            )
            .await
            {
                Ok(collector) => {
                    let metrics = (i == 0).then(|| self.metrics.clone());
                    collector.start(self.config.database.clone(), metrics);
                }
                Err(e) => warn!("Stats collector for {} failed: {e}", connection.masked()),
            }
        }
    }

    /// Block until the run timer, an operator signal or the peek deadline
    /// ends the run. Outside of tests the process exits in here.
    pub async fn wait_for_termination(&mut self) -> Option<ShutdownReport> {
        let progress = match self.progress_rx.take() {
            Some(progress) => progress,
            None => mpsc::unbounded_channel().1,
        };
        self.coordinator.run(progress).await
    }
}

/// Prompt on stdout and read one answer from `input`. Only `y` or `Y`
/// proceeds.
pub fn confirm<R: BufRead>(mut input: R) -> Result<bool> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{PROMPT}")?;
    stdout.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim_end_matches(|c: char| c == '\r' || c == '\n');
    Ok(answer == "y" || answer == "Y")
}

/// Drop the scratch collection and database. Best effort: failures are
/// logged and the last one is returned.
pub async fn cleanup(backend: &dyn SimulationBackend, config: &RunConfig) -> Result<()> {
    if config.peek {
        return Ok(());
    }
    let mut outcome = Ok(());
    if !config.simulate_only && config.uses_scratch_database() {
        if config.collection == EXAMPLES_COLLECTION {
            info!("dropping collection {KEYHOLE_DB} {EXAMPLES_COLLECTION}");
            if let Err(e) = backend.drop_collection(KEYHOLE_DB, EXAMPLES_COLLECTION).await {
                warn!("Dropping {KEYHOLE_DB}.{EXAMPLES_COLLECTION} failed: {e}");
                outcome = Err(e);
            }
        }
        info!("dropping temp database {KEYHOLE_DB}");
        if let Err(e) = backend.drop_database(&config.database).await {
            warn!("Dropping {} failed: {e}", config.database);
            outcome = Err(e);
        }
    }

    tokio::time::sleep(SETTLE_AFTER_ADMIN).await;
    outcome
}
