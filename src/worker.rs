//! Load-driving workers.
//!
//! One worker per connection. A worker populates (unless simulate-only),
//! settles briefly, then replays the transaction list at the intensity of the
//! current phase until the phase plan runs out. Failures end only the worker
//! that hit them.

use crate::backend::{SimulationBackend, WorkerSession};
use crate::error::Result;
use crate::metrics::{now_millis, MetricsStore, OperationRecord, PopulateRecord, POPULATE_CATEGORY};
use crate::phase::{Phase, PhaseKind, PhasePlan};
use crate::template::TransactionSpec;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Pause between the population and simulation steps.
pub const SETTLE_INTERVAL: Duration = Duration::from_millis(10);

/// Everything a worker needs, shared by all workers of a run.
pub struct WorkerContext {
    pub backend: Arc<dyn SimulationBackend>,
    pub metrics: MetricsStore,
    pub plan: Arc<PhasePlan>,
    pub transactions: Arc<Vec<TransactionSpec>>,
    pub simulate_only: bool,
    /// Phases are measured from here.
    pub started: Instant,
}

#[derive(Clone)]
pub struct WorkerPool {
    context: Arc<WorkerContext>,
}

impl WorkerPool {
    pub fn new(context: WorkerContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    /// Start worker `index`. Nothing waits on the returned handle in a real
    /// run; the process ends through the termination coordinator.
    pub fn spawn(&self, index: usize) -> JoinHandle<()> {
        let context = Arc::clone(&self.context);
        tokio::spawn(async move {
            let session = match context.backend.open_session(index).await {
                Ok(session) => session,
                Err(e) => {
                    error!("Worker {index} could not open a session: {e}");
                    return;
                }
            };
            let mut worker = Worker {
                index,
                context,
                session,
            };
            worker.run().await;
        })
    }
}

struct Worker {
    index: usize,
    context: Arc<WorkerContext>,
    session: Box<dyn WorkerSession>,
}

impl Worker {
    async fn run(&mut self) {
        let index = self.index;
        if !self.context.simulate_only {
            if let Some(population) = self.context.plan.population().copied() {
                if let Err(e) = self.populate(&population).await {
                    error!("Worker {index} exiting in populate: {e}");
                    return;
                }
            }
        }
        tokio::time::sleep(SETTLE_INTERVAL).await;

        if let Err(e) = self.simulate().await {
            error!("Worker {index} exiting in simulate: {e}");
            return;
        }
        debug!("Worker {index} finished");
    }

    /// Insert batches as fast as possible until the population phase ends.
    async fn populate(&mut self, population: &Phase) -> Result<()> {
        let mut total = 0;
        while self.context.started.elapsed() < population.end() {
            let batch_start = Instant::now();
            let docs = self.session.populate_batch().await?;
            total += docs;
            let record = PopulateRecord {
                worker: self.index,
                docs,
                micros: batch_start.elapsed().as_micros() as u64,
                ts: now_millis(),
            };
            self.context
                .metrics
                .record_entry(POPULATE_CATEGORY, &record)
                .await?;
        }
        info!("Worker {} populated {total} documents", self.index);
        Ok(())
    }

    /// Replay the transactions until the phase plan is exhausted.
    async fn simulate(&mut self) -> Result<()> {
        let context = Arc::clone(&self.context);
        loop {
            let elapsed = context.started.elapsed();
            let Some(phase) = context.plan.phase_for(elapsed).copied() else {
                return Ok(());
            };
            if phase.kind == PhaseKind::Population {
                // Population ended early; simulation starts with its phase.
                tokio::time::sleep_until(context.started + phase.end()).await;
                continue;
            }

            for transaction in context.transactions.iter() {
                let op_start = Instant::now();
                self.session.execute(transaction).await?;
                let record = OperationRecord {
                    worker: self.index,
                    phase: phase.kind,
                    ts: now_millis(),
                    micros: op_start.elapsed().as_micros() as u64,
                };
                context
                    .metrics
                    .record_entry(transaction.kind.category(), &record)
                    .await?;

                match phase.intensity.delay() {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => tokio::task::yield_now().await,
                }
            }
        }
    }
}
