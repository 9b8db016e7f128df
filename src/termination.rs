//! Exactly-once shutdown.
//!
//! Three triggers race for the exit: the run timer, an operator signal and,
//! in peek mode, a deferred deadline. The first one through the
//! [`ShutdownGate`] runs cleanup, dumps per-node status, writes the metrics
//! snapshot and exits the process. Later triggers are no-ops.

use crate::backend::SimulationBackend;
use crate::config::RunConfig;
use crate::connect::ConnectionDescriptor;
use crate::metrics::MetricsStore;
use crate::phase::from_minutes;
use crate::runner::cleanup;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationTrigger {
    Timer,
    OperatorSignal,
    PeekDeadline,
}

impl fmt::Display for TerminationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminationTrigger::Timer => "run timer",
            TerminationTrigger::OperatorSignal => "operator signal",
            TerminationTrigger::PeekDeadline => "peek deadline",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Exited,
}

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const EXITED: u8 = 2;

/// `Running -> ShuttingDown -> Exited`, with a single winner out of
/// `Running`.
#[derive(Debug, Default)]
pub struct ShutdownGate {
    state: AtomicU8,
}

impl ShutdownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for exactly one caller over the gate's lifetime.
    pub fn try_begin(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish(&self) {
        self.state.store(EXITED, Ordering::Release);
    }

    pub fn state(&self) -> ShutdownState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => ShutdownState::Running,
            SHUTTING_DOWN => ShutdownState::ShuttingDown,
            _ => ShutdownState::Exited,
        }
    }
}

/// What the shutdown sequence produced.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub trigger: TerminationTrigger,
    pub status_files: Vec<PathBuf>,
    pub snapshot: Option<PathBuf>,
}

/// Cloneable handle; every clone shares one gate.
#[derive(Clone)]
pub struct TerminationCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    gate: ShutdownGate,
    done: watch::Sender<bool>,
    backend: Arc<dyn SimulationBackend>,
    config: Arc<RunConfig>,
    shard_connections: Vec<ConnectionDescriptor>,
    metrics: MetricsStore,
    timestamp: String,
    exit_process: AtomicBool,
}

impl TerminationCoordinator {
    pub fn new(
        backend: Arc<dyn SimulationBackend>,
        config: Arc<RunConfig>,
        shard_connections: Vec<ConnectionDescriptor>,
        metrics: MetricsStore,
        timestamp: String,
    ) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                gate: ShutdownGate::new(),
                done,
                backend,
                config,
                shard_connections,
                metrics,
                timestamp,
                exit_process: AtomicBool::new(true),
            }),
        }
    }

    /// Keep the process alive after shutdown, for embedding and tests.
    pub fn disable_exit(&self) {
        self.inner.exit_process.store(false, Ordering::Release);
    }

    pub fn state(&self) -> ShutdownState {
        self.inner.gate.state()
    }

    /// Fire [`TerminationTrigger::PeekDeadline`] after `after`.
    pub fn schedule_peek_deadline(&self, after: Duration) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            coordinator.fire(TerminationTrigger::PeekDeadline).await;
        })
    }

    /// Run the shutdown sequence if no other trigger got there first.
    pub async fn fire(&self, trigger: TerminationTrigger) -> Option<ShutdownReport> {
        if !self.inner.gate.try_begin() {
            info!("Shutdown already in progress, ignoring {trigger}");
            return None;
        }
        info!("Shutting down on {trigger}");
        let inner = &self.inner;

        if let Err(e) = cleanup(inner.backend.as_ref(), &inner.config).await {
            warn!("Cleanup failed: {e}");
        }

        let mut status_files = Vec::new();
        for connection in &inner.shard_connections {
            match inner
                .backend
                .dump_server_status(connection, &inner.config.output_dir, &inner.timestamp)
                .await
            {
                Ok(path) => status_files.push(path),
                Err(e) => error!("Server status of {} failed: {e}", connection.masked()),
            }
        }
        for path in &status_files {
            info!("stats written to {}", path.display());
        }

        let snapshot = match inner
            .metrics
            .write_snapshot(&inner.config.output_dir, &inner.timestamp)
            .await
        {
            Ok(path) => {
                info!("optime written to {}", path.display());
                Some(path)
            }
            Err(e) => {
                error!("Writing metrics snapshot failed: {e}");
                None
            }
        };

        inner.gate.finish();
        inner.done.send_replace(true);
        if inner.exit_process.load(Ordering::Acquire) {
            std::process::exit(0);
        }
        Some(ShutdownReport {
            trigger,
            status_files,
            snapshot,
        })
    }

    /// Wait for the run timer or an operator signal while logging collector
    /// progress, then shut down.
    ///
    /// Returns `None` when another trigger (the peek deadline) won the race.
    pub async fn run(&self, mut progress: mpsc::UnboundedReceiver<String>) -> Option<ShutdownReport> {
        let timer = tokio::time::sleep(self.inner.config_duration());
        tokio::pin!(timer);
        let signal = operator_signal();
        tokio::pin!(signal);
        let mut done = self.inner.done.subscribe();
        let mut progress_open = true;

        loop {
            if *done.borrow_and_update() {
                return None;
            }
            tokio::select! {
                _ = &mut timer => return self.fire(TerminationTrigger::Timer).await,
                _ = &mut signal => return self.fire(TerminationTrigger::OperatorSignal).await,
                _ = done.changed() => {}
                message = progress.recv(), if progress_open => match message {
                    Some(message) => info!("{message}"),
                    None => progress_open = false,
                },
            }
        }
    }
}

impl Inner {
    fn config_duration(&self) -> Duration {
        from_minutes(self.config.duration_minutes)
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn operator_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {e}"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
