//! C8: supervises a pool of in-process worker tasks plus a maintenance
//! auto-claim loop.
//!
//! Generalizes the teacher's subprocess daemon lifecycle (pidfile + signal
//! race + bounded graceful window, see `daemon.rs`) from one supervised
//! process to N supervised `tokio` tasks; there is no pidfile or lock file
//! since nothing here is spawned out-of-process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::connections::KvManager;
use crate::embedding_worker::EmbeddingWorker;
use crate::pref_worker::PrefWorker;

const MAINTENANCE_CONSUMER: &str = "ctl";
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// One iteration of a worker's read-process-ack cycle, erased to a trait
/// object so the controller can supervise either worker kind identically.
#[async_trait]
pub trait SupervisedWorker: Send + Sync {
    async fn run_once(&self);
}

#[async_trait]
impl SupervisedWorker for EmbeddingWorker {
    async fn run_once(&self) {
        EmbeddingWorker::run_once(self).await;
    }
}

#[async_trait]
impl SupervisedWorker for PrefWorker {
    async fn run_once(&self) {
        PrefWorker::run_once(self).await;
    }
}

pub type WorkerFactory = Arc<dyn Fn(String) -> Arc<dyn SupervisedWorker> + Send + Sync>;

pub struct WorkerController {
    kv: Arc<KvManager>,
    stream: String,
    group: String,
    stale_ms: u64,
    worker_count: usize,
    make_worker: WorkerFactory,
}

impl WorkerController {
    pub fn new(
        kv: Arc<KvManager>,
        stream: String,
        group: String,
        stale_ms: u64,
        worker_count: usize,
        make_worker: WorkerFactory,
    ) -> Self {
        Self {
            kv,
            stream,
            group,
            stale_ms,
            worker_count,
            make_worker,
        }
    }

    /// Ensures the consumer group, spawns `worker_count` supervised workers
    /// and the maintenance auto-claim loop, then blocks until SIGINT/SIGTERM
    /// (or `ctrl_c` off-unix), at which point it signals shutdown and waits
    /// up to 5s for workers to stop before aborting stragglers.
    pub async fn run(self: Arc<Self>) {
        if let Some(client) = self.kv.client().await {
            client.xgroup_create(&self.stream, &self.group).await;
        } else {
            tracing::error!(stream = %self.stream, group = %self.group, "kv backend unavailable at controller startup");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut handles: Vec<(String, JoinHandle<()>)> = Vec::with_capacity(self.worker_count);
        for i in 1..=self.worker_count {
            let name = format!("worker-{i}");
            let this = self.clone();
            let rx = shutdown_rx.clone();
            let task_name = name.clone();
            handles.push((name, tokio::spawn(async move { this.supervise_worker(task_name, rx).await })));
        }

        let maintenance = {
            let this = self.clone();
            let rx = shutdown_rx.clone();
            tokio::spawn(async move { this.maintenance_loop(rx).await })
        };

        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, stopping workers");
        let _ = shutdown_tx.send(true);

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        for (name, handle) in handles {
            let abort = handle.abort_handle();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                tracing::warn!(worker = %name, "did not stop within grace window, force-aborting");
                abort.abort();
            } else {
                tracing::info!(worker = %name, "worker stopped");
            }
        }
        maintenance.abort();
    }

    async fn supervise_worker(self: Arc<Self>, name: String, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            let worker = (self.make_worker)(name.clone());
            let mut inner_shutdown = shutdown.clone();
            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = inner_shutdown.changed() => return,
                        _ = worker.run_once() => {}
                    }
                }
            });

            if handle.await.is_err() {
                tracing::warn!(worker = %name, "worker task panicked, respawning");
            }
        }
    }

    async fn maintenance_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(MAINTENANCE_INTERVAL) => {}
            }
            if *shutdown.borrow() {
                return;
            }

            let Some(client) = self.kv.client().await else {
                continue;
            };
            client.xgroup_create(&self.stream, &self.group).await;
            let claimed = client
                .xautoclaim(&self.stream, &self.group, MAINTENANCE_CONSUMER, self.stale_ms)
                .await;
            if !claimed.is_empty() {
                tracing::info!(
                    count = claimed.len(),
                    consumer = MAINTENANCE_CONSUMER,
                    stream = %self.stream,
                    "auto-claimed stale pending entries"
                );
            }
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
