//! `memory worker --queue embedding|preference ...` — runs a single stream
//! consumer in the foreground until interrupted. Grounded in the teacher's
//! `daemon run` loop shape, minus the pidfile: this is meant to be run under
//! an external supervisor (systemd, a container orchestrator), not daemonized
//! itself.

use std::sync::Arc;

use anyhow::Result;
use clap::{Args, ValueEnum};

use memory_core::{EmbeddingWorker, PrefWorker};

use crate::context::Context;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum QueueKind {
    Embedding,
    Preference,
}

#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Which queue to consume.
    #[arg(long, value_enum)]
    queue: QueueKind,
    #[arg(long, default_value = "workers")]
    group: String,
    #[arg(long, default_value = "worker-1")]
    consumer: String,
    /// XREADGROUP block timeout, milliseconds.
    #[arg(long, default_value_t = 5000)]
    block: u64,
    /// Max entries read per iteration.
    #[arg(long, default_value_t = 10)]
    batch: usize,
}

pub async fn run(ctx: &Context, args: WorkerArgs) -> Result<()> {
    tracing::info!(queue = ?args.queue, group = %args.group, consumer = %args.consumer, "worker starting");

    match args.queue {
        QueueKind::Embedding => {
            let worker = EmbeddingWorker::new(
                ctx.kv.clone(),
                ctx.vector.clone(),
                ctx.embedder.clone(),
                ctx.config.queues.embedding_queue.clone(),
                args.group,
                args.consumer,
                args.block,
                args.batch,
            );
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = worker.run_once() => {}
                }
            }
        }
        QueueKind::Preference => {
            let worker = PrefWorker::new(
                ctx.doc.clone(),
                ctx.kv.clone(),
                Arc::new(ctx.preference_store()),
                None,
                ctx.config.queues.pref_queue.clone(),
                args.group,
                args.consumer,
                args.block,
                args.batch,
            );
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = worker.run_once() => {}
                }
            }
        }
    }

    tracing::info!("shutdown signal received, worker stopped");
    Ok(())
}
