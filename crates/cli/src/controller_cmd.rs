//! `memory controller local|docker|aws ...` — the supervisor CLI. `local`
//! wires a `WorkerController`; `docker`/`aws` are informational only, they
//! describe a deployment rather than run one in-process.

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Args, Subcommand};

use memory_core::{EmbeddingWorker, PrefWorker, SupervisedWorker, WorkerController, WorkerFactory};

use crate::context::Context;
use crate::worker::QueueKind;

#[derive(Debug, Subcommand)]
pub enum ControllerCommand {
    /// Supervise N in-process workers against a local/reachable backend.
    Local(LocalArgs),
    /// Print the docker-compose service stanza this deployment maps to.
    Docker {
        #[arg(long)]
        files: String,
        #[arg(long)]
        service: String,
        #[arg(long)]
        replicas: u32,
    },
    /// Print the ECS service description this deployment maps to.
    Aws {
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        service: String,
        #[arg(long)]
        count: u32,
    },
}

#[derive(Debug, Args)]
pub struct LocalArgs {
    #[arg(long)]
    workers: usize,
    #[arg(long, default_value = "workers")]
    group: String,
    /// Stream to consume; also selects worker logic unless `--queue` is given.
    #[arg(long)]
    stream: Option<String>,
    #[arg(long, value_enum)]
    queue: QueueKind,
    #[arg(long, default_value_t = 120_000)]
    stale_ms: u64,
}

pub async fn run(ctx: &Context, command: ControllerCommand) -> Result<()> {
    match command {
        ControllerCommand::Local(args) => run_local(ctx, args).await,
        ControllerCommand::Docker { files, service, replicas } => {
            println!(
                "# generated by `memory controller docker` — apply with `docker compose -f {files} up -d --scale {service}={replicas}`"
            );
            println!("services:");
            println!("  {service}:");
            println!("    image: memory-cli:latest");
            println!("    command: [\"memory\", \"worker\", \"--queue\", \"embedding\"]");
            println!("    deploy:");
            println!("      replicas: {replicas}");
            Ok(())
        }
        ControllerCommand::Aws { cluster, service, count } => {
            println!(
                "# equivalent: aws ecs update-service --cluster {cluster} --service {service} --desired-count {count}"
            );
            Ok(())
        }
    }
}

async fn run_local(ctx: &Context, args: LocalArgs) -> Result<()> {
    if ctx.kv.client().await.is_none() {
        bail!("kv backend unavailable");
    }

    let stream = args.stream.unwrap_or_else(|| match args.queue {
        QueueKind::Embedding => ctx.config.queues.embedding_queue.clone(),
        QueueKind::Preference => ctx.config.queues.pref_queue.clone(),
    });

    let kv = ctx.kv.clone();
    let vector = ctx.vector.clone();
    let doc = ctx.doc.clone();
    let embedder = ctx.embedder.clone();
    let preferences = Arc::new(ctx.preference_store());
    let group = args.group.clone();
    let queue = args.queue;
    let stream_for_factory = stream.clone();

    let make_worker: WorkerFactory = Arc::new(move |consumer| -> Arc<dyn SupervisedWorker> {
        match queue {
            QueueKind::Embedding => Arc::new(EmbeddingWorker::new(
                kv.clone(),
                vector.clone(),
                embedder.clone(),
                stream_for_factory.clone(),
                group.clone(),
                consumer,
                5000,
                10,
            )),
            QueueKind::Preference => Arc::new(PrefWorker::new(
                doc.clone(),
                kv.clone(),
                preferences.clone(),
                None,
                stream_for_factory.clone(),
                group.clone(),
                consumer,
                5000,
                10,
            )),
        }
    });

    let controller = Arc::new(WorkerController::new(
        ctx.kv.clone(),
        stream,
        args.group,
        args.stale_ms,
        args.workers,
        make_worker,
    ));

    controller.run().await;
    Ok(())
}
