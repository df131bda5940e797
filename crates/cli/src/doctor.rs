//! `memory doctor` — connectivity, queue-depth, and collection-size report.
//!
//! Supplements the facade/worker/controller CLI surface the way the original
//! system's standalone `memory_diagnostics.py` script supplemented its web
//! service: same three backends, same "print what's reachable and move on"
//! posture, folded in here as a subcommand instead of a separate script,
//! grounded in the teacher's `daemon status` connectivity check.

use anyhow::Result;

use crate::context::Context;

pub async fn run(ctx: &Context) -> Result<()> {
    println!("=== KV (Redis) ===");
    match ctx.kv.client().await {
        Some(client) => {
            println!("status: reachable");
            let embedding_depth = client.xlen(&ctx.config.queues.embedding_queue).await;
            let pref_depth = client.xlen(&ctx.config.queues.pref_queue).await;
            println!("{}: {embedding_depth} pending", ctx.config.queues.embedding_queue);
            println!("{}: {pref_depth} pending", ctx.config.queues.pref_queue);
        }
        None => println!("status: unreachable"),
    }

    println!("\n=== Documents (SQLite) ===");
    match ctx.doc.client().await {
        Some(client) => {
            println!("status: reachable ({})", ctx.config.sql.path);
            let (conversations, preferences) = client.collection_sizes().await;
            println!("conversations: {conversations} rows");
            println!("user_preferences: {preferences} rows");
        }
        None => println!("status: unreachable"),
    }

    println!("\n=== Vectors (Qdrant) ===");
    match ctx.vector.client().await {
        Some(client) => {
            println!("status: reachable ({})", ctx.config.vector.qdrant_url);
            let count = client.count().await;
            println!("{}: {count} points", ctx.config.vector.collection);
        }
        None => println!("status: unreachable"),
    }

    Ok(())
}
