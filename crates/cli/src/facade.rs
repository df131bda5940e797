//! `memory facade <op> ...` — direct invocations of the public memory API
//! against a running backend, for operational use and scripting. Grounded
//! in the teacher's `aigent memory wipe/stats/inspect-core` subcommand
//! family (`crates/interfaces/cli/src/memory_cmds.rs`).

use anyhow::{bail, Result};
use clap::{Subcommand, ValueEnum};

use memory_core::{Message, MessageRole, SessionId, UserId};

use crate::context::Context;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliMessageRole {
    User,
    Agent,
    System,
    Tool,
}

impl From<CliMessageRole> for MessageRole {
    fn from(role: CliMessageRole) -> Self {
        match role {
            CliMessageRole::User => MessageRole::User,
            CliMessageRole::Agent => MessageRole::Agent,
            CliMessageRole::System => MessageRole::System,
            CliMessageRole::Tool => MessageRole::Tool,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum FacadeCommand {
    /// Append a message to a session's intra-session log.
    Append {
        session_id: String,
        #[arg(long, value_enum, default_value = "user")]
        role: CliMessageRole,
        content: String,
    },
    /// List the messages currently buffered for a session.
    List {
        session_id: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Reset a session's sliding TTL without reading or writing content.
    Refresh { session_id: String },
    /// Drain the intra-session log into durable storage and clear it.
    Finalize { user_id: String, session_id: String },
    /// Retrieve memories relevant to a query, ranked by similarity.
    Retrieve {
        user_id: String,
        query: String,
        #[arg(long)]
        k: Option<usize>,
        #[arg(long)]
        min_sim: Option<f32>,
        #[arg(long)]
        verbose: bool,
    },
    /// Print a user's current preferences (with `_version`).
    GetPrefs { user_id: String },
    /// Merge one preference key into a user's preference map.
    SetPref {
        user_id: String,
        key: String,
        /// Raw JSON value, e.g. `1500`, `"Boston"`, `true`.
        value: String,
    },
}

pub async fn run(ctx: &Context, command: FacadeCommand) -> Result<()> {
    let manager = ctx.memory_manager();

    match command {
        FacadeCommand::Append { session_id, role, content } => {
            let session = SessionId::from(session_id);
            let message = Message::new(role.into(), content);
            if !manager.append(&session, &message).await {
                bail!("append failed; kv backend unavailable");
            }
            println!("ok");
        }
        FacadeCommand::List { session_id, limit } => {
            let session = SessionId::from(session_id);
            let messages = manager.list(&session, limit).await;
            println!("{}", serde_json::to_string_pretty(&messages)?);
        }
        FacadeCommand::Refresh { session_id } => {
            let session = SessionId::from(session_id);
            if !manager.refresh(&session).await {
                bail!("refresh failed; kv backend unavailable");
            }
            println!("ok");
        }
        FacadeCommand::Finalize { user_id, session_id } => {
            let user = UserId::from(user_id);
            let session = SessionId::from(session_id);
            if !manager.finalize_session(&user, &session).await {
                bail!("finalize failed; document backend unavailable");
            }
            println!("ok");
        }
        FacadeCommand::Retrieve { user_id, query, k, min_sim, verbose } => {
            let user = UserId::from(user_id);
            let hits = manager.retrieve_relevant_memories(&user, &query, k, min_sim).await;
            if verbose {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                let formatted = memory_core::MemoryManager::format_memories_for_context(&hits, 800);
                println!("{formatted}");
            }
        }
        FacadeCommand::GetPrefs { user_id } => {
            let user = UserId::from(user_id);
            match manager.get_preferences(&user).await {
                Some(prefs) => println!("{}", serde_json::to_string_pretty(&prefs)?),
                None => println!("null"),
            }
        }
        FacadeCommand::SetPref { user_id, key, value } => {
            let user = UserId::from(user_id);
            let value: serde_json::Value = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            if !manager.update_preference(&user, &key, value).await {
                bail!("set-pref failed; document backend unavailable");
            }
            println!("ok");
        }
    }

    Ok(())
}
