//! [`KVClient`] backed by Redis: lists for the intra-session log, string keys
//! for the preference cache, and Streams/consumer-groups for the two job
//! queues.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Value};

use crate::capability::{KVClient, StreamEntry};

pub struct RedisKvClient {
    conn: ConnectionManager,
}

impl RedisKvClient {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KVClient for RedisKvClient {
    async fn rpush(&self, key: &str, value: &str) -> bool {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, i64>(key, value).await.is_ok()
    }

    async fn lrange(&self, key: &str, limit: Option<usize>) -> Vec<String> {
        let mut conn = self.conn.clone();
        let start: isize = match limit {
            Some(n) if n > 0 => -(n as isize),
            _ => 0,
        };
        conn.lrange(key, start, -1).await.unwrap_or_default()
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
        let mut conn = self.conn.clone();
        conn.expire::<_, bool>(key, ttl_secs as i64)
            .await
            .unwrap_or(false)
    }

    async fn ttl(&self, key: &str) -> Option<i64> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn.ttl(key).await.ok()?;
        if ttl < 0 { None } else { Some(ttl) }
    }

    async fn del(&self, key: &str) -> bool {
        let mut conn = self.conn.clone();
        conn.del::<_, i64>(key).await.unwrap_or(0) > 0
    }

    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        conn.get(key).await.ok()
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await.is_ok()
    }

    async fn xadd(&self, stream: &str, fields: &[(&str, &str)]) -> Option<String> {
        let mut conn = self.conn.clone();
        conn.xadd(stream, "*", fields).await.ok()
    }

    async fn xgroup_create(&self, stream: &str, group: &str) -> bool {
        let mut conn = self.conn.clone();
        // Create the stream if it doesn't exist yet, and start the group at
        // the beginning of history ("0") so nothing enqueued before the
        // first consumer starts is silently skipped.
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => true,
            // BUSYGROUP: consumer group already exists — idempotent no-op.
            Err(err) if err.to_string().contains("BUSYGROUP") => true,
            Err(err) => {
                tracing::warn!(error = %err, stream, group, "xgroup create failed");
                false
            }
        }
    }

    async fn xreadgroup(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block_ms: u64,
        count: usize,
    ) -> Vec<StreamEntry> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<Value> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(value) => parse_stream_reply(&value),
            Err(err) => {
                tracing::warn!(error = %err, stream, group, "xreadgroup failed");
                Vec::new()
            }
        }
    }

    async fn xack(&self, stream: &str, group: &str, id: &str) -> bool {
        let mut conn = self.conn.clone();
        conn.xack::<_, _, _, i64>(stream, group, &[id])
            .await
            .unwrap_or(0)
            > 0
    }

    async fn xautoclaim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
    ) -> Vec<StreamEntry> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<Value> = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg("0")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(Value::Bulk(items)) if items.len() >= 2 => parse_entry_list(&items[1]),
            Ok(_) => Vec::new(),
            Err(err) => {
                tracing::warn!(error = %err, stream, group, "xautoclaim failed");
                Vec::new()
            }
        }
    }

    async fn xlen(&self, stream: &str) -> u64 {
        let mut conn = self.conn.clone();
        conn.xlen(stream).await.unwrap_or(0)
    }
}

/// Parse an `XREADGROUP`/`XREAD` reply: `[[stream_name, [[id, [f,v,...]], ...]], ...]`.
fn parse_stream_reply(value: &Value) -> Vec<StreamEntry> {
    let Value::Bulk(streams) = value else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for stream in streams {
        let Value::Bulk(pair) = stream else { continue };
        if pair.len() != 2 {
            continue;
        }
        out.extend(parse_entry_list(&pair[1]));
    }
    out
}

/// Parse an entry list shaped `[[id, [f,v,...]], ...]`.
fn parse_entry_list(value: &Value) -> Vec<StreamEntry> {
    let Value::Bulk(entries) = value else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries {
        let Value::Bulk(parts) = entry else { continue };
        if parts.len() != 2 {
            continue;
        }
        let Some(id) = as_string(&parts[0]) else {
            continue;
        };
        let Value::Bulk(field_values) = &parts[1] else {
            continue;
        };
        let mut fields = HashMap::new();
        let mut iter = field_values.iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            if let (Some(k), Some(v)) = (as_string(k), as_string(v)) {
                fields.insert(k, v);
            }
        }
        out.push(StreamEntry { id, fields });
    }
    out
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        Value::Status(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}
