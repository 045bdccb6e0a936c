//! Redis store backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, Script};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::provider::{StoreOp, StoreProvider, Subscription};

const DELETE_IF_EQUALS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const REFRESH_IF_EQUALS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const MOVE_QUEUE_ENTRY: &str = r#"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) > 0 then
    redis.call('RPUSH', KEYS[2], ARGV[1])
    return 1
end
return 0
"#;

fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        return StoreError::Unavailable(err.to_string());
    }
    match err.kind() {
        redis::ErrorKind::InvalidClientConfig => StoreError::InvalidArgument(err.to_string()),
        _ => StoreError::Backend(err.to_string()),
    }
}

// PX rejects zero
fn millis(ttl: Duration) -> u64 {
    ttl.as_millis().clamp(1, u64::MAX as u128) as u64
}

/// Store provider backed by a Redis server
pub struct RedisStore {
    client: Client,
    connection: MultiplexedConnection,
    delete_if_equals: Script,
    refresh_if_equals: Script,
    move_queue_entry: Script,
}

impl RedisStore {
    pub async fn connect(url: &str, connect_timeout: Duration) -> StoreResult<Self> {
        let client = Client::open(url).map_err(map_redis_error)?;
        let connection =
            tokio::time::timeout(connect_timeout, client.get_multiplexed_async_connection())
                .await
                .map_err(|_| {
                    StoreError::Unavailable(format!(
                        "timed out after {:?} connecting to redis",
                        connect_timeout
                    ))
                })?
                .map_err(map_redis_error)?;

        info!("Connected to redis");
        Ok(Self {
            client,
            connection,
            delete_if_equals: Script::new(DELETE_IF_EQUALS),
            refresh_if_equals: Script::new(REFRESH_IF_EQUALS),
            move_queue_entry: Script::new(MOVE_QUEUE_ENTRY),
        })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

#[async_trait]
impl StoreProvider for RedisStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: () = cmd
            .query_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        Ok(removed > 0)
    }

    async fn push_queue(&self, key: &str, value: &[u8]) -> StoreResult<usize> {
        let len: usize = redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        Ok(len)
    }

    async fn pop_queue(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> = redis::cmd("LPOP")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        Ok(value)
    }

    async fn peek_queue(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> = redis::cmd("LINDEX")
            .arg(key)
            .arg(0)
            .query_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        Ok(value)
    }

    async fn take_queue_entry(
        &self,
        from: &str,
        value: &[u8],
        to: Option<&str>,
    ) -> StoreResult<bool> {
        let removed: i64 = match to {
            Some(to) => {
                self.move_queue_entry
                    .key(from)
                    .key(to)
                    .arg(value)
                    .invoke_async(&mut self.conn())
                    .await
            }
            None => {
                redis::cmd("LREM")
                    .arg(from)
                    .arg(1)
                    .arg(value)
                    .query_async(&mut self.conn())
                    .await
            }
        }
        .map_err(map_redis_error)?;
        Ok(removed > 0)
    }

    async fn queue_len(&self, key: &str) -> StoreResult<usize> {
        let len: usize = redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        Ok(len)
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        Ok(value)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> StoreResult<()> {
        let _: i64 = redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<bool> {
        let removed: i64 = redis::cmd("HDEL")
            .arg(key)
            .arg(field)
            .query_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        Ok(removed > 0)
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, Vec<u8>>> {
        let values: HashMap<String, Vec<u8>> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        Ok(values)
    }

    async fn run_transaction(&self, ops: Vec<StoreOp>) -> StoreResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                StoreOp::Set { key, value, ttl } => {
                    pipe.cmd("SET").arg(key).arg(value.as_slice());
                    if let Some(ttl) = ttl {
                        pipe.arg("PX").arg(millis(*ttl));
                    }
                }
                StoreOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key);
                }
                StoreOp::QueuePush { key, value } => {
                    pipe.cmd("RPUSH").arg(key).arg(value.as_slice());
                }
                StoreOp::QueueRemove { key, value } => {
                    pipe.cmd("LREM").arg(key).arg(0).arg(value.as_slice());
                }
                StoreOp::HashSet { key, field, value } => {
                    pipe.cmd("HSET").arg(key).arg(field).arg(value.as_slice());
                }
                StoreOp::HashDelete { key, field } => {
                    pipe.cmd("HDEL").arg(key).arg(field);
                }
                StoreOp::Expire { key, ttl } => {
                    pipe.cmd("PEXPIRE").arg(key).arg(millis(*ttl));
                }
            }
            pipe.ignore();
        }

        let _: () = pipe
            .query_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        debug!("Applied transaction with {} operations", ops.len());
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> StoreResult<bool> {
        let removed: i64 = self
            .delete_if_equals
            .key(key)
            .arg(expected)
            .invoke_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        Ok(removed > 0)
    }

    async fn refresh_if_equals(
        &self,
        key: &str,
        expected: &[u8],
        ttl: Duration,
    ) -> StoreResult<bool> {
        let refreshed: i64 = self
            .refresh_if_equals
            .key(key)
            .arg(expected)
            .arg(millis(ttl))
            .invoke_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        Ok(refreshed > 0)
    }

    async fn publish(&self, channel: &str, message: &[u8]) -> StoreResult<usize> {
        let receivers: usize = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message)
            .query_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(map_redis_error)?;
        pubsub.subscribe(channel).await.map_err(map_redis_error)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let name = channel.to_string();
        let forwarder = tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            while let Some(message) = messages.next().await {
                match message.get_payload::<Vec<u8>>() {
                    Ok(payload) => {
                        if sender.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(channel = %name, "Dropping unreadable message: {}", e),
                }
            }
            debug!(channel = %name, "Subscription closed");
        });

        Ok(Subscription::with_forwarder(channel, receiver, forwarder))
    }

    async fn server_time_utc(&self) -> StoreResult<DateTime<Utc>> {
        let (secs, micros): (i64, u32) = redis::cmd("TIME")
            .query_async(&mut self.conn())
            .await
            .map_err(map_redis_error)?;
        DateTime::from_timestamp(secs, micros.saturating_mul(1000))
            .ok_or_else(|| StoreError::Backend(format!("invalid server time {}", secs)))
    }
}
