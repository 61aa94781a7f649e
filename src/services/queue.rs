use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::error::{Classify, ErrorClass};
use crate::models::job::{ReceiptHandle, ReceivedMessage};

/// Lua prelude moving in-flight messages whose deadline has passed back to
/// the front of the pending list.
///
/// KEYS[1..3]: pending, inflight, messages. ARGV[1]: now (ms)
macro_rules! requeue_expired {
    () => {
        r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, receipt in ipairs(expired) do
    redis.call('ZREM', KEYS[2], receipt)
    local id = string.match(receipt, '^([^:]+):')
    if id and redis.call('HEXISTS', KEYS[3], id) == 1 then
        redis.call('RPUSH', KEYS[1], id)
    end
end
"#
    };
}

/// Returns expired in-flight messages to the pending list, then claims one.
///
/// KEYS: pending, inflight, messages, receive counts
/// ARGV: now (ms), visibility deadline (ms), receipt nonce
const RECEIVE_SCRIPT: &str = concat!(
    requeue_expired!(),
    r#"
while true do
    local id = redis.call('RPOP', KEYS[1])
    if not id then
        return nil
    end
    local body = redis.call('HGET', KEYS[3], id)
    if body then
        local receipt = id .. ':' .. ARGV[3]
        redis.call('ZADD', KEYS[2], ARGV[2], receipt)
        local count = redis.call('HINCRBY', KEYS[4], id, 1)
        return {id, body, receipt, count}
    end
end
"#
);

/// Counts pending messages after reclaiming expired ones, so a job stranded
/// by a dead worker is visible to the backlog metric without a receive.
///
/// KEYS: pending, inflight, messages
/// ARGV: now (ms)
const DEPTH_SCRIPT: &str = concat!(requeue_expired!(), "return redis.call('LLEN', KEYS[1])\n");

/// Removes a message only while the caller still holds its visibility window.
///
/// KEYS: inflight, messages, receive counts
/// ARGV: receipt, message id
const DELETE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('HDEL', KEYS[2], ARGV[2])
redis.call('HDEL', KEYS[3], ARGV[2])
return 1
"#;

/// Source of jobs with receive/delete semantics and a visibility timeout.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Wait up to `wait` for one message. Returns `None` when the window passes empty.
    async fn receive(&self, wait: Duration) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Permanently remove a received message.
    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Messages waiting to be received, including in-flight ones whose
    /// visibility timeout has lapsed. Live in-flight messages are excluded.
    async fn approximate_depth(&self) -> Result<u64, QueueError>;
}

/// Body accepted by [`JobQueue::enqueue`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub photo_path: String,
    pub chat_id: String,
}

/// Redis-backed queue with at-least-once delivery.
///
/// A received message stays hidden for the visibility timeout. If it is not
/// deleted within that window the next receive puts it back in line.
pub struct JobQueue {
    client: redis::Client,
    keys: QueueKeys,
    visibility_timeout: Duration,
    poll_interval: Duration,
    receive_script: redis::Script,
    delete_script: redis::Script,
    depth_script: redis::Script,
}

#[derive(Debug, Clone, PartialEq)]
struct QueueKeys {
    pending: String,
    inflight: String,
    messages: String,
    receive_counts: String,
}

impl QueueKeys {
    fn new(queue_name: &str) -> Self {
        Self {
            pending: format!("{queue_name}:pending"),
            inflight: format!("{queue_name}:inflight"),
            messages: format!("{queue_name}:messages"),
            receive_counts: format!("{queue_name}:receive_counts"),
        }
    }
}

impl JobQueue {
    pub fn new(
        redis_url: &str,
        queue_name: &str,
        visibility_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            keys: QueueKeys::new(queue_name),
            visibility_timeout,
            poll_interval,
            receive_script: redis::Script::new(RECEIVE_SCRIPT),
            delete_script: redis::Script::new(DELETE_SCRIPT),
            depth_script: redis::Script::new(DEPTH_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Enqueue a job, returning the assigned message id.
    pub async fn enqueue(&self, job: &NewJob) -> Result<String, QueueError> {
        let mut conn = self.connection().await?;
        let message_id = Uuid::new_v4().to_string();
        let body = serde_json::to_string(job).map_err(QueueError::Serialize)?;

        redis::pipe()
            .atomic()
            .hset(&self.keys.messages, &message_id, &body)
            .ignore()
            .lpush(&self.keys.pending, &message_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        Ok(message_id)
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn try_receive(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let now_ms = Utc::now().timestamp_millis();
        let deadline_ms = now_ms + self.visibility_timeout.as_millis() as i64;
        let nonce = Uuid::new_v4().simple().to_string();

        let claimed: Option<(String, String, String, u64)> = self
            .receive_script
            .key(&self.keys.pending)
            .key(&self.keys.inflight)
            .key(&self.keys.messages)
            .key(&self.keys.receive_counts)
            .arg(now_ms)
            .arg(deadline_ms)
            .arg(nonce)
            .invoke_async(conn)
            .await
            .map_err(QueueError::Redis)?;

        Ok(claimed.map(|(message_id, body, receipt, receive_count)| ReceivedMessage {
            message_id,
            body,
            receipt: ReceiptHandle(receipt),
            receive_count,
        }))
    }
}

#[async_trait]
impl JobSource for JobQueue {
    async fn receive(&self, wait: Duration) -> Result<Option<ReceivedMessage>, QueueError> {
        let deadline = Instant::now() + wait;
        let mut conn = self.connection().await?;

        loop {
            if let Some(message) = self.try_receive(&mut conn).await? {
                return Ok(Some(message));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let message_id = message_id_of(receipt)?;
        let mut conn = self.connection().await?;

        let removed: i64 = self
            .delete_script
            .key(&self.keys.inflight)
            .key(&self.keys.messages)
            .key(&self.keys.receive_counts)
            .arg(&receipt.0)
            .arg(message_id)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        if removed == 0 {
            return Err(QueueError::StaleReceipt(receipt.0.clone()));
        }
        Ok(())
    }

    async fn approximate_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = self
            .depth_script
            .key(&self.keys.pending)
            .key(&self.keys.inflight)
            .key(&self.keys.messages)
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

fn message_id_of(receipt: &ReceiptHandle) -> Result<&str, QueueError> {
    match receipt.0.split_once(':') {
        Some((id, _)) if !id.is_empty() => Ok(id),
        _ => Err(QueueError::InvalidReceipt(receipt.0.clone())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Receipt {0} no longer holds the message (visibility timeout expired)")]
    StaleReceipt(String),

    #[error("Malformed receipt handle: {0}")]
    InvalidReceipt(String),
}

impl Classify for QueueError {
    fn class(&self) -> ErrorClass {
        match self {
            QueueError::Redis(e) => match e.kind() {
                redis::ErrorKind::InvalidClientConfig | redis::ErrorKind::AuthenticationFailed => {
                    ErrorClass::Configuration
                }
                _ => ErrorClass::Transient,
            },
            QueueError::Serialize(_) | QueueError::InvalidReceipt(_) => ErrorClass::Data,
            QueueError::StaleReceipt(_) => ErrorClass::Transient,
        }
    }
}
