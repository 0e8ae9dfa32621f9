//! Redis Streams event bus
//!
//! Events are appended with `XADD` (capped with `MAXLEN ~`) under a single
//! `payload` field. Consumers share a consumer group created at `$`, so a
//! fresh group starts at the newest entry and never replays history.

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, streams::StreamReadReply, Client};

use crate::{
    config::QueueConfig,
    error::{AppError, AppResult},
    models::event::CatalogEvent,
};

use super::events::{Delivery, EventBus, EventSubscription};

const PAYLOAD_FIELD: &str = "payload";
const STREAM_MAX_LEN: usize = 10_000;

#[derive(Clone)]
pub struct RedisEventBus {
    client: Client,
    conn: MultiplexedConnection,
    config: QueueConfig,
}

impl RedisEventBus {
    /// Connect and check the server answers
    pub async fn connect(config: QueueConfig) -> AppResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| AppError::Internal(format!("Failed to create Redis client: {}", e)))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to connect to Redis: {}", e)))?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AppError::Internal(format!("Redis connection test failed: {}", e)))?;

        Ok(Self {
            client,
            conn,
            config,
        })
    }

    async fn ensure_group(&self, conn: &mut MultiplexedConnection) -> AppResult<()> {
        let created = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.topic)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async::<_, ()>(conn)
            .await;

        match created {
            Ok(()) => {
                tracing::info!(
                    topic = %self.config.topic,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(AppError::Queue(format!("Failed to create consumer group: {}", e))),
        }
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: &CatalogEvent) -> AppResult<()> {
        let payload = event
            .to_json()
            .map_err(|e| AppError::Internal(format!("Failed to encode event: {}", e)))?;

        let mut conn = self.conn.clone();
        let id: String = redis::cmd("XADD")
            .arg(&self.config.topic)
            .arg("MAXLEN")
            .arg("~")
            .arg(STREAM_MAX_LEN)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Queue(format!("XADD failed: {}", e)))?;

        if self.config.min_replica_acks > 0 {
            let acked: i64 = redis::cmd("WAIT")
                .arg(self.config.min_replica_acks)
                .arg(self.config.replica_timeout_ms)
                .query_async(&mut conn)
                .await
                .map_err(|e| AppError::Queue(format!("WAIT failed: {}", e)))?;

            if acked < i64::from(self.config.min_replica_acks) {
                return Err(AppError::Queue(format!(
                    "Event {} acknowledged by {} of {} replicas",
                    id, acked, self.config.min_replica_acks
                )));
            }
        }

        tracing::debug!(event = event.kind(), stream_id = %id, "Event published");
        Ok(())
    }

    async fn subscribe(&self) -> AppResult<Box<dyn EventSubscription>> {
        // Blocking reads get their own connection
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get Redis connection: {}", e)))?;

        self.ensure_group(&mut conn).await?;

        Ok(Box::new(RedisSubscription {
            conn,
            consumer: format!("consumer-{}", std::process::id()),
            config: self.config.clone(),
        }))
    }
}

pub struct RedisSubscription {
    conn: MultiplexedConnection,
    consumer: String,
    config: QueueConfig,
}

#[async_trait]
impl EventSubscription for RedisSubscription {
    async fn next_batch(&mut self) -> AppResult<Vec<Delivery>> {
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(self.config.batch_size)
            .arg("BLOCK")
            .arg(self.config.block_ms)
            .arg("STREAMS")
            .arg(&self.config.topic)
            .arg(">")
            .query_async(&mut self.conn)
            .await
            .map_err(|e| AppError::Queue(format!("XREADGROUP failed: {}", e)))?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let deliveries = reply
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .map(|entry| {
                // Entries without a payload are passed on empty and skipped as malformed
                let payload = entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_default();
                Delivery {
                    id: entry.id,
                    payload,
                }
            })
            .collect();

        Ok(deliveries)
    }

    async fn ack(&mut self, ids: &[String]) -> AppResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        redis::cmd("XACK")
            .arg(&self.config.topic)
            .arg(&self.config.consumer_group)
            .arg(ids)
            .query_async::<_, i64>(&mut self.conn)
            .await
            .map_err(|e| AppError::Queue(format!("XACK failed: {}", e)))?;

        Ok(())
    }
}
