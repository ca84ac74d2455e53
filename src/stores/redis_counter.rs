//! Redis-backed rate-limit counters for multi-instance and stateless
//! deployments, where the process-local map cannot be shared.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use log::info;
use redis::AsyncCommands;

use crate::error::AppError;
use crate::stores::{CounterSnapshot, RateCounterStore};

pub struct RedisCounterStore {
    connection_manager: redis::aio::ConnectionManager,
    key_prefix: String,
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str, key_prefix: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)?;
        let connection_manager = redis::aio::ConnectionManager::new(client).await?;

        info!("Redis connection established for rate limiting");

        Ok(Self {
            connection_manager,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn counter_key(&self, key: &str) -> String {
        format!("rate_limit:{}:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl RateCounterStore for RedisCounterStore {
    async fn increment_or_reset(
        &self,
        key: &str,
        window_ms: u64,
    ) -> Result<CounterSnapshot, AppError> {
        let redis_key = self.counter_key(key);
        let mut conn = self.connection_manager.clone();

        let count: i64 = conn.incr(&redis_key, 1).await?;

        if count == 1 {
            // first hit in the window arms the expiry
            let _: () = redis::cmd("PEXPIRE")
                .arg(&redis_key)
                .arg(window_ms as i64)
                .query_async(&mut conn)
                .await?;
        }

        let pttl: i64 = redis::cmd("PTTL")
            .arg(&redis_key)
            .query_async(&mut conn)
            .await?;

        let reset_at = if pttl > 0 {
            Utc::now() + Duration::milliseconds(pttl)
        } else {
            // key lost its expiry (races on the first increment); re-arm
            let _: () = redis::cmd("PEXPIRE")
                .arg(&redis_key)
                .arg(window_ms as i64)
                .query_async(&mut conn)
                .await?;
            Utc::now() + Duration::milliseconds(window_ms as i64)
        };

        Ok(CounterSnapshot {
            count: count.max(0) as u64,
            reset_at,
        })
    }
}
