use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use crate::{DedupError, DedupKey, DedupStore};

/// Redis-backed claim store. Claims are a single `SET NX EX`, so two
/// concurrent sweepers cannot both win the same event.
pub struct RedisDedupStore {
    conn: ConnectionManager,
}

impl RedisDedupStore {
    pub async fn connect(url: &str) -> Result<Self, DedupError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn claim(&self, key: &DedupKey, ttl: Duration) -> Result<bool, DedupError> {
        let mut conn = self.conn.clone();
        let outcome: Option<String> = redis::cmd("SET")
            .arg(key.render())
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(outcome.is_some())
    }
}
