use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::{DedupError, DedupKey, DedupStore};

/// In-memory claim store with the Redis semantics, for tests and local runs.
#[derive(Default)]
pub struct MemoryDedupStore {
    claims: Mutex<HashMap<String, Instant>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn claim(&self, key: &DedupKey, ttl: Duration) -> Result<bool, DedupError> {
        let mut claims = self.claims.lock().unwrap();
        let now = Instant::now();
        claims.retain(|_, deadline| *deadline > now);
        let rendered = key.render();
        if claims.contains_key(&rendered) {
            return Ok(false);
        }
        claims.insert(rendered, now + ttl);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn second_claim_for_same_event_loses() {
        let store = MemoryDedupStore::new();
        let key = DedupKey::AutoPay {
            user_subscription_id: Uuid::new_v4(),
            expires: Utc::now(),
        };
        assert!(store.claim(&key, Duration::from_secs(60)).await.unwrap());
        assert!(!store.claim(&key, Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn expired_claim_can_be_retaken() {
        let store = MemoryDedupStore::new();
        let key = DedupKey::Expired {
            user_subscription_id: Uuid::new_v4(),
            expires: Utc::now(),
        };
        assert!(store.claim(&key, Duration::from_millis(1)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.claim(&key, Duration::from_secs(60)).await.unwrap());
    }
}
