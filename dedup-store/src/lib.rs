// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Expiring-key claim store used to suppress repeated side effects for the
//! same logical expiry event across polling cycles.
//!
//! Keys are built through [`DedupKey`] so the writer and any future reader
//! cannot drift apart on the rendered format.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryDedupStore;
pub use redis_store::RedisDedupStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Typed dedup key for one `(user_subscription, expires)` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupKey {
    /// An autopayment was triggered for this expiry.
    AutoPay {
        user_subscription_id: Uuid,
        expires: DateTime<Utc>,
    },
    /// An expiry-warning notification went out for this expiry.
    ExpiryWarning {
        user_subscription_id: Uuid,
        expires: DateTime<Utc>,
    },
    /// The role revocation for this lapsed expiry was performed.
    Expired {
        user_subscription_id: Uuid,
        expires: DateTime<Utc>,
    },
}

impl DedupKey {
    pub fn render(&self) -> String {
        match self {
            DedupKey::AutoPay {
                user_subscription_id,
                expires,
            } => format!(
                "subscription_auto_pay_{}_{}",
                user_subscription_id,
                expires.timestamp()
            ),
            DedupKey::ExpiryWarning {
                user_subscription_id,
                expires,
            } => format!(
                "subscription_expiration_{}_{}",
                user_subscription_id,
                expires.timestamp()
            ),
            DedupKey::Expired {
                user_subscription_id,
                expires,
            } => format!(
                "subscription_expired_{}_{}",
                user_subscription_id,
                expires.timestamp()
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("dedup backend error: {0}")]
    Backend(#[from] redis::RedisError),
}

/// Claim-once store with expiring keys.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Atomically claim `key` for `ttl`. Returns true when this caller won
    /// the claim; false when the key is already held.
    async fn claim(&self, key: &DedupKey, ttl: Duration) -> Result<bool, DedupError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_renders_are_distinct_per_kind_and_event() {
        let id = Uuid::new_v4();
        let expires = Utc::now();
        let auto = DedupKey::AutoPay {
            user_subscription_id: id,
            expires,
        };
        let warn = DedupKey::ExpiryWarning {
            user_subscription_id: id,
            expires,
        };
        let expired = DedupKey::Expired {
            user_subscription_id: id,
            expires,
        };
        assert_ne!(auto.render(), warn.render());
        assert_ne!(warn.render(), expired.render());
        assert!(auto.render().starts_with("subscription_auto_pay_"));
        assert!(auto.render().ends_with(&expires.timestamp().to_string()));
    }

    #[test]
    fn same_event_renders_identically() {
        let id = Uuid::new_v4();
        let expires = Utc::now();
        let a = DedupKey::Expired {
            user_subscription_id: id,
            expires,
        };
        let b = DedupKey::Expired {
            user_subscription_id: id,
            expires,
        };
        assert_eq!(a.render(), b.render());
    }
}
