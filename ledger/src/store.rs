use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::types::{StatusCode, Subscription, Transaction, UserSubscription};
use uuid::Uuid;

use crate::error::Result;

/// Typed accessors over the three billing record kinds.
///
/// Every mutation commits individually; no method opens a transaction that
/// spans another call. The gateway is the source of truth for money state,
/// so a crash between a gateway call and the matching ledger write is
/// recovered by re-polling.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // transactions

    async fn transactions_with_status(&self, status: StatusCode) -> Result<Vec<Transaction>>;

    async fn transaction_by_payment_id(&self, payment_id: &str) -> Result<Option<Transaction>>;

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()>;

    async fn set_transaction_status(&self, id: Uuid, status: StatusCode) -> Result<()>;

    /// Set the validity window a completed payment bought.
    async fn set_transaction_window(
        &self,
        id: Uuid,
        starts: DateTime<Utc>,
        ends: DateTime<Utc>,
    ) -> Result<()>;

    /// Mark the refunded payment transaction: status becomes `Refunded` and
    /// `ends` shrinks to the corrected boundary.
    async fn mark_transaction_refunded(&self, id: Uuid, ends: DateTime<Utc>) -> Result<()>;

    /// Shift both window bounds of every Payment/Autopayment transaction
    /// with `starts >= from` by `days` (signed), except the `excluding` row
    /// (the refunded payment keeps its corrected window). Returns the number
    /// of rows moved.
    async fn shift_payment_windows_from(
        &self,
        from: DateTime<Utc>,
        days: i64,
        excluding: Uuid,
    ) -> Result<u64>;

    // user subscriptions

    async fn user_subscription_by_id(&self, id: Uuid) -> Result<Option<UserSubscription>>;

    async fn set_user_subscription_expires(&self, id: Uuid, expires: DateTime<Utc>) -> Result<()>;

    async fn set_user_subscription_auto_pay(
        &self,
        id: Uuid,
        auto_pay_id: Option<String>,
    ) -> Result<()>;

    /// Rows with `now <= expires < now + horizon_days`.
    async fn user_subscriptions_expiring_within(
        &self,
        now: DateTime<Utc>,
        horizon_days: i64,
    ) -> Result<Vec<UserSubscription>>;

    /// Rows with `now - lookback_days < expires < now`. The lookback bounds
    /// the scan; rows older than it are handled by [`Self::delete_user_subscriptions_expired_before`].
    async fn user_subscriptions_expired_within(
        &self,
        now: DateTime<Utc>,
        lookback_days: i64,
    ) -> Result<Vec<UserSubscription>>;

    /// Drop rows whose expiry precedes `cutoff`. Returns the number of rows
    /// removed.
    async fn delete_user_subscriptions_expired_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    // subscriptions

    async fn subscription_by_id(&self, id: Uuid) -> Result<Option<Subscription>>;

    /// Role ids referenced by active (`actual = true`) subscriptions.
    async fn active_role_ids(&self) -> Result<Vec<Uuid>>;

    /// Flip `actual = false` on every subscription granting `role_id`.
    async fn deactivate_subscriptions_with_role(&self, role_id: Uuid) -> Result<u64>;
}
