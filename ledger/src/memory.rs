use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use core_types::types::{StatusCode, Subscription, Transaction, UserSubscription};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::store::LedgerStore;

/// In-memory [`LedgerStore`] with the same observable semantics as the
/// Postgres implementation. Used by tests and local runs.
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    subscriptions: HashMap<Uuid, Subscription>,
    user_subscriptions: HashMap<Uuid, UserSubscription>,
    transactions: HashMap<Uuid, Transaction>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_subscription(&self, subscription: Subscription) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(subscription.id, subscription);
    }

    pub fn put_user_subscription(&self, user_subscription: UserSubscription) {
        self.state
            .lock()
            .unwrap()
            .user_subscriptions
            .insert(user_subscription.id, user_subscription);
    }

    pub fn put_transaction(&self, transaction: Transaction) {
        self.state
            .lock()
            .unwrap()
            .transactions
            .insert(transaction.id, transaction);
    }

    pub fn transaction(&self, id: Uuid) -> Option<Transaction> {
        self.state.lock().unwrap().transactions.get(&id).cloned()
    }

    pub fn subscription(&self, id: Uuid) -> Option<Subscription> {
        self.state.lock().unwrap().subscriptions.get(&id).cloned()
    }

    pub fn user_subscription(&self, id: Uuid) -> Option<UserSubscription> {
        self.state
            .lock()
            .unwrap()
            .user_subscriptions
            .get(&id)
            .cloned()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn transactions_with_status(&self, status: StatusCode) -> Result<Vec<Transaction>> {
        let state = self.state.lock().unwrap();
        let mut matched: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| t.status_code == status)
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.created);
        Ok(matched)
    }

    async fn transaction_by_payment_id(&self, payment_id: &str) -> Result<Option<Transaction>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .transactions
            .values()
            .find(|t| t.payment_id == payment_id)
            .cloned())
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn set_transaction_status(&self, id: Uuid, status: StatusCode) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(t) = state.transactions.get_mut(&id) {
            t.status_code = status;
            t.modified = Utc::now();
        }
        Ok(())
    }

    async fn set_transaction_window(
        &self,
        id: Uuid,
        starts: DateTime<Utc>,
        ends: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(t) = state.transactions.get_mut(&id) {
            t.starts = starts;
            t.ends = ends;
            t.modified = Utc::now();
        }
        Ok(())
    }

    async fn mark_transaction_refunded(&self, id: Uuid, ends: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(t) = state.transactions.get_mut(&id) {
            t.status_code = StatusCode::Refunded;
            t.ends = ends;
            t.modified = Utc::now();
        }
        Ok(())
    }

    async fn shift_payment_windows_from(
        &self,
        from: DateTime<Utc>,
        days: i64,
        excluding: Uuid,
    ) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut moved = 0;
        for t in state.transactions.values_mut() {
            if t.id != excluding && t.transaction_type.buys_time() && t.starts >= from {
                t.starts += Duration::days(days);
                t.ends += Duration::days(days);
                t.modified = Utc::now();
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn user_subscription_by_id(&self, id: Uuid) -> Result<Option<UserSubscription>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .user_subscriptions
            .get(&id)
            .cloned())
    }

    async fn set_user_subscription_expires(&self, id: Uuid, expires: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(us) = state.user_subscriptions.get_mut(&id) {
            us.expires = expires;
            us.modified = Utc::now();
        }
        Ok(())
    }

    async fn set_user_subscription_auto_pay(
        &self,
        id: Uuid,
        auto_pay_id: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(us) = state.user_subscriptions.get_mut(&id) {
            us.auto_pay_id = auto_pay_id;
            us.modified = Utc::now();
        }
        Ok(())
    }

    async fn user_subscriptions_expiring_within(
        &self,
        now: DateTime<Utc>,
        horizon_days: i64,
    ) -> Result<Vec<UserSubscription>> {
        let state = self.state.lock().unwrap();
        let horizon = now + Duration::days(horizon_days);
        let mut matched: Vec<UserSubscription> = state
            .user_subscriptions
            .values()
            .filter(|us| us.expires >= now && us.expires < horizon)
            .cloned()
            .collect();
        matched.sort_by_key(|us| us.expires);
        Ok(matched)
    }

    async fn user_subscriptions_expired_within(
        &self,
        now: DateTime<Utc>,
        lookback_days: i64,
    ) -> Result<Vec<UserSubscription>> {
        let state = self.state.lock().unwrap();
        let floor = now - Duration::days(lookback_days);
        let mut matched: Vec<UserSubscription> = state
            .user_subscriptions
            .values()
            .filter(|us| us.expires < now && us.expires > floor)
            .cloned()
            .collect();
        matched.sort_by_key(|us| us.expires);
        Ok(matched)
    }

    async fn delete_user_subscriptions_expired_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.user_subscriptions.len();
        state.user_subscriptions.retain(|_, us| us.expires >= cutoff);
        Ok((before - state.user_subscriptions.len()) as u64)
    }

    async fn subscription_by_id(&self, id: Uuid) -> Result<Option<Subscription>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .get(&id)
            .cloned())
    }

    async fn active_role_ids(&self) -> Result<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.actual)
            .map(|s| s.role_id)
            .collect())
    }

    async fn deactivate_subscriptions_with_role(&self, role_id: Uuid) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut flipped = 0;
        for s in state.subscriptions.values_mut() {
            if s.role_id == role_id && s.actual {
                s.actual = false;
                s.modified = Utc::now();
                flipped += 1;
            }
        }
        Ok(flipped)
    }
}
