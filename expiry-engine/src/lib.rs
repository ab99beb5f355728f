// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Expiry sweeper: walks user subscriptions around their expiry boundary and
//! keeps entitlements honest.
//!
//! Three independent passes run each cycle. Near-expiry rows either get an
//! autopayment (when a stored method exists) or an expiry warning; lapsed
//! rows lose their role and are eventually dropped; subscriptions whose role
//! vanished upstream are deactivated. Side effects are deduplicated per
//! `(user_subscription, expires)` event so repeated sweeps within one
//! horizon never double-charge or double-notify.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use core_types::types::{Notification, StatusCode, Transaction, TransactionType, UserSubscription};
use dedup_store::{DedupError, DedupKey, DedupStore};
use entitlement_client::{EntitlementError, EntitlementService};
use gateway_client::{GatewayError, PaymentGateway};
use ledger::{LedgerError, LedgerStore};
use log::{debug, error, info, warn};
use notification_client::{Notifier, NotifyError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("entitlement error: {0}")]
    Entitlement(#[from] EntitlementError),
    #[error("notification error: {0}")]
    Notify(#[from] NotifyError),
    #[error("dedup error: {0}")]
    Dedup(#[from] DedupError),
}

pub struct ExpirySweeper {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    entitlement: Arc<dyn EntitlementService>,
    notifier: Arc<dyn Notifier>,
    dedup: Arc<dyn DedupStore>,
    horizon_days: i64,
    /// Claim TTL for autopayment triggers: one transaction timeout, so a
    /// charge that never settles can be retried after it fails.
    autopay_claim_ttl: StdDuration,
}

impl ExpirySweeper {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        entitlement: Arc<dyn EntitlementService>,
        notifier: Arc<dyn Notifier>,
        dedup: Arc<dyn DedupStore>,
        horizon_days: i64,
        transaction_timeout_minutes: i64,
    ) -> Self {
        Self {
            ledger,
            gateway,
            entitlement,
            notifier,
            dedup,
            horizon_days,
            autopay_claim_ttl: StdDuration::from_secs(transaction_timeout_minutes.max(1) as u64 * 60),
        }
    }

    fn event_claim_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.horizon_days.max(1) as u64 * 24 * 60 * 60)
    }

    /// Soon-to-expire pass: autopay or warn, once per expiry event.
    pub async fn sweep_soon_to_expire(&self) -> Result<(), SweepError> {
        let now = Utc::now();
        let due = self
            .ledger
            .user_subscriptions_expiring_within(now, self.horizon_days)
            .await?;
        debug!("{} user subscriptions near expiry", due.len());
        for user_subscription in &due {
            if let Err(err) = self.process_near_expiry(user_subscription).await {
                error!(
                    "near-expiry handling for user subscription {} skipped: {err}",
                    user_subscription.id
                );
            }
        }
        Ok(())
    }

    async fn process_near_expiry(
        &self,
        user_subscription: &UserSubscription,
    ) -> Result<(), SweepError> {
        match &user_subscription.auto_pay_id {
            Some(method_id) => {
                let key = DedupKey::AutoPay {
                    user_subscription_id: user_subscription.id,
                    expires: user_subscription.expires,
                };
                if !self.dedup.claim(&key, self.autopay_claim_ttl).await? {
                    return Ok(());
                }
                self.trigger_autopayment(user_subscription, method_id).await
            }
            None => {
                let key = DedupKey::ExpiryWarning {
                    user_subscription_id: user_subscription.id,
                    expires: user_subscription.expires,
                };
                if !self.dedup.claim(&key, self.event_claim_ttl()).await? {
                    return Ok(());
                }
                debug!(
                    "expiry warning for user {} (expires {})",
                    user_subscription.user_id, user_subscription.expires
                );
                self.notifier
                    .send_notification(&Notification::new(
                        user_subscription.user_id.to_string(),
                        "subscription_expiration",
                        user_subscription.expires.to_rfc3339(),
                    ))
                    .await?;
                Ok(())
            }
        }
    }

    /// Charge the stored method and record the pending autopayment; the
    /// reconciler drives it to a terminal state from here.
    async fn trigger_autopayment(
        &self,
        user_subscription: &UserSubscription,
        method_id: &str,
    ) -> Result<(), SweepError> {
        let Some(subscription) = self
            .ledger
            .subscription_by_id(user_subscription.subscription_id)
            .await?
        else {
            warn!(
                "subscription {} missing for user subscription {}",
                user_subscription.subscription_id, user_subscription.id
            );
            return Ok(());
        };
        let transaction_id = Uuid::new_v4();
        let state = self
            .gateway
            .create_autopayment(
                subscription.amount,
                &subscription.currency,
                method_id,
                transaction_id,
            )
            .await?;
        let now = Utc::now();
        let row = Transaction {
            id: transaction_id,
            user_id: user_subscription.user_id,
            payment_id: state.payment_id,
            user_subscription_id: user_subscription.id,
            amount: subscription.amount,
            currency: subscription.currency.clone(),
            status_code: StatusCode::Processing,
            transaction_type: TransactionType::Autopayment,
            starts: now,
            ends: now,
            created: now,
            modified: now,
        };
        self.ledger.insert_transaction(&row).await?;
        info!(
            "autopayment {} created for user subscription {}",
            transaction_id, user_subscription.id
        );
        Ok(())
    }

    /// Expired pass: revoke the role once per lapsed expiry, then drop rows
    /// that have fallen out of the lookback window.
    pub async fn sweep_expired(&self) -> Result<(), SweepError> {
        let now = Utc::now();
        let lapsed = self
            .ledger
            .user_subscriptions_expired_within(now, self.horizon_days)
            .await?;
        debug!("{} lapsed user subscriptions", lapsed.len());
        for user_subscription in &lapsed {
            if let Err(err) = self.process_lapsed(user_subscription).await {
                error!(
                    "lapsed handling for user subscription {} skipped: {err}",
                    user_subscription.id
                );
            }
        }
        let removed = self
            .ledger
            .delete_user_subscriptions_expired_before(now - Duration::days(self.horizon_days))
            .await?;
        if removed > 0 {
            info!("{removed} stale user subscriptions removed");
        }
        Ok(())
    }

    async fn process_lapsed(
        &self,
        user_subscription: &UserSubscription,
    ) -> Result<(), SweepError> {
        let key = DedupKey::Expired {
            user_subscription_id: user_subscription.id,
            expires: user_subscription.expires,
        };
        if !self.dedup.claim(&key, self.event_claim_ttl()).await? {
            return Ok(());
        }
        let Some(subscription) = self
            .ledger
            .subscription_by_id(user_subscription.subscription_id)
            .await?
        else {
            warn!(
                "subscription {} missing for lapsed user subscription {}",
                user_subscription.subscription_id, user_subscription.id
            );
            return Ok(());
        };
        self.entitlement
            .revoke_role(user_subscription.user_id, subscription.role_id)
            .await?;
        debug!(
            "role {} revoked from user {}",
            subscription.role_id, user_subscription.user_id
        );
        Ok(())
    }

    /// Orphaned-role pass: deactivate subscriptions whose role no longer
    /// exists upstream.
    pub async fn reconcile_roles(&self) -> Result<(), SweepError> {
        let upstream: HashSet<String> = self
            .entitlement
            .list_roles()
            .await?
            .into_iter()
            .map(|role| role.id)
            .collect();
        debug!("{} roles known upstream", upstream.len());
        let referenced = self.ledger.active_role_ids().await?;
        for role_id in referenced {
            if upstream.contains(&role_id.to_string()) {
                continue;
            }
            debug!("role {role_id} no longer exists upstream");
            match self.ledger.deactivate_subscriptions_with_role(role_id).await {
                Ok(count) => {
                    info!("{count} subscriptions deactivated for missing role {role_id}")
                }
                Err(err) => {
                    error!("failed deactivating subscriptions for role {role_id}: {err}")
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
