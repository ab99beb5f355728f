// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Transaction reconciler: the state machine that drives every `Processing`
//! transaction to a terminal state.
//!
//! Each cycle polls the gateway for the due set, applies completion, failure
//! or timeout outcomes, and keeps the owning user subscription's expiry and
//! role in step. Items are processed strictly sequentially and in isolation:
//! one corrupt record must never block the reconciliation of the rest.

use std::sync::Arc;

use chrono::{Duration, Utc};
use core_types::types::{Notification, StatusCode, Transaction, TransactionType};
use entitlement_client::{EntitlementError, EntitlementService};
use gateway_client::{GatewayError, MethodState, PaymentGateway, PaymentState, RefundState};
use ledger::{LedgerError, LedgerStore};
use log::{debug, error, warn};
use notification_client::{Notifier, NotifyError};
use proration::{clamp_refund_ends, delta_days};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("entitlement error: {0}")]
    Entitlement(#[from] EntitlementError),
    #[error("notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// What the gateway resolved for one polled transaction.
enum GatewayResolution {
    Payment(PaymentState),
    Refund(RefundState),
    Method(MethodState),
}

impl GatewayResolution {
    fn status(&self) -> StatusCode {
        match self {
            GatewayResolution::Payment(state) => state.status,
            GatewayResolution::Refund(state) => state.status,
            GatewayResolution::Method(state) => state.status,
        }
    }
}

pub struct TransactionReconciler {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    entitlement: Arc<dyn EntitlementService>,
    notifier: Arc<dyn Notifier>,
    transaction_timeout: Duration,
}

impl TransactionReconciler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        entitlement: Arc<dyn EntitlementService>,
        notifier: Arc<dyn Notifier>,
        timeout_minutes: i64,
    ) -> Self {
        Self {
            ledger,
            gateway,
            entitlement,
            notifier,
            transaction_timeout: Duration::minutes(timeout_minutes),
        }
    }

    /// One reconciliation pass over every `Processing` transaction.
    pub async fn run_cycle(&self) -> Result<(), ReconcileError> {
        let due = self
            .ledger
            .transactions_with_status(StatusCode::Processing)
            .await?;
        debug!("{} transactions awaiting reconciliation", due.len());
        for transaction in &due {
            if let Err(err) = self.process_transaction(transaction).await {
                error!(
                    "transaction {} left for next cycle: {err}",
                    transaction.id
                );
            }
        }
        Ok(())
    }

    async fn process_transaction(&self, transaction: &Transaction) -> Result<(), ReconcileError> {
        let resolution = match transaction.transaction_type {
            // Method removal is local bookkeeping; no gateway round-trip.
            TransactionType::PaymentMethodRemove => {
                return self.complete_method_remove(transaction).await;
            }
            TransactionType::Payment | TransactionType::Autopayment => self
                .gateway
                .payment_status(&transaction.payment_id)
                .await?
                .map(GatewayResolution::Payment),
            TransactionType::Refund => self
                .gateway
                .refund_status(&transaction.payment_id)
                .await?
                .map(GatewayResolution::Refund),
            TransactionType::PaymentMethodAdd => self
                .gateway
                .payment_method_status(&transaction.payment_id)
                .await?
                .map(GatewayResolution::Method),
        };

        let Some(resolution) = resolution else {
            warn!(
                "gateway state for {:?} transaction {} not yet resolvable",
                transaction.transaction_type, transaction.id
            );
            return Ok(());
        };

        debug!(
            "transaction {} resolved as {:?}",
            transaction.id,
            resolution.status()
        );
        match resolution.status() {
            StatusCode::Completed => self.complete(transaction, resolution).await,
            StatusCode::Failed => self.fail(transaction).await,
            _ if self.timed_out(transaction) => self.timeout(transaction).await,
            _ => {
                debug!("transaction {} unchanged this cycle", transaction.id);
                Ok(())
            }
        }
    }

    fn timed_out(&self, transaction: &Transaction) -> bool {
        transaction.created + self.transaction_timeout < Utc::now()
    }

    async fn complete(
        &self,
        transaction: &Transaction,
        resolution: GatewayResolution,
    ) -> Result<(), ReconcileError> {
        match resolution {
            GatewayResolution::Method(state) => {
                self.complete_method_add(transaction, state.method_id).await
            }
            GatewayResolution::Refund(state) => {
                self.complete_settlement(transaction, Some(&state.payment_id))
                    .await
            }
            GatewayResolution::Payment(_) => self.complete_settlement(transaction, None).await,
        }
    }

    async fn complete_method_remove(
        &self,
        transaction: &Transaction,
    ) -> Result<(), ReconcileError> {
        debug!("method removal transaction {}", transaction.id);
        self.ledger
            .set_user_subscription_auto_pay(transaction.user_subscription_id, None)
            .await?;
        self.ledger
            .set_transaction_status(transaction.id, StatusCode::Completed)
            .await?;
        Ok(())
    }

    async fn complete_method_add(
        &self,
        transaction: &Transaction,
        method_id: String,
    ) -> Result<(), ReconcileError> {
        debug!(
            "storing payment method {} on user subscription {}",
            method_id, transaction.user_subscription_id
        );
        self.ledger
            .set_user_subscription_auto_pay(transaction.user_subscription_id, Some(method_id))
            .await?;
        self.ledger
            .set_transaction_status(transaction.id, StatusCode::Completed)
            .await?;
        Ok(())
    }

    /// Shared completion path for every transaction that moves money:
    /// payments and autopayments extend the expiry, refunds shrink it and
    /// rewrite the transaction timeline.
    async fn complete_settlement(
        &self,
        transaction: &Transaction,
        refunded_payment_id: Option<&str>,
    ) -> Result<(), ReconcileError> {
        let Some(user_subscription) = self
            .ledger
            .user_subscription_by_id(transaction.user_subscription_id)
            .await?
        else {
            warn!(
                "user subscription {} missing for transaction {}",
                transaction.user_subscription_id, transaction.id
            );
            return Ok(());
        };
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

        let now = Utc::now();
        let expires_from = user_subscription.expires.max(now);
        let is_refund = transaction.transaction_type == TransactionType::Refund;
        let delta = delta_days(transaction.amount, subscription.amount, subscription.period);
        let sign = if is_refund { -1 } else { 1 };
        let new_expires = expires_from + Duration::days(sign * delta);

        debug!(
            "user subscription {} now expires {}",
            user_subscription.id, new_expires
        );
        self.ledger
            .set_user_subscription_expires(user_subscription.id, new_expires)
            .await?;

        if new_expires >= now {
            self.entitlement
                .assign_role(transaction.user_id, subscription.role_id)
                .await?;
        } else {
            self.entitlement
                .revoke_role(transaction.user_id, subscription.role_id)
                .await?;
        }

        if is_refund {
            self.rewrite_refunded_timeline(refunded_payment_id, delta, now)
                .await?;
        } else {
            self.ledger
                .set_transaction_window(
                    transaction.id,
                    new_expires - Duration::days(delta),
                    new_expires,
                )
                .await?;
        }

        self.ledger
            .set_transaction_status(transaction.id, StatusCode::Completed)
            .await?;
        self.notifier
            .send_notification(&Notification::new(
                transaction.user_id.to_string(),
                "transaction_completed",
                transaction.id.to_string(),
            ))
            .await?;
        Ok(())
    }

    /// Mark the refunded payment and close the gap its removed days leave in
    /// the timeline: every later payment window moves earlier by the days
    /// actually removed.
    async fn rewrite_refunded_timeline(
        &self,
        refunded_payment_id: Option<&str>,
        delta: i64,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), ReconcileError> {
        let Some(payment_id) = refunded_payment_id else {
            warn!("refund resolution carried no target payment id");
            return Ok(());
        };
        let Some(payment) = self.ledger.transaction_by_payment_id(payment_id).await? else {
            warn!("refunded payment {payment_id} not found in ledger");
            return Ok(());
        };
        let (new_ends, corrected_delta) =
            clamp_refund_ends(payment.ends - Duration::days(delta), now, delta);
        debug!(
            "payment {} refunded, window now ends {}",
            payment.id, new_ends
        );
        self.ledger
            .mark_transaction_refunded(payment.id, new_ends)
            .await?;
        let moved = self
            .ledger
            .shift_payment_windows_from(new_ends, -corrected_delta, payment.id)
            .await?;
        debug!("shifted {moved} future payment windows back {corrected_delta} days");
        Ok(())
    }

    async fn fail(&self, transaction: &Transaction) -> Result<(), ReconcileError> {
        debug!("transaction {} failed at the gateway", transaction.id);
        self.ledger
            .set_transaction_status(transaction.id, StatusCode::Failed)
            .await?;
        self.notifier
            .send_notification(&Notification::new(
                transaction.user_id.to_string(),
                "transaction_failed",
                transaction.id.to_string(),
            ))
            .await?;
        Ok(())
    }

    /// Timeout compensation: the gateway never resolved the transaction
    /// within the allowed window, so give the money back and fail the row.
    async fn timeout(&self, transaction: &Transaction) -> Result<(), ReconcileError> {
        debug!("transaction {} timed out", transaction.id);
        if transaction.transaction_type != TransactionType::Refund {
            if let Err(err) = self
                .gateway
                .create_refund(
                    transaction.amount,
                    &transaction.currency,
                    &transaction.payment_id,
                    Uuid::new_v4(),
                )
                .await
            {
                // Fire-and-forget: the row still fails below, but this one
                // deserves operator attention.
                error!(
                    "compensating refund for transaction {} failed, funds may be stuck: {err}",
                    transaction.id
                );
            }
        }
        self.ledger
            .set_transaction_status(transaction.id, StatusCode::Failed)
            .await?;
        self.notifier
            .send_notification(&Notification::new(
                transaction.user_id.to_string(),
                "transaction_timeout",
                transaction.id.to_string(),
            ))
            .await?;
        Ok(())
    }
}
