// Copyright (c) James Kassemi, SC, US. All rights reserved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle state of a billing transaction.
///
/// A transaction advances `Processing` to exactly one terminal state and
/// never leaves it. `Refunded` is only reachable by a previously completed
/// payment transaction whose money was returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Processing = 1,
    Completed = 2,
    Failed = 3,
    Refunded = 4,
}

impl StatusCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, StatusCode::Processing)
    }
}

impl TryFrom<i32> for StatusCode {
    type Error = UnknownCode;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StatusCode::Processing),
            2 => Ok(StatusCode::Completed),
            3 => Ok(StatusCode::Failed),
            4 => Ok(StatusCode::Refunded),
            other => Err(UnknownCode {
                kind: "status",
                value: other,
            }),
        }
    }
}

/// Kind of money movement or account-management event a transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Payment = 0,
    Autopayment = 1,
    Refund = 2,
    PaymentMethodAdd = 3,
    PaymentMethodRemove = 4,
}

impl TransactionType {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Payment and autopayment both buy subscription days.
    pub fn buys_time(self) -> bool {
        matches!(
            self,
            TransactionType::Payment | TransactionType::Autopayment
        )
    }
}

impl TryFrom<i32> for TransactionType {
    type Error = UnknownCode;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TransactionType::Payment),
            1 => Ok(TransactionType::Autopayment),
            2 => Ok(TransactionType::Refund),
            3 => Ok(TransactionType::PaymentMethodAdd),
            4 => Ok(TransactionType::PaymentMethodRemove),
            other => Err(UnknownCode {
                kind: "transaction type",
                value: other,
            }),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown {kind} code {value}")]
pub struct UnknownCode {
    pub kind: &'static str,
    pub value: i32,
}

/// Purchasable plan. Immutable once created except `actual`, which is
/// cleared when the plan's role no longer exists upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub role_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub amount: f64,
    pub currency: String,
    /// Days granted for `amount` paid.
    pub period: i64,
    pub actual: bool,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// A user's instantiation of a [`Subscription`]. `expires` is the single
/// authoritative entitlement boundary for the row; it is extended or
/// shortened in place, never duplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Uuid,
    /// Stored-payment-method reference at the gateway, if enrolled.
    pub auto_pay_id: Option<String>,
    pub expires: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// Atomic unit of money movement tied to a [`UserSubscription`]. Rows are
/// never deleted; they form the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Gateway-side identifier: payment id, refund id, or method id
    /// depending on `transaction_type`.
    pub payment_id: String,
    pub user_subscription_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub status_code: StatusCode,
    pub transaction_type: TransactionType,
    /// Validity window the transaction buys (or revokes).
    pub starts: DateTime<Utc>,
    pub ends: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// Payload accepted by the notification service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub to_id: String,
    pub send_by: String,
    pub content_key: String,
    pub content_data: String,
}

impl Notification {
    pub fn new(
        to_id: impl Into<String>,
        content_key: impl Into<String>,
        content_data: impl Into<String>,
    ) -> Self {
        Self {
            to_id: to_id.into(),
            send_by: "email".to_string(),
            content_key: content_key.into(),
            content_data: content_data.into(),
        }
    }
}

/// Role descriptor returned by the entitlement service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub privilege_ids: Vec<String>,
}
