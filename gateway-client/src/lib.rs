// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Gateway adapter: translates engine intents into payment-gateway calls and
//! gateway responses into the engine's status vocabulary.
//!
//! The status mapping is fixed. Payments and refunds: "pending" is still in
//! flight, "succeeded" completed, "canceled" failed. Stored payment methods:
//! "pending" / "active" / "inactive". Anything else is an unprocessable
//! response and surfaces as an error rather than a guess.

mod http;

pub use http::HttpGatewayClient;

use async_trait::async_trait;
use core_types::types::StatusCode;
use thiserror::Error;
use uuid::Uuid;

/// Resolved state of a payment at the gateway.
#[derive(Debug, Clone)]
pub struct PaymentState {
    pub status: StatusCode,
    pub payment_id: String,
    pub confirmation_url: Option<String>,
    pub payment_method_id: Option<String>,
}

/// Resolved state of a refund at the gateway.
#[derive(Debug, Clone)]
pub struct RefundState {
    pub status: StatusCode,
    pub refund_id: String,
    /// Gateway id of the payment the refund targets.
    pub payment_id: String,
    pub amount: Option<f64>,
    pub currency: Option<String>,
}

/// Resolved state of a stored payment method at the gateway.
#[derive(Debug, Clone)]
pub struct MethodState {
    pub status: StatusCode,
    pub method_id: String,
    pub confirmation_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("gateway rejected the request: {reason}")]
    Rejected { reason: String },
    #[error("unprocessable gateway status {value:?}")]
    UnprocessableStatus { value: String },
    #[error("gateway responded {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Payment gateway operations the engine depends on.
///
/// Status lookups return `None` when the gateway does not know the id yet;
/// the reconciler treats that as "not yet resolvable, keep polling".
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(
        &self,
        amount: f64,
        currency: &str,
        idempotency_key: Uuid,
    ) -> Result<PaymentState, GatewayError>;

    async fn create_autopayment(
        &self,
        amount: f64,
        currency: &str,
        stored_method_id: &str,
        idempotency_key: Uuid,
    ) -> Result<PaymentState, GatewayError>;

    async fn create_refund(
        &self,
        amount: f64,
        currency: &str,
        target_payment_id: &str,
        idempotency_key: Uuid,
    ) -> Result<RefundState, GatewayError>;

    async fn create_payment_method(
        &self,
        idempotency_key: Uuid,
    ) -> Result<MethodState, GatewayError>;

    async fn payment_status(&self, payment_id: &str)
        -> Result<Option<PaymentState>, GatewayError>;

    async fn refund_status(&self, refund_id: &str) -> Result<Option<RefundState>, GatewayError>;

    async fn payment_method_status(
        &self,
        method_id: &str,
    ) -> Result<Option<MethodState>, GatewayError>;
}

/// Map a payment/refund status string into the engine vocabulary.
pub fn map_operation_status(raw: &str) -> Result<StatusCode, GatewayError> {
    match raw {
        "pending" => Ok(StatusCode::Processing),
        "succeeded" => Ok(StatusCode::Completed),
        "canceled" => Ok(StatusCode::Failed),
        other => Err(GatewayError::UnprocessableStatus {
            value: other.to_string(),
        }),
    }
}

/// Map a stored-method status string into the engine vocabulary. A missing
/// status means the method is still being set up.
pub fn map_method_status(raw: Option<&str>) -> Result<StatusCode, GatewayError> {
    match raw {
        None | Some("pending") => Ok(StatusCode::Processing),
        Some("active") => Ok(StatusCode::Completed),
        Some("inactive") => Ok(StatusCode::Failed),
        Some(other) => Err(GatewayError::UnprocessableStatus {
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_vocabulary_is_fixed() {
        assert_eq!(map_operation_status("pending").unwrap(), StatusCode::Processing);
        assert_eq!(map_operation_status("succeeded").unwrap(), StatusCode::Completed);
        assert_eq!(map_operation_status("canceled").unwrap(), StatusCode::Failed);
    }

    #[test]
    fn unknown_operation_status_is_not_coerced() {
        let err = map_operation_status("waiting_for_capture").unwrap_err();
        assert!(matches!(
            err,
            GatewayError::UnprocessableStatus { value } if value == "waiting_for_capture"
        ));
    }

    #[test]
    fn method_vocabulary_includes_missing_status() {
        assert_eq!(map_method_status(None).unwrap(), StatusCode::Processing);
        assert_eq!(map_method_status(Some("pending")).unwrap(), StatusCode::Processing);
        assert_eq!(map_method_status(Some("active")).unwrap(), StatusCode::Completed);
        assert_eq!(map_method_status(Some("inactive")).unwrap(), StatusCode::Failed);
        assert!(map_method_status(Some("frozen")).is_err());
    }
}
