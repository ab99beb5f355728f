use core_types::config::GatewayConfig;
use core_types::retry::RetryPolicy;
use log::debug;
use reqwest::{Client, StatusCode as HttpStatus, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    map_method_status, map_operation_status, GatewayError, MethodState, PaymentGateway,
    PaymentState, RefundState,
};

const PAYMENTS_PATH: &str = "/v3/payments";
const REFUNDS_PATH: &str = "/v3/refunds";
const METHODS_PATH: &str = "/v3/payment_methods";

/// HTTP implementation of [`PaymentGateway`] against the vendor REST API.
///
/// Creates carry an `Idempotence-Key` header so a retried request cannot
/// double-charge; lookups returning 404 map to `None` for the caller to
/// poll again later.
pub struct HttpGatewayClient {
    client: Client,
    base_url: String,
    account_id: String,
    secret_key: String,
    return_url: String,
    retry: RetryPolicy,
}

impl HttpGatewayClient {
    pub fn new(client: Client, config: &GatewayConfig, retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            account_id: config.account_id.clone(),
            secret_key: config.secret_key.clone(),
            return_url: config.return_url.clone(),
            retry,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&self.base_url)?;
        url.set_path(path);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, GatewayError> {
        let url = self.endpoint(path)?;
        let response = self
            .retry
            .retry_async(|_| {
                let request = self
                    .client
                    .get(url.clone())
                    .basic_auth(&self.account_id, Some(&self.secret_key));
                async move { request.send().await }
            })
            .await?;
        if response.status() == HttpStatus::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(read_json(response).await?))
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        idempotency_key: Uuid,
    ) -> Result<T, GatewayError> {
        let url = self.endpoint(path)?;
        let key = idempotency_key.to_string();
        let response = self
            .retry
            .retry_async(|_| {
                let request = self
                    .client
                    .post(url.clone())
                    .basic_auth(&self.account_id, Some(&self.secret_key))
                    .header("Idempotence-Key", key.clone())
                    .json(body);
                async move { request.send().await }
            })
            .await?;
        read_json(response).await
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Http { status, body });
    }
    Ok(response.json().await?)
}

#[async_trait::async_trait]
impl PaymentGateway for HttpGatewayClient {
    async fn create_payment(
        &self,
        amount: f64,
        currency: &str,
        idempotency_key: Uuid,
    ) -> Result<PaymentState, GatewayError> {
        debug!("creating payment of {amount} {currency}, key {idempotency_key}");
        let body = PaymentCreateBody {
            amount: Amount::new(amount, currency),
            capture: true,
            save_payment_method: true,
            confirmation: Confirmation::redirect(&self.return_url),
        };
        let response: PaymentResponse =
            self.post_json(PAYMENTS_PATH, &body, idempotency_key).await?;
        PaymentState::try_from(response)
    }

    async fn create_autopayment(
        &self,
        amount: f64,
        currency: &str,
        stored_method_id: &str,
        idempotency_key: Uuid,
    ) -> Result<PaymentState, GatewayError> {
        debug!("creating autopayment of {amount} {currency} via method {stored_method_id}");
        let body = AutopaymentCreateBody {
            amount: Amount::new(amount, currency),
            capture: true,
            payment_method_id: stored_method_id,
        };
        let response: PaymentResponse =
            self.post_json(PAYMENTS_PATH, &body, idempotency_key).await?;
        PaymentState::try_from(response)
    }

    async fn create_refund(
        &self,
        amount: f64,
        currency: &str,
        target_payment_id: &str,
        idempotency_key: Uuid,
    ) -> Result<RefundState, GatewayError> {
        debug!("creating refund of {amount} {currency} against payment {target_payment_id}");
        let body = RefundCreateBody {
            amount: Amount::new(amount, currency),
            payment_id: target_payment_id,
        };
        let response: Result<RefundResponse, GatewayError> =
            self.post_json(REFUNDS_PATH, &body, idempotency_key).await;
        match response {
            Ok(refund) => RefundState::try_from(refund),
            // A 4xx means the gateway refused the refund itself (bad target,
            // exceeded amount); surface that as a domain rejection.
            Err(GatewayError::Http { status, body }) if status.is_client_error() => {
                Err(GatewayError::Rejected { reason: body })
            }
            Err(err) => Err(err),
        }
    }

    async fn create_payment_method(
        &self,
        idempotency_key: Uuid,
    ) -> Result<MethodState, GatewayError> {
        debug!("creating payment method, key {idempotency_key}");
        let body = MethodCreateBody {
            kind: "bank_card",
            confirmation: Confirmation::redirect(&self.return_url),
        };
        let response: MethodResponse =
            self.post_json(METHODS_PATH, &body, idempotency_key).await?;
        MethodState::try_from(response)
    }

    async fn payment_status(
        &self,
        payment_id: &str,
    ) -> Result<Option<PaymentState>, GatewayError> {
        let response: Option<PaymentResponse> = self
            .get_json(&format!("{PAYMENTS_PATH}/{payment_id}"))
            .await?;
        response.map(PaymentState::try_from).transpose()
    }

    async fn refund_status(&self, refund_id: &str) -> Result<Option<RefundState>, GatewayError> {
        let response: Option<RefundResponse> =
            self.get_json(&format!("{REFUNDS_PATH}/{refund_id}")).await?;
        response.map(RefundState::try_from).transpose()
    }

    async fn payment_method_status(
        &self,
        method_id: &str,
    ) -> Result<Option<MethodState>, GatewayError> {
        let response: Option<MethodResponse> =
            self.get_json(&format!("{METHODS_PATH}/{method_id}")).await?;
        response.map(MethodState::try_from).transpose()
    }
}

#[derive(Serialize)]
struct Amount<'a> {
    value: String,
    currency: &'a str,
}

impl<'a> Amount<'a> {
    fn new(amount: f64, currency: &'a str) -> Self {
        Self {
            value: format!("{amount:.2}"),
            currency,
        }
    }
}

#[derive(Serialize)]
struct Confirmation<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    return_url: &'a str,
}

impl<'a> Confirmation<'a> {
    fn redirect(return_url: &'a str) -> Self {
        Self {
            kind: "redirect",
            return_url,
        }
    }
}

#[derive(Serialize)]
struct PaymentCreateBody<'a> {
    amount: Amount<'a>,
    capture: bool,
    save_payment_method: bool,
    confirmation: Confirmation<'a>,
}

#[derive(Serialize)]
struct AutopaymentCreateBody<'a> {
    amount: Amount<'a>,
    capture: bool,
    payment_method_id: &'a str,
}

#[derive(Serialize)]
struct RefundCreateBody<'a> {
    amount: Amount<'a>,
    payment_id: &'a str,
}

#[derive(Serialize)]
struct MethodCreateBody<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    confirmation: Confirmation<'a>,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: String,
    status: String,
    confirmation: Option<ConfirmationResponse>,
    payment_method: Option<MethodRef>,
}

#[derive(Debug, Deserialize)]
struct ConfirmationResponse {
    confirmation_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MethodRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    status: String,
    payment_id: String,
    amount: Option<AmountResponse>,
}

#[derive(Debug, Deserialize)]
struct AmountResponse {
    value: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct MethodResponse {
    id: String,
    status: Option<String>,
    confirmation: Option<ConfirmationResponse>,
}

impl TryFrom<PaymentResponse> for PaymentState {
    type Error = GatewayError;

    fn try_from(response: PaymentResponse) -> Result<Self, GatewayError> {
        Ok(PaymentState {
            status: map_operation_status(&response.status)?,
            payment_id: response.id,
            confirmation_url: response.confirmation.and_then(|c| c.confirmation_url),
            payment_method_id: response.payment_method.map(|m| m.id),
        })
    }
}

impl TryFrom<RefundResponse> for RefundState {
    type Error = GatewayError;

    fn try_from(response: RefundResponse) -> Result<Self, GatewayError> {
        let (amount, currency) = match response.amount {
            Some(amount) => (amount.value.parse::<f64>().ok(), Some(amount.currency)),
            None => (None, None),
        };
        Ok(RefundState {
            status: map_operation_status(&response.status)?,
            refund_id: response.id,
            payment_id: response.payment_id,
            amount,
            currency,
        })
    }
}

impl TryFrom<MethodResponse> for MethodState {
    type Error = GatewayError;

    fn try_from(response: MethodResponse) -> Result<Self, GatewayError> {
        Ok(MethodState {
            status: map_method_status(response.status.as_deref())?,
            method_id: response.id,
            confirmation_url: response.confirmation.and_then(|c| c.confirmation_url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::types::StatusCode;

    #[test]
    fn payment_response_maps_into_state() {
        let response = PaymentResponse {
            id: "pay-1".to_string(),
            status: "succeeded".to_string(),
            confirmation: Some(ConfirmationResponse {
                confirmation_url: Some("https://gw.example/confirm".to_string()),
            }),
            payment_method: Some(MethodRef {
                id: "method-9".to_string(),
            }),
        };
        let state = PaymentState::try_from(response).unwrap();
        assert_eq!(state.status, StatusCode::Completed);
        assert_eq!(state.payment_id, "pay-1");
        assert_eq!(state.payment_method_id.as_deref(), Some("method-9"));
    }

    #[test]
    fn refund_response_parses_amount_value() {
        let response = RefundResponse {
            id: "ref-1".to_string(),
            status: "pending".to_string(),
            payment_id: "pay-1".to_string(),
            amount: Some(AmountResponse {
                value: "50.00".to_string(),
                currency: "RUB".to_string(),
            }),
        };
        let state = RefundState::try_from(response).unwrap();
        assert_eq!(state.status, StatusCode::Processing);
        assert_eq!(state.amount, Some(50.0));
        assert_eq!(state.currency.as_deref(), Some("RUB"));
    }

    #[test]
    fn unknown_gateway_status_propagates_as_error() {
        let response = PaymentResponse {
            id: "pay-1".to_string(),
            status: "on_hold".to_string(),
            confirmation: None,
            payment_method: None,
        };
        assert!(PaymentState::try_from(response).is_err());
    }
}
