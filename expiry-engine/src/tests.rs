use super::*;

use async_trait::async_trait;
use chrono::DateTime;
use core_types::types::{Role, Subscription};
use dedup_store::MemoryDedupStore;
use gateway_client::{MethodState, PaymentState, RefundState};
use ledger::MemoryLedgerStore;
use std::sync::Mutex;

#[derive(Default)]
struct RecordingGateway {
    autopay_creates: Mutex<Vec<(f64, String, String)>>,
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_payment(
        &self,
        _amount: f64,
        _currency: &str,
        _idempotency_key: Uuid,
    ) -> Result<PaymentState, GatewayError> {
        unimplemented!("the sweeper never creates interactive payments")
    }

    async fn create_autopayment(
        &self,
        amount: f64,
        currency: &str,
        stored_method_id: &str,
        idempotency_key: Uuid,
    ) -> Result<PaymentState, GatewayError> {
        self.autopay_creates.lock().unwrap().push((
            amount,
            currency.to_string(),
            stored_method_id.to_string(),
        ));
        Ok(PaymentState {
            status: StatusCode::Processing,
            payment_id: format!("gw-{idempotency_key}"),
            confirmation_url: None,
            payment_method_id: Some(stored_method_id.to_string()),
        })
    }

    async fn create_refund(
        &self,
        _amount: f64,
        _currency: &str,
        _target_payment_id: &str,
        _idempotency_key: Uuid,
    ) -> Result<RefundState, GatewayError> {
        unimplemented!("the sweeper never creates refunds")
    }

    async fn create_payment_method(
        &self,
        _idempotency_key: Uuid,
    ) -> Result<MethodState, GatewayError> {
        unimplemented!("the sweeper never creates payment methods")
    }

    async fn payment_status(
        &self,
        _payment_id: &str,
    ) -> Result<Option<PaymentState>, GatewayError> {
        Ok(None)
    }

    async fn refund_status(&self, _refund_id: &str) -> Result<Option<RefundState>, GatewayError> {
        Ok(None)
    }

    async fn payment_method_status(
        &self,
        _method_id: &str,
    ) -> Result<Option<MethodState>, GatewayError> {
        Ok(None)
    }
}

#[derive(Default)]
struct RecordingEntitlement {
    roles: Mutex<Vec<Role>>,
    revoked: Mutex<Vec<(Uuid, Uuid)>>,
}

impl RecordingEntitlement {
    fn script_role(&self, id: Uuid) {
        self.roles.lock().unwrap().push(Role {
            id: id.to_string(),
            name: "premium".to_string(),
            privilege_ids: Vec::new(),
        });
    }
}

#[async_trait]
impl EntitlementService for RecordingEntitlement {
    async fn assign_role(&self, _user_id: Uuid, _role_id: Uuid) -> Result<(), EntitlementError> {
        Ok(())
    }

    async fn revoke_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), EntitlementError> {
        self.revoked.lock().unwrap().push((user_id, role_id));
        Ok(())
    }

    async fn list_roles(&self) -> Result<Vec<Role>, EntitlementError> {
        Ok(self.roles.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn content_keys(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.content_key.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_notification(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct Harness {
    sweeper: ExpirySweeper,
    ledger: Arc<MemoryLedgerStore>,
    gateway: Arc<RecordingGateway>,
    entitlement: Arc<RecordingEntitlement>,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    let ledger = Arc::new(MemoryLedgerStore::new());
    let gateway = Arc::new(RecordingGateway::default());
    let entitlement = Arc::new(RecordingEntitlement::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let dedup = Arc::new(MemoryDedupStore::new());
    let sweeper = ExpirySweeper::new(
        ledger.clone(),
        gateway.clone(),
        entitlement.clone(),
        notifier.clone(),
        dedup,
        7,
        10,
    );
    Harness {
        sweeper,
        ledger,
        gateway,
        entitlement,
        notifier,
    }
}

fn subscription(amount: f64, period: i64) -> Subscription {
    let now = Utc::now();
    Subscription {
        id: Uuid::new_v4(),
        role_id: Uuid::new_v4(),
        name: "premium".to_string(),
        description: None,
        amount,
        currency: "RUB".to_string(),
        period,
        actual: true,
        created: now,
        modified: now,
    }
}

fn user_subscription(
    owner: &Subscription,
    expires: DateTime<Utc>,
    auto_pay_id: Option<&str>,
) -> UserSubscription {
    let now = Utc::now();
    UserSubscription {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        subscription_id: owner.id,
        auto_pay_id: auto_pay_id.map(str::to_string),
        expires,
        created: now,
        modified: now,
    }
}

#[tokio::test]
async fn near_expiry_with_stored_method_charges_once() {
    let h = harness();
    let sub = subscription(100.0, 30);
    let us = user_subscription(&sub, Utc::now() + Duration::days(2), Some("m-1"));
    h.ledger.put_subscription(sub);
    h.ledger.put_user_subscription(us.clone());

    h.sweeper.sweep_soon_to_expire().await.unwrap();
    h.sweeper.sweep_soon_to_expire().await.unwrap();

    assert_eq!(
        h.gateway.autopay_creates.lock().unwrap().as_slice(),
        &[(100.0, "RUB".to_string(), "m-1".to_string())]
    );
    let pending = h
        .ledger
        .transactions_with_status(StatusCode::Processing)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].transaction_type, TransactionType::Autopayment);
    assert_eq!(pending[0].user_subscription_id, us.id);
    assert!(pending[0].payment_id.starts_with("gw-"));
    assert!(h.notifier.content_keys().is_empty());
}

#[tokio::test]
async fn near_expiry_without_method_warns_once() {
    let h = harness();
    let sub = subscription(100.0, 30);
    let us = user_subscription(&sub, Utc::now() + Duration::days(2), None);
    h.ledger.put_subscription(sub);
    h.ledger.put_user_subscription(us.clone());

    h.sweeper.sweep_soon_to_expire().await.unwrap();
    h.sweeper.sweep_soon_to_expire().await.unwrap();

    assert_eq!(h.notifier.content_keys(), vec!["subscription_expiration"]);
    let sent = h.notifier.sent.lock().unwrap();
    assert_eq!(sent[0].to_id, us.user_id.to_string());
    assert_eq!(sent[0].content_data, us.expires.to_rfc3339());
    assert!(h.gateway.autopay_creates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn subscriptions_outside_horizon_are_untouched() {
    let h = harness();
    let sub = subscription(100.0, 30);
    let far = user_subscription(&sub, Utc::now() + Duration::days(20), Some("m-1"));
    h.ledger.put_subscription(sub);
    h.ledger.put_user_subscription(far);

    h.sweeper.sweep_soon_to_expire().await.unwrap();

    assert!(h.gateway.autopay_creates.lock().unwrap().is_empty());
    assert!(h.notifier.content_keys().is_empty());
}

#[tokio::test]
async fn lapsed_subscription_loses_role_once_and_stale_rows_are_dropped() {
    let h = harness();
    let sub = subscription(100.0, 30);
    let lapsed = user_subscription(&sub, Utc::now() - Duration::days(2), None);
    let stale = user_subscription(&sub, Utc::now() - Duration::days(30), None);
    h.ledger.put_subscription(sub.clone());
    h.ledger.put_user_subscription(lapsed.clone());
    h.ledger.put_user_subscription(stale.clone());

    h.sweeper.sweep_expired().await.unwrap();
    h.sweeper.sweep_expired().await.unwrap();

    assert_eq!(
        h.entitlement.revoked.lock().unwrap().as_slice(),
        &[(lapsed.user_id, sub.role_id)]
    );
    assert!(h.ledger.user_subscription(stale.id).is_none());
    assert!(h.ledger.user_subscription(lapsed.id).is_some());
}

#[tokio::test]
async fn subscriptions_with_orphaned_roles_are_deactivated() {
    let h = harness();
    let kept = subscription(100.0, 30);
    let orphaned = subscription(200.0, 90);
    h.entitlement.script_role(kept.role_id);
    h.ledger.put_subscription(kept.clone());
    h.ledger.put_subscription(orphaned.clone());

    h.sweeper.reconcile_roles().await.unwrap();

    assert!(h.ledger.subscription(kept.id).unwrap().actual);
    assert!(!h.ledger.subscription(orphaned.id).unwrap().actual);
}
