use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use core_types::types::{StatusCode, Subscription, Transaction, UserSubscription};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::store::LedgerStore;

const TRANSACTION_COLUMNS: &str = "id, user_id, payment_id, user_subscription_id, amount, \
     currency, status_code, transaction_type, starts, ends, created, modified";

const USER_SUBSCRIPTION_COLUMNS: &str =
    "id, user_id, subscription_id, auto_pay_id, expires, created, modified";

const SUBSCRIPTION_COLUMNS: &str =
    "id, role_id, name, description, amount, currency, period, actual, created, modified";

/// Postgres-backed [`LedgerStore`]. Queries are runtime-bound so the crate
/// builds without a live database.
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub async fn connect(dsn: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the schema migrations. Idempotent; run once at bootstrap.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn transactions_with_status(&self, status: StatusCode) -> Result<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\" \
             WHERE status_code = $1 ORDER BY created"
        ))
        .bind(status.code())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn transaction_by_payment_id(&self, payment_id: &str) -> Result<Option<Transaction>> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\" WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        sqlx::query(
            "INSERT INTO \"transaction\" \
             (id, user_id, payment_id, user_subscription_id, amount, currency, \
              status_code, transaction_type, starts, ends, created, modified) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(transaction.id)
        .bind(transaction.user_id)
        .bind(&transaction.payment_id)
        .bind(transaction.user_subscription_id)
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(transaction.status_code.code())
        .bind(transaction.transaction_type.code())
        .bind(transaction.starts)
        .bind(transaction.ends)
        .bind(transaction.created)
        .bind(transaction.modified)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_transaction_status(&self, id: Uuid, status: StatusCode) -> Result<()> {
        sqlx::query(
            "UPDATE \"transaction\" SET status_code = $2, modified = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.code())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_transaction_window(
        &self,
        id: Uuid,
        starts: DateTime<Utc>,
        ends: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE \"transaction\" SET starts = $2, ends = $3, modified = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(starts)
        .bind(ends)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_transaction_refunded(&self, id: Uuid, ends: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE \"transaction\" SET status_code = $2, ends = $3, modified = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(StatusCode::Refunded.code())
        .bind(ends)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn shift_payment_windows_from(
        &self,
        from: DateTime<Utc>,
        days: i64,
        excluding: Uuid,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE \"transaction\" \
             SET starts = starts + make_interval(days => $2), \
                 ends = ends + make_interval(days => $2), \
                 modified = NOW() \
             WHERE starts >= $1 AND transaction_type IN ($3, $4) AND id <> $5",
        )
        .bind(from)
        .bind(days as i32)
        .bind(core_types::types::TransactionType::Payment.code())
        .bind(core_types::types::TransactionType::Autopayment.code())
        .bind(excluding)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn user_subscription_by_id(&self, id: Uuid) -> Result<Option<UserSubscription>> {
        let row: Option<UserSubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {USER_SUBSCRIPTION_COLUMNS} FROM user_subscription WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserSubscription::from))
    }

    async fn set_user_subscription_expires(&self, id: Uuid, expires: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE user_subscription SET expires = $2, modified = NOW() WHERE id = $1")
            .bind(id)
            .bind(expires)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_user_subscription_auto_pay(
        &self,
        id: Uuid,
        auto_pay_id: Option<String>,
    ) -> Result<()> {
        sqlx::query("UPDATE user_subscription SET auto_pay_id = $2, modified = NOW() WHERE id = $1")
            .bind(id)
            .bind(auto_pay_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn user_subscriptions_expiring_within(
        &self,
        now: DateTime<Utc>,
        horizon_days: i64,
    ) -> Result<Vec<UserSubscription>> {
        let rows: Vec<UserSubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {USER_SUBSCRIPTION_COLUMNS} FROM user_subscription \
             WHERE expires >= $1 AND expires < $2 ORDER BY expires"
        ))
        .bind(now)
        .bind(now + Duration::days(horizon_days))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UserSubscription::from).collect())
    }

    async fn user_subscriptions_expired_within(
        &self,
        now: DateTime<Utc>,
        lookback_days: i64,
    ) -> Result<Vec<UserSubscription>> {
        let rows: Vec<UserSubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {USER_SUBSCRIPTION_COLUMNS} FROM user_subscription \
             WHERE expires < $1 AND expires > $2 ORDER BY expires"
        ))
        .bind(now)
        .bind(now - Duration::days(lookback_days))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UserSubscription::from).collect())
    }

    async fn delete_user_subscriptions_expired_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM user_subscription WHERE expires < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn subscription_by_id(&self, id: Uuid) -> Result<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscription WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Subscription::from))
    }

    async fn active_role_ids(&self) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT role_id FROM subscription WHERE actual")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn deactivate_subscriptions_with_role(&self, role_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE subscription SET actual = FALSE, modified = NOW() WHERE role_id = $1",
        )
        .bind(role_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    payment_id: String,
    user_subscription_id: Uuid,
    amount: f64,
    currency: String,
    status_code: i32,
    transaction_type: i32,
    starts: DateTime<Utc>,
    ends: DateTime<Utc>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> Result<Self> {
        let status_code =
            StatusCode::try_from(row.status_code).map_err(|source| LedgerError::CorruptRow {
                entity: "transaction",
                id: row.id,
                source,
            })?;
        let transaction_type = core_types::types::TransactionType::try_from(row.transaction_type)
            .map_err(|source| LedgerError::CorruptRow {
            entity: "transaction",
            id: row.id,
            source,
        })?;
        Ok(Transaction {
            id: row.id,
            user_id: row.user_id,
            payment_id: row.payment_id,
            user_subscription_id: row.user_subscription_id,
            amount: row.amount,
            currency: row.currency,
            status_code,
            transaction_type,
            starts: row.starts,
            ends: row.ends,
            created: row.created,
            modified: row.modified,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserSubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    subscription_id: Uuid,
    auto_pay_id: Option<String>,
    expires: DateTime<Utc>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

impl From<UserSubscriptionRow> for UserSubscription {
    fn from(row: UserSubscriptionRow) -> Self {
        UserSubscription {
            id: row.id,
            user_id: row.user_id,
            subscription_id: row.subscription_id,
            auto_pay_id: row.auto_pay_id,
            expires: row.expires,
            created: row.created,
            modified: row.modified,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    role_id: Uuid,
    name: String,
    description: Option<String>,
    amount: f64,
    currency: String,
    period: i32,
    actual: bool,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Subscription {
            id: row.id,
            role_id: row.role_id,
            name: row.name,
            description: row.description,
            amount: row.amount,
            currency: row.currency,
            period: row.period as i64,
            actual: row.actual,
            created: row.created,
            modified: row.modified,
        }
    }
}
