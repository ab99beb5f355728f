// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Billing scheduler: the fixed-interval control loop driving transaction
//! reconciliation and expiry sweeping.
//!
//! Four phases run in order each cycle; a failure inside one phase is logged
//! and never prevents the remaining phases or the next cycle. A shutdown
//! signal lets the in-flight cycle finish before the process exits.

use std::future::Future;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use core_types::config::AppConfig;
use core_types::retry::RetryPolicy;
use dedup_store::{DedupStore, RedisDedupStore};
use entitlement_client::{EntitlementService, HttpEntitlementClient};
use expiry_engine::ExpirySweeper;
use gateway_client::{HttpGatewayClient, PaymentGateway};
use ledger::{LedgerStore, PgLedgerStore};
use log::{error, info};
use notification_client::{HttpNotificationClient, Notifier};
use reconciler_engine::TransactionReconciler;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug, Error)]
enum AppError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),
    #[error("dedup error: {0}")]
    Dedup(#[from] dedup_store::DedupError),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run().await {
        eprintln!("billing-scheduler failed: {err}");
        process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    info!(
        "starting billing-scheduler, cycle every {:?}",
        config.scheduler.poll_interval()
    );

    let http = reqwest::Client::builder()
        .timeout(config.scheduler.outbound_timeout())
        .pool_max_idle_per_host(config.scheduler.outbound_concurrency)
        .build()?;

    let store =
        PgLedgerStore::connect(&config.database.dsn, config.database.max_connections).await?;
    store.run_migrations().await?;
    let ledger: Arc<dyn LedgerStore> = Arc::new(store);
    let dedup: Arc<dyn DedupStore> = Arc::new(RedisDedupStore::connect(&config.dedup.redis_url).await?);
    let gateway: Arc<dyn PaymentGateway> = Arc::new(HttpGatewayClient::new(
        http.clone(),
        &config.gateway,
        RetryPolicy::default_http(),
    ));
    let entitlement: Arc<dyn EntitlementService> = Arc::new(HttpEntitlementClient::new(
        http.clone(),
        &config.entitlement,
        RetryPolicy::default_http(),
    ));
    let notifier: Arc<dyn Notifier> = Arc::new(HttpNotificationClient::new(
        http,
        &config.notification,
        RetryPolicy::default_http(),
    ));

    let reconciler = TransactionReconciler::new(
        ledger.clone(),
        gateway.clone(),
        entitlement.clone(),
        notifier.clone(),
        config.scheduler.transaction_timeout_minutes,
    );
    let sweeper = ExpirySweeper::new(
        ledger,
        gateway,
        entitlement,
        notifier,
        dedup,
        config.scheduler.soon_expiration_days,
        config.scheduler.transaction_timeout_minutes,
    );

    run_loop(&reconciler, &sweeper, config.scheduler.poll_interval()).await;
    info!("billing-scheduler stopped");
    Ok(())
}

async fn run_loop(
    reconciler: &TransactionReconciler,
    sweeper: &ExpirySweeper,
    interval: Duration,
) {
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        run_phase("reconcile_transactions", reconciler.run_cycle()).await;
        run_phase("sweep_soon_to_expire", sweeper.sweep_soon_to_expire()).await;
        run_phase("sweep_expired", sweeper.sweep_expired()).await;
        run_phase("reconcile_roles", sweeper.reconcile_roles()).await;

        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping after current cycle");
                break;
            }
            _ = sleep(interval) => {}
        }
    }
}

/// Phase-level backstop: nothing thrown inside a phase may take down the
/// loop.
async fn run_phase<E: std::fmt::Display>(name: &str, phase: impl Future<Output = Result<(), E>>) {
    if let Err(err) = phase.await {
        error!("{name} phase failed: {err}");
    }
}
