// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Thin client for the notification service. The engine's only user-visible
//! failure behavior is a notification; formatting and delivery live in the
//! service behind this client.

use async_trait::async_trait;
use core_types::config::NotificationConfig;
use core_types::retry::RetryPolicy;
use core_types::types::Notification;
use log::debug;
use reqwest::{Client, Url};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("notification service responded {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification(&self, notification: &Notification) -> Result<(), NotifyError>;
}

pub struct HttpNotificationClient {
    client: Client,
    base_url: String,
    secret_key: String,
    retry: RetryPolicy,
}

impl HttpNotificationClient {
    pub fn new(client: Client, config: &NotificationConfig, retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            secret_key: config.secret_key.clone(),
            retry,
        }
    }
}

#[async_trait]
impl Notifier for HttpNotificationClient {
    async fn send_notification(&self, notification: &Notification) -> Result<(), NotifyError> {
        debug!(
            "sending {} notification to {}",
            notification.content_key, notification.to_id
        );
        let mut url = Url::parse(&self.base_url)?;
        url.set_path("/api/v1/notification/");
        let response = self
            .retry
            .retry_async(|_| {
                let request = self
                    .client
                    .post(url.clone())
                    .header("X-Internal-Auth", &self.secret_key)
                    .json(notification);
                async move { request.send().await }
            })
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Http { status, body });
        }
        Ok(())
    }
}
