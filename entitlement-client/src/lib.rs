// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Thin client for the entitlement service: grant and remove the role a
//! subscription confers, and list the roles that exist upstream.

use async_trait::async_trait;
use core_types::config::EntitlementConfig;
use core_types::retry::RetryPolicy;
use core_types::types::Role;
use log::debug;
use reqwest::{Client, Url};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("entitlement service responded {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },
}

#[async_trait]
pub trait EntitlementService: Send + Sync {
    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), EntitlementError>;

    async fn revoke_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), EntitlementError>;

    async fn list_roles(&self) -> Result<Vec<Role>, EntitlementError>;
}

pub struct HttpEntitlementClient {
    client: Client,
    base_url: String,
    secret_key: String,
    retry: RetryPolicy,
}

impl HttpEntitlementClient {
    pub fn new(client: Client, config: &EntitlementConfig, retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            secret_key: config.secret_key.clone(),
            retry,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, EntitlementError> {
        let mut url = Url::parse(&self.base_url)?;
        url.set_path(path);
        Ok(url)
    }

    async fn post_role(&self, path: &str, role_id: Uuid) -> Result<(), EntitlementError> {
        let url = self.endpoint(path)?;
        let body = RoleRef {
            id: role_id.to_string(),
        };
        let response = self
            .retry
            .retry_async(|_| {
                let request = self
                    .client
                    .post(url.clone())
                    .header("X-Internal-Auth", &self.secret_key)
                    .json(&body);
                async move { request.send().await }
            })
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EntitlementError::Http { status, body });
        }
        Ok(())
    }
}

#[async_trait]
impl EntitlementService for HttpEntitlementClient {
    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), EntitlementError> {
        debug!("assigning role {role_id} to user {user_id}");
        self.post_role(&format!("/api/v1/role/assign/{user_id}"), role_id)
            .await
    }

    async fn revoke_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), EntitlementError> {
        debug!("revoking role {role_id} from user {user_id}");
        self.post_role(&format!("/api/v1/role/revoke/{user_id}"), role_id)
            .await
    }

    async fn list_roles(&self) -> Result<Vec<Role>, EntitlementError> {
        let url = self.endpoint("/api/v1/role/")?;
        let response = self
            .retry
            .retry_async(|_| {
                let request = self
                    .client
                    .get(url.clone())
                    .header("X-Internal-Auth", &self.secret_key);
                async move { request.send().await }
            })
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EntitlementError::Http { status, body });
        }
        Ok(response.json().await?)
    }
}

#[derive(Serialize)]
struct RoleRef {
    id: String,
}
