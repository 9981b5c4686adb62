//! Reqwest-backed transports.
//!
//! The concrete wire implementations: the request executor, the refresh
//! endpoint call, and the point-in-time notification pull. The refresh
//! transport goes through the raw executor rather than `AuthHttpClient` so
//! a rejected refresh surfaces as `RefreshFailure::Rejected` to the coordinator
//! instead of tripping the interceptor's logout path.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use url::Url;

use crate::application::refresh::{RefreshFailure, RefreshTransport};
use crate::domain::collaborators::NotificationFetcher;
use crate::domain::credential::Credential;
use crate::domain::notification::Notification;
use crate::shared::error::SessionError;

use super::client::{ApiRequest, ApiResponse, AuthHttpClient, HttpExecute};

/// `HttpExecute` implementation over a shared reqwest client.
pub struct ReqwestExecutor {
    client: reqwest::Client,
    base_url: Url,
}

impl ReqwestExecutor {
    pub fn new(base_url: &str) -> Result<Self, SessionError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SessionError::Internal(format!("invalid base url: {}", e)))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }
}

#[async_trait]
impl HttpExecute for ReqwestExecutor {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, SessionError> {
        let url = self
            .base_url
            .join(&request.path)
            .map_err(|e| SessionError::Internal(format!("invalid request path: {}", e)))?;

        let mut builder = self.client.request(request.method, url);
        if let Some(bearer) = &request.bearer {
            builder = builder.bearer_auth(bearer);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .json::<serde_json::Value>()
            .await
            .unwrap_or(serde_json::Value::Null);

        Ok(ApiResponse { status, body })
    }
}

/// POSTs the refresh endpoint with the current bearer header and no body;
/// the server answers `{ "token": … }` or a 4xx/5xx.
pub struct HttpRefreshTransport {
    executor: Arc<dyn HttpExecute>,
    refresh_path: String,
}

impl HttpRefreshTransport {
    pub fn new(executor: Arc<dyn HttpExecute>, refresh_path: impl Into<String>) -> Self {
        Self {
            executor,
            refresh_path: refresh_path.into(),
        }
    }
}

#[async_trait]
impl RefreshTransport for HttpRefreshTransport {
    async fn refresh(&self, current: &Credential) -> Result<Credential, RefreshFailure> {
        let response = self
            .executor
            .execute(ApiRequest {
                method: Method::POST,
                path: self.refresh_path.clone(),
                bearer: Some(current.as_str().to_string()),
                body: None,
            })
            .await
            .map_err(|e| RefreshFailure::Network(e.to_string()))?;

        match response.status {
            status if (200..300).contains(&status) => response
                .body
                .get("token")
                .and_then(|t| t.as_str())
                .map(Credential::new)
                .ok_or_else(|| {
                    RefreshFailure::Rejected("refresh response missing token".into())
                }),
            status if (400..500).contains(&status) => Err(RefreshFailure::Rejected(format!(
                "refresh endpoint answered {}",
                status
            ))),
            status => Err(RefreshFailure::Network(format!(
                "refresh endpoint answered {}",
                status
            ))),
        }
    }
}

/// Point-in-time notification pull through the authenticated client.
pub struct HttpNotificationFetcher {
    client: Arc<AuthHttpClient>,
    notifications_path: String,
}

impl HttpNotificationFetcher {
    pub fn new(client: Arc<AuthHttpClient>, notifications_path: impl Into<String>) -> Self {
        Self {
            client,
            notifications_path: notifications_path.into(),
        }
    }
}

#[async_trait]
impl NotificationFetcher for HttpNotificationFetcher {
    async fn fetch_notifications(&self) -> Result<Vec<Notification>, SessionError> {
        let response = self.client.get(&self.notifications_path).await?;
        if !response.is_success() {
            return Err(SessionError::Transport(format!(
                "notification pull answered {}",
                response.status
            )));
        }
        serde_json::from_value(response.body)
            .map_err(|e| SessionError::Internal(format!("invalid notification list: {}", e)))
    }
}
