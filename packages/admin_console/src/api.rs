//! REST collaborators: token refresh and the unread notice count.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use realtime_handlers::UnreadCountSource;
use realtime_link::{SessionStore, TokenRefresher};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ApiFileConfig;

/// `{ code, msg, data }` wrapper every endpoint answers with.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn into_data(self) -> Result<T> {
        if self.code != 0 {
            bail!(
                "api error {}: {}",
                self.code,
                self.msg.as_deref().unwrap_or("no message")
            );
        }
        self.data.context("api response without data")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPair {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    refresh_path: String,
    unread_count_path: String,
    client_id: String,
    session: Arc<SessionStore>,
    refreshing: Mutex<()>,
}

impl ApiClient {
    pub fn new(config: &ApiFileConfig, session: Arc<SessionStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            refresh_path: config.refresh_path.clone(),
            unread_count_path: config.unread_count_path.clone(),
            client_id: config.client_id.clone(),
            session,
            refreshing: Mutex::new(()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Bearer token and tenant headers from the current session.
    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let state = self.session.state();
        let mut request = request;
        if let Some(token) = state.access_token.as_deref() {
            request = request.bearer_auth(token);
        }
        if let Some(tenant_id) = state.tenant_id {
            request = request.header("tenant-id", tenant_id.to_string());
        }
        if let Some(visit_tenant_id) = state.visit_tenant_id {
            request = request.header("visit-tenant-id", visit_tenant_id.to_string());
        }
        request
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            bail!("{what} failed with HTTP {status}");
        }
        let body: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("{what} returned an unreadable body"))?;
        body.into_data().with_context(|| format!("{what} rejected"))
    }
}

#[async_trait]
impl TokenRefresher for ApiClient {
    async fn refresh(&self) -> Result<()> {
        let _running = self
            .refreshing
            .try_lock()
            .map_err(|_| anyhow!("token refresh already in progress"))?;

        let refresh_token = self
            .session
            .state()
            .refresh_token
            .context("no refresh token")?;

        let response = self
            .http
            .post(self.url(&self.refresh_path))
            .query(&[
                ("refreshToken", refresh_token.as_str()),
                ("clientId", self.client_id.as_str()),
            ])
            .send()
            .await
            .context("token refresh request failed")?;
        let pair: TokenPair = Self::read(response, "token refresh").await?;

        info!("access token refreshed");
        self.session.set_tokens(pair.access_token, pair.refresh_token);
        Ok(())
    }
}

#[async_trait]
impl UnreadCountSource for ApiClient {
    async fn unread_count(&self) -> Result<u64> {
        let response = self
            .authorized(self.http.get(self.url(&self.unread_count_path)))
            .send()
            .await
            .context("unread count request failed")?;
        let count = Self::read(response, "unread count").await?;
        debug!(count, "unread count");
        Ok(count)
    }
}
