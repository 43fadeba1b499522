use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::GatewaySettings;
use crate::domain::Snapshot;
use crate::utils::mask_url;

/// Tokens are refreshed this long before the gateway says they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(30);
/// Lifetime assumed when the credential endpoint does not send one.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway {endpoint} endpoint answered {status}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
    },

    #[error("gateway reported failure for query {0}")]
    QueryRejected(String),

    #[error("malformed gateway payload: {0}")]
    MalformedPayload(String),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Snapshot>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct AuthEnvelope {
    data: AuthData,
}

#[derive(Debug, Deserialize)]
struct AuthData {
    token: String,
    #[serde(rename = "expiresIn", default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Query gateway client: basic credentials buy a bearer token, the token runs a
/// named query that returns the snapshot list.
pub struct GatewayClient {
    client: reqwest::Client,
    settings: GatewaySettings,
    token: Mutex<Option<CachedToken>>,
}

impl GatewayClient {
    pub fn new(settings: GatewaySettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
            token: Mutex::new(None),
        }
    }

    fn auth_url(&self) -> String {
        format!("{}{}", self.settings.base_url, self.settings.auth_path)
    }

    fn query_url(&self) -> String {
        format!("{}{}", self.settings.base_url, self.settings.query_path)
    }

    async fn bearer_token(&self) -> Result<String, FetchError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| Instant::now() < t.refresh_at) {
            return Ok(token.value.clone());
        }

        let token = self.request_token().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn invalidate_token(&self) {
        self.token.lock().await.take();
    }

    async fn request_token(&self) -> Result<CachedToken, FetchError> {
        debug!("Requesting gateway token from {}", mask_url(&self.auth_url()));
        let response = self
            .client
            .get(self.auth_url())
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                endpoint: "authentication",
                status: response.status(),
            });
        }

        let envelope: AuthEnvelope = response
            .json()
            .await
            .map_err(|e| FetchError::MalformedPayload(format!("authentication response: {e}")))?;

        let ttl = envelope
            .data
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);
        info!("🔑 Obtained gateway token (expires in {}s)", ttl.as_secs());

        Ok(CachedToken {
            value: envelope.data.token,
            refresh_at: Instant::now() + ttl.saturating_sub(TOKEN_REFRESH_MARGIN),
        })
    }

    async fn run_query(&self, token: &str) -> Result<reqwest::Response, FetchError> {
        let body = json!({ "filterMap": { "name": self.settings.query_name } });
        Ok(self
            .client
            .post(self.query_url())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?)
    }
}

#[async_trait]
impl SnapshotFetcher for GatewayClient {
    async fn fetch(&self) -> Result<Vec<Snapshot>, FetchError> {
        let token = self.bearer_token().await?;
        let mut response = self.run_query(&token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Gateway rejected the cached token, re-authenticating");
            self.invalidate_token().await;
            let token = self.bearer_token().await?;
            response = self.run_query(&token).await?;
        }

        if !response.status().is_success() {
            return Err(FetchError::Status {
                endpoint: "query",
                status: response.status(),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| FetchError::MalformedPayload(e.to_string()))?;
        parse_query_payload(&payload, &self.settings.query_name)
    }
}

/// Extracts `data.<query>.data` from a query response. An explicit
/// `status: false` means the gateway ran the query and it failed.
pub fn parse_query_payload(payload: &Value, query_name: &str) -> Result<Vec<Snapshot>, FetchError> {
    let result = payload
        .get("data")
        .and_then(|data| data.get(query_name))
        .ok_or_else(|| FetchError::MalformedPayload(format!("missing data.{query_name}")))?;

    if result.get("status").and_then(Value::as_bool) == Some(false) {
        return Err(FetchError::QueryRejected(query_name.to_string()));
    }

    let rows = result
        .get("data")
        .filter(|rows| !rows.is_null())
        .ok_or_else(|| FetchError::MalformedPayload(format!("missing data.{query_name}.data")))?;

    Vec::<Snapshot>::deserialize(rows).map_err(|e| FetchError::MalformedPayload(e.to_string()))
}
