//! HTTP memory service backend
//!
//! Speaks a small JSON protocol:
//!
//! | Method | Path        | Body                 | Response         |
//! |--------|-------------|----------------------|------------------|
//! | POST   | `/memorize` | `{document, scope}`  | `MemorizeAck`    |
//! | POST   | `/retrieve` | `{query, scope}`     | `RetrieveResult` |
//! | GET    | `/health`   |                      | any 2xx          |
//!
//! Requests carry `Authorization: Bearer <token>` when a token is configured.

use super::backend::{MemorizeAck, MemoryBackend, MemoryDocument, RetrieveResult, UserScope};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct MemorizeRequest {
    document: MemoryDocument,
    scope: UserScope,
}

#[derive(Debug, Serialize, Deserialize)]
struct RetrieveRequest {
    query: String,
    scope: UserScope,
}

/// Memory service reached over HTTP
pub struct HttpBackend {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Create a backend for `base_url` with a per-request timeout
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    /// Create from configuration, resolving the token from the environment
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(Error::Config("backend.base_url is empty".to_string()));
        }
        let api_key = config.api_key_env.as_deref().and_then(|var| match std::env::var(var) {
            Ok(token) if !token.is_empty() => Some(token),
            _ => {
                tracing::debug!("Memory service token env var {} not set, using anonymous access", var);
                None
            }
        });
        Self::new(
            config.base_url.clone(),
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = self.endpoint(path);
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.api_key {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!(
                "{} returned {}: {}",
                url, status, detail
            )));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| Error::Backend(format!("Failed to parse response from {}: {}", url, e)))
    }
}

#[async_trait]
impl MemoryBackend for HttpBackend {
    async fn memorize(&self, document: MemoryDocument, scope: &UserScope) -> Result<MemorizeAck> {
        let body = MemorizeRequest {
            document,
            scope: scope.clone(),
        };
        self.post("memorize", &body).await
    }

    async fn retrieve(&self, query: &str, scope: &UserScope) -> Result<RetrieveResult> {
        let body = RetrieveRequest {
            query: query.to_string(),
            scope: scope.clone(),
        };
        self.post("retrieve", &body).await
    }

    async fn health(&self) -> Result<()> {
        let url = self.endpoint("health");
        let mut request = self.client.get(&url);
        if let Some(token) = &self.api_key {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Health check against {} failed: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(Error::Backend(format!(
                "Health check against {} returned {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
