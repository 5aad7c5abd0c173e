//! Low-level HTTP client — `HttpClient`.
//!
//! Every request runs through the shared [`ResiliencePipeline`]. GET calls use
//! the pipeline's retry policy; POST calls are not retried unless a
//! [`RetryMode`] says otherwise.

use crate::domain::orderbook::wire::RestOrderBook;
use crate::error::{AuthError, HttpError, HttpResult};
use crate::http::pipeline::ResiliencePipeline;
use crate::http::retry::RetryMode;

use async_lock::RwLock;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Supplies bearer tokens for authenticated calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, AuthError>;
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, AuthError> {
        if self.0.is_empty() {
            return Err(AuthError::NotAuthenticated);
        }
        Ok(self.0.clone())
    }
}

/// Low-level HTTP client for the REST API.
#[derive(Clone)]
pub struct HttpClient {
    base_url: String,
    client: Client,
    pipeline: Arc<ResiliencePipeline>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    /// Cached token. NEVER exposed publicly.
    auth_token: Arc<RwLock<Option<String>>>,
}

impl HttpClient {
    pub fn new(base_url: &str, pipeline: Arc<ResiliencePipeline>) -> HttpResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            pipeline,
            token_provider: None,
            auth_token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn pipeline(&self) -> &ResiliencePipeline {
        &self.pipeline
    }

    /// Drop the cached token; the next authenticated call asks the provider.
    pub async fn clear_auth_token(&self) {
        *self.auth_token.write().await = None;
    }

    // ── Market data ──────────────────────────────────────────────────────

    /// REST depth snapshot for `symbol` (`BASE-QUOTE`).
    pub async fn get_orderbook(
        &self,
        symbol: &str,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> HttpResult<RestOrderBook> {
        let url = orderbook_url(&self.base_url, symbol, limit);
        self.get(&url, cancel).await
    }

    // ── Generic calls ────────────────────────────────────────────────────

    /// GET `path` (relative to the base URL, or absolute).
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> HttpResult<T> {
        self.request(Method::GET, path, None::<&()>, &RetryMode::Default, cancel)
            .await
    }

    /// POST a JSON body. Not retried.
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> HttpResult<T> {
        self.request(Method::POST, path, Some(body), &RetryMode::None, cancel)
            .await
    }

    pub async fn request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        retry: &RetryMode,
        cancel: &CancellationToken,
    ) -> HttpResult<T> {
        let url = self.resolve(path);
        let body = body.map(serde_json::to_value).transpose().map_err(|e| {
            HttpError::Deserialize(format!("Failed to serialize request body: {}", e))
        })?;

        self.pipeline
            .execute_with(retry, cancel, || self.do_request(&method, &url, body.as_ref()))
            .await
    }

    // ── Internal ─────────────────────────────────────────────────────────

    fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    async fn bearer_token(&self) -> HttpResult<Option<String>> {
        if let Some(token) = self.auth_token.read().await.as_ref() {
            return Ok(Some(token.clone()));
        }
        let Some(provider) = &self.token_provider else {
            return Ok(None);
        };
        let token = provider.token().await?;
        *self.auth_token.write().await = Some(token.clone());
        Ok(Some(token))
    }

    async fn do_request<T: DeserializeOwned>(
        &self,
        method: &Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> HttpResult<T> {
        let mut req = self.client.request(method.clone(), url);

        if let Some(token) = self.bearer_token().await? {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req.send().await?;
        let status = resp.status();

        if status.is_success() {
            let text = resp.text().await?;
            return serde_json::from_str(&text)
                .map_err(|e| HttpError::Deserialize(format!("{}: {}", url, e)));
        }

        let headers = resp.headers().clone();
        let body_text = resp.text().await.unwrap_or_default();
        let err = error_for_status(status, &headers, body_text);
        if matches!(err, HttpError::Unauthorized) {
            self.clear_auth_token().await;
        }
        Err(err)
    }
}

fn orderbook_url(base_url: &str, symbol: &str, limit: Option<u32>) -> String {
    let mut url = format!(
        "{}/{}/orderbook",
        base_url,
        urlencoding::encode(&symbol.trim().to_uppercase())
    );
    if let Some(l) = limit {
        url = format!("{}?limit={}", url, l);
    }
    url
}

/// Map a non-success response to an error.
fn error_for_status(status: StatusCode, headers: &HeaderMap, body: String) -> HttpError {
    match status.as_u16() {
        401 => HttpError::Unauthorized,
        404 => HttpError::NotFound(body),
        408 => HttpError::Timeout,
        429 => HttpError::RateLimited {
            retry_after: headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after),
        },
        code @ 400..=499 => HttpError::ClientError { status: code, body },
        code => HttpError::ServerError { status: code, body },
    }
}

/// `Retry-After` as delta-seconds or an HTTP date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}
