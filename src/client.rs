//! High-level client — `MercadoClient` with REST, streaming, and books.
//!
//! The REST client and the streaming client share one [`OrderBookRegistry`],
//! so a book seeded from a REST snapshot keeps updating from the stream.

use crate::domain::orderbook::{BookUpdate, OrderBook, OrderBookConfig, OrderBookRegistry};
use crate::error::{SdkError, SdkResult};
use crate::http::{
    CircuitBreakerConfig, HttpClient, RateLimiterConfig, ResiliencePipeline, RetryPolicy,
    TokenProvider,
};
use crate::shared::MarketId;
use crate::ws::{StreamingClient, Transport, WsConfig};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The primary entry point for the SDK.
#[derive(Clone)]
pub struct MercadoClient {
    pub(crate) http: HttpClient,
    pub(crate) stream: Arc<StreamingClient>,
    pub(crate) books: OrderBookRegistry,
}

impl MercadoClient {
    pub fn builder() -> MercadoClientBuilder {
        MercadoClientBuilder::default()
    }

    /// REST client (resilience pipeline applied to every call).
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Streaming client. Connect it with [`StreamingClient::connect`].
    pub fn stream(&self) -> &StreamingClient {
        &self.stream
    }

    /// Maintained order books, shared by REST seeding and the stream.
    pub fn books(&self) -> &OrderBookRegistry {
        &self.books
    }

    /// Fetch a REST depth snapshot for `symbol` and install it in the
    /// maintained book, unless the stream already brought the book to the
    /// same or a later update.
    pub async fn seed_orderbook(
        &self,
        symbol: &str,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> SdkResult<OrderBook> {
        let snapshot = self.http.get_orderbook(symbol, limit, cancel).await?;
        let book = self.books.get_or_create(&MarketId::from_symbol(symbol));
        let seeded = book.seed(&BookUpdate::from(snapshot));
        tracing::debug!(
            symbol,
            seeded,
            update_id = book.last_update_id(),
            "Seeded orderbook"
        );
        Ok(book)
    }

    /// Seed `symbol` from REST, then keep it live from the stream.
    pub async fn track_orderbook(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> SdkResult<OrderBook> {
        let book = self.stream.subscribe_book(symbol).await?;
        self.seed_orderbook(symbol, self.stream.config().orderbook_limit, cancel)
            .await?;
        Ok(book)
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Builder
// ═════════════════════════════════════════════════════════════════════════════

pub struct MercadoClientBuilder {
    api_url: String,
    ws_config: WsConfig,
    retry: RetryPolicy,
    circuit: Option<CircuitBreakerConfig>,
    rate_limit: Option<RateLimiterConfig>,
    book_config: OrderBookConfig,
    token_provider: Option<Arc<dyn TokenProvider>>,
    transport: Option<Arc<dyn Transport>>,
}

impl Default for MercadoClientBuilder {
    fn default() -> Self {
        Self {
            api_url: crate::network::DEFAULT_API_URL.to_string(),
            ws_config: WsConfig::default(),
            retry: RetryPolicy::default(),
            circuit: Some(CircuitBreakerConfig::default()),
            rate_limit: Some(RateLimiterConfig::default()),
            book_config: OrderBookConfig::default(),
            token_provider: None,
            transport: None,
        }
    }
}

impl MercadoClientBuilder {
    pub fn api_url(mut self, url: &str) -> Self {
        self.api_url = url.to_string();
        self
    }

    pub fn ws_url(mut self, url: &str) -> Self {
        self.ws_config.url = url.to_string();
        self
    }

    pub fn ws_config(mut self, config: WsConfig) -> Self {
        self.ws_config = config;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// `None` disables the circuit breaker.
    pub fn circuit_breaker(mut self, config: Option<CircuitBreakerConfig>) -> Self {
        self.circuit = config;
        self
    }

    /// `None` disables client-side rate limiting.
    pub fn rate_limit(mut self, config: Option<RateLimiterConfig>) -> Self {
        self.rate_limit = config;
        self
    }

    pub fn orderbook_config(mut self, config: OrderBookConfig) -> Self {
        self.book_config = config;
        self
    }

    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Use a custom streaming transport instead of `tokio-tungstenite`.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<MercadoClient, SdkError> {
        let mut pipeline = ResiliencePipeline::new(self.retry);
        if let Some(config) = self.circuit {
            pipeline = pipeline.with_circuit_breaker(config);
        }
        if let Some(config) = self.rate_limit {
            pipeline = pipeline.with_rate_limiter(config);
        }

        let mut http = HttpClient::new(&self.api_url, Arc::new(pipeline))?;
        if let Some(provider) = self.token_provider {
            http = http.with_token_provider(provider);
        }

        let transport = match self.transport {
            Some(t) => t,
            None => default_transport()?,
        };

        let books = OrderBookRegistry::new(self.book_config);
        let stream = StreamingClient::with_books(self.ws_config, transport, books.clone());

        Ok(MercadoClient {
            http,
            stream: Arc::new(stream),
            books,
        })
    }
}

#[cfg(feature = "ws-native")]
fn default_transport() -> Result<Arc<dyn Transport>, SdkError> {
    Ok(Arc::new(crate::ws::native::TungsteniteTransport))
}

#[cfg(not(feature = "ws-native"))]
fn default_transport() -> Result<Arc<dyn Transport>, SdkError> {
    Err(SdkError::Validation(
        "No streaming transport: enable `ws-native` or call `transport()`".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_shares_book_registry() {
        let client = MercadoClient::builder()
            .api_url("https://api.example.com/v4")
            .orderbook_config(OrderBookConfig::default().with_max_depth(5))
            .build()
            .unwrap();

        let id = MarketId::from_symbol("BTC-BRL");
        let book = client.books().get_or_create(&id);
        assert!(client.stream().books().contains(&id));
        assert!(book.is_empty());
        assert_eq!(client.http().base_url(), "https://api.example.com/v4");
    }

    #[test]
    fn test_builder_pipeline_toggles() {
        let client = MercadoClient::builder()
            .circuit_breaker(None)
            .rate_limit(None)
            .build()
            .unwrap();
        assert!(client.http().pipeline().circuit_state().is_none());
        assert!(client.http().pipeline().rate_limiter().is_none());
    }
}
