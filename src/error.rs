//! Unified SDK error types.

use std::time::Duration;

use thiserror::Error;

/// Top-level SDK error.
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type SdkResult<T> = Result<T, SdkError>;

/// Which retry toggle an error falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Request timeout (client-side or HTTP 408).
    Timeout,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    ServerFault,
    /// Connection refused/reset before a response arrived.
    Connection,
}

/// HTTP-layer errors.
#[derive(Error, Debug)]
pub enum HttpError {
    #[cfg(feature = "http")]
    #[error("Request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Client error {status}: {body}")]
    ClientError { status: u16, body: String },

    #[error("Timeout")]
    Timeout,

    #[error("Circuit open: request not attempted")]
    CircuitOpen,

    #[error("Throttled: no rate limit permit available")]
    Throttled,

    #[error("Cancelled")]
    Cancelled,

    #[error("Deserialization error: {0}")]
    Deserialize(String),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        last_error: Box<HttpError>,
    },
}

impl HttpError {
    /// Classify the error for the retry loop. `None` means terminal.
    pub fn retry_class(&self) -> Option<RetryClass> {
        match self {
            HttpError::Timeout => Some(RetryClass::Timeout),
            HttpError::RateLimited { .. } => Some(RetryClass::RateLimited),
            HttpError::ServerError { status, .. } if (500..=599).contains(status) => {
                Some(RetryClass::ServerFault)
            }
            HttpError::Connection(_) => Some(RetryClass::Connection),
            #[cfg(feature = "http")]
            HttpError::Reqwest(e) => {
                if e.is_timeout() {
                    Some(RetryClass::Timeout)
                } else if e.is_connect() || e.is_request() {
                    Some(RetryClass::Connection)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Whether this outcome should count against the circuit breaker.
    ///
    /// Any response from the server, including a terminal 4xx, proves the
    /// endpoint is reachable and does not count.
    pub fn is_fault(&self) -> bool {
        match self {
            HttpError::MaxRetriesExceeded { last_error, .. } => last_error.is_fault(),
            other => other.retry_class().is_some(),
        }
    }

    /// Server-provided Retry-After hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            HttpError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

pub type HttpResult<T> = Result<T, HttpError>;

/// WebSocket errors.
#[derive(Error, Debug, Clone)]
pub enum WsError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    #[error("Connection closed: code={code:?} reason={reason}")]
    Closed { code: Option<u16>, reason: String },

    #[error("Client has been shut down")]
    ShutDown,
}

#[cfg(feature = "ws-native")]
impl From<tokio_tungstenite::tungstenite::Error> for WsError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed | Error::AlreadyClosed => WsError::Closed {
                code: None,
                reason: "Connection closed".to_string(),
            },
            Error::Url(e) => WsError::InvalidUrl(e.to_string()),
            Error::Http(resp) => {
                WsError::ConnectionFailed(format!("HTTP error: {}", resp.status()))
            }
            Error::Io(e) => WsError::ConnectionFailed(e.to_string()),
            other => WsError::Protocol(other.to_string()),
        }
    }
}

pub type WsResult<T> = Result<T, WsError>;

/// Credential supplier errors.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Token unavailable: {0}")]
    TokenUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_class_mapping() {
        assert_eq!(HttpError::Timeout.retry_class(), Some(RetryClass::Timeout));
        assert_eq!(
            HttpError::RateLimited { retry_after: None }.retry_class(),
            Some(RetryClass::RateLimited)
        );
        assert_eq!(
            HttpError::ServerError { status: 503, body: String::new() }.retry_class(),
            Some(RetryClass::ServerFault)
        );
        assert_eq!(
            HttpError::ClientError { status: 400, body: String::new() }.retry_class(),
            None
        );
        assert_eq!(HttpError::NotFound("x".into()).retry_class(), None);
    }

    #[test]
    fn test_terminal_errors_are_not_faults() {
        assert!(!HttpError::Unauthorized.is_fault());
        assert!(HttpError::Connection("reset".into()).is_fault());

        let exhausted = HttpError::MaxRetriesExceeded {
            attempts: 4,
            last_error: Box::new(HttpError::ServerError { status: 502, body: String::new() }),
        };
        assert!(exhausted.is_fault());
    }
}
