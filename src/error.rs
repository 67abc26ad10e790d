//! Error types for the `broker-gateway` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, GatewayError>`.
//!
//! [`GatewayError`] covers:
//! - **Gateway errors**: unknown broker, missing session, failed code
//!   exchange, failed quote fetch, corrupt persisted state
//! - **API errors**: structured error bodies returned by a broker
//! - **HTTP status errors**: unexpected status codes with response body
//! - **HTTP transport errors**: network, TLS, timeout failures
//! - **JSON errors**: deserialization failures
//! - **URL errors**: malformed URL construction
//! - **Invalid arguments / configuration**: client-side validation errors

use std::fmt;

/// Error body shared by most broker REST APIs.
///
/// Brokers disagree on field names, so the common spellings are accepted as
/// aliases: Kite and Angel send `message`/`errorcode`, Upstox nests an
/// `errors` array (only the top-level `status` survives here), Fyers sends
/// `message` with a numeric `code`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiErrorBody {
    /// Broker status word (e.g. "error", "failed").
    #[serde(default)]
    pub status: Option<String>,
    /// Broker error code (e.g. "AG8001", "TokenException").
    #[serde(default, alias = "errorcode", alias = "error_type", alias = "errorCode")]
    pub error_code: Option<String>,
    /// Human-readable description of the error.
    #[serde(default, alias = "errorMessage", alias = "error_message")]
    pub message: Option<String>,
}

impl fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.error_code.as_deref().unwrap_or("UNKNOWN"),
            self.message.as_deref().unwrap_or("No message"),
        )
    }
}

/// All possible errors produced by the gateway and its adapters.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The requested broker name is not in the registry.
    #[error("broker not configured: {0}")]
    BrokerNotConfigured(String),

    /// The broker is registered with `enabled: false`.
    #[error("broker disabled: {0}")]
    BrokerDisabled(String),

    /// The operation needs a live session that does not exist or has expired.
    #[error("not authenticated with broker: {0}")]
    NotAuthenticated(String),

    /// The broker rejected the code exchange or answered with a malformed body.
    #[error("authentication with {broker} failed: {cause}")]
    AuthExchangeFailed {
        /// Broker name.
        broker: String,
        /// Underlying failure.
        #[source]
        cause: Box<GatewayError>,
    },

    /// A quote could not be fetched or parsed.
    #[error("quote for {symbol} from {broker} failed: {cause}")]
    QuoteFetchFailed {
        /// Broker name.
        broker: String,
        /// Requested symbol, as passed by the caller.
        symbol: String,
        /// Underlying failure.
        #[source]
        cause: Box<GatewayError>,
    },

    /// Persisted gateway state could not be read back.
    #[error("persisted state is corrupt: {0}")]
    PersistenceCorrupt(String),

    /// A structured error body returned by a broker REST API.
    #[error("API error (HTTP {status}): {body}")]
    Api {
        /// The HTTP status code.
        status: reqwest::StatusCode,
        /// The parsed error body.
        body: ApiErrorBody,
    },

    /// A 2xx response whose body reports failure (e.g. `"status": "error"`).
    #[error("broker error: {0}")]
    Broker(String),

    /// The server returned an unexpected HTTP status code.
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// The HTTP status code.
        status: reqwest::StatusCode,
        /// The response body text.
        body: String,
    },

    /// A network or transport-level error from `reqwest`.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to (de)serialize a JSON body.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error building or parsing a URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Local storage failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Broker configuration is incomplete or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Wrap `cause` as an [`GatewayError::AuthExchangeFailed`] for `broker`.
    pub fn auth_failed(broker: impl Into<String>, cause: GatewayError) -> Self {
        Self::AuthExchangeFailed {
            broker: broker.into(),
            cause: Box::new(cause),
        }
    }

    /// Wrap `cause` as a [`GatewayError::QuoteFetchFailed`].
    pub fn quote_failed(
        broker: impl Into<String>,
        symbol: impl Into<String>,
        cause: GatewayError,
    ) -> Self {
        Self::QuoteFetchFailed {
            broker: broker.into(),
            symbol: symbol.into(),
            cause: Box::new(cause),
        }
    }

    /// Whether retrying the same request could succeed.
    ///
    /// Only transport failures (timeouts, refused connections) and 5xx
    /// responses qualify; anything the broker understood and rejected does not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::HttpStatus { status, .. } | Self::Api { status, .. } => {
                status.is_server_error()
            }
            Self::AuthExchangeFailed { cause, .. } | Self::QuoteFetchFailed { cause, .. } => {
                cause.is_transient()
            }
            _ => false,
        }
    }

    /// Whether the broker refused the credentials (HTTP 401/403), meaning the
    /// session is dead regardless of its recorded expiry.
    pub fn is_auth_rejection(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } | Self::Api { status, .. } => {
                *status == reqwest::StatusCode::UNAUTHORIZED
                    || *status == reqwest::StatusCode::FORBIDDEN
            }
            Self::AuthExchangeFailed { cause, .. } | Self::QuoteFetchFailed { cause, .. } => {
                cause.is_auth_rejection()
            }
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GatewayError>;
