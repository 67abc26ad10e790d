//! Broker adapters.
//!
//! Each supported broker implements [`BrokerAdapter`]: one pure login-URL
//! builder, one code exchange and one quote fetch. Adapters are stateless;
//! everything broker-specific they need arrives through the
//! [`BrokerDescriptor`], and the HTTP client is injected per call.
//!
//! | Adapter | Code exchange | Quote endpoint |
//! |---|---|---|
//! | [`zerodha`] | form POST + SHA-256 checksum | `GET /quote` |
//! | [`upstox`] | form POST with client secret | `GET /v2/market-quote/quotes` |
//! | [`angel`] | token arrives on redirect, validated via profile | `POST .../market/v1/quote/` |
//! | [`fyers`] | JSON POST + SHA-256 app hash | `GET /data/quotes` |

pub mod angel;
pub mod fyers;
pub mod upstox;
pub mod zerodha;

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::client::HttpClient;
use crate::constants;
use crate::error::{GatewayError, Result};
use crate::types::{BrokerDescriptor, Instrument, NormalizedQuote, Session};

/// Broker-specific protocol: login URL, code exchange, quote fetch.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Short identifier used in logs, e.g. `"zerodha"`.
    fn id(&self) -> &str;

    /// Build the browser authorization URL. Pure; no I/O.
    fn login_url(&self, broker: &BrokerDescriptor, state: Option<&str>) -> Result<String>;

    /// Exchange the code delivered on the redirect for a session.
    async fn exchange_code(
        &self,
        http: &HttpClient,
        broker: &BrokerDescriptor,
        code: &str,
    ) -> Result<Session>;

    /// Fetch and normalize one quote.
    async fn fetch_quote(
        &self,
        http: &HttpClient,
        broker: &BrokerDescriptor,
        session: &Session,
        instrument: &Instrument,
    ) -> Result<NormalizedQuote>;

    /// Invalidate the session on the broker's side, where the broker
    /// supports it.
    async fn revoke(
        &self,
        _http: &HttpClient,
        _broker: &BrokerDescriptor,
        _session: &Session,
    ) -> Result<()> {
        Ok(())
    }
}

/// The built-in adapter for `name`, if there is one.
pub fn builtin_adapter(name: &str) -> Option<Arc<dyn BrokerAdapter>> {
    match name {
        constants::ZERODHA => Some(Arc::new(zerodha::Zerodha)),
        constants::UPSTOX => Some(Arc::new(upstox::Upstox)),
        constants::ANGEL => Some(Arc::new(angel::Angel)),
        constants::FYERS => Some(Arc::new(fyers::Fyers)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by the adapters
// ---------------------------------------------------------------------------

/// Lower-case hex SHA-256 of `input`.
pub(crate) fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Reject empty authorization codes before any network call.
pub(crate) fn require_code(code: &str) -> Result<&str> {
    let code = code.trim();
    if code.is_empty() {
        return Err(GatewayError::InvalidArgument(
            "authorization code is empty".into(),
        ));
    }
    Ok(code)
}

/// The API secret, or a configuration error naming the broker.
pub(crate) fn require_secret(broker: &BrokerDescriptor) -> Result<&str> {
    broker
        .api_secret()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::Config(format!("{}: api secret is not configured", broker.name)))
}

/// `base?k=v&...` with every value percent-encoded.
pub(crate) fn authorize_url(base: &str, params: &[(&str, &str)]) -> Result<String> {
    let url = url::Url::parse_with_params(base, params)?;
    Ok(url.into())
}

/// A token field that must be present and non-empty.
pub(crate) fn required(field: Option<String>, name: &str) -> Result<String> {
    field
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::Broker(format!("response missing {name}")))
}
