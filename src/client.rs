//! Shared HTTP client used by every broker adapter.
//!
//! The [`HttpClient`] struct wraps [`reqwest::Client`] with a request timeout
//! and uniform error mapping. Unlike a single-broker client it carries no
//! credentials: each adapter builds its own auth headers from the session and
//! descriptor it is handed, so one `HttpClient` serves all brokers.

use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::constants::HTTP_TIMEOUT;
use crate::error::{ApiErrorBody, GatewayError, Result};

/// Timeout-bound HTTP client shared by all adapters.
///
/// Cloning is cheap; the underlying connection pool is shared.
///
/// # Example
///
/// ```no_run
/// use broker_gateway::client::HttpClient;
///
/// # fn main() -> broker_gateway::Result<()> {
/// let http = HttpClient::new()?;
/// # let _ = http;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
}

impl HttpClient {
    /// Create a client with the default timeout ([`HTTP_TIMEOUT`]).
    pub fn new() -> Result<Self> {
        Self::with_timeout(HTTP_TIMEOUT)
    }

    /// Create a client whose requests are abandoned after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .default_headers(Self::default_headers())
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    /// Returns a reference to the underlying `reqwest::Client`.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    // -----------------------------------------------------------------------
    // Generic HTTP helpers
    // -----------------------------------------------------------------------

    /// Perform a GET request with query parameters and deserialize the JSON response.
    pub async fn get<R: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: HeaderMap,
    ) -> Result<R> {
        tracing::debug!(%url, "GET");

        let resp = self
            .http
            .get(url)
            .headers(headers)
            .query(query)
            .send()
            .await?;

        self.handle_response(resp).await
    }

    /// Perform a form-encoded POST request and deserialize the response.
    pub async fn post_form<R: DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: HeaderMap,
    ) -> Result<R> {
        tracing::debug!(%url, "POST (form)");

        let resp = self
            .http
            .post(url)
            .headers(headers)
            .form(form)
            .send()
            .await?;

        self.handle_response(resp).await
    }

    /// Perform a POST request with a JSON body and deserialize the response.
    pub async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        headers: HeaderMap,
    ) -> Result<R> {
        tracing::debug!(%url, "POST");

        let resp = self
            .http
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await?;

        self.handle_response(resp).await
    }

    /// Perform a DELETE request, discarding any response body.
    pub async fn delete_no_content(&self, url: &str, headers: HeaderMap) -> Result<()> {
        tracing::debug!(%url, "DELETE (no content)");

        let resp = self.http.delete(url).headers(headers).send().await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(parse_error_body(status, &body))
        }
    }

    /// Perform a POST request with a JSON body, discarding any response body.
    pub async fn post_no_content<B: Serialize>(
        &self,
        url: &str,
        body: &B,
        headers: HeaderMap,
    ) -> Result<()> {
        tracing::debug!(%url, "POST (no content)");

        let resp = self.http.post(url).headers(headers).json(body).send().await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(parse_error_body(status, &body))
        }
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Default headers applied to every request.
    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    /// Read a response, returning either the deserialized body or a `GatewayError`.
    async fn handle_response<R: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<R> {
        let status = resp.status();
        let bytes = resp.bytes().await?;

        if status.is_success() {
            serde_json::from_slice(&bytes).map_err(GatewayError::Json)
        } else {
            let body = String::from_utf8_lossy(&bytes);
            Err(parse_error_body(status, &body))
        }
    }
}

/// Try to parse a broker's JSON error structure; fall back to a raw HTTP
/// status error.
pub(crate) fn parse_error_body(status: reqwest::StatusCode, body: &str) -> GatewayError {
    if let Ok(api_err) = serde_json::from_str::<ApiErrorBody>(body) {
        if api_err.error_code.is_some() || api_err.message.is_some() {
            return GatewayError::Api {
                status,
                body: api_err,
            };
        }
    }
    GatewayError::HttpStatus {
        status,
        body: body.to_owned(),
    }
}

/// Join a base URL and a path segment, tolerating slashes on either side.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Build a header map from `(name, value)` pairs, rejecting values that are
/// not valid header text (e.g. tokens containing newlines).
pub(crate) fn headers<'a>(
    pairs: impl IntoIterator<Item = (&'static str, &'a str)>,
) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        let value = HeaderValue::from_str(value).map_err(|_| {
            GatewayError::InvalidArgument(format!("{name} contains invalid header characters"))
        })?;
        map.insert(HeaderName::from_static(name), value);
    }
    Ok(map)
}
