//! Zerodha Kite Connect v3 adapter.
//!
//! Login redirects back with `request_token`. The exchange signs it with
//! `sha256(api_key + request_token + api_secret)`; quotes come from
//! `GET /quote?i=EXCHANGE:SYMBOL`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use crate::brokers::{BrokerAdapter, authorize_url, require_code, require_secret, required, sha256_hex};
use crate::client::{HttpClient, headers, join_url};
use crate::error::{GatewayError, Result};
use crate::types::quote::{RawQuote, lenient_f64, lenient_timestamp};
use crate::types::{BrokerDescriptor, Instrument, NormalizedQuote, Session};

/// Kite Connect.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zerodha;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// `{ "status": "success", "data": ... }` envelope.
#[derive(Debug, Deserialize)]
struct KiteEnvelope<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

impl<T> KiteEnvelope<T> {
    fn into_data(self) -> Result<T> {
        if self.status != "success" {
            return Err(GatewayError::Broker(
                self.message.unwrap_or_else(|| format!("status {}", self.status)),
            ));
        }
        self.data
            .ok_or_else(|| GatewayError::Broker("response has no data".into()))
    }
}

#[derive(Debug, Deserialize)]
struct KiteSession {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct KiteOhlc {
    #[serde(default, deserialize_with = "lenient_f64")]
    open: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    high: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    low: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct KiteQuote {
    #[serde(default, deserialize_with = "lenient_f64")]
    last_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    net_change: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    volume: Option<f64>,
    #[serde(default)]
    ohlc: Option<KiteOhlc>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    timestamp: Option<i64>,
}

impl From<KiteQuote> for RawQuote {
    fn from(q: KiteQuote) -> Self {
        let ohlc = q.ohlc.unwrap_or_default();
        Self {
            ltp: q.last_price,
            // Kite reports 0 rather than omitting the field when it has no
            // change figure; derive it from the previous close instead.
            change: q.net_change.filter(|c| *c != 0.0),
            volume: q.volume,
            open: ohlc.open,
            high: ohlc.high,
            low: ohlc.low,
            close: ohlc.close,
            timestamp: q.timestamp,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn kite_headers(api_key: &str, access_token: Option<&str>) -> Result<HeaderMap> {
    match access_token {
        Some(token) => {
            let auth = format!("token {api_key}:{token}");
            headers([("x-kite-version", "3"), ("authorization", auth.as_str())])
        }
        None => headers([("x-kite-version", "3")]),
    }
}

/// Kite instrument key, e.g. `NSE:NIFTY 50`.
fn instrument_key(instrument: &Instrument) -> String {
    format!("{}:{}", instrument.exchange, instrument.symbol)
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

#[async_trait]
impl BrokerAdapter for Zerodha {
    fn id(&self) -> &str {
        crate::constants::ZERODHA
    }

    fn login_url(&self, broker: &BrokerDescriptor, state: Option<&str>) -> Result<String> {
        let mut params = vec![
            ("v", "3"),
            ("api_key", broker.api_key()),
            ("redirect_uri", broker.redirect_uri.as_str()),
        ];
        // Kite echoes `redirect_params` back on the callback as-is.
        let redirect_params = state.map(|s| format!("state={s}"));
        if let Some(rp) = redirect_params.as_deref() {
            params.push(("redirect_params", rp));
        }
        authorize_url(&broker.auth_url, &params)
    }

    async fn exchange_code(
        &self,
        http: &HttpClient,
        broker: &BrokerDescriptor,
        code: &str,
    ) -> Result<Session> {
        let request_token = require_code(code)?;
        let api_secret = require_secret(broker)?;
        let api_key = broker.api_key();
        let checksum = sha256_hex(&format!("{api_key}{request_token}{api_secret}"));

        let url = join_url(&broker.api_base_url, "/session/token");
        let resp: KiteEnvelope<KiteSession> = http
            .post_form(
                &url,
                &[
                    ("api_key", api_key),
                    ("request_token", request_token),
                    ("checksum", checksum.as_str()),
                ],
                kite_headers(api_key, None)?,
            )
            .await?;

        let data = resp.into_data()?;
        let access_token = required(data.access_token, "access_token")?;

        Ok(Session::new(access_token, Utc::now(), None)
            .with_refresh_token(data.refresh_token)
            .with_user_id(data.user_id))
    }

    async fn fetch_quote(
        &self,
        http: &HttpClient,
        broker: &BrokerDescriptor,
        session: &Session,
        instrument: &Instrument,
    ) -> Result<NormalizedQuote> {
        let key = instrument_key(instrument);
        let url = join_url(&broker.api_base_url, "/quote");
        let resp: KiteEnvelope<HashMap<String, KiteQuote>> = http
            .get(
                &url,
                &[("i", key.as_str())],
                kite_headers(broker.api_key(), Some(&session.access_token))?,
            )
            .await?;

        let mut data = resp.into_data()?;
        let quote = data
            .remove(&key)
            .ok_or_else(|| GatewayError::Broker(format!("no quote returned for {key}")))?;

        Ok(RawQuote::from(quote).normalize(instrument.symbol.clone(), Utc::now()))
    }

    async fn revoke(
        &self,
        http: &HttpClient,
        broker: &BrokerDescriptor,
        session: &Session,
    ) -> Result<()> {
        let base = join_url(&broker.api_base_url, "/session/token");
        let url = url::Url::parse_with_params(
            &base,
            &[
                ("api_key", broker.api_key()),
                ("access_token", session.access_token.as_str()),
            ],
        )?;
        http.delete_no_content(
            url.as_str(),
            kite_headers(broker.api_key(), Some(&session.access_token))?,
        )
        .await
    }
}
