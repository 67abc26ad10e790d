//! Upstox API v2 adapter.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use crate::brokers::{BrokerAdapter, authorize_url, require_code, require_secret, required};
use crate::client::{HttpClient, headers, join_url};
use crate::error::{GatewayError, Result};
use crate::types::instrument::Exchange;
use crate::types::quote::{RawQuote, lenient_f64, lenient_timestamp};
use crate::types::{BrokerDescriptor, Instrument, NormalizedQuote, Session};

/// Upstox.
#[derive(Debug, Clone, Copy, Default)]
pub struct Upstox;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    status: String,
    #[serde(default)]
    data: HashMap<String, UpstoxQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct UpstoxOhlc {
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
struct UpstoxQuote {
    #[serde(default, deserialize_with = "lenient_f64")]
    last_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    net_change: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    volume: Option<f64>,
    #[serde(default)]
    ohlc: Option<UpstoxOhlc>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    timestamp: Option<i64>,
}

impl From<UpstoxQuote> for RawQuote {
    fn from(q: UpstoxQuote) -> Self {
        let ohlc = q.ohlc.unwrap_or_default();
        // Upstox's intraday `ohlc.close` tracks the live price; the previous
        // session close is only recoverable from `net_change`.
        let previous_close = q.last_price.zip(q.net_change).map(|(ltp, chg)| ltp - chg);
        Self {
            ltp: q.last_price,
            change: q.net_change,
            previous_close,
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

fn upstox_headers(access_token: Option<&str>) -> Result<HeaderMap> {
    match access_token {
        Some(token) => {
            let auth = format!("Bearer {token}");
            headers([("api-version", "2.0"), ("authorization", auth.as_str())])
        }
        None => headers([("api-version", "2.0")]),
    }
}

/// Upstox `instrument_key`, e.g. `NSE_INDEX|Nifty 50` or `NSE_EQ|INE002A01018`.
///
/// Symbols that already contain `|` are passed through untouched.
fn instrument_key(instrument: &Instrument) -> String {
    if let Some(index) = instrument.index {
        return index.upstox_key.to_owned();
    }
    if instrument.symbol.contains('|') {
        return instrument.symbol.clone();
    }
    let segment = match instrument.exchange {
        Exchange::NSE => "NSE_EQ",
        Exchange::BSE => "BSE_EQ",
        Exchange::NFO => "NSE_FO",
        Exchange::BFO => "BSE_FO",
        Exchange::MCX => "MCX_FO",
        Exchange::CDS => "NCD_FO",
    };
    format!("{segment}|{}", instrument.symbol)
}

#[async_trait]
impl BrokerAdapter for Upstox {
    fn id(&self) -> &str {
        crate::constants::UPSTOX
    }

    fn login_url(&self, broker: &BrokerDescriptor, state: Option<&str>) -> Result<String> {
        let mut params = vec![
            ("response_type", "code"),
            ("client_id", broker.api_key()),
            ("redirect_uri", broker.redirect_uri.as_str()),
        ];
        if let Some(state) = state {
            params.push(("state", state));
        }
        authorize_url(&broker.auth_url, &params)
    }

    async fn exchange_code(
        &self,
        http: &HttpClient,
        broker: &BrokerDescriptor,
        code: &str,
    ) -> Result<Session> {
        let code = require_code(code)?;
        let secret = require_secret(broker)?;

        let url = join_url(&broker.api_base_url, "/v2/login/authorization/token");
        let resp: TokenResponse = http
            .post_form(
                &url,
                &[
                    ("code", code),
                    ("client_id", broker.api_key()),
                    ("client_secret", secret),
                    ("redirect_uri", broker.redirect_uri.as_str()),
                    ("grant_type", "authorization_code"),
                ],
                upstox_headers(None)?,
            )
            .await?;

        let access_token = required(resp.access_token, "access_token")?;
        Ok(Session::new(access_token, Utc::now(), resp.expires_in).with_user_id(resp.user_id))
    }

    async fn fetch_quote(
        &self,
        http: &HttpClient,
        broker: &BrokerDescriptor,
        session: &Session,
        instrument: &Instrument,
    ) -> Result<NormalizedQuote> {
        let key = instrument_key(instrument);
        let url = join_url(&broker.api_base_url, "/v2/market-quote/quotes");
        let resp: QuoteEnvelope = http
            .get(
                &url,
                &[("instrument_key", key.as_str())],
                upstox_headers(Some(&session.access_token))?,
            )
            .await?;

        if resp.status != "success" {
            return Err(GatewayError::Broker(format!("status {}", resp.status)));
        }
        // The response is keyed `SEGMENT:tradingsymbol`, not by the requested
        // instrument key; a single-instrument request has exactly one entry.
        let quote = resp
            .data
            .into_values()
            .next()
            .ok_or_else(|| GatewayError::Broker(format!("no quote returned for {key}")))?;

        Ok(RawQuote::from(quote).normalize(instrument.symbol.clone(), Utc::now()))
    }

    async fn revoke(
        &self,
        http: &HttpClient,
        broker: &BrokerDescriptor,
        session: &Session,
    ) -> Result<()> {
        let url = join_url(&broker.api_base_url, "/v2/logout");
        http.delete_no_content(&url, upstox_headers(Some(&session.access_token))?)
            .await
    }
}
