//! Fyers API v3 adapter.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::brokers::{BrokerAdapter, authorize_url, require_code, require_secret, required, sha256_hex};
use crate::client::{HttpClient, headers, join_url};
use crate::error::{GatewayError, Result};
use crate::types::instrument::Exchange;
use crate::types::quote::{RawQuote, lenient_f64, lenient_timestamp};
use crate::types::{BrokerDescriptor, Instrument, NormalizedQuote, Session};

/// Fyers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fyers;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest<'a> {
    #[serde(rename = "grant_type")]
    grant_type: &'static str,
    app_id_hash: String,
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    s: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuotesResponse {
    s: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    d: Vec<QuoteEntry>,
}

#[derive(Debug, Deserialize)]
struct QuoteEntry {
    #[serde(default)]
    s: Option<String>,
    #[serde(default)]
    v: Option<FyersQuote>,
}

#[derive(Debug, Deserialize)]
struct FyersQuote {
    #[serde(default, deserialize_with = "lenient_f64")]
    lp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    ch: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    chp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    open_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    high_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    low_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    prev_close_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    volume: Option<f64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    tt: Option<i64>,
    #[serde(default)]
    errmsg: Option<String>,
}

impl From<FyersQuote> for RawQuote {
    fn from(q: FyersQuote) -> Self {
        Self {
            ltp: q.lp,
            change: q.ch,
            change_percent: q.chp,
            previous_close: q.prev_close_price,
            volume: q.volume,
            open: q.open_price,
            high: q.high_price,
            low: q.low_price,
            close: q.prev_close_price,
            timestamp: q.tt,
        }
    }
}

/// `sha256("APPID-100:secret")`. App ids without the `-100` app-type suffix
/// get it appended.
fn app_id_hash(api_key: &str, secret: &str) -> String {
    if api_key.contains('-') {
        sha256_hex(&format!("{api_key}:{secret}"))
    } else {
        sha256_hex(&format!("{api_key}-100:{secret}"))
    }
}

fn fyers_headers(api_key: &str, access_token: &str) -> Result<HeaderMap> {
    let auth = format!("{api_key}:{access_token}");
    headers([("authorization", auth.as_str())])
}

/// Fyers symbol, e.g. `NSE:NIFTY50-INDEX`, `NSE:RELIANCE-EQ`, `NSE:NIFTY24OCTFUT`.
fn fyers_symbol(instrument: &Instrument) -> String {
    if let Some(index) = instrument.index {
        return index.fyers_symbol.to_owned();
    }
    let (exchange, cash) = match instrument.exchange {
        Exchange::NSE => ("NSE", true),
        Exchange::BSE => ("BSE", true),
        Exchange::NFO | Exchange::CDS => ("NSE", false),
        Exchange::BFO => ("BSE", false),
        Exchange::MCX => ("MCX", false),
    };
    if cash && !instrument.symbol.contains('-') {
        format!("{exchange}:{}-EQ", instrument.symbol)
    } else {
        format!("{exchange}:{}", instrument.symbol)
    }
}

#[async_trait]
impl BrokerAdapter for Fyers {
    fn id(&self) -> &str {
        crate::constants::FYERS
    }

    fn login_url(&self, broker: &BrokerDescriptor, state: Option<&str>) -> Result<String> {
        // Fyers rejects the request without a state parameter.
        authorize_url(
            &broker.auth_url,
            &[
                ("client_id", broker.api_key()),
                ("redirect_uri", broker.redirect_uri.as_str()),
                ("response_type", "code"),
                ("state", state.unwrap_or("None")),
            ],
        )
    }

    async fn exchange_code(
        &self,
        http: &HttpClient,
        broker: &BrokerDescriptor,
        code: &str,
    ) -> Result<Session> {
        let code = require_code(code)?;
        let secret = require_secret(broker)?;

        let body = ValidateRequest {
            grant_type: "authorization_code",
            app_id_hash: app_id_hash(broker.api_key(), secret),
            code,
        };
        let url = join_url(&broker.api_base_url, "/api/v3/validate-authcode");
        let resp: ValidateResponse = http.post_json(&url, &body, HeaderMap::new()).await?;

        if resp.s != "ok" {
            return Err(GatewayError::Broker(
                resp.message.unwrap_or_else(|| format!("status {}", resp.s)),
            ));
        }
        let access_token = required(resp.access_token, "access_token")?;

        let client_id = broker.api_key().split('-').next().map(str::to_owned);
        Ok(Session::new(access_token, Utc::now(), None)
            .with_refresh_token(resp.refresh_token)
            .with_client_id(client_id))
    }

    async fn fetch_quote(
        &self,
        http: &HttpClient,
        broker: &BrokerDescriptor,
        session: &Session,
        instrument: &Instrument,
    ) -> Result<NormalizedQuote> {
        let symbol = fyers_symbol(instrument);
        let url = join_url(&broker.api_base_url, "/data/quotes");
        let resp: QuotesResponse = http
            .get(
                &url,
                &[("symbols", symbol.as_str())],
                fyers_headers(broker.api_key(), &session.access_token)?,
            )
            .await?;

        if resp.s != "ok" {
            return Err(GatewayError::Broker(
                resp.message.unwrap_or_else(|| format!("status {}", resp.s)),
            ));
        }
        let entry = resp
            .d
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Broker(format!("no quote returned for {symbol}")))?;
        let quote = entry
            .v
            .ok_or_else(|| GatewayError::Broker(format!("no quote returned for {symbol}")))?;
        if entry.s.as_deref().is_some_and(|s| s != "ok") {
            return Err(GatewayError::Broker(
                quote.errmsg.unwrap_or_else(|| format!("quote rejected for {symbol}")),
            ));
        }

        Ok(RawQuote::from(quote).normalize(instrument.symbol.clone(), Utc::now()))
    }
}
