//! Angel One SmartAPI adapter.
//!
//! The publisher login redirects back with a ready JWT (`auth_token`), so the
//! "exchange" step validates that token against the profile endpoint instead
//! of trading a code for it. Quotes need numeric symbol tokens: known
//! indices map through the index table, anything else must be passed as the
//! token itself (e.g. `NSE:2885`).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::brokers::{BrokerAdapter, authorize_url, require_code};
use crate::client::{HttpClient, headers, join_url};
use crate::error::{GatewayError, Result};
use crate::types::quote::{RawQuote, lenient_f64, lenient_timestamp};
use crate::types::{BrokerDescriptor, Instrument, NormalizedQuote, Session};

/// Angel One.
#[derive(Debug, Clone, Copy, Default)]
pub struct Angel;

#[derive(Debug, Deserialize)]
struct AngelEnvelope<T> {
    status: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errorcode: Option<String>,
    data: Option<T>,
}

impl<T> AngelEnvelope<T> {
    fn into_data(self) -> Result<T> {
        if !self.status {
            let code = self.errorcode.unwrap_or_default();
            let msg = self.message.unwrap_or_else(|| "request failed".into());
            return Err(GatewayError::Broker(format!("{code} {msg}").trim().to_owned()));
        }
        self.data
            .ok_or_else(|| GatewayError::Broker("response has no data".into()))
    }
}

#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(default)]
    clientcode: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteRequest<'a> {
    mode: &'static str,
    exchange_tokens: HashMap<&'a str, Vec<&'a str>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    fetched: Vec<AngelQuote>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AngelQuote {
    #[serde(default, deserialize_with = "lenient_f64")]
    ltp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    net_change: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    percent_change: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    open: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    high: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    low: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    close: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    trade_volume: Option<f64>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    exch_feed_time: Option<i64>,
}

impl From<AngelQuote> for RawQuote {
    fn from(q: AngelQuote) -> Self {
        Self {
            ltp: q.ltp,
            change: q.net_change,
            change_percent: q.percent_change,
            volume: q.trade_volume,
            open: q.open,
            high: q.high,
            low: q.low,
            close: q.close,
            timestamp: q.exch_feed_time,
            ..Self::default()
        }
    }
}

fn angel_headers(api_key: &str, access_token: Option<&str>) -> Result<HeaderMap> {
    let auth = access_token.map(|t| format!("Bearer {t}"));
    let mut pairs = vec![
        ("x-usertype", "USER"),
        ("x-sourceid", "WEB"),
        ("x-clientlocalip", "127.0.0.1"),
        ("x-clientpublicip", "127.0.0.1"),
        ("x-macaddress", "00:00:00:00:00:00"),
        ("x-privatekey", api_key),
    ];
    if let Some(auth) = auth.as_deref() {
        pairs.push(("authorization", auth));
    }
    headers(pairs)
}

/// SmartAPI symbol token for `instrument`.
fn symbol_token(instrument: &Instrument) -> Result<&str> {
    if let Some(index) = instrument.index {
        return Ok(index.angel_token);
    }
    if !instrument.symbol.is_empty() && instrument.symbol.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(&instrument.symbol);
    }
    Err(GatewayError::InvalidArgument(format!(
        "Angel One quotes need a numeric symbol token, got {}",
        instrument.symbol
    )))
}

#[async_trait]
impl BrokerAdapter for Angel {
    fn id(&self) -> &str {
        crate::constants::ANGEL
    }

    fn login_url(&self, broker: &BrokerDescriptor, state: Option<&str>) -> Result<String> {
        let mut params = vec![
            ("api_key", broker.api_key()),
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
        let auth_token = require_code(code)?;

        let url = join_url(
            &broker.api_base_url,
            "/rest/secure/angelbroking/user/v1/getProfile",
        );
        let resp: AngelEnvelope<Profile> = http
            .get(&url, &[], angel_headers(broker.api_key(), Some(auth_token))?)
            .await?;
        let profile = resp.into_data()?;

        Ok(Session::new(auth_token, Utc::now(), None)
            .with_user_id(profile.clientcode.clone())
            .with_client_id(profile.clientcode))
    }

    async fn fetch_quote(
        &self,
        http: &HttpClient,
        broker: &BrokerDescriptor,
        session: &Session,
        instrument: &Instrument,
    ) -> Result<NormalizedQuote> {
        let token = symbol_token(instrument)?;
        let body = QuoteRequest {
            mode: "FULL",
            exchange_tokens: HashMap::from([(instrument.exchange.as_str(), vec![token])]),
        };

        let url = join_url(
            &broker.api_base_url,
            "/rest/secure/angelbroking/market/v1/quote/",
        );
        let resp: AngelEnvelope<QuoteData> = http
            .post_json(
                &url,
                &body,
                angel_headers(broker.api_key(), Some(&session.access_token))?,
            )
            .await?;

        let quote = resp
            .into_data()?
            .fetched
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Broker(format!("no quote returned for token {token}")))?;

        Ok(RawQuote::from(quote).normalize(instrument.symbol.clone(), Utc::now()))
    }

    async fn revoke(
        &self,
        http: &HttpClient,
        broker: &BrokerDescriptor,
        session: &Session,
    ) -> Result<()> {
        let Some(client_code) = session.client_id.as_deref() else {
            return Ok(());
        };
        let url = join_url(&broker.api_base_url, "/rest/secure/angelbroking/user/v1/logout");
        http.post_no_content(
            &url,
            &serde_json::json!({ "clientcode": client_code }),
            angel_headers(broker.api_key(), Some(&session.access_token))?,
        )
        .await
    }
}
