//! Normalized quote shape and the coercion rules every adapter shares.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Broker-agnostic quote. Every numeric field is finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedQuote {
    pub symbol: String,
    /// Last traded price.
    pub ltp: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: f64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub close: f64,
    /// Epoch milliseconds of the last trade, or of the fetch when the broker
    /// does not report one.
    pub timestamp: i64,
}

/// Fields an adapter managed to pull out of a broker response, before
/// derivation and coercion.
#[derive(Debug, Clone, Default)]
pub struct RawQuote {
    pub ltp: Option<f64>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    /// Previous session close, when the broker reports it separately from OHLC.
    pub previous_close: Option<f64>,
    pub volume: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub open: Option<f64>,
    pub close: Option<f64>,
    pub timestamp: Option<i64>,
}

impl RawQuote {
    /// Apply the derivation rules and coerce every field to a finite number.
    ///
    /// - `change` missing: `ltp - close` when a close is known, else 0.
    /// - previous close: the reported one, else `close`, else `ltp - change`.
    /// - `change_percent` missing: `change / previous_close * 100`, 0 when
    ///   the previous close is 0.
    pub fn normalize(self, symbol: impl Into<String>, now: DateTime<Utc>) -> NormalizedQuote {
        let ltp = finite(self.ltp);
        let close = finite(self.close);

        let change = match self.change.filter(|c| c.is_finite()) {
            Some(c) => c,
            None if close > 0.0 && ltp > 0.0 => ltp - close,
            None => 0.0,
        };

        let previous_close = self
            .previous_close
            .filter(|p| p.is_finite() && *p > 0.0)
            .or_else(|| (close > 0.0).then_some(close))
            .unwrap_or(ltp - change);

        let change_percent = match self.change_percent.filter(|p| p.is_finite()) {
            Some(p) => p,
            None if previous_close != 0.0 => finite(Some(change / previous_close * 100.0)),
            None => 0.0,
        };

        NormalizedQuote {
            symbol: symbol.into(),
            ltp,
            change,
            change_percent,
            volume: finite(self.volume),
            high: finite(self.high),
            low: finite(self.low),
            open: finite(self.open),
            close,
            timestamp: self.timestamp.unwrap_or_else(|| now.timestamp_millis()),
        }
    }
}

fn finite(v: Option<f64>) -> f64 {
    v.filter(|x| x.is_finite()).unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Lenient deserialization
// ---------------------------------------------------------------------------

/// Coerce a JSON value to a number: numbers and numeric strings pass,
/// everything else (null, bools, garbage strings, NaN) is `None`.
pub fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|x| x.is_finite())
}

/// `#[serde(deserialize_with)]` helper for numeric fields that brokers send
/// as numbers, strings, nulls or not at all. Pair with `#[serde(default)]`.
pub fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number))
}

/// `#[serde(deserialize_with)]` helper for broker timestamps.
pub fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}

/// Exchange wall-clock offset (IST, UTC+05:30).
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// Parse the timestamp spellings used by Indian brokers into epoch ms.
///
/// Accepts epoch seconds or milliseconds (number or string), RFC 3339, and
/// the offset-less `YYYY-MM-DD HH:MM:SS` / `DD-Mon-YYYY HH:MM:SS` forms,
/// which are exchange time.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    if let Some(n) = number(value) {
        if n <= 0.0 {
            return None;
        }
        // Anything below 1e12 is epoch seconds (1e12 ms is 2001-09-09).
        let ms = if n < 1e12 { n * 1000.0 } else { n };
        return Some(ms as i64);
    }

    let s = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%d-%b-%Y %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return FixedOffset::east_opt(IST_OFFSET_SECS)?
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.timestamp_millis());
        }
    }
    None
}
