//! End-to-end gateway behaviour against mocked broker APIs.
//!
//! Every broker's REST base URL points at a local `wiremock` server, so these
//! tests exercise the real adapters, HTTP client and session store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker_gateway::BrokerGateway;
use broker_gateway::brokers::BrokerAdapter;
use broker_gateway::client::HttpClient;
use broker_gateway::error::GatewayError;
use broker_gateway::gateway::RetryPolicy;
use broker_gateway::registry::BrokerRegistry;
use broker_gateway::store::{FileStorage, MemoryStorage};
use broker_gateway::types::{BrokerDescriptor, Instrument, NormalizedQuote, Session};
use chrono::Utc;
use common::{descriptor, gateway, gateway_with, registry};
use serde_json::json;
use tokio::sync::Notify;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

async fn mount_kite_session(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/session/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "access_token": token, "user_id": "AB1234", "public_token": "pub" }
        })))
        .mount(server)
        .await;
}

async fn mount_upstox_token(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/v2/login/authorization/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": token,
            "user_id": "UP42",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

fn nifty_kite_quote() -> serde_json::Value {
    json!({
        "status": "success",
        "data": {
            "NSE:NIFTY 50": {
                "instrument_token": 256265,
                "last_price": 19850.25,
                "net_change": 125.3,
                "ohlc": { "open": 19720, "high": 19875, "low": 19700, "close": 19724.95 }
            }
        }
    })
}

// ===================================================================
// Authentication
// ===================================================================

#[tokio::test]
async fn first_authenticated_broker_stays_active() {
    let server = MockServer::start().await;
    mount_kite_session(&server, "abc").await;
    mount_upstox_token(&server, "def").await;
    let gw = gateway(&["zerodha", "upstox"], &server.uri());

    assert!(gw.authenticate_with_code("zerodha", "mock-code", None).await.unwrap());
    assert_eq!(gw.authenticated_brokers(), ["zerodha"]);
    assert_eq!(gw.active_broker().as_deref(), Some("zerodha"));

    assert!(gw.authenticate_with_code("upstox", "mock-code", None).await.unwrap());
    assert_eq!(gw.authenticated_brokers(), ["upstox", "zerodha"]);
    assert_eq!(gw.active_broker().as_deref(), Some("zerodha"));

    gw.set_active_broker("upstox").unwrap();
    assert_eq!(gw.active_broker().as_deref(), Some("upstox"));
}

#[tokio::test]
async fn zerodha_exchange_signs_request_token() {
    let server = MockServer::start().await;
    let checksum = sha256_hex("zerodha-keyreq-tokzerodha-secret");
    Mock::given(method("POST"))
        .and(path("/session/token"))
        .and(header("x-kite-version", "3"))
        .and(body_string_contains("api_key=zerodha-key"))
        .and(body_string_contains("request_token=req-tok"))
        .and(body_string_contains(format!("checksum={checksum}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "access_token": "abc", "refresh_token": "", "user_id": "AB1234" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    let gw = gateway(&["zerodha"], &server.uri());

    gw.try_authenticate_with_code("zerodha", "req-tok", None).await.unwrap();

    let session = gw.store().session("zerodha").unwrap();
    assert_eq!(session.access_token, "abc");
    assert_eq!(session.user_id.as_deref(), Some("AB1234"));
    assert_eq!(session.refresh_token, None);
}

#[tokio::test]
async fn upstox_expiry_follows_reported_ttl() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/login/authorization/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("client_secret=upstox-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "abc",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;
    let gw = gateway(&["upstox"], &server.uri());

    let before = Utc::now().timestamp_millis();
    gw.try_authenticate_with_code("upstox", "code", None).await.unwrap();
    let expires_at = gw.store().session("upstox").unwrap().expires_at;

    assert!(expires_at >= before + 3_600_000);
    assert!(expires_at <= Utc::now().timestamp_millis() + 3_600_000);
}

#[tokio::test]
async fn fyers_exchange_sends_app_id_hash() {
    let server = MockServer::start().await;
    let app_id_hash = sha256_hex("fyers-key:fyers-secret");
    Mock::given(method("POST"))
        .and(path("/api/v3/validate-authcode"))
        .and(body_json(json!({
            "grant_type": "authorization_code",
            "appIdHash": app_id_hash,
            "code": "auth-code"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "s": "ok", "code": 200, "message": "", "access_token": "fy-token", "refresh_token": "fy-refresh"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let gw = gateway(&["fyers"], &server.uri());

    assert!(gw.authenticate_with_code("fyers", "auth-code", None).await.unwrap());
    let session = gw.store().session("fyers").unwrap();
    assert_eq!(session.access_token, "fy-token");
    assert_eq!(session.refresh_token.as_deref(), Some("fy-refresh"));
    assert_eq!(session.client_id.as_deref(), Some("fyers"));
}

#[tokio::test]
async fn angel_token_is_validated_against_profile() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/secure/angelbroking/user/v1/getProfile"))
        .and(header("authorization", "Bearer jwt-from-redirect"))
        .and(header("x-privatekey", "angel-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true, "message": "SUCCESS", "errorcode": "",
            "data": { "clientcode": "A123", "name": "Test User" }
        })))
        .mount(&server)
        .await;
    let gw = gateway(&["angel"], &server.uri());

    assert!(gw.authenticate_with_code("angel", "jwt-from-redirect", None).await.unwrap());
    let session = gw.store().session("angel").unwrap();
    assert_eq!(session.access_token, "jwt-from-redirect");
    assert_eq!(session.client_id.as_deref(), Some("A123"));
}

#[tokio::test]
async fn rejected_exchange_returns_false_and_stores_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session/token"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "status": "error",
            "message": "Token is invalid or has expired.",
            "error_type": "TokenException"
        })))
        .mount(&server)
        .await;
    let gw = gateway(&["zerodha"], &server.uri());

    assert!(!gw.authenticate_with_code("zerodha", "stale", None).await.unwrap());
    assert!(gw.authenticated_brokers().is_empty());
    assert_eq!(gw.active_broker(), None);

    let err = gw.try_authenticate_with_code("zerodha", "stale", None).await.unwrap_err();
    assert!(matches!(err, GatewayError::AuthExchangeFailed { ref broker, .. } if broker == "zerodha"));
    assert!(err.to_string().contains("Token is invalid"));
}

#[tokio::test]
async fn exchange_without_access_token_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/login/authorization/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "user_id": "UP42" })))
        .mount(&server)
        .await;
    let gw = gateway(&["upstox"], &server.uri());

    assert!(!gw.authenticate_with_code("upstox", "code", None).await.unwrap());
    assert!(gw.authenticated_brokers().is_empty());
}

#[tokio::test]
async fn empty_code_never_reaches_the_broker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let gw = gateway(&["zerodha"], &server.uri());

    assert!(!gw.authenticate_with_code("zerodha", "   ", None).await.unwrap());
}

#[tokio::test]
async fn authenticate_unknown_broker_is_an_error() {
    let gw = gateway(&["zerodha"], "http://127.0.0.1:9");
    let result = gw.authenticate_with_code("upstox", "code", None).await;
    assert!(matches!(result, Err(GatewayError::BrokerNotConfigured(_))));
}

#[tokio::test]
async fn mismatched_state_is_rejected() {
    let server = MockServer::start().await;
    mount_kite_session(&server, "abc").await;
    let gw = gateway(&["zerodha"], &server.uri());

    gw.login_url_with_state("zerodha", Some("expected-nonce")).unwrap();
    assert!(!gw.authenticate_with_code("zerodha", "code", Some("forged")).await.unwrap());
    assert!(gw.authenticated_brokers().is_empty());

    // The forged callback did not use up the nonce.
    assert!(gw.authenticate_with_code("zerodha", "code", Some("expected-nonce")).await.unwrap());
}

#[tokio::test]
async fn callback_without_state_is_rejected_after_nonce_issued() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "access_token": "abc" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    let gw = gateway(&["zerodha"], &server.uri());

    let url = gw.login_url("zerodha").unwrap();
    let nonce = url::Url::parse(&url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "redirect_params")
        .map(|(_, v)| v.trim_start_matches("state=").to_owned())
        .unwrap();

    let err = gw.try_authenticate_with_code("zerodha", "code", None).await.unwrap_err();
    assert!(matches!(err, GatewayError::AuthExchangeFailed { .. }));
    assert!(!gw.authenticate_with_code("zerodha", "code", None).await.unwrap());
    assert!(gw.authenticated_brokers().is_empty());

    assert!(gw.authenticate_with_code("zerodha", "code", Some(&nonce)).await.unwrap());
}

#[tokio::test]
async fn exchange_without_data_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "success" })))
        .mount(&server)
        .await;
    let gw = gateway(&["zerodha"], &server.uri());

    let err = gw.try_authenticate_with_code("zerodha", "code", None).await.unwrap_err();
    assert!(err.to_string().contains("no data"), "{err}");
}

#[tokio::test]
async fn disabled_broker_cannot_log_in() {
    let mut upstox = descriptor("upstox", "http://127.0.0.1:9");
    upstox.enabled = false;
    let registry = BrokerRegistry::builder().register(upstox).unwrap().build();
    let gw = BrokerGateway::new(registry, Arc::new(MemoryStorage::new()), HttpClient::new().unwrap());

    assert!(matches!(gw.login_url("upstox"), Err(GatewayError::BrokerDisabled(_))));
    assert!(matches!(
        gw.authenticate_with_code("upstox", "code", None).await,
        Err(GatewayError::BrokerDisabled(_))
    ));
    assert!(matches!(gw.set_active_broker("upstox"), Err(GatewayError::BrokerDisabled(_))));
    // Clearing local state still works.
    gw.logout("upstox").unwrap();
    assert!(gw.broker("upstox").is_ok());
}

// ===================================================================
// Quotes
// ===================================================================

#[tokio::test]
async fn no_active_broker_means_no_quote() {
    let gw = gateway(&["zerodha"], "http://127.0.0.1:9");
    assert_eq!(gw.active_broker(), None);
    assert!(gw.get_quote("NIFTY 50").await.is_none());
    assert!(matches!(
        gw.try_get_quote("NIFTY 50").await,
        Err(GatewayError::NotAuthenticated(_))
    ));
}

#[tokio::test]
async fn zerodha_quote_is_normalized() {
    let server = MockServer::start().await;
    mount_kite_session(&server, "abc").await;
    Mock::given(method("GET"))
        .and(path("/quote"))
        .and(query_param("i", "NSE:NIFTY 50"))
        .and(header("authorization", "token zerodha-key:abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nifty_kite_quote()))
        .expect(1)
        .mount(&server)
        .await;
    let gw = gateway(&["zerodha"], &server.uri());
    assert!(gw.authenticate_with_code("zerodha", "code", None).await.unwrap());

    let q = gw.get_quote("NIFTY 50").await.expect("live quote");
    assert_eq!(q.symbol, "NIFTY 50");
    assert_eq!(q.ltp, 19850.25);
    assert_eq!(q.change, 125.3);
    assert!((q.change_percent - 0.635).abs() < 0.001, "{}", q.change_percent);
    assert_eq!(q.open, 19720.0);
    assert_eq!(q.high, 19875.0);
    assert_eq!(q.low, 19700.0);
    assert_eq!(q.close, 19724.95);
    // Indices carry no volume.
    assert_eq!(q.volume, 0.0);
    assert!(q.timestamp > 0);
}

#[tokio::test]
async fn quote_keeps_caller_symbol_for_aliases() {
    let server = MockServer::start().await;
    mount_kite_session(&server, "abc").await;
    Mock::given(method("GET"))
        .and(path("/quote"))
        .and(query_param("i", "NSE:NIFTY BANK"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "NSE:NIFTY BANK": { "last_price": 44000.5, "ohlc": { "close": 44100.5 } } }
        })))
        .mount(&server)
        .await;
    let gw = gateway(&["zerodha"], &server.uri());
    gw.try_authenticate_with_code("zerodha", "code", None).await.unwrap();

    let q = gw.get_quote("BANKNIFTY").await.expect("live quote");
    assert_eq!(q.symbol, "BANKNIFTY");
    assert_eq!(q.change, -100.0);
    assert!((q.change_percent + 0.2267).abs() < 0.001);
}

#[tokio::test]
async fn upstox_quote_with_missing_fields_normalizes_to_zero() {
    let server = MockServer::start().await;
    mount_upstox_token(&server, "up-token").await;
    Mock::given(method("GET"))
        .and(path("/v2/market-quote/quotes"))
        .and(query_param("instrument_key", "NSE_EQ|RELIANCE"))
        .and(header("authorization", "Bearer up-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": {
                "NSE_EQ:RELIANCE": {
                    "last_price": "2450.5",
                    "net_change": 12.5,
                    "volume": null,
                    "ohlc": { "open": 2440 }
                }
            }
        })))
        .mount(&server)
        .await;
    let gw = gateway(&["upstox"], &server.uri());
    gw.try_authenticate_with_code("upstox", "code", None).await.unwrap();

    let q = gw.get_quote("NSE:RELIANCE").await.expect("live quote");
    assert_eq!(q.ltp, 2450.5);
    assert_eq!(q.open, 2440.0);
    assert_eq!(q.high, 0.0);
    assert_eq!(q.low, 0.0);
    assert_eq!(q.close, 0.0);
    assert_eq!(q.volume, 0.0);
    // previous close = 2450.5 - 12.5
    assert!((q.change_percent - 12.5 / 2438.0 * 100.0).abs() < 1e-9);
    for v in [q.ltp, q.change, q.change_percent, q.volume, q.high, q.low, q.open, q.close] {
        assert!(v.is_finite());
    }
}

#[tokio::test]
async fn upstox_raw_instrument_key_keeps_its_case() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/market-quote/quotes"))
        .and(query_param("instrument_key", "NSE_INDEX|Nifty Midcap 50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": { "NSE_INDEX:Nifty Midcap 50": { "last_price": 13000.5, "net_change": 50.5 } }
        })))
        .expect(1)
        .mount(&server)
        .await;
    let gw = gateway(&["upstox"], &server.uri());
    gw.store()
        .put_session("upstox", Session::new("up-token", Utc::now(), None))
        .unwrap();

    let q = gw.try_get_quote("NSE_INDEX|Nifty Midcap 50").await.unwrap();
    assert_eq!(q.symbol, "NSE_INDEX|Nifty Midcap 50");
    assert_eq!(q.ltp, 13000.5);
}

#[tokio::test]
async fn angel_quote_uses_index_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/secure/angelbroking/user/v1/getProfile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true, "message": "SUCCESS", "data": { "clientcode": "A123" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/secure/angelbroking/market/v1/quote/"))
        .and(body_json(json!({ "mode": "FULL", "exchangeTokens": { "NSE": ["99926000"] } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true, "message": "SUCCESS", "errorcode": "",
            "data": {
                "fetched": [{
                    "exchange": "NSE", "tradingSymbol": "Nifty 50", "symbolToken": "99926000",
                    "ltp": 19850.25, "open": 19720, "high": 19875, "low": 19700, "close": 19724.95,
                    "netChange": 125.3, "percentChange": 0.64, "tradeVolume": 0,
                    "exchFeedTime": "18-Oct-2023 15:29:59"
                }],
                "unfetched": []
            }
        })))
        .mount(&server)
        .await;
    let gw = gateway(&["angel"], &server.uri());
    gw.try_authenticate_with_code("angel", "jwt", None).await.unwrap();

    let q = gw.try_get_quote("NIFTY").await.unwrap();
    assert_eq!(q.ltp, 19850.25);
    // Reported percent change wins over the derived one.
    assert_eq!(q.change_percent, 0.64);
    // 2023-10-18 15:29:59 IST
    assert_eq!(q.timestamp, 1_697_623_199_000);
}

#[tokio::test]
async fn fyers_quote_maps_short_field_names() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data/quotes"))
        .and(query_param("symbols", "NSE:SBIN-EQ"))
        .and(header("authorization", "fyers-key:fy-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "s": "ok", "code": 200,
            "d": [{
                "n": "NSE:SBIN-EQ", "s": "ok",
                "v": {
                    "lp": 560.1, "ch": -4.9, "chp": -0.87, "open_price": 566, "high_price": 567.5,
                    "low_price": 558.2, "prev_close_price": 565, "volume": 12345678, "tt": "1697623199"
                }
            }]
        })))
        .mount(&server)
        .await;
    let gw = gateway(&["fyers"], &server.uri());
    gw.store()
        .put_session("fyers", Session::new("fy-token", Utc::now(), Some(3600)))
        .unwrap();

    let q = gw.try_get_quote("SBIN").await.unwrap();
    assert_eq!(q.ltp, 560.1);
    assert_eq!(q.change, -4.9);
    assert_eq!(q.change_percent, -0.87);
    assert_eq!(q.close, 565.0);
    assert_eq!(q.volume, 12_345_678.0);
    assert_eq!(q.timestamp, 1_697_623_199_000);
}

#[tokio::test]
async fn broker_outage_degrades_to_none() {
    let server = MockServer::start().await;
    mount_kite_session(&server, "abc").await;
    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(2)
        .mount(&server)
        .await;
    let gw = gateway(&["zerodha"], &server.uri());
    gw.try_authenticate_with_code("zerodha", "code", None).await.unwrap();

    assert!(gw.get_quote("NIFTY 50").await.is_none());
    // A transient failure leaves the session alone.
    assert_eq!(gw.active_broker().as_deref(), Some("zerodha"));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    mount_kite_session(&server, "abc").await;
    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": "error", "message": "Invalid instrument", "error_type": "InputException"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let gw = gateway(&["zerodha"], &server.uri());
    gw.try_authenticate_with_code("zerodha", "code", None).await.unwrap();

    let err = gw.try_get_quote("NSE:NOPE").await.unwrap_err();
    assert!(matches!(err, GatewayError::QuoteFetchFailed { ref symbol, .. } if symbol == "NSE:NOPE"));
}

#[tokio::test]
async fn timeouts_are_bounded_and_degrade_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(nifty_kite_quote())
                .set_delay(Duration::from_secs(5)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let http = HttpClient::with_timeout(Duration::from_millis(200)).unwrap();
    let gw = BrokerGateway::new(
        registry(&["zerodha"], &server.uri()),
        Arc::new(MemoryStorage::new()),
        http,
    )
    .with_retry_policy(RetryPolicy {
        max_attempts: 2,
        delay: Duration::ZERO,
    });
    gw.store()
        .put_session("zerodha", Session::new("abc", Utc::now(), None))
        .unwrap();

    let started = std::time::Instant::now();
    assert!(gw.get_quote("NIFTY 50").await.is_none());
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn rejected_session_is_dropped() {
    let server = MockServer::start().await;
    mount_kite_session(&server, "abc").await;
    mount_upstox_token(&server, "def").await;
    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "status": "error",
            "message": "Incorrect `api_key` or `access_token`.",
            "error_type": "TokenException"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let gw = gateway(&["zerodha", "upstox"], &server.uri());
    gw.try_authenticate_with_code("zerodha", "code", None).await.unwrap();
    gw.try_authenticate_with_code("upstox", "code", None).await.unwrap();

    assert!(gw.get_quote("NIFTY 50").await.is_none());
    assert_eq!(gw.authenticated_brokers(), ["upstox"]);
    assert_eq!(gw.active_broker().as_deref(), Some("upstox"));
}

#[tokio::test]
async fn quote_from_specific_broker() {
    let server = MockServer::start().await;
    mount_kite_session(&server, "abc").await;
    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nifty_kite_quote()))
        .mount(&server)
        .await;
    let gw = gateway(&["zerodha", "upstox"], &server.uri());

    assert!(matches!(
        gw.quote_from("zerodha", "NIFTY 50").await,
        Err(GatewayError::NotAuthenticated(_))
    ));
    gw.try_authenticate_with_code("zerodha", "code", None).await.unwrap();
    assert_eq!(gw.quote_from("zerodha", "NIFTY 50").await.unwrap().ltp, 19850.25);
    assert!(matches!(
        gw.quote_from("angel", "NIFTY 50").await,
        Err(GatewayError::BrokerNotConfigured(_))
    ));
}

// ===================================================================
// Logout, revoke, restart
// ===================================================================

#[tokio::test]
async fn logout_never_leaves_logged_out_broker_active() {
    let server = MockServer::start().await;
    mount_kite_session(&server, "abc").await;
    mount_upstox_token(&server, "def").await;
    let gw = gateway(&["zerodha", "upstox"], &server.uri());
    gw.try_authenticate_with_code("zerodha", "code", None).await.unwrap();
    gw.try_authenticate_with_code("upstox", "code", None).await.unwrap();

    gw.logout("zerodha").unwrap();
    assert_eq!(gw.authenticated_brokers(), ["upstox"]);
    assert_eq!(gw.active_broker().as_deref(), Some("upstox"));

    gw.logout_all().unwrap();
    assert!(gw.authenticated_brokers().is_empty());
    assert_eq!(gw.active_broker(), None);
    assert!(gw.get_quote("NIFTY 50").await.is_none());
}

#[tokio::test]
async fn revoke_logs_out_even_when_broker_call_fails() {
    let server = MockServer::start().await;
    mount_upstox_token(&server, "def").await;
    Mock::given(method("DELETE"))
        .and(path("/v2/logout"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    let gw = gateway(&["upstox"], &server.uri());
    gw.try_authenticate_with_code("upstox", "code", None).await.unwrap();

    gw.revoke("upstox").await.unwrap();
    assert!(gw.authenticated_brokers().is_empty());
}

#[tokio::test]
async fn zerodha_revoke_deletes_remote_session() {
    let server = MockServer::start().await;
    mount_kite_session(&server, "abc").await;
    Mock::given(method("DELETE"))
        .and(path("/session/token"))
        .and(query_param("api_key", "zerodha-key"))
        .and(query_param("access_token", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "success", "data": true })))
        .expect(1)
        .mount(&server)
        .await;
    let gw = gateway(&["zerodha"], &server.uri());
    gw.try_authenticate_with_code("zerodha", "code", None).await.unwrap();

    gw.revoke("zerodha").await.unwrap();
    assert_eq!(gw.active_broker(), None);
}

#[tokio::test]
async fn gateway_restart_restores_sessions() {
    let server = MockServer::start().await;
    mount_kite_session(&server, "abc").await;
    mount_upstox_token(&server, "def").await;
    let dir = tempfile::tempdir().unwrap();

    let (authenticated, active) = {
        let storage = Arc::new(FileStorage::new(dir.path()).unwrap());
        let gw = gateway_with(&["zerodha", "upstox"], &server.uri(), storage);
        gw.try_authenticate_with_code("zerodha", "code", None).await.unwrap();
        gw.try_authenticate_with_code("upstox", "code", None).await.unwrap();
        gw.set_active_broker("upstox").unwrap();
        (gw.authenticated_brokers(), gw.active_broker())
    };

    let storage = Arc::new(FileStorage::new(dir.path()).unwrap());
    let gw = gateway_with(&["zerodha", "upstox"], &server.uri(), storage);
    assert_eq!(gw.authenticated_brokers(), authenticated);
    assert_eq!(gw.active_broker(), active);
}

// ===================================================================
// Sessions replaced while a broker call is in flight
// ===================================================================

/// Adapter whose quote and revoke calls park until released. Quotes then
/// fail with 403; code exchange hands back the code as the access token.
#[derive(Clone, Default)]
struct ParkedAdapter {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl BrokerAdapter for ParkedAdapter {
    fn id(&self) -> &str {
        "parked"
    }

    fn login_url(
        &self,
        broker: &BrokerDescriptor,
        _state: Option<&str>,
    ) -> broker_gateway::Result<String> {
        Ok(broker.auth_url.clone())
    }

    async fn exchange_code(
        &self,
        _http: &HttpClient,
        _broker: &BrokerDescriptor,
        code: &str,
    ) -> broker_gateway::Result<Session> {
        Ok(Session::new(code, Utc::now(), None))
    }

    async fn fetch_quote(
        &self,
        _http: &HttpClient,
        _broker: &BrokerDescriptor,
        _session: &Session,
        _instrument: &Instrument,
    ) -> broker_gateway::Result<NormalizedQuote> {
        self.started.notify_one();
        self.release.notified().await;
        Err(GatewayError::HttpStatus {
            status: reqwest::StatusCode::FORBIDDEN,
            body: "token expired".into(),
        })
    }

    async fn revoke(
        &self,
        _http: &HttpClient,
        _broker: &BrokerDescriptor,
        _session: &Session,
    ) -> broker_gateway::Result<()> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

fn parked_gateway(adapter: &ParkedAdapter) -> BrokerGateway {
    let registry = BrokerRegistry::builder()
        .register_with_adapter(
            descriptor("zerodha", "http://127.0.0.1:9"),
            Arc::new(adapter.clone()),
        )
        .unwrap()
        .build();
    BrokerGateway::new(registry, Arc::new(MemoryStorage::new()), HttpClient::new().unwrap())
        .with_retry_policy(RetryPolicy::none())
}

#[tokio::test]
async fn stale_rejection_keeps_fresh_session() {
    let adapter = ParkedAdapter::default();
    let gw = parked_gateway(&adapter);
    gw.try_authenticate_with_code("zerodha", "stale", None).await.unwrap();

    let reauth = async {
        adapter.started.notified().await;
        gw.try_authenticate_with_code("zerodha", "fresh", None).await.unwrap();
        adapter.release.notify_one();
    };
    let (quote, ()) = tokio::join!(gw.try_get_quote("NIFTY 50"), reauth);

    assert!(matches!(quote, Err(GatewayError::QuoteFetchFailed { .. })));
    assert_eq!(gw.store().session("zerodha").unwrap().access_token, "fresh");
    assert_eq!(gw.authenticated_brokers(), ["zerodha"]);
    assert_eq!(gw.active_broker().as_deref(), Some("zerodha"));
}

#[tokio::test]
async fn rejection_of_current_session_still_logs_out() {
    let adapter = ParkedAdapter::default();
    let gw = parked_gateway(&adapter);
    gw.try_authenticate_with_code("zerodha", "only", None).await.unwrap();
    adapter.release.notify_one();

    assert!(gw.get_quote("NIFTY 50").await.is_none());
    assert!(gw.authenticated_brokers().is_empty());
    assert_eq!(gw.active_broker(), None);
}

#[tokio::test]
async fn revoke_keeps_session_stored_meanwhile() {
    let adapter = ParkedAdapter::default();
    let gw = parked_gateway(&adapter);
    gw.try_authenticate_with_code("zerodha", "old", None).await.unwrap();

    let reauth = async {
        adapter.started.notified().await;
        gw.try_authenticate_with_code("zerodha", "new", None).await.unwrap();
        adapter.release.notify_one();
    };
    let (revoked, ()) = tokio::join!(gw.revoke("zerodha"), reauth);

    revoked.unwrap();
    assert_eq!(gw.store().session("zerodha").unwrap().access_token, "new");
    assert_eq!(gw.active_broker().as_deref(), Some("zerodha"));
}
