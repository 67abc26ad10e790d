//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use broker_gateway::BrokerGateway;
use broker_gateway::client::HttpClient;
use broker_gateway::gateway::RetryPolicy;
use broker_gateway::registry::BrokerRegistry;
use broker_gateway::store::{Clock, MemoryStorage, Storage};
use broker_gateway::types::{BrokerCredentials, BrokerDescriptor};
use chrono::{DateTime, Utc};

pub const REDIRECT_URI: &str = "http://localhost:3000/auth/callback?source=dashboard";

/// Built-in descriptor for `name` whose REST calls go to `base_url`.
pub fn descriptor(name: &str, base_url: &str) -> BrokerDescriptor {
    let credentials = BrokerCredentials {
        api_key: format!("{name}-key"),
        api_secret: Some(format!("{name}-secret")),
    };
    let mut d = BrokerDescriptor::preset(name, credentials, REDIRECT_URI)
        .expect("built-in broker");
    d.api_base_url = base_url.to_owned();
    d
}

/// Registry with the given built-in brokers, all pointed at `base_url`.
pub fn registry(names: &[&str], base_url: &str) -> BrokerRegistry {
    let mut builder = BrokerRegistry::builder();
    for name in names {
        builder = builder
            .register(descriptor(name, base_url))
            .expect("register broker");
    }
    builder.build()
}

/// Gateway over `storage` without retry delays.
pub fn gateway_with(names: &[&str], base_url: &str, storage: Arc<dyn Storage>) -> BrokerGateway {
    let http = HttpClient::with_timeout(Duration::from_secs(2)).expect("http client");
    BrokerGateway::new(registry(names, base_url), storage, http).with_retry_policy(RetryPolicy {
        max_attempts: 2,
        delay: Duration::ZERO,
    })
}

/// Gateway with fresh in-memory storage.
pub fn gateway(names: &[&str], base_url: &str) -> BrokerGateway {
    gateway_with(names, base_url, Arc::new(MemoryStorage::new()))
}

/// A clock the test can move.
#[derive(Clone)]
pub struct TestClock(Arc<AtomicI64>);

impl TestClock {
    pub fn new() -> Self {
        Self(Arc::new(AtomicI64::new(Utc::now().timestamp_millis())))
    }

    pub fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0.load(Ordering::SeqCst)).expect("valid timestamp")
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn clock(&self) -> Clock {
        let inner = self.0.clone();
        Arc::new(move || {
            DateTime::from_timestamp_millis(inner.load(Ordering::SeqCst)).expect("valid timestamp")
        })
    }
}
