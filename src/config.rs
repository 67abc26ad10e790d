//! Gateway configuration.
//!
//! Brokers can be described in a JSON document or through environment
//! variables. In the environment form every broker in
//! `BROKER_GATEWAY_BROKERS` (comma separated; defaults to every built-in
//! broker whose API key is set) reads:
//!
//! | Variable | Required |
//! |---|---|
//! | `BROKER_<NAME>_API_KEY` | yes |
//! | `BROKER_<NAME>_API_SECRET` | for code exchange (all but Angel One) |
//! | `BROKER_<NAME>_REDIRECT_URI` | yes, unless `BROKER_GATEWAY_REDIRECT_URI` is set |
//! | `BROKER_<NAME>_API_BASE_URL` | no, overrides the default REST base |
//! | `BROKER_<NAME>_AUTH_URL` | no, overrides the default login page |
//!
//! `BROKER_GATEWAY_STATE_DIR` selects file-backed session storage and
//! `BROKER_GATEWAY_HTTP_TIMEOUT_SECS` overrides the request timeout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{HTTP_TIMEOUT, SUPPORTED_BROKERS};
use crate::error::{GatewayError, Result};
use crate::types::{BrokerCredentials, BrokerDescriptor};

/// Everything needed to build a [`BrokerGateway`](crate::gateway::BrokerGateway).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub brokers: Vec<BrokerDescriptor>,
    /// Directory for persisted sessions. `None` keeps sessions in memory.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    HTTP_TIMEOUT.as_secs()
}

impl GatewayConfig {
    /// Parse a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Build from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let names: Vec<String> = match var("BROKER_GATEWAY_BROKERS") {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            None => SUPPORTED_BROKERS
                .iter()
                .filter(|name| var(&env_key(name, "API_KEY")).is_some())
                .map(|name| (*name).to_owned())
                .collect(),
        };

        let shared_redirect = var("BROKER_GATEWAY_REDIRECT_URI");
        let mut brokers = Vec::with_capacity(names.len());
        for name in &names {
            let api_key = var(&env_key(name, "API_KEY"))
                .ok_or_else(|| GatewayError::Config(format!("{} is not set", env_key(name, "API_KEY"))))?;
            let redirect_uri = var(&env_key(name, "REDIRECT_URI"))
                .or_else(|| shared_redirect.clone())
                .ok_or_else(|| {
                    GatewayError::Config(format!("{} is not set", env_key(name, "REDIRECT_URI")))
                })?;
            let credentials = BrokerCredentials {
                api_key,
                api_secret: var(&env_key(name, "API_SECRET")),
            };

            let mut descriptor = BrokerDescriptor::preset(name, credentials, redirect_uri)
                .ok_or_else(|| GatewayError::Config(format!("unsupported broker: {name}")))?;
            if let Some(base) = var(&env_key(name, "API_BASE_URL")) {
                descriptor.api_base_url = base;
            }
            if let Some(auth) = var(&env_key(name, "AUTH_URL")) {
                descriptor.auth_url = auth;
            }
            brokers.push(descriptor);
        }

        let http_timeout_secs = match var("BROKER_GATEWAY_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw.parse().map_err(|_| {
                GatewayError::Config(format!("BROKER_GATEWAY_HTTP_TIMEOUT_SECS is not a number: {raw}"))
            })?,
            None => default_timeout_secs(),
        };

        Ok(Self {
            brokers,
            state_dir: var("BROKER_GATEWAY_STATE_DIR").map(PathBuf::from),
            http_timeout_secs,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }
}

fn env_key(broker: &str, suffix: &str) -> String {
    format!("BROKER_{}_{suffix}", broker.to_ascii_uppercase())
}
