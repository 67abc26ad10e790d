//! Broker descriptor: static per-broker configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{self, endpoints};

/// Feature flags advertised for a broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub live_data: bool,
    #[serde(default)]
    pub options_chain: bool,
    #[serde(default)]
    pub trading: bool,
    #[serde(default)]
    pub portfolio: bool,
}

impl Capabilities {
    /// Every flag set.
    pub const fn all() -> Self {
        Self {
            live_data: true,
            options_chain: true,
            trading: true,
            portfolio: true,
        }
    }

    /// Whether `capability` is set.
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::LiveData => self.live_data,
            Capability::OptionsChain => self.options_chain,
            Capability::Trading => self.trading,
            Capability::Portfolio => self.portfolio,
        }
    }
}

/// A single capability, for registry queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    LiveData,
    OptionsChain,
    Trading,
    Portfolio,
}

/// App credentials issued by the broker's developer console.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerCredentials {
    /// API key / app id / client id, depending on the broker's vocabulary.
    pub api_key: String,
    /// API secret. Required by every code exchange except Angel One's.
    #[serde(default)]
    pub api_secret: Option<String>,
}

impl fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Static metadata for one broker.
///
/// Built once at startup (usually via [`crate::config::GatewayConfig`]) and
/// never mutated after the registry is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerDescriptor {
    /// Unique registry key, e.g. `"zerodha"`.
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub icon: String,
    /// Browser-facing OAuth authorization endpoint.
    pub auth_url: String,
    /// Base URL for REST calls (token exchange, quotes).
    pub api_base_url: String,
    /// Callback URL registered with the broker.
    pub redirect_uri: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub credentials: BrokerCredentials,
}

fn enabled_by_default() -> bool {
    true
}

impl BrokerDescriptor {
    /// Descriptor for a built-in broker with its default endpoints.
    ///
    /// Returns `None` if `name` has no built-in adapter.
    pub fn preset(
        name: &str,
        credentials: BrokerCredentials,
        redirect_uri: impl Into<String>,
    ) -> Option<Self> {
        let (display_name, auth_url, api_base_url, capabilities) = match name {
            constants::ZERODHA => (
                "Zerodha",
                endpoints::zerodha::AUTH_URL,
                endpoints::zerodha::API_BASE_URL,
                Capabilities::all(),
            ),
            constants::UPSTOX => (
                "Upstox",
                endpoints::upstox::AUTH_URL,
                endpoints::upstox::API_BASE_URL,
                Capabilities::all(),
            ),
            constants::ANGEL => (
                "Angel One",
                endpoints::angel::AUTH_URL,
                endpoints::angel::API_BASE_URL,
                Capabilities::all(),
            ),
            constants::FYERS => (
                "Fyers",
                endpoints::fyers::AUTH_URL,
                endpoints::fyers::API_BASE_URL,
                Capabilities {
                    options_chain: false,
                    ..Capabilities::all()
                },
            ),
            _ => return None,
        };

        Some(Self {
            name: name.to_owned(),
            display_name: display_name.to_owned(),
            icon: format!("/logos/{name}.svg"),
            auth_url: auth_url.to_owned(),
            api_base_url: api_base_url.to_owned(),
            redirect_uri: redirect_uri.into(),
            capabilities,
            enabled: true,
            credentials,
        })
    }

    /// The API key.
    pub fn api_key(&self) -> &str {
        &self.credentials.api_key
    }

    /// The API secret, if configured.
    pub fn api_secret(&self) -> Option<&str> {
        self.credentials.api_secret.as_deref()
    }
}
