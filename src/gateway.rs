//! The gateway facade: the single entry point for the rest of the application.
//!
//! [`BrokerGateway`] composes the [`BrokerRegistry`], the [`SessionStore`]
//! and the per-broker [`BrokerAdapter`](crate::brokers::BrokerAdapter)s.
//! Network and adapter failures never escape as errors from the two calls
//! the UI drives most: [`authenticate_with_code`](BrokerGateway::authenticate_with_code)
//! reports `false` and [`get_quote`](BrokerGateway::get_quote) reports
//! `None`. The only errors those surface are
//! [`GatewayError::BrokerNotConfigured`] and [`GatewayError::BrokerDisabled`],
//! both configuration mistakes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use broker_gateway::client::HttpClient;
//! use broker_gateway::gateway::BrokerGateway;
//! use broker_gateway::registry::BrokerRegistry;
//! use broker_gateway::store::MemoryStorage;
//! use broker_gateway::types::{BrokerCredentials, BrokerDescriptor};
//!
//! # #[tokio::main]
//! # async fn main() -> broker_gateway::Result<()> {
//! let creds = BrokerCredentials { api_key: "kite-key".into(), api_secret: Some("kite-secret".into()) };
//! let zerodha = BrokerDescriptor::preset("zerodha", creds, "http://localhost:3000/callback").unwrap();
//! let registry = BrokerRegistry::builder().register(zerodha)?.build();
//! let gateway = BrokerGateway::new(registry, Arc::new(MemoryStorage::new()), HttpClient::new()?);
//!
//! let url = gateway.login_url("zerodha")?;
//! // ... user logs in, broker redirects back with `request_token` ...
//! if gateway.authenticate_with_code("zerodha", "request-token", None).await? {
//!     if let Some(quote) = gateway.get_quote("NIFTY 50").await {
//!         println!("{} {}", quote.symbol, quote.ltp);
//!     }
//! }
//! # let _ = url;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::client::HttpClient;
use crate::config::GatewayConfig;
use crate::constants::{MAX_QUOTE_ATTEMPTS, RETRY_DELAY};
use crate::error::{GatewayError, Result};
use crate::registry::{BrokerRegistry, RegisteredBroker};
use crate::store::{Clock, FileStorage, MemoryStorage, SessionStore, Storage};
use crate::types::{BrokerDescriptor, Instrument, NormalizedQuote, Session};

/// Bounded retry for quote requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_QUOTE_ATTEMPTS,
            delay: RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Multi-broker authentication and quote gateway.
#[derive(Debug)]
pub struct BrokerGateway {
    registry: BrokerRegistry,
    store: SessionStore,
    http: HttpClient,
    retry: RetryPolicy,
    /// OAuth `state` nonces issued by `login_url`, by broker.
    pending_states: Mutex<HashMap<String, String>>,
}

impl BrokerGateway {
    /// Assemble a gateway; persisted sessions are loaded from `storage`.
    pub fn new(registry: BrokerRegistry, storage: Arc<dyn Storage>, http: HttpClient) -> Self {
        Self {
            registry,
            store: SessionStore::load(storage),
            http,
            retry: RetryPolicy::default(),
            pending_states: Mutex::new(HashMap::new()),
        }
    }

    /// Build registry, storage and HTTP client from `config`.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let mut builder = BrokerRegistry::builder();
        for descriptor in &config.brokers {
            builder = builder.register(descriptor.clone())?;
        }
        let storage: Arc<dyn Storage> = match &config.state_dir {
            Some(dir) => Arc::new(FileStorage::new(dir)?),
            None => Arc::new(MemoryStorage::new()),
        };
        let http = HttpClient::with_timeout(config.http_timeout())?;
        Ok(Self::new(builder.build(), storage, http))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the clock used for session expiry.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.store = self.store.with_clock(clock);
        self
    }

    pub fn registry(&self) -> &BrokerRegistry {
        &self.registry
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    /// Enabled brokers.
    pub fn list_brokers(&self) -> Vec<&BrokerDescriptor> {
        self.registry.list_brokers()
    }

    pub fn broker(&self, name: &str) -> Result<&BrokerDescriptor> {
        self.registry.get_broker(name)
    }

    // -----------------------------------------------------------------------
    // Login
    // -----------------------------------------------------------------------

    /// Authorization URL for `name` carrying a fresh `state` nonce.
    ///
    /// The nonce is remembered and checked by the next
    /// [`authenticate_with_code`](Self::authenticate_with_code) for `name`.
    pub fn login_url(&self, name: &str) -> Result<String> {
        let state = uuid::Uuid::new_v4().simple().to_string();
        self.login_url_with_state(name, Some(&state))
    }

    /// Authorization URL for `name` with a caller-chosen `state`.
    pub fn login_url_with_state(&self, name: &str, state: Option<&str>) -> Result<String> {
        let entry = self.registry.enabled_entry(name)?;
        let url = entry.adapter.login_url(&entry.descriptor, state)?;
        if let Some(state) = state {
            self.pending_states
                .lock()
                .insert(name.to_owned(), state.to_owned());
        }
        Ok(url)
    }

    /// Exchange `code` for a session and store it.
    ///
    /// Returns `Ok(false)` when the exchange fails for any reason other than
    /// an unknown or disabled broker; the cause is logged.
    pub async fn authenticate_with_code(
        &self,
        name: &str,
        code: &str,
        state: Option<&str>,
    ) -> Result<bool> {
        match self.try_authenticate_with_code(name, code, state).await {
            Ok(()) => Ok(true),
            Err(e @ (GatewayError::BrokerNotConfigured(_) | GatewayError::BrokerDisabled(_))) => {
                Err(e)
            }
            Err(e) => {
                tracing::warn!(broker = %name, error = %e, "broker authentication failed");
                Ok(false)
            }
        }
    }

    /// Like [`authenticate_with_code`](Self::authenticate_with_code) but
    /// returns the failure, for callers that show it to the user.
    ///
    /// Once [`login_url`](Self::login_url) has issued a nonce for `name`, the
    /// callback must return exactly that `state`; a missing one is rejected.
    pub async fn try_authenticate_with_code(
        &self,
        name: &str,
        code: &str,
        state: Option<&str>,
    ) -> Result<()> {
        let entry = self.registry.enabled_entry(name)?;

        {
            let mut pending = self.pending_states.lock();
            if let Some(expected) = pending.get(name) {
                // A rejected callback leaves the nonce in place.
                if state != Some(expected.as_str()) {
                    let reason = match state {
                        Some(_) => "OAuth state does not match",
                        None => "OAuth state missing from callback",
                    };
                    return Err(GatewayError::auth_failed(
                        name,
                        GatewayError::InvalidArgument(reason.into()),
                    ));
                }
                pending.remove(name);
            }
        }

        let session = entry
            .adapter
            .exchange_code(&self.http, &entry.descriptor, code)
            .await
            .map_err(|e| GatewayError::auth_failed(name, e))?;

        self.store.put_session(name, session)
    }

    // -----------------------------------------------------------------------
    // Quotes
    // -----------------------------------------------------------------------

    /// Quote `symbol` from the active broker.
    ///
    /// `None` means "no live data": no broker is active, or the fetch failed.
    /// Callers fall back to another source.
    pub async fn get_quote(&self, symbol: &str) -> Option<NormalizedQuote> {
        match self.try_get_quote(symbol).await {
            Ok(quote) => Some(quote),
            Err(GatewayError::NotAuthenticated(_)) => {
                tracing::debug!(%symbol, "no active broker; quote unavailable");
                None
            }
            Err(e) => {
                tracing::warn!(%symbol, error = %e, "live quote unavailable");
                None
            }
        }
    }

    /// Quote `symbol` from the active broker, reporting why it failed.
    pub async fn try_get_quote(&self, symbol: &str) -> Result<NormalizedQuote> {
        let (name, session) = self
            .store
            .active_session()
            .ok_or_else(|| GatewayError::NotAuthenticated("no active broker".into()))?;
        let entry = self.registry.entry(&name)?;
        self.fetch_with_retry(entry, &session, symbol).await
    }

    /// Quote `symbol` from a specific authenticated broker.
    pub async fn quote_from(&self, name: &str, symbol: &str) -> Result<NormalizedQuote> {
        let entry = self.registry.entry(name)?;
        let session = self
            .store
            .session(name)
            .ok_or_else(|| GatewayError::NotAuthenticated(name.to_owned()))?;
        self.fetch_with_retry(entry, &session, symbol).await
    }

    async fn fetch_with_retry(
        &self,
        entry: &RegisteredBroker,
        session: &Session,
        symbol: &str,
    ) -> Result<NormalizedQuote> {
        let name = entry.descriptor.name.as_str();
        let instrument =
            Instrument::parse(symbol).map_err(|e| GatewayError::quote_failed(name, symbol, e))?;

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = entry
                .adapter
                .fetch_quote(&self.http, &entry.descriptor, session, &instrument)
                .await;

            match result {
                Ok(mut quote) => {
                    quote.symbol = symbol.trim().to_owned();
                    return Ok(quote);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::debug!(broker = %name, %symbol, attempt, error = %e, "retrying quote");
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_auth_rejection() {
                        tracing::warn!(broker = %name, "broker rejected session; logging out");
                        if let Err(le) = self.store.logout_if_token(name, &session.access_token) {
                            tracing::warn!(broker = %name, error = %le, "failed to drop rejected session");
                        }
                    }
                    return Err(GatewayError::quote_failed(name, symbol, e));
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Session management
    // -----------------------------------------------------------------------

    /// Brokers with a live session.
    pub fn authenticated_brokers(&self) -> Vec<String> {
        self.store.list_authenticated()
    }

    pub fn active_broker(&self) -> Option<String> {
        self.store.get_active()
    }

    /// Promote an authenticated broker to active.
    pub fn set_active_broker(&self, name: &str) -> Result<()> {
        self.registry.enabled_entry(name)?;
        self.store.set_active(name)
    }

    /// Forget the local session for `name`.
    pub fn logout(&self, name: &str) -> Result<()> {
        self.registry.entry(name)?;
        self.store.logout(name).map(|_| ())
    }

    pub fn logout_all(&self) -> Result<()> {
        self.pending_states.lock().clear();
        self.store.logout_all()
    }

    /// Invalidate the session on the broker's side, then log out locally.
    ///
    /// The remote call is best effort: its failure is logged and the local
    /// session is dropped regardless.
    ///
    /// Only the session that was revoked is dropped; one stored while the
    /// remote call was in flight is kept.
    pub async fn revoke(&self, name: &str) -> Result<()> {
        let entry = self.registry.entry(name)?;
        let Some(session) = self.store.session(name) else {
            // Nothing live to revoke; clear any expired leftover.
            return self.store.logout(name).map(|_| ());
        };
        if let Err(e) = entry
            .adapter
            .revoke(&self.http, &entry.descriptor, &session)
            .await
        {
            tracing::warn!(broker = %name, error = %e, "remote session revoke failed");
        }
        self.store
            .logout_if_token(name, &session.access_token)
            .map(|_| ())
    }
}
