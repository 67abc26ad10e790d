//! Broker registry: the immutable set of configured brokers.
//!
//! Built exactly once through [`BrokerRegistryBuilder`]; afterwards it only
//! answers lookups. Each entry pairs a [`BrokerDescriptor`] with the
//! [`BrokerAdapter`] that speaks that broker's protocol.
//!
//! ```
//! use broker_gateway::registry::BrokerRegistry;
//! use broker_gateway::types::{BrokerCredentials, BrokerDescriptor};
//!
//! # fn main() -> broker_gateway::Result<()> {
//! let zerodha = BrokerDescriptor::preset(
//!     "zerodha",
//!     BrokerCredentials { api_key: "kite-key".into(), api_secret: Some("s".into()) },
//!     "http://localhost:3000/callback",
//! )
//! .unwrap();
//!
//! let registry = BrokerRegistry::builder().register(zerodha)?.build();
//! assert_eq!(registry.list_brokers().len(), 1);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::brokers::{BrokerAdapter, builtin_adapter};
use crate::error::{GatewayError, Result};
use crate::types::{BrokerDescriptor, Capability};

/// One registered broker.
#[derive(Clone)]
pub struct RegisteredBroker {
    pub descriptor: BrokerDescriptor,
    pub adapter: Arc<dyn BrokerAdapter>,
}

impl std::fmt::Debug for RegisteredBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredBroker")
            .field("descriptor", &self.descriptor)
            .field("adapter", &self.adapter.id())
            .finish()
    }
}

/// Immutable broker registry.
#[derive(Debug, Clone, Default)]
pub struct BrokerRegistry {
    /// Registration order, for stable listing.
    order: Vec<String>,
    brokers: HashMap<String, RegisteredBroker>,
}

impl BrokerRegistry {
    /// Start building a registry.
    pub fn builder() -> BrokerRegistryBuilder {
        BrokerRegistryBuilder::default()
    }

    /// Enabled brokers, in registration order.
    pub fn list_brokers(&self) -> Vec<&BrokerDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.brokers.get(name))
            .map(|b| &b.descriptor)
            .filter(|d| d.enabled)
            .collect()
    }

    /// Descriptor for `name`, or [`GatewayError::BrokerNotConfigured`].
    pub fn get_broker(&self, name: &str) -> Result<&BrokerDescriptor> {
        self.entry(name).map(|b| &b.descriptor)
    }

    /// Descriptor and adapter for `name`.
    pub fn entry(&self, name: &str) -> Result<&RegisteredBroker> {
        self.brokers
            .get(name)
            .ok_or_else(|| GatewayError::BrokerNotConfigured(name.to_owned()))
    }

    /// Like [`entry`](Self::entry), but a broker registered with
    /// `enabled: false` is [`GatewayError::BrokerDisabled`].
    ///
    /// Login, code exchange and activation go through this; lookups, logout
    /// and revoke still reach disabled brokers so old sessions can be cleared.
    pub fn enabled_entry(&self, name: &str) -> Result<&RegisteredBroker> {
        let entry = self.entry(name)?;
        if !entry.descriptor.enabled {
            return Err(GatewayError::BrokerDisabled(name.to_owned()));
        }
        Ok(entry)
    }

    /// Whether `name` is registered (enabled or not).
    pub fn contains(&self, name: &str) -> bool {
        self.brokers.contains_key(name)
    }

    /// Whether `name` advertises `capability`.
    pub fn supports(&self, name: &str, capability: Capability) -> Result<bool> {
        Ok(self.get_broker(name)?.capabilities.has(capability))
    }
}

/// Collects broker registrations and produces an immutable [`BrokerRegistry`].
#[derive(Default)]
pub struct BrokerRegistryBuilder {
    registry: BrokerRegistry,
}

impl BrokerRegistryBuilder {
    /// Register a broker served by its built-in adapter.
    ///
    /// Fails with [`GatewayError::Config`] if no built-in adapter exists for
    /// `descriptor.name` or the name is already registered.
    pub fn register(self, descriptor: BrokerDescriptor) -> Result<Self> {
        let adapter = builtin_adapter(&descriptor.name).ok_or_else(|| {
            GatewayError::Config(format!("no adapter for broker {}", descriptor.name))
        })?;
        self.register_with_adapter(descriptor, adapter)
    }

    /// Register a broker served by a caller-supplied adapter.
    pub fn register_with_adapter(
        mut self,
        descriptor: BrokerDescriptor,
        adapter: Arc<dyn BrokerAdapter>,
    ) -> Result<Self> {
        let name = descriptor.name.clone();
        if name.is_empty() {
            return Err(GatewayError::Config("broker name is empty".into()));
        }
        if self.registry.brokers.contains_key(&name) {
            return Err(GatewayError::Config(format!(
                "broker {name} registered twice"
            )));
        }
        if descriptor.api_key().is_empty() {
            return Err(GatewayError::Config(format!("{name}: api key is empty")));
        }

        tracing::debug!(broker = %name, adapter = adapter.id(), "registered broker");
        self.registry.order.push(name.clone());
        self.registry
            .brokers
            .insert(name, RegisteredBroker { descriptor, adapter });
        Ok(self)
    }

    /// Finish registration.
    pub fn build(self) -> BrokerRegistry {
        self.registry
    }
}
