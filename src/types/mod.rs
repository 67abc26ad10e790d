//! Data model shared by the registry, the session store and the adapters.
//!
//! ## Organization
//!
//! - [`broker`]: Broker descriptors, credentials and capability flags
//! - [`session`]: Authenticated session (tokens + expiry)
//! - [`quote`]: Normalized quote and lenient numeric coercion
//! - [`instrument`]: Symbol parsing and the well-known index table

pub mod broker;
pub mod instrument;
pub mod quote;
pub mod session;

pub use broker::{BrokerCredentials, BrokerDescriptor, Capabilities, Capability};
pub use instrument::{Exchange, Instrument};
pub use quote::NormalizedQuote;
pub use session::Session;
