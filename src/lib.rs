//! # broker-gateway
//!
//! Multi-broker OAuth session management and normalized market quotes for
//! Indian brokers (Zerodha, Upstox, Angel One, Fyers).
//!
//! The [`BrokerGateway`] keeps one session per broker, tracks which broker is
//! active, and answers `get_quote(symbol)` with the same
//! [`NormalizedQuote`](types::NormalizedQuote) shape whichever broker serves
//! it. API secrets stay in this process: code exchanges and checksum signing
//! run here, never in a browser.
//!
//! ## Quick Start
//!
//! ```no_run
//! use broker_gateway::{BrokerGateway, config::GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> broker_gateway::Result<()> {
//!     let gateway = BrokerGateway::from_config(&GatewayConfig::from_env()?)?;
//!     match gateway.get_quote("NIFTY 50").await {
//!         Some(q) => println!("NIFTY 50 {} ({:+.2}%)", q.ltp, q.change_percent),
//!         None => println!("no live data; using fallback feed"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod brokers;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod store;
pub mod types;

/// Re-export the gateway facade at crate root for convenience.
pub use gateway::BrokerGateway;
/// Re-export the error type and Result alias.
pub use error::{GatewayError, Result};
