//! Constants shared by the gateway and the broker adapters.
//!
//! Contains default endpoints for every supported broker, the persisted
//! record keys, and the timeout/retry bounds applied to outbound calls.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Broker names
// ---------------------------------------------------------------------------

/// Zerodha Kite Connect.
pub const ZERODHA: &str = "zerodha";
/// Upstox API v2.
pub const UPSTOX: &str = "upstox";
/// Angel One SmartAPI.
pub const ANGEL: &str = "angel";
/// Fyers API v3.
pub const FYERS: &str = "fyers";

/// Every broker with a built-in adapter, in default display order.
pub const SUPPORTED_BROKERS: [&str; 4] = [ZERODHA, UPSTOX, ANGEL, FYERS];

// ---------------------------------------------------------------------------
// Default endpoints
// ---------------------------------------------------------------------------

/// Default endpoints for each broker.
pub mod endpoints {
    /// Zerodha Kite Connect v3.
    pub mod zerodha {
        /// Browser login page.
        pub const AUTH_URL: &str = "https://kite.zerodha.com/connect/login";
        /// REST base URL.
        pub const API_BASE_URL: &str = "https://api.kite.trade";
    }

    /// Upstox API v2.
    pub mod upstox {
        /// OAuth authorization dialog.
        pub const AUTH_URL: &str = "https://api.upstox.com/v2/login/authorization/dialog";
        /// REST base URL.
        pub const API_BASE_URL: &str = "https://api.upstox.com";
    }

    /// Angel One SmartAPI.
    pub mod angel {
        /// Publisher login page.
        pub const AUTH_URL: &str = "https://smartapi.angelbroking.com/publisher-login";
        /// REST base URL.
        pub const API_BASE_URL: &str = "https://apiconnect.angelone.in";
    }

    /// Fyers API v3.
    pub mod fyers {
        /// Auth-code generation page.
        pub const AUTH_URL: &str = "https://api-t1.fyers.in/api/v3/generate-authcode";
        /// REST base URL.
        pub const API_BASE_URL: &str = "https://api-t1.fyers.in";
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Record holding the broker name → session map (JSON).
pub const STORAGE_KEY_SESSIONS: &str = "broker_auth";

/// Record holding the active broker name (plain text).
pub const STORAGE_KEY_ACTIVE: &str = "active_broker";

// ---------------------------------------------------------------------------
// Timeouts, TTLs and retries
// ---------------------------------------------------------------------------

/// Upper bound for every outbound HTTP request.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Session lifetime used when a broker does not report one.
pub const DEFAULT_SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// Maximum attempts for one quote request (first try included).
pub const MAX_QUOTE_ATTEMPTS: u32 = 2;

/// Pause between quote attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(250);
