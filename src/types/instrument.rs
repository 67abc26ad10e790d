//! Instrument parsing and the well-known index table.
//!
//! Callers ask for quotes with free-form symbols (`"NIFTY 50"`,
//! `"NSE:RELIANCE"`, `"BANKNIFTY"`). Every broker spells instruments
//! differently, so the symbol is parsed once into an [`Instrument`] and each
//! adapter derives its own key from it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// Exchange / segment an instrument trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    /// NSE cash and indices.
    NSE,
    /// BSE cash and indices.
    BSE,
    /// NSE futures & options.
    NFO,
    /// BSE futures & options.
    BFO,
    /// MCX commodities.
    MCX,
    /// NSE currency derivatives.
    CDS,
}

impl Exchange {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NSE => "NSE",
            Self::BSE => "BSE",
            Self::NFO => "NFO",
            Self::BFO => "BFO",
            Self::MCX => "MCX",
            Self::CDS => "CDS",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NSE" => Ok(Self::NSE),
            "BSE" => Ok(Self::BSE),
            "NFO" => Ok(Self::NFO),
            "BFO" => Ok(Self::BFO),
            "MCX" => Ok(Self::MCX),
            "CDS" => Ok(Self::CDS),
            other => Err(GatewayError::InvalidArgument(format!(
                "unknown exchange: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Index table
// ---------------------------------------------------------------------------

/// Per-broker spellings of a well-known index.
#[derive(Debug, PartialEq, Eq)]
pub struct IndexInfo {
    /// Canonical (exchange) name; also Kite's trading symbol.
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub exchange: Exchange,
    /// Upstox `instrument_key`.
    pub upstox_key: &'static str,
    /// Angel One symbol token.
    pub angel_token: &'static str,
    /// Fyers symbol.
    pub fyers_symbol: &'static str,
}

/// Indices the dashboard quotes by name.
pub static INDICES: &[IndexInfo] = &[
    IndexInfo {
        name: "NIFTY 50",
        aliases: &["NIFTY", "NIFTY50"],
        exchange: Exchange::NSE,
        upstox_key: "NSE_INDEX|Nifty 50",
        angel_token: "99926000",
        fyers_symbol: "NSE:NIFTY50-INDEX",
    },
    IndexInfo {
        name: "NIFTY BANK",
        aliases: &["BANKNIFTY", "NIFTYBANK"],
        exchange: Exchange::NSE,
        upstox_key: "NSE_INDEX|Nifty Bank",
        angel_token: "99926009",
        fyers_symbol: "NSE:NIFTYBANK-INDEX",
    },
    IndexInfo {
        name: "NIFTY FIN SERVICE",
        aliases: &["FINNIFTY"],
        exchange: Exchange::NSE,
        upstox_key: "NSE_INDEX|Nifty Fin Service",
        angel_token: "99926037",
        fyers_symbol: "NSE:FINNIFTY-INDEX",
    },
    IndexInfo {
        name: "INDIA VIX",
        aliases: &["VIX", "INDIAVIX"],
        exchange: Exchange::NSE,
        upstox_key: "NSE_INDEX|India VIX",
        angel_token: "99926017",
        fyers_symbol: "NSE:INDIAVIX-INDEX",
    },
    IndexInfo {
        name: "SENSEX",
        aliases: &["BSE SENSEX"],
        exchange: Exchange::BSE,
        upstox_key: "BSE_INDEX|SENSEX",
        angel_token: "99919000",
        fyers_symbol: "BSE:SENSEX-INDEX",
    },
];

/// Look up an index by canonical name or alias (case-insensitive).
pub fn find_index(symbol: &str) -> Option<&'static IndexInfo> {
    let wanted = symbol.trim();
    INDICES.iter().find(|idx| {
        idx.name.eq_ignore_ascii_case(wanted)
            || idx.aliases.iter().any(|a| a.eq_ignore_ascii_case(wanted))
    })
}

// ---------------------------------------------------------------------------
// Instrument
// ---------------------------------------------------------------------------

/// A parsed quote request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    pub exchange: Exchange,
    /// Trading symbol, canonicalized for known indices.
    pub symbol: String,
    /// Set when the symbol names a well-known index.
    pub index: Option<&'static IndexInfo>,
}

impl Instrument {
    /// Parse `"EXCH:SYMBOL"` or a bare symbol (NSE assumed).
    ///
    /// Symbols are upper-cased, except raw broker keys containing `|`,
    /// which are kept as given.
    ///
    /// Known index names and aliases resolve to the index's canonical name
    /// and home exchange regardless of any exchange prefix.
    pub fn parse(input: &str) -> Result<Self, GatewayError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(GatewayError::InvalidArgument("symbol is empty".into()));
        }

        let (exchange, symbol) = match input.split_once(':') {
            Some((ex, sym)) => (ex.parse::<Exchange>()?, sym.trim()),
            None => (Exchange::NSE, input),
        };
        if symbol.is_empty() {
            return Err(GatewayError::InvalidArgument(format!(
                "symbol missing after exchange in {input:?}"
            )));
        }

        if let Some(index) = find_index(symbol) {
            return Ok(Self {
                exchange: index.exchange,
                symbol: index.name.to_owned(),
                index: Some(index),
            });
        }

        // Upstox instrument keys (`NSE_INDEX|Nifty Midcap 50`) are case-sensitive.
        let symbol = if symbol.contains('|') {
            symbol.to_owned()
        } else {
            symbol.to_ascii_uppercase()
        };
        Ok(Self {
            exchange,
            symbol,
            index: None,
        })
    }

    pub fn is_index(&self) -> bool {
        self.index.is_some()
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

impl FromStr for Instrument {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
