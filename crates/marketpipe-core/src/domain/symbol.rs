use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Whitelisted crypto symbol with its upstream provider identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Symbol {
    Btc,
    Eth,
    Sol,
    Ada,
    Dot,
}

impl Symbol {
    /// Every supported symbol, in display order.
    pub const ALL: [Symbol; 5] = [Self::Btc, Self::Eth, Self::Sol, Self::Ada, Self::Dot];

    /// Parse a symbol given in its canonical uppercase form.
    ///
    /// No normalization is applied: `"btc"` and `" BTC "` are rejected.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        if input.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }

        Self::ALL
            .into_iter()
            .find(|symbol| symbol.as_str() == input)
            .ok_or_else(|| ValidationError::UnsupportedSymbol {
                value: input.to_owned(),
            })
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Btc => "BTC",
            Self::Eth => "ETH",
            Self::Sol => "SOL",
            Self::Ada => "ADA",
            Self::Dot => "DOT",
        }
    }

    /// Identifier used by the CoinGecko `simple/price` endpoint.
    pub const fn provider_id(self) -> &'static str {
        match self {
            Self::Btc => "bitcoin",
            Self::Eth => "ethereum",
            Self::Sol => "solana",
            Self::Ada => "cardano",
            Self::Dot => "polkadot",
        }
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Symbol {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.as_str().to_owned()
    }
}
