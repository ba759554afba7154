//! Symbol identifiers.
//!
//! A symbol is the uppercase BASEQUOTE concatenation used by the
//! exchange (e.g. `ETHUSDT`). Normalized once at ingress so every map
//! keyed by symbol agrees on casing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized trading pair identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol, trimming whitespace and uppercasing.
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(s.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_case_and_whitespace() {
        assert_eq!(Symbol::new(" ethusdt "), Symbol::new("ETHUSDT"));
        assert_eq!(Symbol::new("BtcUsdt").as_str(), "BTCUSDT");
    }
}
