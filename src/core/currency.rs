use serde::{Deserialize, Serialize};
use std::fmt;

/// ISO 4217-style currency code of a trade's notional.
///
/// Compression never converts between currencies: legs in different
/// currencies always fall into different buckets.
///
/// # Examples
///
/// ```
/// use compression_engine::core::currency::CurrencyCode;
///
/// let aud = CurrencyCode::new("AUD");
/// let usd = CurrencyCode::new("USD");
/// assert_ne!(aud, usd);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CurrencyCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
