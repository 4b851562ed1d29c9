//! E.164 phone number validation.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn e164_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\+[1-9]\d{1,14}$").expect("static regex is valid"))
}

/// A phone number validated against E.164 (`^\+[1-9]\d{1,14}$`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Validate and wrap a phone number string.
    pub fn parse(raw: &str) -> Result<Self, InvalidPhoneNumber> {
        if e164_pattern().is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidPhoneNumber(raw.to_string()))
        }
    }

    /// Borrow the underlying E.164 string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = InvalidPhoneNumber;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PhoneNumber> for String {
    fn from(value: PhoneNumber) -> Self {
        value.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A phone number failed E.164 validation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid phone number: {0}")]
pub struct InvalidPhoneNumber(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_e164() {
        assert!(PhoneNumber::parse("+14155552671").is_ok());
    }

    #[test]
    fn rejects_leading_zero_after_plus() {
        assert!(PhoneNumber::parse("+0123").is_err());
    }

    #[test]
    fn rejects_missing_plus() {
        assert!(PhoneNumber::parse("14155552671").is_err());
    }

    #[test]
    fn rejects_too_long() {
        // 16 digits after the +, exceeds the 15-digit E.164 cap.
        assert!(PhoneNumber::parse("+1234567890123456").is_err());
    }

    #[test]
    fn rejects_letters() {
        assert!(PhoneNumber::parse("+1415abc2671").is_err());
    }

    #[test]
    fn round_trips_through_serde() {
        let n = PhoneNumber::parse("+442079460000").unwrap();
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(json, "\"+442079460000\"");
        let back: PhoneNumber = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n);
    }

    #[test]
    fn serde_rejects_invalid_on_deserialize() {
        let err = serde_json::from_str::<PhoneNumber>("\"not-a-number\"");
        assert!(err.is_err());
    }
}
