//! Canonical beacon identifiers.
//!
//! Every advertisement encoding (service UUID list, iBeacon manufacturer data,
//! Eddystone-style service data) is reduced to the same lowercase UUID string
//! so that one physical beacon always maps to one identifier.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Normalize a raw identifier string: trim surrounding whitespace and lowercase.
///
/// Normalizing an already normalized string returns it unchanged.
///
/// # Example
/// ```
/// use beacon_campaign_listener::identifier::normalize;
///
/// assert_eq!(
///     normalize("  E2C56DB5-DFFB-48D2-B060-D0F5A71096E0 "),
///     "e2c56db5-dffb-48d2-b060-d0f5a71096e0"
/// );
/// ```
pub fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// A normalized beacon identifier, usable as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalIdentifier(String);

/// Errors returned when parsing an identifier string.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseIdentifierError {
    #[error("invalid identifier: empty after trimming")]
    Empty,
}

impl CanonicalIdentifier {
    /// Build an identifier from any raw string, or `None` if nothing is left after trimming.
    pub fn new(raw: &str) -> Option<Self> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Uuid> for CanonicalIdentifier {
    fn from(uuid: Uuid) -> Self {
        // `Uuid`'s hyphenated form is already lowercase
        Self(uuid.hyphenated().to_string())
    }
}

impl FromStr for CanonicalIdentifier {
    type Err = ParseIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or(ParseIdentifierError::Empty)
    }
}

impl fmt::Display for CanonicalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trims_and_lowercases() {
        assert_eq!(normalize("  AbC-DEF \n"), "abc-def");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize(" B9407F30-F5F8-466E-AFF9-25556B57FE6D ");
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_from_uuid_is_lowercase_hyphenated() {
        let uuid = Uuid::from_bytes([
            0xB9, 0x40, 0x7F, 0x30, 0xF5, 0xF8, 0x46, 0x6E, 0xAF, 0xF9, 0x25, 0x55, 0x6B, 0x57,
            0xFE, 0x6D,
        ]);
        let id = CanonicalIdentifier::from(uuid);
        assert_eq!(id.as_str(), "b9407f30-f5f8-466e-aff9-25556b57fe6d");
    }

    #[test]
    fn test_from_uuid_matches_parsed_string() {
        let uuid = Uuid::from_bytes([0xAB; 16]);
        let from_uuid = CanonicalIdentifier::from(uuid);
        let from_str: CanonicalIdentifier = uuid.to_string().to_uppercase().parse().unwrap();
        assert_eq!(from_uuid, from_str);
    }

    #[test]
    fn test_parse_empty_is_error() {
        assert_eq!(
            "   ".parse::<CanonicalIdentifier>(),
            Err(ParseIdentifierError::Empty)
        );
        assert!(CanonicalIdentifier::new("").is_none());
    }

    #[test]
    fn test_display_round_trips_normalized_form() {
        let id = CanonicalIdentifier::new(" ABC ").unwrap();
        assert_eq!(format!("{}", id), "abc");
    }
}
