//! Strongly-typed identifiers used across the domain.
//!
//! Every identifier is a non-negative 64-bit integer (the store hands them out
//! from a BIGINT sequence). Callers frequently receive ids as digit-only strings
//! (path segments, query strings); `FromStr` accepts exactly that form so the
//! same canonical value comes out regardless of how the id arrived.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a booked appointment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct AppointmentId(i64);

/// Identifier of the staff member performing a service.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct StaffId(i64);

/// Identifier of a bookable service.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct ServiceId(i64);

/// Identifier of a registered user (client with an account).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct UserId(i64);

/// Parse a digit-only string into a canonical id value.
///
/// Signs, whitespace and empty strings are rejected; values beyond `i64::MAX`
/// are rejected rather than wrapped.
pub fn parse_digits(s: &str) -> Result<i64, String> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("'{s}' is not a numeric string"));
    }
    s.parse::<i64>()
        .map_err(|_| format!("'{s}' is out of range"))
}

macro_rules! impl_numeric_id {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Build an identifier from a raw value, rejecting negatives.
            pub fn new(value: i64) -> Result<Self, DomainError> {
                if value < 0 {
                    return Err(DomainError::invalid_id(format!(
                        "{}: {} is negative",
                        $name, value
                    )));
                }
                Ok(Self(value))
            }

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<u32> for $t {
            fn from(value: u32) -> Self {
                Self(i64::from(value))
            }
        }

        impl TryFrom<i64> for $t {
            type Error = DomainError;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = parse_digits(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(value))
            }
        }
    };
}

impl_numeric_id!(AppointmentId, "AppointmentId");
impl_numeric_id!(StaffId, "StaffId");
impl_numeric_id!(ServiceId, "ServiceId");
impl_numeric_id!(UserId, "UserId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_strings_and_integers_normalize_to_the_same_id() {
        let from_str: StaffId = "42".parse().unwrap();
        let from_int = StaffId::new(42).unwrap();
        assert_eq!(from_str, from_int);
        assert_eq!(from_str.get(), 42);
    }

    #[test]
    fn rejects_non_digit_strings() {
        for bad in ["", "-1", "+1", " 1", "1.0", "abc", "0x10"] {
            assert!(bad.parse::<ServiceId>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn rejects_overflowing_strings() {
        let err = "99999999999999999999".parse::<UserId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(msg) if msg.contains("out of range")));
    }

    #[test]
    fn rejects_negative_values() {
        assert!(AppointmentId::new(-3).is_err());
        assert!(serde_json::from_str::<AppointmentId>("-3").is_err());
    }

    #[test]
    fn serializes_as_plain_integer() {
        let id = AppointmentId::from(7);
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
        assert_eq!(serde_json::from_str::<AppointmentId>("7").unwrap(), id);
    }
}
