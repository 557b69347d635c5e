//! Half-open booking interval and the overlap predicate.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use slotbook_core::{DomainError, DomainResult};

/// A booked interval `[start, end)`.
///
/// The constructor is the only way in, so every `TimeSlot` satisfies
/// `start < end`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> DomainResult<Self> {
        if start >= end {
            return Err(DomainError::invariant(format!(
                "endTime ({}) must be after startTime ({})",
                end.to_rfc3339(),
                start.to_rfc3339()
            )));
        }
        Ok(Self {
            start_time: start,
            end_time: end,
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    /// Half-open intersection test: `self.start < other.end && self.end > other.start`.
    ///
    /// Back-to-back slots (one ends exactly when the other starts) do not overlap.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start_time < other.end_time && self.end_time > other.start_time
    }
}

impl core::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start_time.to_rfc3339(),
            self.end_time.to_rfc3339()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn slot(start: i64, end: i64) -> TimeSlot {
        TimeSlot::new(at(start), at(end)).unwrap()
    }

    #[test]
    fn rejects_empty_and_inverted_intervals() {
        assert!(matches!(
            TimeSlot::new(at(10), at(10)),
            Err(DomainError::InvariantViolation(_))
        ));
        assert!(TimeSlot::new(at(30), at(10)).is_err());
    }

    #[test]
    fn back_to_back_slots_do_not_overlap() {
        let a = slot(60, 90);
        let c = slot(90, 120);
        assert!(!a.overlaps(&c));
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn partial_and_containing_slots_overlap() {
        let a = slot(60, 90);
        assert!(a.overlaps(&slot(75, 105)));
        assert!(a.overlaps(&slot(30, 61)));
        assert!(a.overlaps(&slot(0, 200)));
        assert!(a.overlaps(&slot(70, 80)));
    }

    #[test]
    fn duration_is_end_minus_start() {
        assert_eq!(slot(0, 45).duration(), Duration::minutes(45));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            ..ProptestConfig::default()
        })]

        /// Property: the predicate agrees with a minute-by-minute occupancy check
        /// and is symmetric.
        #[test]
        fn overlap_matches_shared_minutes(
            s1 in 0i64..200, len1 in 1i64..60,
            s2 in 0i64..200, len2 in 1i64..60,
        ) {
            let a = slot(s1, s1 + len1);
            let b = slot(s2, s2 + len2);

            let shares_a_minute = (s1..s1 + len1).any(|m| m >= s2 && m < s2 + len2);

            prop_assert_eq!(a.overlaps(&b), shares_a_minute);
            prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
        }
    }
}
