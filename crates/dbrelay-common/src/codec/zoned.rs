//! Canonical shape for timestamps carrying a named time zone.
//!
//! `chrono::DateTime<chrono_tz::Tz>` has no serde representation that keeps
//! the zone name, so the codec converts it to [`ZonedDateTime`] before
//! encoding and back after decoding.

use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A UTC instant paired with an IANA time zone name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZonedDateTime {
    /// The instant, in UTC.
    pub utc: NaiveDateTime,
    /// IANA zone name, e.g. `Europe/Paris`.
    pub time_zone: String,
}

impl ZonedDateTime {
    /// Creates a zoned timestamp.
    pub fn new(utc: NaiveDateTime, time_zone: impl Into<String>) -> Self {
        Self {
            utc,
            time_zone: time_zone.into(),
        }
    }

    /// Captures a `DateTime<Tz>`.
    pub fn from_zoned(value: &DateTime<Tz>) -> Self {
        Self::new(value.naive_utc(), value.timezone().name())
    }

    /// Rebuilds the `DateTime<Tz>`. Returns `None` for an unknown zone name.
    pub fn to_zoned(&self) -> Option<DateTime<Tz>> {
        let tz: Tz = self.time_zone.parse().ok()?;
        Some(tz.from_utc_datetime(&self.utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_zoned_conversion() {
        let utc = NaiveDate::from_ymd_opt(2024, 3, 31)
            .unwrap()
            .and_hms_opt(1, 30, 0)
            .unwrap();
        let paris = chrono_tz::Europe::Paris.from_utc_datetime(&utc);

        let zoned = ZonedDateTime::from_zoned(&paris);
        assert_eq!(zoned.time_zone, "Europe/Paris");
        assert_eq!(zoned.utc, utc);
        assert_eq!(zoned.to_zoned(), Some(paris));
    }

    #[test]
    fn test_unknown_zone() {
        let zoned = ZonedDateTime::new(
            NaiveDate::from_ymd_opt(2000, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            "Mars/Olympus",
        );
        assert!(zoned.to_zoned().is_none());
    }
}
