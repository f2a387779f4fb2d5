use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A point in time, as UTC microseconds since the UNIX epoch.
///
/// Persisted as 8 big-endian bytes. Encodings of post-epoch times sort
/// chronologically.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    micros: i64,
}

impl Timestamp {
    /// Width of the binary encoding.
    pub const ENCODED_LEN: usize = 8;

    pub const fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            micros: at.timestamp_micros(),
        }
    }

    pub fn to_datetime(&self) -> Result<DateTime<Utc>, TypeError> {
        Utc.timestamp_micros(self.micros)
            .single()
            .ok_or(TypeError::TimestampOutOfRange(self.micros))
    }

    pub const fn as_micros(&self) -> i64 {
        self.micros
    }

    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        self.micros.to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; Self::ENCODED_LEN] =
            bytes.try_into().map_err(|_| TypeError::InvalidLength {
                expected: Self::ENCODED_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self::from_micros(i64::from_be_bytes(arr)))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({self})")
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Ok(at) => write!(f, "{}", at.to_rfc3339()),
            Err(_) => write!(f, "{}us", self.micros),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn datetime_conversion_keeps_microseconds() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
            + chrono::Duration::microseconds(123_456);
        let ts = Timestamp::from_datetime(at);
        assert_eq!(ts.to_datetime().unwrap(), at);
    }

    #[test]
    fn from_bytes_rejects_wrong_width() {
        assert_eq!(
            Timestamp::from_bytes(&[1, 2, 3]),
            Err(TypeError::InvalidLength {
                expected: 8,
                actual: 3
            })
        );
        assert!(Timestamp::from_bytes(&[]).is_err());
    }

    #[test]
    fn display_is_rfc3339() {
        let ts = Timestamp::from_micros(0);
        assert_eq!(ts.to_string(), "1970-01-01T00:00:00+00:00");
    }

    proptest! {
        #[test]
        fn encoding_preserves_order_for_non_negative(a in 0i64..i64::MAX, b in 0i64..i64::MAX) {
            let (ta, tb) = (Timestamp::from_micros(a), Timestamp::from_micros(b));
            prop_assert_eq!(ta.cmp(&tb), ta.to_bytes().cmp(&tb.to_bytes()));
        }

        #[test]
        fn encoding_is_exact(micros in any::<i64>()) {
            let ts = Timestamp::from_micros(micros);
            prop_assert_eq!(Timestamp::from_bytes(&ts.to_bytes()).unwrap(), ts);
        }
    }
}
