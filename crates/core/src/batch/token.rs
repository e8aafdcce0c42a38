//! Timestamp tokens that identify batches and data versions.

use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Format of the token embedded in staged object names.
pub const TOKEN_FORMAT: &str = "%Y%m%d_%H-%M-%S";

/// Format used for data versions in warehouse rows and queries.
pub const VERSION_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchTokenError {
    #[error("invalid batch token '{0}', expected YYYYMMDD_HH-MM-SS")]
    InvalidToken(String),

    #[error("invalid data version '{0}', expected YYYY-MM-DD HH:MM:SS")]
    InvalidVersion(String),
}

/// The `YYYYMMDD_HH-MM-SS` token shared by every object of one extraction run.
///
/// Ordering is chronological, which is also the lexicographic order of the
/// textual form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchToken(NaiveDateTime);

impl BatchToken {
    /// Token for the current local time, truncated to whole seconds.
    pub fn now() -> Self {
        Self::from_datetime(Local::now().naive_local())
    }

    pub fn from_datetime(at: NaiveDateTime) -> Self {
        Self(at.with_nanosecond(0).unwrap_or(at))
    }

    /// Parse a token. Only the canonical zero-padded form is accepted.
    pub fn parse(s: &str) -> Result<Self, BatchTokenError> {
        let invalid = || BatchTokenError::InvalidToken(s.to_string());

        // date and time are joined by exactly one underscore
        let (date, time) = s.split_once('_').ok_or_else(invalid)?;
        if date.len() != 8 || time.len() != 8 || time.contains('_') {
            return Err(invalid());
        }

        let at = NaiveDateTime::parse_from_str(s, TOKEN_FORMAT).map_err(|_| invalid())?;
        if at.format(TOKEN_FORMAT).to_string() != s {
            return Err(invalid());
        }
        Ok(Self(at))
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.0
    }

    pub fn date(&self) -> NaiveDate {
        self.0.date()
    }

    pub fn time(&self) -> NaiveTime {
        self.0.time()
    }

    /// The data version rows loaded from this batch are stamped with.
    pub fn data_version(&self) -> DataVersion {
        DataVersion(self.0)
    }
}

impl fmt::Display for BatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TOKEN_FORMAT))
    }
}

impl FromStr for BatchToken {
    type Err = BatchTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for BatchToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BatchToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A distinct `extraction_timestamp` present in the raw warehouse tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataVersion(NaiveDateTime);

impl DataVersion {
    pub fn new(at: NaiveDateTime) -> Self {
        Self(at)
    }

    /// Accepts `YYYY-MM-DD HH:MM:SS`, the ISO `T` separator and fractional seconds.
    pub fn parse(s: &str) -> Result<Self, BatchTokenError> {
        const FORMATS: [&str; 4] = [
            VERSION_FORMAT,
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%dT%H:%M:%S%.f",
        ];
        let trimmed = s.trim();
        FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
            .map(Self)
            .ok_or_else(|| BatchTokenError::InvalidVersion(s.to_string()))
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.0
    }
}

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(VERSION_FORMAT))
    }
}

impl FromStr for DataVersion {
    type Err = BatchTokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for DataVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DataVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_token() {
        let token = BatchToken::parse("20240115_14-30-05").unwrap();
        assert_eq!(token.date(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(token.time(), NaiveTime::from_hms_opt(14, 30, 5).unwrap());
        assert_eq!(token.to_string(), "20240115_14-30-05");
    }

    #[test]
    fn test_parse_rejects_malformed_tokens() {
        for bad in [
            "",
            "20240115",
            "20240115143005",
            "20240115_143005",
            "2024-01-15_14-30-05",
            "20240115_14-30-05_extra",
            "20241315_14-30-05",
            "20240115_25-30-05",
            "2024115_14-30-05",
            "abcdefgh_ij-kl-mn",
        ] {
            assert!(BatchToken::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_token_order_is_chronological_and_lexicographic() {
        let a = BatchToken::parse("20231231_23-59-59").unwrap();
        let b = BatchToken::parse("20240101_00-00-00").unwrap();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn test_now_has_whole_seconds() {
        let token = BatchToken::now();
        assert_eq!(token.datetime().nanosecond(), 0);
        assert_eq!(BatchToken::parse(&token.to_string()).unwrap(), token);
    }

    #[test]
    fn test_token_to_data_version() {
        let token = BatchToken::parse("20240115_14-30-05").unwrap();
        assert_eq!(token.data_version().to_string(), "2024-01-15 14:30:05");
    }

    #[test]
    fn test_data_version_accepts_iso_forms() {
        let plain = DataVersion::parse("2024-01-15 14:30:05").unwrap();
        assert_eq!(DataVersion::parse("2024-01-15T14:30:05").unwrap(), plain);
        assert_eq!(
            DataVersion::parse("2024-01-15 14:30:05.000").unwrap(),
            plain
        );
        assert!(DataVersion::parse("yesterday").is_err());
    }

    #[test]
    fn test_serde_uses_text_forms() {
        let token = BatchToken::parse("20240115_14-30-05").unwrap();
        assert_eq!(
            serde_json::to_string(&token).unwrap(),
            "\"20240115_14-30-05\""
        );
        let parsed: DataVersion = serde_json::from_str("\"2024-01-15 14:30:05\"").unwrap();
        assert_eq!(parsed, token.data_version());
        assert!(serde_json::from_str::<BatchToken>("\"nope\"").is_err());
    }
}
