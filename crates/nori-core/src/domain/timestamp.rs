//! Timestamp - eta / expires の値
//!
//! producer が送った文字列をそのまま保持し、解釈した時刻と並べて持つ。
//! 書き出しは元の文字列なので、`Z` 表記もタイムゾーンなしの表記も変わらない。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamp {
    raw: String,
    at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid timestamp {raw:?}: {source}")]
pub struct TimestampError {
    raw: String,
    #[source]
    source: chrono::ParseError,
}

impl Timestamp {
    /// RFC 3339 の文字列を作る（`+00:00` 表記）
    pub fn from_utc(at: DateTime<Utc>) -> Self {
        Self {
            raw: at.to_rfc3339_opts(SecondsFormat::AutoSi, false),
            at,
        }
    }

    /// 解釈した時刻。タイムゾーンなしの表記は UTC とみなす（`utc=false` の producer）
    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let at = match DateTime::parse_from_rfc3339(raw) {
            Ok(at) => at.with_timezone(&Utc),
            Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .map_err(|source| TimestampError {
                    raw: raw.to_string(),
                    source,
                })?
                .and_utc(),
        };
        Ok(Self {
            raw: raw.to_string(),
            at,
        })
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(at: DateTime<Utc>) -> Self {
        Self::from_utc(at)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn noon_with_micros() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
            + chrono::Duration::microseconds(123_456)
    }

    #[rstest]
    #[case::zulu("2024-01-01T12:00:00.123456Z")]
    #[case::offset("2024-01-01T12:00:00.123456+00:00")]
    #[case::naive("2024-01-01T12:00:00.123456")]
    #[case::shifted("2024-01-01T21:00:00.123456+09:00")]
    fn parses_every_form_and_keeps_the_original_text(#[case] raw: &str) {
        let timestamp: Timestamp = raw.parse().unwrap();
        assert_eq!(timestamp.at(), noon_with_micros());
        assert_eq!(timestamp.as_str(), raw);
        assert_eq!(serde_json::to_string(&timestamp).unwrap(), format!("\"{raw}\""));
    }

    #[test]
    fn from_utc_writes_rfc3339() {
        let timestamp = Timestamp::from_utc(noon_with_micros());
        assert_eq!(timestamp.as_str(), "2024-01-01T12:00:00.123456+00:00");
    }

    #[test]
    fn garbage_is_rejected() {
        let err = "next tuesday".parse::<Timestamp>().unwrap_err();
        assert!(err.to_string().contains("next tuesday"));
        assert!(serde_json::from_str::<Timestamp>("\"2024-13-01T00:00:00\"").is_err());
    }
}
