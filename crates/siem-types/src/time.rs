//! Serde helpers for document-store timestamps: output is always RFC3339
//! with a `Z` suffix; input accepts any RFC3339 offset or a naive ISO-8601
//! string, which is taken to be UTC.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parses an ISO-8601 datetime string, treating a missing offset as UTC.
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

pub fn format_utc(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub mod utc_datetime {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::*;

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_utc(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_utc(&raw).ok_or_else(|| serde::de::Error::custom(format!("unrecognized datetime: {raw}")))
    }
}

pub mod utc_datetime_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(&format_utc(value)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            Some(raw) => parse_utc(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("unrecognized datetime: {raw}"))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_z_suffix_offset_and_naive() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 7, 12, 30, 0).unwrap();
        assert_eq!(parse_utc("2026-03-07T12:30:00Z"), Some(expected));
        assert_eq!(parse_utc("2026-03-07T14:30:00+02:00"), Some(expected));
        assert_eq!(parse_utc("2026-03-07T12:30:00"), Some(expected));
        assert_eq!(parse_utc("2026-03-07 12:30:00"), Some(expected));
        assert_eq!(parse_utc("not a date"), None);
    }

    #[test]
    fn format_uses_z_suffix() {
        let value = Utc.with_ymd_and_hms(2026, 3, 7, 12, 30, 0).unwrap();
        assert!(format_utc(&value).ends_with('Z'));
    }
}
