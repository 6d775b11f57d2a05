//! Second-precision UTC timestamps as exchanged with the analytics platform.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// Wire format for every timestamp in published documents and payloads.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn format(ts: &DateTime<Utc>) -> String {
    ts.format(DATETIME_FORMAT).to_string()
}

pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Midnight UTC at the start of `day`.
pub fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}

/// Last second of `day` (23:59:59 UTC).
pub fn end_of_day(day: NaiveDate) -> DateTime<Utc> {
    start_of_day(day) + chrono::Duration::days(1) - chrono::Duration::seconds(1)
}

/// Serde adapter for `DateTime<Utc>` fields rendered with [`DATETIME_FORMAT`].
pub mod seconds {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse(&raw).ok_or_else(|| D::Error::custom(format!("bad timestamp: {raw}")))
    }
}

/// Like [`seconds`], but `None` is rendered as an empty string.
pub mod seconds_or_empty {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(ts: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => s.serialize_str(&super::format(ts)),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = String::deserialize(d)?;
        if raw.is_empty() {
            return Ok(None);
        }
        super::parse(&raw)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("bad timestamp: {raw}")))
    }
}
