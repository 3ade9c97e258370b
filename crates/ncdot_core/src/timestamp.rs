use anyhow::{anyhow, Result};
use serde::{Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

// Offset-less feed timestamps are taken as UTC.
const LOCAL_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
];

/// A feed timestamp: the text exactly as delivered plus its parsed instant.
///
/// Archive snapshots compare the text, sorting and staleness use the instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub text: String,
    pub at: OffsetDateTime,
}

impl Stamp {
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if let Ok(at) = OffsetDateTime::parse(trimmed, &Rfc3339) {
            return Ok(Self {
                text: text.to_string(),
                at,
            });
        }
        for format in LOCAL_FORMATS {
            if let Ok(local) = PrimitiveDateTime::parse(trimmed, format) {
                return Ok(Self {
                    text: text.to_string(),
                    at: local.assume_utc(),
                });
            }
        }
        Err(anyhow!("Unparsable timestamp: {text:?}"))
    }

    /// Parses an optional feed field. `None`, blank and the literal `"null"`
    /// are all absent values.
    pub fn parse_optional(text: Option<&str>) -> Result<Option<Self>> {
        match text.map(str::trim) {
            None | Some("") | Some("null") => Ok(None),
            Some(_) => text.map(Self::parse).transpose(),
        }
    }

    pub fn unix_millis(&self) -> i128 {
        self.at.unix_timestamp_nanos() / 1_000_000
    }
}

impl Serialize for Stamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
