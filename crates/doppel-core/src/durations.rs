//! Serde adapter for `Duration` config fields.
//!
//! Accepts humantime strings ("1s", "250ms", "1m 30s") or a plain number of
//! seconds; always writes humantime strings.

use serde::{de, Deserialize, Deserializer, Serializer};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Text(String),
    Seconds(f64),
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match Raw::deserialize(deserializer)? {
        Raw::Text(text) => humantime::parse_duration(text.trim()).map_err(de::Error::custom),
        Raw::Seconds(secs) => Duration::try_from_secs_f64(secs).map_err(de::Error::custom),
    }
}
