use std::num::NonZeroU64;
use std::time::Duration;

use serde::{Deserializer, Serializer};

pub fn deserialize_duration_from_ms<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let ms: u64 = serde::Deserialize::deserialize(deserializer)?;
    Ok(Duration::from_millis(ms))
}

/// Like [`deserialize_duration_from_ms`] but rejects a zero duration
pub fn deserialize_nonzero_duration_from_ms<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let ms: NonZeroU64 = serde::Deserialize::deserialize(deserializer)?;
    Ok(Duration::from_millis(ms.get()))
}

pub fn serialize_duration_to_ms<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Return the body text as JSON, or `None` if it is empty or not valid JSON
pub fn parse_lenient(body: &str) -> Option<serde_json::Value> {
    if body.trim().is_empty() {
        return None;
    }
    serde_json::from_str(body).ok()
}
