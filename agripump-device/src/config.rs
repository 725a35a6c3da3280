use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::util::json::{
    deserialize_duration_from_ms, deserialize_nonzero_duration_from_ms, serialize_duration_to_ms,
};

/// Timing configuration for a control surface
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ControlConfig {
    /// Delay between polls while the device is healthy
    #[serde(
        deserialize_with = "deserialize_nonzero_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub poll_interval: Duration,

    /// Retry delay after the first failed poll
    #[serde(
        deserialize_with = "deserialize_nonzero_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub initial_backoff: Duration,

    /// Ceiling for the retry delay
    #[serde(
        deserialize_with = "deserialize_nonzero_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub max_backoff: Duration,

    /// Quiet period before a speed change is sent
    #[serde(
        deserialize_with = "deserialize_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub speed_debounce: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(3_000),
            initial_backoff: Duration::from_millis(1_000),
            max_backoff: Duration::from_millis(30_000),
            speed_debounce: Duration::from_millis(150),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_config_uses_milliseconds() {
        let config: ControlConfig = serde_json::from_value(json!({
            "poll_interval": 5000,
            "initial_backoff": 500,
            "max_backoff": 60000,
            "speed_debounce": 200,
        }))
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.initial_backoff, Duration::from_millis(500));
        assert_eq!(config.max_backoff, Duration::from_secs(60));
        assert_eq!(config.speed_debounce, Duration::from_millis(200));

        assert_eq!(
            serde_json::to_value(ControlConfig::default()).unwrap(),
            json!({
                "poll_interval": 3000,
                "initial_backoff": 1000,
                "max_backoff": 30000,
                "speed_debounce": 150,
            })
        );
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        for field in ["poll_interval", "initial_backoff", "max_backoff"] {
            let mut value = serde_json::to_value(ControlConfig::default()).unwrap();
            value[field] = json!(0);
            assert!(
                serde_json::from_value::<ControlConfig>(value).is_err(),
                "{field} accepted zero"
            );
        }

        let mut value = serde_json::to_value(ControlConfig::default()).unwrap();
        value["speed_debounce"] = json!(0);
        let config: ControlConfig = serde_json::from_value(value).unwrap();
        assert_eq!(config.speed_debounce, Duration::ZERO);
    }
}
