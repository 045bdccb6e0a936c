//! Serde helpers for durations written as whole seconds or milliseconds.
//!
//! The field name carries the unit (`poll_interval_ms`,
//! `default_task_timeout_seconds`), so values stay plain integers in YAML and
//! in `DROVER_*` overrides.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

fn write_units<S: Serializer>(units: u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(units).unwrap_or(u64::MAX))
}

/// `Duration` as whole seconds
pub mod serde_duration {
    use super::*;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        write_units(u128::from(duration.as_secs()), serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// `Option<Duration>` as whole seconds; `null` or absent means unset
pub mod serde_duration_option {
    use super::*;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => super::serde_duration::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}

/// `Duration` as whole milliseconds
pub mod serde_duration_ms {
    use super::*;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        write_units(duration.as_millis(), serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timings {
        #[serde(with = "super::serde_duration_ms")]
        poll_ms: Duration,
        #[serde(with = "super::serde_duration")]
        timeout_seconds: Duration,
        #[serde(default, with = "super::serde_duration_option")]
        limit_seconds: Option<Duration>,
    }

    #[test]
    fn test_units_follow_the_field() {
        let parsed: Timings = serde_yaml::from_str("poll_ms: 250\ntimeout_seconds: 30\n").unwrap();
        assert_eq!(parsed.poll_ms, Duration::from_millis(250));
        assert_eq!(parsed.timeout_seconds, Duration::from_secs(30));
        assert_eq!(parsed.limit_seconds, None);

        let yaml = serde_yaml::to_string(&Timings {
            limit_seconds: Some(Duration::from_secs(90)),
            ..parsed
        })
        .unwrap();
        assert!(yaml.contains("limit_seconds: 90"));
    }
}
