//! Serde helpers for durations expressed as fractional seconds.
//!
//! Configuration files and snapshots carry durations as plain numbers
//! (`timeout_secs = 30.0`) rather than serde's default `{secs, nanos}` form.

/// `#[serde(with = "secs")]` for [`std::time::Duration`] fields.
pub mod secs {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|e| {
            de::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {}: {}",
                secs, e
            ))
        })
    }
}
