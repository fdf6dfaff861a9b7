//! Configuration helpers shared by the subsystem crates.
//!
//! Subsystem configs are plain `serde` structs with `#[serde(default)]`.
//! They can be read from TOML and then patched from `SY_*` environment
//! variables.

use crate::errors::ConfigError;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "SY_";

/// Load a config section from a TOML file.
pub fn load_toml<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
        path: path.as_ref().display().to_string(),
        error: e.to_string(),
    })?;
    parse_toml(&content)
}

/// Parse a config section from a TOML string.
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Read `SY_<key>` and parse it, if set.
pub fn env_override<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    let full_key = format!("{ENV_PREFIX}{key}");
    match std::env::var(&full_key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: full_key,
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Read `SY_<key>` as a duration (`"30s"`, `"250ms"`), if set.
pub fn env_duration(key: &str) -> Result<Option<Duration>, ConfigError> {
    let full_key = format!("{ENV_PREFIX}{key}");
    match std::env::var(&full_key) {
        Ok(value) => duration_serde::parse_duration(&value)
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: full_key,
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// `"30s"` / `"250ms"` / `"2m"` durations for serde.
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse `"<n>ms"`, `"<n>s"` or `"<n>m"`.
    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" before "s": "250ms" also ends with 's'
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .ok()
                .and_then(|m| m.checked_mul(60))
                .map(Duration::from_secs)
                .ok_or("invalid minutes")
        } else {
            Err("duration must end in ms, s or m")
        }
    }
}
