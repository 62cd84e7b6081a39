use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

use crate::{RpcError, RpcResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Default deadline of a correlated call.
    #[serde(default = "default_request_timeout", with = "duration_ms")]
    pub request_timeout: Duration,

    #[serde(default)]
    pub push: PushDefaults,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            push: PushDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> RpcResult<Self> {
        from_file(path)
    }

    pub fn from_str(s: &str) -> RpcResult<Self> {
        from_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushDefaults {
    /// Event a push registration subscribes to when neither the request nor
    /// the target method names one.
    #[serde(default = "default_push_event")]
    pub default_event: String,
}

impl Default for PushDefaults {
    fn default() -> Self {
        Self {
            default_event: default_push_event(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> RpcResult<T> {
    let file = File::open(path.as_ref()).map_err(|e| {
        RpcError::InternalError(format!(
            "Failed to open config file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .map_err(|e| RpcError::InternalError(format!("Failed to parse config file: {}", e)))
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> RpcResult<T> {
    serde_json::from_str(s)
        .map_err(|e| RpcError::InternalError(format!("Failed to parse config: {}", e)))
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_push_event() -> String {
    "change".to_string()
}
fn default_log_filter() -> String {
    "info".to_string()
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub(crate) mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = RuntimeConfig::from_str("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.request_timeout, Duration::from_millis(30_000));
        assert_eq!(config.push.default_event, "change");
        assert_eq!(config.logging.filter, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_partial_override() {
        let config = RuntimeConfig::from_str(
            r#"{"request_timeout": 250, "logging": {"json": true}}"#,
        )
        .unwrap();
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert!(config.logging.json);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_invalid_config_is_reported() {
        assert!(matches!(
            RuntimeConfig::from_str(r#"{"request_timeout": "soon"}"#),
            Err(RpcError::InternalError(_))
        ));
        assert!(RuntimeConfig::from_file("/nonexistent/courier.json").is_err());
    }

    #[test]
    fn test_round_trip_in_milliseconds() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["request_timeout"], serde_json::json!(30_000));
    }
}
