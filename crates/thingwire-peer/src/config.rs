use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thingwire_frame::{
    FrameConfig, DEFAULT_CHUNK_SIZE, DEFAULT_GATEWAY_TYPE, DEFAULT_MAX_MESSAGE_SIZE,
    DEFAULT_OFFLINE_QUEUE_SIZE, HEADER_SIZE, MULTIPART_HEADER_SIZE,
};

use crate::error::{PeerError, Result};

/// Default WebSocket resource path on the server.
pub const DEFAULT_RESOURCE: &str = "/Thingworx/WS";
/// Default wait for a response to a blocking call.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default interval between keep-alive pings.
pub const DEFAULT_PING_RATE: Duration = Duration::from_secs(55);

/// Settings for one client connection.
///
/// Durations are expressed in milliseconds when loaded from JSON
/// (`message_timeout_ms`, `ping_rate_ms`, ...). Missing keys take their
/// default values.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub resource: String,
    /// Application key sent in the AUTH claim. Redacted in debug output.
    pub app_key: String,
    pub gateway_name: Option<String>,
    pub gateway_type: String,
    /// Largest physical frame, headers included.
    pub chunk_size: usize,
    /// Largest reassembled multipart message.
    pub max_message_size: usize,
    #[serde(rename = "message_timeout_ms", with = "millis")]
    pub message_timeout: Duration,
    #[serde(rename = "ping_rate_ms", with = "millis")]
    pub ping_rate: Duration,
    /// How often expired pending responses and multipart fragments are swept.
    #[serde(rename = "stale_cleanup_rate_ms", with = "millis")]
    pub stale_cleanup_rate: Duration,
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
    /// Connection attempts per `connect` call. `-1` retries forever.
    pub connect_retries: i32,
    #[serde(rename = "connect_retry_delay_ms", with = "millis")]
    pub connect_retry_delay: Duration,
    /// Percentage of each duty-cycle period spent connected.
    pub duty_cycle: u8,
    /// Duty-cycle period. Zero disables duty cycling.
    #[serde(rename = "duty_cycle_period_ms", with = "millis")]
    pub duty_cycle_period: Duration,
    pub auto_reconnect: bool,
    /// Byte budget of the in-memory offline store. Zero disables it.
    pub offline_queue_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 80,
            resource: DEFAULT_RESOURCE.to_string(),
            app_key: String::new(),
            gateway_name: None,
            gateway_type: DEFAULT_GATEWAY_TYPE.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            ping_rate: DEFAULT_PING_RATE,
            stale_cleanup_rate: DEFAULT_MESSAGE_TIMEOUT * 5,
            connect_timeout: Duration::from_secs(10),
            connect_retries: 3,
            connect_retry_delay: Duration::from_secs(5),
            duty_cycle: 100,
            duty_cycle_period: Duration::ZERO,
            auto_reconnect: true,
            offline_queue_size: DEFAULT_OFFLINE_QUEUE_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16, app_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            app_key: app_key.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(PeerError::InvalidConfig("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(PeerError::InvalidConfig("port must not be zero".into()));
        }
        if self.chunk_size == 0 || self.chunk_size > usize::from(u16::MAX) {
            return Err(PeerError::InvalidConfig(format!(
                "chunk_size {} must be between 1 and {}",
                self.chunk_size,
                u16::MAX
            )));
        }
        let overhead = HEADER_SIZE + MULTIPART_HEADER_SIZE;
        if self.chunk_size <= overhead {
            return Err(PeerError::InvalidConfig(format!(
                "chunk_size {} leaves no room after {overhead} header bytes",
                self.chunk_size
            )));
        }
        if self.max_message_size < self.chunk_size {
            return Err(PeerError::InvalidConfig(format!(
                "max_message_size {} is smaller than chunk_size {}",
                self.max_message_size, self.chunk_size
            )));
        }
        if self.duty_cycle > 100 {
            return Err(PeerError::InvalidConfig(format!(
                "duty_cycle {} is over 100",
                self.duty_cycle
            )));
        }
        Ok(())
    }

    /// Chunking limits for the frame layer.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            chunk_size: self.chunk_size,
            max_message_size: self.max_message_size,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("resource", &self.resource)
            .field(
                "app_key",
                &format_args!("<redacted:{} bytes>", self.app_key.len()),
            )
            .field("gateway_name", &self.gateway_name)
            .field("gateway_type", &self.gateway_type)
            .field("chunk_size", &self.chunk_size)
            .field("max_message_size", &self.max_message_size)
            .field("message_timeout", &self.message_timeout)
            .field("ping_rate", &self.ping_rate)
            .field("stale_cleanup_rate", &self.stale_cleanup_rate)
            .field("connect_timeout", &self.connect_timeout)
            .field("connect_retries", &self.connect_retries)
            .field("connect_retry_delay", &self.connect_retry_delay)
            .field("duty_cycle", &self.duty_cycle)
            .field("duty_cycle_period", &self.duty_cycle_period)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("offline_queue_size", &self.offline_queue_size)
            .finish()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = ClientConfig::default();
        assert_eq!(config.chunk_size, 8192);
        assert_eq!(config.max_message_size, 16384);
        assert_eq!(config.message_timeout, Duration::from_secs(10));
        assert_eq!(config.stale_cleanup_rate, Duration::from_secs(50));
        assert_eq!(config.ping_rate, Duration::from_secs(55));
        assert_eq!(config.duty_cycle, 100);
        assert!(config.duty_cycle_period.is_zero());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_partial_json() {
        let config = ClientConfig::from_json_str(
            r#"{
                "host": "iot.example.com",
                "port": 443,
                "app_key": "secret-key",
                "gateway_name": "edge-7",
                "message_timeout_ms": 2500,
                "connect_retries": -1
            }"#,
        )
        .expect("config should parse");
        assert_eq!(config.host, "iot.example.com");
        assert_eq!(config.port, 443);
        assert_eq!(config.gateway_name.as_deref(), Some("edge-7"));
        assert_eq!(config.message_timeout, Duration::from_millis(2500));
        assert_eq!(config.connect_retries, -1);
        assert_eq!(config.resource, DEFAULT_RESOURCE);
    }

    #[test]
    fn json_roundtrip_keeps_millis() {
        let config = ClientConfig {
            ping_rate: Duration::from_millis(1234),
            ..ClientConfig::new("h", 1, "k")
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"ping_rate_ms\":1234"));
        assert_eq!(ClientConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let bad = [
            ClientConfig {
                host: String::new(),
                ..ClientConfig::default()
            },
            ClientConfig {
                port: 0,
                ..ClientConfig::default()
            },
            ClientConfig {
                chunk_size: 70_000,
                max_message_size: 100_000,
                ..ClientConfig::default()
            },
            ClientConfig {
                chunk_size: 21,
                ..ClientConfig::default()
            },
            ClientConfig {
                max_message_size: 100,
                ..ClientConfig::default()
            },
            ClientConfig {
                duty_cycle: 101,
                ..ClientConfig::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(PeerError::InvalidConfig(_))),
                "{config:?}"
            );
        }
        assert!(matches!(
            ClientConfig::from_json_str("{\"port\": 0}"),
            Err(PeerError::InvalidConfig(_))
        ));
        assert!(matches!(
            ClientConfig::from_json_str("not json"),
            Err(PeerError::Json(_))
        ));
    }

    #[test]
    fn debug_redacts_app_key() {
        let config = ClientConfig::new("h", 1, "super-secret");
        let dbg = format!("{config:?}");
        assert!(dbg.contains("<redacted:12 bytes>"));
        assert!(!dbg.contains("super-secret"));
    }
}
