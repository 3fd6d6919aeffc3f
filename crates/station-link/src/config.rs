//! Link configuration

use serde::{Deserialize, Serialize};
use station_proto::GeoPoint;
use std::path::PathBuf;
use std::time::Duration;

/// Identity fields advertised in the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Stable address identifier of this device
    pub address_id: String,
    /// Human-readable display label
    pub label: String,
    /// Optional location; rounded to `location_granularity` before sending
    pub location: Option<GeoPoint>,
    /// Platform tag, e.g. "linux", "macos", "android"
    pub platform: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let descriptor = station_proto::NodeDescriptor::default();
        Self {
            address_id: String::new(),
            label: descriptor.label,
            location: None,
            platform: descriptor.platform,
        }
    }
}

/// Station link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Station relay URL, e.g. "wss://station.example.org/link"
    pub station_url: String,
    pub node: NodeConfig,

    /// Whether the link heals itself after unexpected closure
    pub auto_reconnect: bool,

    /// Heartbeat send interval
    #[serde(with = "duration_secs")]
    pub ping_interval: Duration,
    /// Watchdog evaluation interval
    #[serde(with = "duration_secs")]
    pub watchdog_interval: Duration,
    /// Pong silence beyond this counts toward a miss
    #[serde(with = "duration_secs")]
    pub pong_timeout: Duration,
    /// A miss is only counted once the last ping is at least this old
    #[serde(with = "duration_secs")]
    pub ping_stale: Duration,
    /// Consecutive misses before the link is force-closed
    pub miss_limit: u32,

    /// Window after link loss during which no disconnect is announced
    #[serde(with = "duration_secs")]
    pub grace_period: Duration,
    /// Reconnect poll interval
    #[serde(with = "duration_secs")]
    pub reconnect_poll: Duration,
    /// How long a sent hello may wait for its ack before the attempt is abandoned
    #[serde(with = "duration_secs")]
    pub ack_timeout: Duration,

    /// Granularity the advertised location is rounded to, in degrees
    pub location_granularity: f64,

    /// Where to write the diagnostics snapshot; None disables recording
    pub diagnostics_path: Option<PathBuf>,
}

/// Helper module for serializing Duration as seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            station_url: String::new(),
            node: NodeConfig::default(),
            auto_reconnect: true,
            ping_interval: Duration::from_secs(60),
            watchdog_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(120),
            ping_stale: Duration::from_secs(60),
            miss_limit: 3,
            grace_period: Duration::from_secs(5),
            reconnect_poll: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
            location_granularity: 0.01,
            diagnostics_path: None,
        }
    }
}

impl LinkConfig {
    pub fn builder() -> LinkConfigBuilder {
        LinkConfigBuilder::default()
    }
}

/// Builder for LinkConfig
#[derive(Default)]
pub struct LinkConfigBuilder {
    config: LinkConfig,
}

impl LinkConfigBuilder {
    pub fn station_url(mut self, url: impl Into<String>) -> Self {
        self.config.station_url = url.into();
        self
    }

    pub fn address_id(mut self, id: impl Into<String>) -> Self {
        self.config.node.address_id = id.into();
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.node.label = label.into();
        self
    }

    pub fn location(mut self, location: GeoPoint) -> Self {
        self.config.node.location = Some(location);
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    pub fn grace_period(mut self, period: Duration) -> Self {
        self.config.grace_period = period;
        self
    }

    pub fn diagnostics_path(mut self, path: PathBuf) -> Self {
        self.config.diagnostics_path = Some(path);
        self
    }

    pub fn build(self) -> Result<LinkConfig, String> {
        if self.config.station_url.is_empty() {
            return Err("station_url is required".to_string());
        }
        if self.config.node.address_id.is_empty() {
            return Err("node address_id is required".to_string());
        }
        if self.config.miss_limit == 0 {
            return Err("miss_limit must be at least 1".to_string());
        }
        if self.config.ping_interval.is_zero()
            || self.config.watchdog_interval.is_zero()
            || self.config.reconnect_poll.is_zero()
        {
            return Err("timer intervals must be non-zero".to_string());
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = LinkConfig::builder()
            .station_url("wss://station.example.org/link")
            .address_id("addr-1")
            .label("workbench")
            .build()
            .unwrap();

        assert_eq!(config.station_url, "wss://station.example.org/link");
        assert_eq!(config.node.address_id, "addr-1");
        assert_eq!(config.miss_limit, 3);
        assert!(config.auto_reconnect);
    }

    #[test]
    fn test_config_builder_missing_url() {
        let result = LinkConfig::builder().address_id("addr-1").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_builder_missing_address_id() {
        let result = LinkConfig::builder().station_url("wss://s").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = LinkConfig::builder()
            .station_url("wss://s")
            .address_id("a")
            .build()
            .unwrap();
        let yaml_like = serde_json::to_string(&config).unwrap();
        let parsed: LinkConfig = serde_json::from_str(&yaml_like).unwrap();
        assert_eq!(parsed.ping_interval, config.ping_interval);
        assert_eq!(parsed.station_url, config.station_url);
    }
}
