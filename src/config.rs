use crate::error::{HeosError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Primary protocol port
pub const DEFAULT_PORT: u16 = 1255;

/// Telnet control port
pub const DEFAULT_TELNET_PORT: u16 = 23;

/// Floor for timers that drive a periodic task or a per-command deadline
pub const MIN_TIMER: Duration = Duration::from_millis(1);

/// Client configuration
///
/// Durations serialize as integer milliseconds; missing fields fall back to
/// the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeosConfig {
    /// Primary protocol port
    pub port: u16,

    /// Telnet sub-channel port
    pub telnet_port: u16,

    /// TCP connect timeout for the primary channel
    #[serde(with = "millis")]
    pub connect_timeout: Duration,

    /// How long a graceful close waits for the device to hang up
    #[serde(with = "millis")]
    pub close_timeout: Duration,

    /// How long a command may stay in flight without a response
    #[serde(with = "millis")]
    pub command_timeout: Duration,

    /// Liveness probe period
    #[serde(with = "millis")]
    pub watchdog_interval: Duration,

    /// TCP connect timeout for the telnet channel
    #[serde(with = "millis")]
    pub telnet_connect_timeout: Duration,

    /// How long a telnet write waits for a reply before assuming success
    #[serde(with = "millis")]
    pub telnet_ack_delay: Duration,

    /// Notification channel capacity
    pub event_capacity: usize,
}

impl Default for HeosConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            telnet_port: DEFAULT_TELNET_PORT,
            connect_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(2),
            command_timeout: Duration::from_secs(5),
            watchdog_interval: Duration::from_secs(10),
            telnet_connect_timeout: Duration::from_secs(1),
            telnet_ack_delay: Duration::from_millis(200),
            event_capacity: 100,
        }
    }
}

impl HeosConfig {
    /// Parse a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject timers that cannot drive a deadline or an interval
    pub fn validate(&self) -> Result<()> {
        let timers = [
            ("command_timeout", self.command_timeout),
            ("watchdog_interval", self.watchdog_interval),
            ("telnet_ack_delay", self.telnet_ack_delay),
        ];
        match timers.iter().find(|(_, value)| value.is_zero()) {
            Some((name, _)) => Err(HeosError::InvalidArgument(format!(
                "{} must be non-zero",
                name
            ))),
            None => Ok(()),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_telnet_port(mut self, port: u16) -> Self {
        self.telnet_port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout.max(MIN_TIMER);
        self
    }

    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval.max(MIN_TIMER);
        self
    }

    pub fn with_telnet_ack_delay(mut self, delay: Duration) -> Self {
        self.telnet_ack_delay = delay.max(MIN_TIMER);
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
