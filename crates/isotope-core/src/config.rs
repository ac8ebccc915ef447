//! Connection configuration
//!
//! Everything the device layer supplies to a connection: where the board is,
//! which firmware it must at least run, and how long to wait for it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::firmware::FirmwareVersion;
use crate::protocol::{
    IsotopeError, Result, DEFAULT_BAUD_RATE, DEFAULT_BUSY_POLL_DELAY_MS,
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_READER_POLL_INTERVAL_MS, DEFAULT_RESPONSE_TIMEOUT_MS,
};

/// Oldest firmware this library talks to unless configured otherwise
pub const DEFAULT_MINIMUM_FIRMWARE: FirmwareVersion = FirmwareVersion::new(1, 0, 0);

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_response_timeout_ms() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_MS
}

fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_minimum_firmware() -> FirmwareVersion {
    DEFAULT_MINIMUM_FIRMWARE
}

fn default_reader_poll_interval_ms() -> u64 {
    DEFAULT_READER_POLL_INTERVAL_MS
}

fn default_busy_poll_delay_ms() -> u64 {
    DEFAULT_BUSY_POLL_DELAY_MS
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial device path (`/dev/ttyACM0`, `COM3`) or `tcp://host:port`
    #[serde(default)]
    pub address: String,
    /// Baud rate (serial devices only)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Response timeout in milliseconds
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Firmware floor checked during the handshake
    #[serde(default = "default_minimum_firmware")]
    pub minimum_firmware: FirmwareVersion,
    /// Read timeout of the background reader in milliseconds
    #[serde(default = "default_reader_poll_interval_ms")]
    pub reader_poll_interval_ms: u64,
    /// Grace period before a motor that has not reported completion is queried
    #[serde(default = "default_busy_poll_delay_ms")]
    pub busy_poll_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            minimum_firmware: DEFAULT_MINIMUM_FIRMWARE,
            reader_poll_interval_ms: DEFAULT_READER_POLL_INTERVAL_MS,
            busy_poll_delay_ms: DEFAULT_BUSY_POLL_DELAY_MS,
        }
    }
}

impl ConnectionConfig {
    /// Defaults for the board at `address`
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| IsotopeError::Config(e.to_string()))
    }

    /// Load a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| IsotopeError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
            .map_err(|e| IsotopeError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reader_poll_interval(&self) -> Duration {
        // A zero read timeout would make the reader spin
        Duration::from_millis(self.reader_poll_interval_ms.max(1))
    }

    pub fn busy_poll_delay(&self) -> Duration {
        Duration::from_millis(self.busy_poll_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::new("/dev/ttyACM0");
        assert_eq!(config.address, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.response_timeout(), Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(100));
        assert_eq!(config.minimum_firmware, FirmwareVersion::new(1, 0, 0));
        assert_eq!(config.busy_poll_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = ConnectionConfig::from_json_str(
            r#"{"address": "tcp://127.0.0.1:4000", "minimum_firmware": "1.1.0"}"#,
        )
        .unwrap();
        assert_eq!(
            config,
            ConnectionConfig {
                address: "tcp://127.0.0.1:4000".to_string(),
                minimum_firmware: FirmwareVersion::new(1, 1, 0),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let err = ConnectionConfig::from_json_str(r#"{"minimum_firmware": "one"}"#).unwrap_err();
        assert!(matches!(err, IsotopeError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"address": "COM3", "response_timeout_ms": 250}}"#).unwrap();

        let config = ConnectionConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.address, "COM3");
        assert_eq!(config.response_timeout(), Duration::from_millis(250));

        let missing = ConnectionConfig::from_json_file("/nonexistent/isotope.json");
        assert!(matches!(missing, Err(IsotopeError::Config(_))));
    }
}
