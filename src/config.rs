//! Runtime configuration, read from TOML with secrets overridable from the environment.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::FixedOffset;
use serde::Deserialize;

use crate::backend::RestConfig;
use crate::enroll::EnrollSettings;
use crate::error::ConfigError;
use crate::scan::ScanSettings;
use crate::terminal::TerminalSettings;
use crate::worker::WorkerSettings;

pub const ENV_BACKEND_URL: &str = "ATTENDANCE_BACKEND_URL";
pub const ENV_API_KEY: &str = "ATTENDANCE_API_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub sensor: SensorConfig,
    pub serial: SerialConfig,
    pub timing: TimingConfig,
    pub network: NetworkConfig,
    pub clock: ClockConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub address: u32,
    pub password: u32,
    /// Number of library slots in use, counted from 1.
    pub capacity: u16,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            address: 0xffff_ffff,
            password: 0,
            capacity: 127,
        }
    }
}

/// Host serial ports, only read by the `attendance` binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub sensor_port: String,
    pub sensor_baud: u32,
    pub display_port: String,
    pub display_baud: u32,
    pub display_time: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            sensor_port: "/dev/ttyUSB0".into(),
            sensor_baud: 57_600,
            display_port: "/dev/ttyUSB1".into(),
            display_baud: 115_200,
            display_time: true,
        }
    }
}

/// Time-critical side, all in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_interval: u64,
    pub complete_dwell: u64,
    pub post_scan_cooldown: u64,
    pub slot_cooldown: u64,
    pub enroll_step_timeout: u64,
    pub enroll_ack_timeout: u64,
    pub command_retry_delay: u64,
    pub lock_timeout: u64,
    pub heartbeat_interval: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval: 100,
            complete_dwell: 800,
            post_scan_cooldown: 1_500,
            slot_cooldown: 3_000,
            enroll_step_timeout: 30_000,
            enroll_ack_timeout: 20_000,
            command_retry_delay: 60_000,
            lock_timeout: 20,
            heartbeat_interval: 7_000,
        }
    }
}

/// Network worker side, all in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub control_poll_interval: u64,
    pub identity_refresh_interval: u64,
    pub collection_refresh_interval: u64,
    pub reconnect_interval: u64,
    pub connect_wait: u64,
    pub busy_sleep: u64,
    pub idle_sleep: u64,
    pub offline_sleep: u64,
    pub clock_resync_interval: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            control_poll_interval: 5_000,
            identity_refresh_interval: 300_000,
            collection_refresh_interval: 60_000,
            reconnect_interval: 30_000,
            connect_wait: 20_000,
            busy_sleep: 50,
            idle_sleep: 250,
            offline_sleep: 1_000,
            clock_resync_interval: 3_600_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub utc_offset_seconds: i32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        // West Africa Time
        Self {
            utc_offset_seconds: 3_600,
        }
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        Ok(config)
    }

    /// Reads `path`, applies environment overrides and validates the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Some(url) = env_value(ENV_BACKEND_URL) {
            self.backend.base_url = url;
        }
        if let Some(key) = env_value(ENV_API_KEY) {
            self.backend.api_key = key;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.base_url is empty".into()));
        }
        if self.sensor.capacity == 0 {
            return Err(ConfigError::Invalid("sensor.capacity must be at least 1".into()));
        }
        if self.utc_offset().is_none() {
            return Err(ConfigError::Invalid(format!(
                "clock.utc_offset_seconds {} is out of range",
                self.clock.utc_offset_seconds
            )));
        }
        Ok(())
    }

    pub fn utc_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.clock.utc_offset_seconds)
    }

    pub fn rest(&self) -> RestConfig {
        RestConfig {
            base_url: self.backend.base_url.clone(),
            api_key: self.backend.api_key.clone(),
            connect_timeout: ms(self.backend.connect_timeout_ms),
            request_timeout: ms(self.backend.request_timeout_ms),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        ms(self.timing.lock_timeout)
    }

    pub fn scan(&self) -> ScanSettings {
        ScanSettings {
            capacity: self.sensor.capacity,
            complete_dwell: ms(self.timing.complete_dwell),
            post_scan_cooldown: ms(self.timing.post_scan_cooldown),
            slot_cooldown: ms(self.timing.slot_cooldown),
        }
    }

    pub fn enroll(&self) -> EnrollSettings {
        EnrollSettings {
            capacity: self.sensor.capacity,
            step_timeout: ms(self.timing.enroll_step_timeout),
            ack_timeout: ms(self.timing.enroll_ack_timeout),
            retry_delay: ms(self.timing.command_retry_delay),
        }
    }

    pub fn terminal(&self) -> TerminalSettings {
        TerminalSettings {
            poll_interval: ms(self.timing.poll_interval),
            heartbeat_interval: ms(self.timing.heartbeat_interval),
        }
    }

    pub fn worker(&self) -> WorkerSettings {
        let n = &self.network;
        WorkerSettings {
            control_poll_interval: ms(n.control_poll_interval),
            identity_refresh_interval: ms(n.identity_refresh_interval),
            collection_refresh_interval: ms(n.collection_refresh_interval),
            clock_resync_interval: ms(n.clock_resync_interval),
            reconnect_interval: ms(n.reconnect_interval),
            connect_wait: ms(n.connect_wait),
            busy_sleep: ms(n.busy_sleep),
            idle_sleep: ms(n.idle_sleep),
            offline_sleep: ms(n.offline_sleep),
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [backend]
            base_url = "https://example.supabase.co"
            api_key = "anon"

            [serial]
            sensor_port = "/dev/ttyAMA0"

            [timing]
            slot_cooldown = 5000
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan().slot_cooldown, Duration::from_secs(5));
        assert_eq!(config.scan().complete_dwell, Duration::from_millis(800));
        assert_eq!(config.sensor.capacity, 127);
        assert_eq!(config.serial.sensor_port, "/dev/ttyAMA0");
        assert_eq!(config.serial.sensor_baud, 57_600);
        assert_eq!(config.worker().control_poll_interval, Duration::from_secs(5));
        assert_eq!(config.utc_offset().unwrap().local_minus_utc(), 3600);
    }

    #[test]
    fn missing_backend_is_invalid() {
        let config = Config::default();
        match config.validate() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("base_url")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let mut config = Config::default();
        config.backend.base_url = "http://localhost".into();
        config.sensor.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        match Config::from_toml_str("[backend\nbase_url = 1") {
            Err(ConfigError::Parse(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
