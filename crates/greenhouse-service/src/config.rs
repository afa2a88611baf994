//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use greenhouse_core::transport::{DEFAULT_BAUD_RATE, DEFAULT_PORT_PATTERNS};
use greenhouse_core::{ConnectOptions, EngineOptions, ReconnectOptions, SerialProvider};
use greenhouse_types::{Metric, Reading};
use serde::{Deserialize, Serialize};

/// Environment variable that overrides `influxdb.token`.
pub const INFLUX_TOKEN_ENV: &str = "GREENHOUSE_INFLUX_TOKEN";

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Controller discovery and link settings.
    pub serial: SerialConfig,
    /// Initial values of the simulator.
    pub simulation: SimulationConfig,
    /// History settings.
    pub history: HistoryConfig,
    /// Automatic reconnection.
    pub reconnect: ReconnectConfig,
    /// Durable storage in InfluxDB.
    pub influxdb: InfluxDbConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Apply environment overrides (currently only the InfluxDB token).
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var(INFLUX_TOKEN_ENV)
            && !token.is_empty()
        {
            self.influxdb.token = Some(token);
        }
    }

    /// Validate the configuration and return any errors.
    ///
    /// # Example
    ///
    /// ```
    /// use greenhouse_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.serial.validate());
        errors.extend(self.simulation.validate());
        errors.extend(self.history.validate());
        errors.extend(self.reconnect.validate());
        errors.extend(self.influxdb.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Engine options described by this configuration.
    pub fn engine_options(&self) -> EngineOptions {
        let mut options = EngineOptions::default()
            .hardware(self.serial.enabled)
            .connect(self.serial.connect_options())
            .read_poll(Duration::from_millis(self.serial.read_poll_ms))
            .initial(self.simulation.initial())
            .backfill(self.history.backfill);
        if let Some(seed) = self.simulation.seed {
            options = options.seed(seed);
        }
        options
    }

    /// Serial provider described by this configuration.
    pub fn serial_provider(&self) -> SerialProvider {
        SerialProvider::new().baud_rate(self.serial.baud_rate)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            )),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!("invalid port '{}': must be a number 1-65535", port),
                )),
                Ok(_) => {}
            },
        }

        errors
    }
}

/// Controller link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Look for a controller at all.
    pub enabled: bool,
    /// Baud rate of the controller firmware.
    pub baud_rate: u32,
    /// Case-insensitive endpoint name fragments.
    pub port_patterns: Vec<String>,
    /// Wait after opening a port before the handshake.
    pub settle_ms: u64,
    /// How long to wait for the status reply.
    pub handshake_timeout_ms: u64,
    /// Input check interval during the handshake.
    pub handshake_poll_ms: u64,
    /// Idle poll interval of the ingestor.
    pub read_poll_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            baud_rate: DEFAULT_BAUD_RATE,
            port_patterns: DEFAULT_PORT_PATTERNS.iter().map(|p| p.to_string()).collect(),
            settle_ms: 3000,
            handshake_timeout_ms: 5000,
            handshake_poll_ms: 100,
            read_poll_ms: 100,
        }
    }
}

impl SerialConfig {
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::new()
            .port_patterns(self.port_patterns.iter().cloned())
            .settle(Duration::from_millis(self.settle_ms))
            .handshake_timeout(Duration::from_millis(self.handshake_timeout_ms))
            .poll_interval(Duration::from_millis(self.handshake_poll_ms))
    }

    /// Validate serial configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.baud_rate == 0 {
            errors.push(ValidationError::new(
                "serial.baud_rate",
                "baud rate must be > 0",
            ));
        }
        if self.enabled && self.port_patterns.iter().all(|p| p.trim().is_empty()) {
            errors.push(ValidationError::new(
                "serial.port_patterns",
                "at least one port pattern is required when serial is enabled",
            ));
        }
        if self.handshake_poll_ms == 0 {
            errors.push(ValidationError::new(
                "serial.handshake_poll_ms",
                "handshake poll interval must be > 0",
            ));
        } else if self.handshake_timeout_ms < self.handshake_poll_ms {
            errors.push(ValidationError::new(
                "serial.handshake_timeout_ms",
                format!(
                    "handshake timeout {}ms is shorter than the poll interval {}ms",
                    self.handshake_timeout_ms, self.handshake_poll_ms
                ),
            ));
        }
        if self.read_poll_ms == 0 {
            errors.push(ValidationError::new(
                "serial.read_poll_ms",
                "read poll interval must be > 0",
            ));
        }

        errors
    }
}

/// Simulator starting point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub temperature: f64,
    pub humidity: f64,
    pub power: f64,
    pub soil: f64,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let initial = Reading::default();
        Self {
            temperature: initial.temperature,
            humidity: initial.humidity,
            power: initial.power,
            soil: initial.soil,
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn initial(&self) -> Reading {
        Reading {
            temperature: self.temperature,
            humidity: self.humidity,
            power: self.power,
            soil: self.soil,
            ..Reading::default()
        }
    }

    /// Validate simulation configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let initial = self.initial();
        Metric::CORE
            .iter()
            .filter_map(|&metric| {
                let value = initial.get(metric)?;
                if metric.contains(value) {
                    return None;
                }
                let (min, max) = metric.bounds();
                Some(ValidationError::new(
                    format!("simulation.{}", metric),
                    format!("{} is outside {}..={}", value, min, max),
                ))
            })
            .collect()
    }
}

/// History recording configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Seconds between recorded points.
    pub record_interval_secs: u64,
    /// Seed the history with a day of hourly points at startup.
    pub backfill: bool,
}

/// Minimum history interval in seconds.
pub const MIN_RECORD_INTERVAL: u64 = 10;

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            record_interval_secs: 3600,
            backfill: true,
        }
    }
}

impl HistoryConfig {
    pub fn record_interval(&self) -> Duration {
        Duration::from_secs(self.record_interval_secs)
    }

    /// Validate history configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.record_interval_secs < MIN_RECORD_INTERVAL {
            errors.push(ValidationError::new(
                "history.record_interval_secs",
                format!(
                    "record interval {} is too short (minimum {} seconds)",
                    self.record_interval_secs, MIN_RECORD_INTERVAL
                ),
            ));
        }
        errors
    }
}

/// Automatic reconnection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Retry in the background after the controller is lost.
    pub auto: bool,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Attempts before giving up; 0 retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let defaults = ReconnectOptions::default();
        Self {
            auto: true,
            initial_delay_secs: defaults.initial_delay.as_secs(),
            max_delay_secs: defaults.max_delay.as_secs(),
            max_attempts: defaults.max_attempts.unwrap_or(0),
        }
    }
}

impl ReconnectConfig {
    pub fn options(&self) -> ReconnectOptions {
        let options = ReconnectOptions::unlimited()
            .initial_delay(Duration::from_secs(self.initial_delay_secs))
            .max_delay(Duration::from_secs(self.max_delay_secs));
        if self.max_attempts > 0 {
            options.max_attempts(self.max_attempts)
        } else {
            options
        }
    }

    /// Validate reconnect configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        match self.options().validate() {
            Ok(()) => Vec::new(),
            Err(e) => vec![ValidationError::new("reconnect", e.to_string())],
        }
    }
}

/// InfluxDB sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxDbConfig {
    pub enabled: bool,
    /// Server URL (e.g., "http://localhost:8086").
    pub url: String,
    pub org: String,
    pub bucket: String,
    /// API token; `GREENHOUSE_INFLUX_TOKEN` takes precedence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Batches held while the writer is busy; further batches are dropped.
    pub buffer: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for InfluxDbConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:8086".to_string(),
            org: "greenhouse".to_string(),
            bucket: "smart_greenhouse".to_string(),
            token: None,
            buffer: 64,
            timeout_secs: 10,
        }
    }
}

impl InfluxDbConfig {
    /// Validate InfluxDB configuration. Only checked when enabled.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !self.enabled {
            return errors;
        }

        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            errors.push(ValidationError::new(
                "influxdb.url",
                format!("invalid URL '{}': must start with http:// or https://", self.url),
            ));
        }
        if self.org.is_empty() {
            errors.push(ValidationError::new("influxdb.org", "org cannot be empty"));
        }
        if self.bucket.is_empty() {
            errors.push(ValidationError::new(
                "influxdb.bucket",
                "bucket cannot be empty",
            ));
        }
        if self.buffer == 0 {
            errors.push(ValidationError::new("influxdb.buffer", "buffer must be > 0"));
        }
        if self.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "influxdb.timeout_secs",
                "timeout must be > 0",
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `influxdb.url`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("greenhouse")
        .join("server.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert!(config.serial.enabled);
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.history.record_interval_secs, 3600);
        assert!(!config.influxdb.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_full_toml() {
        let toml = r#"
            [server]
            bind = "0.0.0.0:8000"

            [serial]
            enabled = true
            baud_rate = 115200
            port_patterns = ["ttyACM"]
            settle_ms = 2000

            [simulation]
            temperature = 20.0
            seed = 42

            [history]
            record_interval_secs = 600
            backfill = false

            [reconnect]
            auto = false
            max_attempts = 0

            [influxdb]
            enabled = true
            url = "http://influx:8086"
            org = "iotctd"
            bucket = "smart_greenhouse"
            token = "secret"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8000");
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.serial.port_patterns, vec!["ttyACM"]);
        assert_eq!(config.serial.handshake_timeout_ms, 5000);
        assert_eq!(config.simulation.temperature, 20.0);
        assert_eq!(config.simulation.humidity, 58.0);
        assert_eq!(config.simulation.seed, Some(42));
        assert_eq!(config.history.record_interval_secs, 600);
        assert!(!config.reconnect.auto);
        assert_eq!(config.influxdb.org, "iotctd");
        assert_eq!(config.influxdb.token.as_deref(), Some("secret"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_options_from_config() {
        let mut config = Config::default();
        config.serial.enabled = false;
        config.serial.settle_ms = 0;
        config.simulation.soil = 60.0;
        config.simulation.seed = Some(3);

        let options = config.engine_options();
        assert!(!options.hardware);
        assert_eq!(options.connect.settle, Duration::ZERO);
        assert_eq!(options.initial.soil, 60.0);
        assert_eq!(options.initial.temperature, 23.5);
        assert_eq!(options.seed, Some(3));
        assert!(options.backfill);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_reconnect_options_from_config() {
        let config = ReconnectConfig {
            auto: true,
            initial_delay_secs: 2,
            max_delay_secs: 30,
            max_attempts: 0,
        };
        let options = config.options();
        assert_eq!(options.max_attempts, None);
        assert_eq!(options.initial_delay, Duration::from_secs(2));
        assert_eq!(options.delay_for_attempt(10), Duration::from_secs(30));

        let limited = ReconnectConfig {
            max_attempts: 3,
            ..config
        };
        assert_eq!(limited.options().max_attempts, Some(3));
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("server.toml");

        let mut config = Config::default();
        config.server.bind = "0.0.0.0:9090".to_string();
        config.serial.port_patterns = vec!["usbmodem".to_string()];
        config.influxdb.enabled = true;

        config.save(&config_path).unwrap();
        let loaded = Config::load_validated(&config_path).unwrap();

        assert_eq!(loaded.server.bind, "0.0.0.0:9090");
        assert_eq!(loaded.serial.port_patterns, vec!["usbmodem"]);
        assert!(loaded.influxdb.enabled);
        assert_eq!(loaded.influxdb.token, None);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid { toml").unwrap();

        let result = Config::load(&config_path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_bind_address() {
        let mut server = ServerConfig::default();
        server.bind = "localhost".to_string();
        assert_eq!(server.validate().len(), 1);

        server.bind = "localhost:0".to_string();
        assert!(server.validate()[0].message.contains("cannot be 0"));

        server.bind = "localhost:http".to_string();
        assert!(server.validate()[0].message.contains("invalid port"));

        server.bind = String::new();
        assert!(server.validate()[0].message.contains("empty"));
    }

    #[test]
    fn test_validate_serial() {
        let serial = SerialConfig {
            baud_rate: 0,
            port_patterns: vec![],
            handshake_timeout_ms: 50,
            handshake_poll_ms: 100,
            read_poll_ms: 0,
            ..Default::default()
        };
        let fields: Vec<_> = serial.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "serial.baud_rate",
                "serial.port_patterns",
                "serial.handshake_timeout_ms",
                "serial.read_poll_ms",
            ]
        );

        let disabled = SerialConfig {
            enabled: false,
            port_patterns: vec![],
            ..Default::default()
        };
        assert!(disabled.validate().is_empty());
    }

    #[test]
    fn test_validate_simulation_bounds() {
        let simulation = SimulationConfig {
            temperature: 60.0,
            soil: -1.0,
            ..Default::default()
        };
        let errors = simulation.validate();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "simulation.temperature");
        assert_eq!(errors[1].field, "simulation.soil");
    }

    #[test]
    fn test_validate_influxdb_only_when_enabled() {
        let mut influx = InfluxDbConfig {
            url: "localhost:8086".to_string(),
            bucket: String::new(),
            ..Default::default()
        };
        assert!(influx.validate().is_empty());

        influx.enabled = true;
        let fields: Vec<_> = influx.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["influxdb.url", "influxdb.bucket"]);
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.server.bind = "nope".to_string();
        config.history.record_interval_secs = 1;
        config.reconnect.initial_delay_secs = 0;

        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 3);

        let display = ConfigError::Validation(errors).to_string();
        assert!(display.contains("server.bind"));
        assert!(display.contains("history.record_interval_secs"));
        assert!(display.contains("reconnect"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("greenhouse/server.toml"));
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::Read {
            path: PathBuf::from("/test/path"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let display = format!("{}", error);
        assert!(display.contains("/test/path"));
        assert!(display.contains("not found"));
    }
}
