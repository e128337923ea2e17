use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            engine: EngineConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

pub const DEFAULT_ORGANIZATION_APPLICATION_LIMIT: usize = 2;
pub const DEFAULT_COUNTER_RETRIES: u32 = 8;
pub const DEFAULT_RESUBSCRIBE_DELAY_MS: u64 = 250;

/// Knobs for the application and matching engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Live course applications a candidate may hold with one organization.
    pub organization_application_limit: usize,
    /// Compare-and-set attempts on an opportunity counter before giving up with a conflict.
    pub counter_retries: u32,
    pub resubscribe_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            organization_application_limit: DEFAULT_ORGANIZATION_APPLICATION_LIMIT,
            counter_retries: DEFAULT_COUNTER_RETRIES,
            resubscribe_delay: Duration::from_millis(DEFAULT_RESUBSCRIBE_DELAY_MS),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let organization_application_limit = parse_var(
            "CAREERLINK_ORG_APPLICATION_LIMIT",
            DEFAULT_ORGANIZATION_APPLICATION_LIMIT,
        )?;
        if organization_application_limit == 0 {
            return Err(ConfigError::InvalidNumber {
                name: "CAREERLINK_ORG_APPLICATION_LIMIT",
            });
        }

        let counter_retries = parse_var("CAREERLINK_COUNTER_RETRIES", DEFAULT_COUNTER_RETRIES)?;
        let delay_ms = parse_var(
            "CAREERLINK_RESUBSCRIBE_DELAY_MS",
            DEFAULT_RESUBSCRIBE_DELAY_MS,
        )?;

        Ok(Self {
            organization_application_limit,
            counter_retries: counter_retries.max(1),
            resubscribe_delay: Duration::from_millis(delay_ms),
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { name }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { name: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { name } => {
                write!(f, "{name} must be a positive integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");
        env::remove_var("APP_LOG_LEVEL");
        env::remove_var("CAREERLINK_ORG_APPLICATION_LIMIT");
        env::remove_var("CAREERLINK_COUNTER_RETRIES");
        env::remove_var("CAREERLINK_RESUBSCRIBE_DELAY_MS");
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.engine.organization_application_limit, 2);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn engine_settings_read_from_env() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("CAREERLINK_ORG_APPLICATION_LIMIT", "3");
        env::set_var("CAREERLINK_COUNTER_RETRIES", "0");
        env::set_var("CAREERLINK_RESUBSCRIBE_DELAY_MS", "10");
        let engine = EngineConfig::from_env().expect("engine config loads");
        assert_eq!(engine.organization_application_limit, 3);
        assert_eq!(engine.counter_retries, 1);
        assert_eq!(engine.resubscribe_delay, Duration::from_millis(10));
        reset_env();
    }

    #[test]
    fn rejects_non_numeric_engine_settings() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("CAREERLINK_COUNTER_RETRIES", "many");
        match EngineConfig::from_env() {
            Err(ConfigError::InvalidNumber { name }) => {
                assert_eq!(name, "CAREERLINK_COUNTER_RETRIES")
            }
            other => panic!("expected invalid number, got {other:?}"),
        }
        reset_env();
    }
}
