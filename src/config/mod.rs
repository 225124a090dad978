use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ProctorError, Result};

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_SCHEDULER_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub presence: PresenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// JSON file of exam sessions loaded into the in-memory store at startup
    pub seed_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// `None` disables heartbeat expiry entirely
    pub heartbeat_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = parse_or(&lookup, "SERVER_PORT", DEFAULT_PORT)?;

        let interval_secs =
            parse_or(&lookup, "SCHEDULER_INTERVAL_SECS", DEFAULT_SCHEDULER_INTERVAL_SECS)?;
        if interval_secs == 0 {
            return Err(ProctorError::InvalidConfiguration(
                "SCHEDULER_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        let timeout_secs: u64 = parse_or(&lookup, "HEARTBEAT_TIMEOUT_SECS", 0)?;

        let raw_format = lookup("LOG_FORMAT").map(|v| v.trim().to_lowercase());
        let format = match raw_format.as_deref() {
            None | Some("") | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ProctorError::InvalidConfiguration(format!(
                    "LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port,
            },
            scheduler: SchedulerConfig {
                interval: Duration::from_secs(interval_secs),
                seed_path: lookup("EXAM_SEED_PATH")
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from),
            },
            presence: PresenceConfig {
                heartbeat_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            },
            logging: LoggingConfig { format },
        })
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ProctorError::InvalidConfiguration(format!("{} has invalid value '{}'", key, raw))
        }),
    }
}
