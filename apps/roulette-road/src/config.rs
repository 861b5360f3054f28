use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_host: String,
    pub port: u16,
    pub queue_timeout_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind_host: lookup("BIND_HOST").unwrap_or(defaults.bind_host),
            port: lookup("SERVER_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            queue_timeout_seconds: lookup("QUEUE_TIMEOUT_SECS")
                .and_then(|t| t.parse().ok())
                .filter(|t| *t > 0)
                .unwrap_or(defaults.queue_timeout_seconds),
            shutdown_grace_seconds: lookup("SHUTDOWN_GRACE_SECS")
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.shutdown_grace_seconds),
            log_format: match lookup("LOG_FORMAT") {
                Some(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => defaults.log_format,
            },
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 5000,
            queue_timeout_seconds: 300, // 5 minutes
            shutdown_grace_seconds: 2,
            log_format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test_timeout::timeout]
    fn defaults_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.listen_addr(), "0.0.0.0:5000");
        assert_eq!(config.queue_timeout(), Duration::from_secs(300));
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test_timeout::timeout]
    fn reads_overrides() {
        let config = config_from(&[
            ("SERVER_PORT", "9000"),
            ("BIND_HOST", "127.0.0.1"),
            ("QUEUE_TIMEOUT_SECS", "30"),
            ("LOG_FORMAT", "JSON"),
        ]);
        assert_eq!(config.listen_addr(), "127.0.0.1:9000");
        assert_eq!(config.queue_timeout(), Duration::from_secs(30));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test_timeout::timeout]
    fn ignores_unparseable_values() {
        let config = config_from(&[("SERVER_PORT", "http"), ("QUEUE_TIMEOUT_SECS", "0")]);
        assert_eq!(config.port, 5000);
        assert_eq!(config.queue_timeout_seconds, 300);
    }
}
