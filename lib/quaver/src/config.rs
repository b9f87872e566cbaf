use crate::error::ConfigError;
use crate::net::resolve;
use flint::logging;
use flint::logging::LoggerConfig;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SERVICE: &str = "_spotify-client._tcp.spotify.com";
pub const DEFAULT_MAX_CHANNELS: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// SRV name queried for access points.
    pub service: String,
    /// Explicit `host:port` access points, tried instead of the SRV lookup when present.
    pub servers: Vec<String>,
    pub client_revision: u32,
    /// Sent big endian in the client hello.
    pub client_id: u32,
    pub connect_timeout_ms: u64,
    pub connect_slice_ms: u64,
    pub handshake_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Retry delay of a request whose channel failed.
    pub retry_interval_secs: u64,
    /// Retry delay of a request that found every channel slot taken.
    pub backoff_ms: u64,
    pub max_channels: usize,
}

impl Default for SessionConfig {
    fn default() -> SessionConfig {
        SessionConfig {
            service: DEFAULT_SERVICE.to_string(),
            servers: Vec::new(),
            client_revision: 99_999,
            client_id: 0x0104_0101,
            connect_timeout_ms: 3000,
            connect_slice_ms: 200,
            handshake_timeout_ms: 10_000,
            poll_interval_ms: 100,
            retry_interval_secs: 30,
            backoff_ms: 500,
            max_channels: DEFAULT_MAX_CHANNELS,
        }
    }
}

impl SessionConfig {
    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[inline]
    pub fn connect_slice(&self) -> Duration {
        Duration::from_millis(self.connect_slice_ms)
    }

    #[inline]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[inline]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    #[inline]
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(server) = self
            .servers
            .iter()
            .find(|server| resolve::parse_server(server).is_none())
        {
            return Err(ConfigError::InvalidServer(server.clone()));
        }

        if self.servers.is_empty() && self.service.is_empty() {
            return Err(ConfigError::InvalidSetting("service"));
        }

        if self.max_channels == 0 || self.max_channels > u16::MAX as usize {
            return Err(ConfigError::InvalidSetting("max_channels"));
        }

        if self.connect_slice_ms == 0 || self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidSetting("poll intervals"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default = "logging::default_config")]
    pub log: LoggerConfig,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            session: SessionConfig::default(),
            log: logging::default_config(),
        }
    }
}

impl ClientConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ClientConfig, ConfigError> {
        let config: ClientConfig = serdeconv::from_toml_file(path)?;
        config.session.validate()?;
        Ok(config)
    }

    pub fn parse(toml: &str) -> Result<ClientConfig, ConfigError> {
        let config: ClientConfig = serdeconv::from_toml_str(toml)?;
        config.session.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        serdeconv::to_toml_file(self, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();

        assert_eq!(config.session.service, DEFAULT_SERVICE);
        assert_eq!(config.session.max_channels, 16);
        assert_eq!(config.session.connect_slice(), Duration::from_millis(200));
        assert!(config.session.validate().is_ok());
    }

    #[test]
    fn test_parse_partial() {
        let config = ClientConfig::parse(
            r#"
[session]
servers = ["127.0.0.1:4070"]
retry_interval_secs = 60

[log]
type = "null"
"#,
        )
        .unwrap();

        assert_eq!(config.session.servers, vec!["127.0.0.1:4070".to_string()]);
        assert_eq!(config.session.retry_interval(), Duration::from_secs(60));
        assert_eq!(config.session.backoff_ms, 500);
    }

    #[test]
    fn test_parse_empty() {
        let config = ClientConfig::parse("").unwrap();

        assert_eq!(config.session.handshake_timeout_ms, 10_000);
    }

    #[test]
    fn test_invalid_server() {
        let result = ClientConfig::parse(
            r#"
[session]
servers = ["nowhere"]
"#,
        );

        match result {
            Err(ConfigError::InvalidServer(server)) => assert_eq!(server, "nowhere"),
            other => panic!("Unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_channel_limit() {
        let mut config = SessionConfig::default();
        config.max_channels = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("quaver-config-{}.toml", std::process::id()));

        let mut config = ClientConfig::default();
        config.session.servers.push("ap.example.com:443".to_string());
        config.save(&path).unwrap();

        let loaded = ClientConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.session.servers, config.session.servers);
        assert_eq!(loaded.session.client_id, config.session.client_id);
    }
}
