use serde::{Deserialize, Serialize};

use crate::configs::*;

pub const CONFIG_ENV: &str = "HANABI_CONFIG";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub fleet: FleetConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub logging: Option<LoggingConfig>,
}

use crate::common::types::AnyResult;

impl Config {
    pub fn load() -> AnyResult<Self> {
        let config_path = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => path,
            _ => {
                if std::path::Path::new("config.toml").exists() {
                    "config.toml".to_string()
                } else if std::path::Path::new("config.default.toml").exists() {
                    "config.default.toml".to_string()
                } else {
                    return Err("config.toml or config.default.toml not found".into());
                }
            }
        };

        crate::log_println!("Loading configuration from: {}", config_path);

        let config_str = std::fs::read_to_string(&config_path)?;
        if config_str.is_empty() {
            return Err(format!("{} is empty", config_path).into());
        }

        Self::parse(&config_str)
    }

    pub fn parse(raw: &str) -> AnyResult<Self> {
        let config: Config = toml::from_str(raw)?;
        config.fleet.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [server]
        host = "127.0.0.1"
        port = 8080
        password = "secret"

        [engine]
        host = "127.0.0.1"
        port = 2333
        password = "youshallnotpass"
        user_id = 1

        [fleet]
        name = "parent"
        role = "coordinator"

        [[fleet.peers]]
        name = "child-1"
        endpoint = "http://127.0.0.1:8081"
    "#;

    #[test]
    fn session_section_falls_back_to_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.session.max_volume, 100);
        assert_eq!(config.session.idle_timeout_secs, 300);
        assert_eq!(config.session.heartbeat_interval_secs, 5);
        assert_eq!(config.fleet.peers[0].transport, TransportKind::Http);
        assert!(config.logging.is_none());
    }

    #[test]
    fn duplicate_peer_names_are_rejected() {
        let raw = format!(
            "{}\n[[fleet.peers]]\nname = \"child-1\"\nendpoint = \"http://127.0.0.1:8082\"\n",
            MINIMAL
        );
        assert!(Config::parse(&raw).is_err());
    }
}
