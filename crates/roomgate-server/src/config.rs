//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use roomgate_core::MODERATOR_POWER_LEVEL;
use roomgate_db_postgres::PostgresConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub yivi: YiviConfig,
    #[serde(default)]
    pub rooms: RoomsConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8008,
        }
    }
}

/// Disclosure Provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YiviConfig {
    /// Base URL of the Yivi server this core proxies to. May be private.
    pub disclosure_url: String,
    /// Public base URL of this server, used to rewrite session callback URLs
    /// so clients route through the proxy.
    pub public_url: String,
    /// Timeout for session-start and result calls to the provider.
    pub request_timeout_ms: u64,
}

impl Default for YiviConfig {
    fn default() -> Self {
        Self {
            disclosure_url: "http://localhost:8089".into(),
            public_url: "http://localhost:8008".into(),
            request_timeout_ms: 10_000,
        }
    }
}

/// Room Service settings: where the chat backend lives and how this core
/// identifies itself against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    pub base_url: String,
    pub access_token: String,
    /// Client URL used in the `goto` link handed out after admission.
    pub client_url: String,
    /// Principal that posts audit notices into rooms; granted an elevated
    /// power level in every secured room.
    pub notices_user: String,
    pub moderator_power_level: i64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            access_token: String::new(),
            client_url: "http://localhost:8801".into(),
            notices_user: "@notices:hub".into(),
            moderator_power_level: MODERATOR_POWER_LEVEL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Seconds between sweep cycles. Production default is one day; test
    /// configurations may use seconds.
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 86_400,
        }
    }
}

/// Which storage backend to use.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "backend")]
pub enum StorageConfig {
    /// Volatile in-process storage; development only.
    #[default]
    Memory,
    Postgres(PostgresConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl AppConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<AppConfig> {
        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&raw)?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.yivi.disclosure_url.is_empty() {
            return Err("yivi.disclosure_url must be set".into());
        }
        if self.yivi.public_url.is_empty() {
            return Err("yivi.public_url must be set".into());
        }
        if self.yivi.request_timeout_ms == 0 {
            return Err("yivi.request_timeout_ms must be > 0".into());
        }
        if self.sweeper.interval_secs == 0 {
            return Err("sweeper.interval_secs must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert_eq!(AppConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_zero_sweep_interval() {
        let mut config = AppConfig::default();
        config.sweeper.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_a_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roomgate.toml");
        std::fs::write(
            &path,
            r#"
            [server]
            port = 9100

            [yivi]
            disclosure_url = "http://yivi:8089/irma"
            public_url = "https://hub.example"
            request_timeout_ms = 5000

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.server.port, 9100);
        // Fields absent from a partial section keep their defaults.
        assert_eq!(config.server.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.yivi.public_url, "https://hub.example");
        assert_eq!(config.logging.level, "debug");
        assert!(matches!(config.storage, StorageConfig::Memory));
    }

    #[test]
    fn partial_sections_fall_back_to_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [rooms]
            access_token = "secret"

            [storage]
            backend = "postgres"
            url = "postgres://db.internal/roomgate"
            "#,
        )
        .unwrap();
        assert_eq!(config.rooms.access_token, "secret");
        assert_eq!(config.rooms.moderator_power_level, MODERATOR_POWER_LEVEL);
        assert_eq!(config.sweeper.interval_secs, 86_400);
        match config.storage {
            StorageConfig::Postgres(pg) => {
                assert_eq!(pg.url, "postgres://db.internal/roomgate");
                assert_eq!(pg.pool_size, 10);
            }
            StorageConfig::Memory => panic!("expected the postgres backend"),
        }
    }

    #[test]
    fn parses_postgres_backend_from_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [storage]
            backend = "postgres"
            url = "postgres://localhost/roomgate"
            pool_size = 5
            connect_timeout_ms = 5000
            run_migrations = true

            [sweeper]
            interval_secs = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.sweeper.interval_secs, 2);
        assert!(matches!(config.storage, StorageConfig::Postgres(_)));
    }
}
