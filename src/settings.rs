use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

const ENV_PREFIX: &str = "BOOKSTORE";

/// Selects the `<env>.toml` overlay in the config directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Environment {
    #[default]
    Dev,
    Prod,
    Test,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
            Environment::Test => "test",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// Layers `.env`, `base.toml`, `<env>.toml` and `BOOKSTORE_*` variables, in that order.
    pub fn load(environment: Environment, config_dir: &Path) -> anyhow::Result<Self> {
        // A missing `.env` is fine.
        let _ = dotenvy::dotenv();

        let settings: Settings = config::Config::builder()
            .add_source(config::File::from(config_dir.join("base.toml")).required(false))
            .add_source(
                config::File::from(config_dir.join(format!("{}.toml", environment.as_str())))
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        settings.check()?;
        Ok(settings)
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.database.max_open_connections == 0 {
            bail!("database.max_open_connections must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "ServerSettings::default_host")]
    pub host: String,
    #[serde(default = "ServerSettings::default_port")]
    pub port: u16,
}

impl ServerSettings {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_port() -> u16 {
        3000
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Full connection string; when set, the individual parts below are ignored.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "DatabaseSettings::default_host")]
    pub host: String,
    #[serde(default = "DatabaseSettings::default_port")]
    pub port: u16,
    #[serde(default = "DatabaseSettings::default_user")]
    pub user: String,
    #[serde(default = "DatabaseSettings::default_password")]
    pub password: String,
    #[serde(default = "DatabaseSettings::default_dbname")]
    pub dbname: String,
    #[serde(default = "DatabaseSettings::default_max_open_connections")]
    pub max_open_connections: u32,
    #[serde(default = "DatabaseSettings::default_max_idle_connections")]
    pub max_idle_connections: u32,
    #[serde(default = "DatabaseSettings::default_max_conn_idle_time_secs")]
    pub max_conn_idle_time_secs: u64,
    #[serde(default = "DatabaseSettings::default_run_migrations")]
    pub run_migrations: bool,
}

impl DatabaseSettings {
    fn default_host() -> String {
        "localhost".to_string()
    }

    fn default_port() -> u16 {
        5432
    }

    fn default_user() -> String {
        "postgres".to_string()
    }

    fn default_password() -> String {
        "postgres".to_string()
    }

    fn default_dbname() -> String {
        "bookstore".to_string()
    }

    fn default_max_open_connections() -> u32 {
        10
    }

    fn default_max_idle_connections() -> u32 {
        2
    }

    fn default_max_conn_idle_time_secs() -> u64 {
        300
    }

    fn default_run_migrations() -> bool {
        true
    }

    pub fn connection_string(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.dbname
            ),
        }
    }

    pub fn max_conn_idle_time(&self) -> Duration {
        Duration::from_secs(self.max_conn_idle_time_secs)
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            host: Self::default_host(),
            port: Self::default_port(),
            user: Self::default_user(),
            password: Self::default_password(),
            dbname: Self::default_dbname(),
            max_open_connections: Self::default_max_open_connections(),
            max_idle_connections: Self::default_max_idle_connections(),
            max_conn_idle_time_secs: Self::default_max_conn_idle_time_secs(),
            run_migrations: Self::default_run_migrations(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    #[serde(default = "LogSettings::default_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl LogSettings {
    fn default_filter() -> String {
        "bookstore_api=info,tower_http=info".to_string()
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: Self::default_filter(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
