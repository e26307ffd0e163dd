use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::Deserialize;

const DEFAULT_ENV: &str = "local";
const ENV_VAR_NAME: &str = "BOOKSTORE_ENV";
const CONFIG_DIR_ENV: &str = "BOOKSTORE_CONFIG_DIR";
const ENV_PREFIX: &str = "BOOKSTORE";

/// Deployment environment the application is running in.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Staging,
    Production,
}

impl Environment {
    fn parse(name: &str) -> anyhow::Result<Self> {
        match name {
            "local" => Ok(Environment::Local),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(anyhow!(
                "unsupported environment '{}'; expected local/staging/production",
                other
            )),
        }
    }
}

/// Top-level configuration structure loaded from layered sources.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    #[serde(default)]
    pub order: OrderSettings,
}

impl Settings {
    /// Load configuration by layering `.env`, base file, environment overlay
    /// and `BOOKSTORE_*` variables.
    pub fn load() -> anyhow::Result<Self> {
        // Allow missing `.env` files without failing.
        let _ = dotenvy::dotenv();

        let environment = std::env::var(ENV_VAR_NAME).unwrap_or_else(|_| DEFAULT_ENV.to_string());
        let config_dir = match std::env::var(CONFIG_DIR_ENV) {
            Ok(dir) => PathBuf::from(dir),
            // Default to repo root `config` directory.
            Err(_) => std::env::current_dir()
                .context("unable to resolve current directory")?
                .join("config"),
        };

        Self::from_dir(&config_dir, &environment)
    }

    /// Layers `<config_dir>/base.toml`, `<config_dir>/<environment>.toml` and
    /// the process environment. Missing files are skipped.
    pub fn from_dir(config_dir: &Path, environment: &str) -> anyhow::Result<Self> {
        let parsed_environment = Environment::parse(environment)?;
        let base_path = config_dir.join("base.toml");
        let environment_path = config_dir.join(format!("{}.toml", environment));

        let builder = config::Config::builder()
            .add_source(config::File::from(base_path).required(false))
            .add_source(config::File::from(environment_path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let cfg = builder
            .build()
            .with_context(|| "failed to build configuration")?;

        let mut settings: Settings = cfg
            .try_deserialize()
            .with_context(|| "failed to deserialize configuration")?;
        settings.environment = parsed_environment;

        Ok(settings)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "ServerSettings::default_host")]
    pub host: String,
    #[serde(default = "ServerSettings::default_port")]
    pub port: u16,
    #[serde(default = "ServerSettings::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ServerSettings {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8080
    }

    fn default_request_timeout_ms() -> u64 {
        15000
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "DatabaseSettings::default_name")]
    pub name: String,
    /// How long a writer waits on a document locked by another transaction.
    #[serde(default = "DatabaseSettings::default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "DatabaseSettings::default_change_stream_capacity")]
    pub change_stream_capacity: usize,
    /// Empty and re-seed the collections on startup.
    #[serde(default)]
    pub reset_data: bool,
    #[serde(default = "DatabaseSettings::default_seed_dir")]
    pub seed_dir: PathBuf,
}

impl DatabaseSettings {
    fn default_name() -> String {
        "fantasy-bookstore".to_string()
    }

    fn default_lock_timeout_ms() -> u64 {
        500
    }

    fn default_change_stream_capacity() -> usize {
        1024
    }

    fn default_seed_dir() -> PathBuf {
        PathBuf::from("data")
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            lock_timeout_ms: Self::default_lock_timeout_ms(),
            change_stream_capacity: Self::default_change_stream_capacity(),
            reset_data: false,
            seed_dir: Self::default_seed_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default)]
    pub log_format: LogFormat,
    /// `tracing_subscriber::EnvFilter` directives; `RUST_LOG` wins when set.
    #[serde(default = "TelemetrySettings::default_log_filter")]
    pub log_filter: String,
}

impl TelemetrySettings {
    fn default_log_filter() -> String {
        "info".to_string()
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_filter: Self::default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Which purchase implementation serves order requests.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStrategy {
    /// Single conditional update, no transaction.
    #[default]
    Atomic,
    /// Explicit session with manual commit and abort.
    NativeTransaction,
    /// Unit of work run by the transaction template.
    ManagedTransaction,
    /// Async pipeline over the reactive client.
    ReactiveTransaction,
    /// Managed transaction retried on transient errors.
    RetryableTransaction,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OrderSettings {
    #[serde(default)]
    pub strategy: OrderStrategy,
    /// Log every order insert through the change stream observer.
    #[serde(default)]
    pub watch_changes: bool,
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "RetrySettings::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "RetrySettings::default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "RetrySettings::default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RetrySettings {
    fn default_max_attempts() -> u32 {
        3
    }

    fn default_base_delay_ms() -> u64 {
        10
    }

    fn default_max_delay_ms() -> u64 {
        100
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            base_delay_ms: Self::default_base_delay_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo_config_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config")
    }

    #[test]
    fn default_environment_is_local() {
        let settings = Settings::default();
        assert_eq!(settings.environment, Environment::Local);
    }

    #[test]
    fn defaults_use_the_atomic_strategy() {
        let settings = Settings::default();
        assert_eq!(settings.order.strategy, OrderStrategy::Atomic);
        assert_eq!(settings.order.retry.max_attempts, 3);
        assert_eq!(settings.database.lock_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn repository_config_files_parse() {
        let settings = Settings::from_dir(&repo_config_dir(), "local").unwrap();
        assert_eq!(settings.environment, Environment::Local);
        assert!(settings.database.reset_data);
        assert_eq!(settings.database.seed_dir, PathBuf::from("data"));
    }

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let settings = Settings::from_dir(Path::new("/nonexistent"), "staging").unwrap();
        assert_eq!(settings.environment, Environment::Staging);
        assert_eq!(settings.server.port, 8080);
    }

    #[test]
    fn unknown_environment_is_rejected() {
        let err = Settings::from_dir(&repo_config_dir(), "qa").unwrap_err();
        assert!(err.to_string().contains("unsupported environment 'qa'"));
    }

    #[test]
    fn strategy_names_are_kebab_case() {
        #[derive(Deserialize)]
        struct Holder {
            strategy: OrderStrategy,
        }
        let parsed: Holder =
            serde_json::from_str(r#"{"strategy":"retryable-transaction"}"#).unwrap();
        assert_eq!(parsed.strategy, OrderStrategy::RetryableTransaction);
    }
}
