use config::{builder::DefaultState, ConfigBuilder, ConfigError, Environment, File, Source};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

/// Deployment stage; selects the config file and the log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl AppEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnvironment::Development => "development",
            AppEnvironment::Staging => "staging",
            AppEnvironment::Production => "production",
        }
    }
}

impl fmt::Display for AppEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub api_version: String,
    pub environment: AppEnvironment,
    #[serde(default)]
    pub ledger: ledger_core::Config,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl Settings {
    /// Defaults, then `config/{environment}` or `CONFIG_FILE`, then
    /// `WALLET_API__*` variables, then `DATABASE_URL` and `PORT`.
    ///
    /// `ENVIRONMENT` picks the file and is the fallback stage; the file
    /// and `WALLET_API__ENVIRONMENT` may still override the stage.
    pub fn load() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let file = env::var("CONFIG_FILE").unwrap_or_else(|_| format!("config/{}", environment));

        let mut builder = layered(
            &environment,
            File::with_name(&file).required(false),
            Environment::with_prefix("WALLET_API")
                .separator("__")
                .try_parsing(true),
        )?;

        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("ledger.database_url", db_url)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.server.workers == 0 {
            return Err("Server workers must be at least 1".to_string());
        }

        let version = self.api_version.trim();
        if version.is_empty() || version.contains('/') {
            return Err(format!("Invalid api_version: {:?}", self.api_version));
        }

        self.ledger.validate().map_err(|e| e.to_string())
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }
}

/// Defaults with `environment` as the fallback stage, then `file`, then
/// `vars`; later sources win
fn layered<F>(
    environment: &str,
    file: F,
    vars: Environment,
) -> Result<ConfigBuilder<DefaultState>, ConfigError>
where
    F: Source + Send + Sync + 'static,
{
    Ok(defaults()?
        .set_default("environment", environment)?
        .add_source(file)
        .add_source(vars))
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    config::Config::builder()
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("server.workers", 4)?
        .set_default("api_version", "v1")?
        .set_default("environment", "development")
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{FileFormat, Map};
    use ledger_core::Backend;

    fn vars(pairs: &[(&str, &str)]) -> Environment {
        let source: Map<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix("WALLET_API")
            .separator("__")
            .try_parsing(true)
            .source(Some(source))
    }

    fn toml(text: &str) -> impl Source + Send + Sync + 'static {
        File::from_str(text, FileFormat::Toml)
    }

    fn resolve(builder: ConfigBuilder<DefaultState>) -> Settings {
        builder.build().unwrap().try_deserialize().unwrap()
    }

    fn from_defaults() -> Settings {
        defaults().unwrap().build().unwrap().try_deserialize().unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = from_defaults();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.api_version, "v1");
        assert_eq!(settings.environment, AppEnvironment::Development);
        assert_eq!(settings.ledger.backend, Backend::Memory);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_nested_ledger_override() {
        let settings: Settings = defaults()
            .unwrap()
            .set_override("ledger.backend", "rocksdb")
            .unwrap()
            .set_override("ledger.lock_timeout_ms", 250)
            .unwrap()
            .set_override("environment", "production")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.ledger.backend, Backend::Rocksdb);
        assert_eq!(settings.ledger.lock_timeout_ms, 250);
        assert_eq!(settings.environment, AppEnvironment::Production);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = from_defaults();
        settings.server.port = 0;
        assert!(settings.validate().is_err());

        let mut settings = from_defaults();
        settings.api_version = "v1/extra".to_string();
        assert!(settings.validate().is_err());

        let mut settings = from_defaults();
        settings.ledger.backend = Backend::Postgres;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_environment_variable_is_only_a_fallback() {
        let settings = resolve(layered("staging", toml(""), vars(&[])).unwrap());
        assert_eq!(settings.environment, AppEnvironment::Staging);

        let settings = resolve(
            layered("staging", toml(r#"environment = "production""#), vars(&[])).unwrap(),
        );
        assert_eq!(settings.environment, AppEnvironment::Production);

        let settings = resolve(
            layered(
                "staging",
                toml(r#"environment = "development""#),
                vars(&[("WALLET_API__ENVIRONMENT", "production")]),
            )
            .unwrap(),
        );
        assert_eq!(settings.environment, AppEnvironment::Production);
    }

    #[test]
    fn test_variables_override_file() {
        let settings = resolve(
            layered(
                "development",
                toml("[server]\nport = 9000\nworkers = 2"),
                vars(&[("WALLET_API__SERVER__PORT", "9100")]),
            )
            .unwrap(),
        );
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.workers, 2);
        assert_eq!(settings.server.host, "0.0.0.0");
    }
}
