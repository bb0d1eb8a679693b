use super::types::RunnerConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use std::path::PathBuf;

/// Values given on the command line; they win over every other source
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub uri: Option<String>,
    pub database_name: Option<String>,
    pub collection_name: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    config_file: Option<PathBuf>,
    load_env: bool,
    env_prefix: String,
    overrides: ConfigOverrides,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            config_file: None,
            load_env: false,
            env_prefix: "BOOKSTORE".to_string(),
            overrides: ConfigOverrides::default(),
        }
    }

    /// Load configuration from file
    pub fn load_from_file(mut self, path: Option<impl Into<PathBuf>>) -> Self {
        self.config_file = path.map(Into::into);
        self
    }

    /// Load configuration from environment variables
    pub fn load_from_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Use a different environment variable prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Apply command line overrides
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> Result<RunnerConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&RunnerConfig::default())?);

        if let Some(config_path) = &self.config_file {
            // An explicitly named file must exist
            builder = builder.add_source(File::from(config_path.as_path()).required(true));
        } else {
            builder = builder
                .add_source(File::with_name("bookstore").required(false))
                .add_source(File::with_name("config/bookstore").required(false));
        }

        if self.load_env {
            builder = builder.add_source(
                Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder = builder
            .set_override_option("uri", self.overrides.uri)?
            .set_override_option("database_name", self.overrides.database_name)?
            .set_override_option("collection_name", self.overrides.collection_name)?
            .set_override_option("logging.level", self.overrides.log_level)?
            .set_override_option("logging.format", self.overrides.log_format)?;

        let config: RunnerConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate().context("Invalid configuration")?;

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;
    use std::io::Write;

    #[test]
    fn test_defaults_without_sources() {
        let config = ConfigLoader::new().build().unwrap();
        assert_eq!(config, RunnerConfig::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
uri = "mongodb://db.internal:27018"
database_name = "library"

[plan]
author = "Jane Austen"
page_limit = 3

[connection]
connect_timeout_ms = 2000
"#
        )
        .unwrap();

        let config = ConfigLoader::new()
            .load_from_file(Some(file.path()))
            .build()
            .unwrap();

        assert_eq!(config.uri, "mongodb://db.internal:27018");
        assert_eq!(config.database_name, "library");
        assert_eq!(config.collection_name, "books");
        assert_eq!(config.plan.author, "Jane Austen");
        assert_eq!(config.plan.page_limit, 3);
        assert_eq!(config.plan.genre, "Fiction");
        assert_eq!(config.connection.connect_timeout_ms, 2000);
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "collection_name = \"novels\"").unwrap();

        let config = ConfigLoader::new()
            .load_from_file(Some(file.path()))
            .with_overrides(ConfigOverrides {
                collection_name: Some("archive".to_string()),
                log_level: Some("debug".to_string()),
                ..Default::default()
            })
            .build()
            .unwrap();

        assert_eq!(config.collection_name, "archive");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_log_format_override_accepts_aliases() {
        let config = ConfigLoader::new()
            .with_overrides(ConfigOverrides {
                log_format: Some("text".to_string()),
                ..Default::default()
            })
            .build()
            .unwrap();
        assert_eq!(config.logging.format, LogFormat::Human);

        let result = ConfigLoader::new()
            .with_overrides(ConfigOverrides {
                log_format: Some("xml".to_string()),
                ..Default::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_override_rejected() {
        let result = ConfigLoader::new()
            .with_overrides(ConfigOverrides {
                uri: Some("postgres://localhost".to_string()),
                ..Default::default()
            })
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = ConfigLoader::new()
            .load_from_file(Some("/nonexistent/bookstore.toml"))
            .build();
        assert!(result.is_err());
    }
}
