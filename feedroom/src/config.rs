use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use feedroom_client::ClientConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // FEEDROOM_LOGGING__LEVEL, FEEDROOM_CLIENT__SUBSCRIBE_BY_MID, ...
        // Lists are comma separated: FEEDROOM_CLIENT__FALLBACK_MIDS=0,1
        builder = builder.add_source(
            Environment::with_prefix("FEEDROOM")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("client.fallback_mids")
                .with_list_parse_key("client.terminal_error_codes")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }
        if let Err(client_errors) = self.client.validate() {
            errors.extend(client_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Load and validate configuration
///
/// Config file search order:
/// 1. `--config` argument
/// 2. `FEEDROOM_CONFIG_PATH` environment variable
/// 3. ./config.yaml
/// 4. Fall back to environment variables only
pub fn load_config(explicit: Option<&str>) -> anyhow::Result<AppConfig> {
    let config_path = explicit
        .map(str::to_string)
        .or_else(|| {
            std::env::var("FEEDROOM_CONFIG_PATH")
                .ok()
                .filter(|p| Path::new(p).exists())
        })
        .or_else(|| {
            let cwd = "config.yaml";
            Path::new(cwd).exists().then(|| cwd.to_string())
        });

    let config = match config_path {
        Some(path) => {
            if !Path::new(&path).exists() {
                anyhow::bail!("Config file not found: {path}");
            }
            eprintln!("Loading config from {path}");
            AppConfig::load(Some(&path))?
        }
        None => {
            eprintln!("No config file found, using environment variables");
            AppConfig::load(None)?
        }
    };

    // Fail fast on misconfigurations
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    Ok(config)
}
