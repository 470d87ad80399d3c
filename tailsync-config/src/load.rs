use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;

use crate::environment::Environment;

/// Directory containing configuration files relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Base configuration file loaded for all environments.
const BASE_CONFIG_FILE: &str = "base.yaml";

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "APP";

/// Separator between environment variable prefix and key segments.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables.
///
/// Example: `APP_STREAM__DANGER_ZONE_HOURS` sets the `stream.danger_zone_hours` field.
const ENV_SEPARATOR: &str = "__";

/// Errors returned while loading a configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the configuration directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to build the configuration: {0}")]
    Config(#[from] config::ConfigError),
}

/// Loads hierarchical configuration from the `configuration` directory of the current working
/// directory.
///
/// See [`load_config_from`] for the loading order.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    let base_path = std::env::current_dir()?;
    let environment = Environment::load()?;

    load_config_from(&base_path.join(CONFIGURATION_DIR), &environment)
}

/// Loads hierarchical configuration from YAML files and environment variables.
///
/// Loads configuration in this order:
/// 1. Base configuration from `{directory}/base.yaml`
/// 2. Environment-specific file from `{directory}/{environment}.yaml`
/// 3. Environment variable overrides prefixed with `APP`
///
/// Nested keys use double underscores: `APP_SNAPSHOT__PAGE_SIZE` → `snapshot.page_size`.
pub fn load_config_from<T>(directory: &Path, environment: &Environment) -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    let environment_filename = format!("{environment}.yaml");

    // Overrides are parsed so that numeric fields can be set from the environment.
    let environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    let settings = config::Config::builder()
        .add_source(config::File::from(directory.join(BASE_CONFIG_FILE)))
        // The environment file is optional, the base file alone is a valid configuration.
        .add_source(config::File::from(directory.join(environment_filename)).required(false))
        .add_source(environment_source)
        .build()?;

    Ok(settings.try_deserialize::<T>()?)
}
