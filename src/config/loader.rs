//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::{DatabaseTarget, Environment, WarehouseConfig};
use crate::config::secret_string;
use crate::domain::{Result, RunMode, WarehouseError};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "warehouse.toml";

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "WAREHOUSE_CONFIG";

/// Picks the configuration file: explicit path, then `WAREHOUSE_CONFIG`, then `warehouse.toml`
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (${VAR} syntax)
/// 3. Parses the TOML into WarehouseConfig
/// 4. Applies environment variable overrides (WAREHOUSE_* prefix)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns a `Configuration` error if:
/// - File cannot be read
/// - TOML parsing fails
/// - Environment variable substitution fails
/// - Configuration validation fails
///
/// # Examples
///
/// ```no_run
/// use imaging_warehouse::config::loader::load_config;
///
/// let config = load_config("warehouse.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<WarehouseConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(WarehouseError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        WarehouseError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&contents)
}

/// Parses, overrides and validates configuration text
///
/// # Errors
///
/// Returns a `Configuration` error on missing variables, bad TOML or invalid values.
pub fn parse_config(contents: &str) -> Result<WarehouseConfig> {
    let contents = substitute_env_vars(contents)?;

    let mut config: WarehouseConfig = toml::from_str(&contents)
        .map_err(|e| WarehouseError::Configuration(format!("Failed to parse TOML: {e}")))?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        WarehouseError::Configuration(format!("Configuration validation failed: {e}"))
    })?;

    Ok(config)
}

/// Substitutes environment variables in the format ${VAR_NAME}
///
/// Comment lines are left untouched.
///
/// # Errors
///
/// Returns an error if a referenced environment variable is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| WarehouseError::Configuration(format!("Invalid substitution pattern: {e}")))?;
    let mut result = String::new();
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let mut processed_line = line.to_string();
        for cap in re.captures_iter(line) {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => {
                    let placeholder = format!("${{{var_name}}}");
                    processed_line = processed_line.replace(&placeholder, &value);
                }
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                }
            }
        }
        result.push_str(&processed_line);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(WarehouseError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| WarehouseError::Configuration(format!("Invalid value for {name}: '{value}'")))
}

/// Applies environment variable overrides using the WAREHOUSE_* prefix
///
/// Environment variables follow the pattern: WAREHOUSE_<SECTION>_<KEY>
/// For example: WAREHOUSE_ENGINE_BATCH_SIZE, WAREHOUSE_POSTGRESQL_CONNECTION_STRING
fn apply_env_overrides(config: &mut WarehouseConfig) -> Result<()> {
    let var = |name: &str| std::env::var(name).ok();

    // Application
    if let Some(val) = var("WAREHOUSE_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Some(val) = var("WAREHOUSE_APPLICATION_DRY_RUN") {
        config.application.dry_run = parse_env("WAREHOUSE_APPLICATION_DRY_RUN", &val)?;
    }

    if let Some(val) = var("WAREHOUSE_ENVIRONMENT") {
        config.environment = match val.to_lowercase().as_str() {
            "development" => Environment::Development,
            "staging" => Environment::Staging,
            "production" => Environment::Production,
            other => {
                return Err(WarehouseError::Configuration(format!(
                    "Invalid value for WAREHOUSE_ENVIRONMENT: '{other}'"
                )))
            }
        };
    }

    // Engine
    if let Some(val) = var("WAREHOUSE_ENGINE_MODE") {
        config.engine.mode = val.parse::<RunMode>()?;
    }
    if let Some(val) = var("WAREHOUSE_ENGINE_BATCH_SIZE") {
        config.engine.batch_size = parse_env("WAREHOUSE_ENGINE_BATCH_SIZE", &val)?;
    }
    if let Some(val) = var("WAREHOUSE_ENGINE_MAX_PARALLEL_CHUNKS") {
        config.engine.max_parallel_chunks =
            parse_env("WAREHOUSE_ENGINE_MAX_PARALLEL_CHUNKS", &val)?;
    }
    if let Some(val) = var("WAREHOUSE_ENGINE_MIN_SUCCESS_RATE") {
        config.engine.min_success_rate = parse_env("WAREHOUSE_ENGINE_MIN_SUCCESS_RATE", &val)?;
    }
    if let Some(val) = var("WAREHOUSE_ENGINE_ACTOR") {
        config.engine.actor = val;
    }

    if let Some(val) = var("WAREHOUSE_DATABASE_TARGET") {
        config.database_target = match val.to_lowercase().as_str() {
            "postgresql" => DatabaseTarget::PostgreSQL,
            "memory" => DatabaseTarget::Memory,
            other => {
                return Err(WarehouseError::Configuration(format!(
                    "Invalid value for WAREHOUSE_DATABASE_TARGET: '{other}'"
                )))
            }
        };
    }

    // PostgreSQL overrides only apply when the section exists
    if let Some(ref mut pg) = config.postgresql {
        if let Some(val) = var("WAREHOUSE_POSTGRESQL_CONNECTION_STRING") {
            pg.connection_string = secret_string(val);
        }
        if let Some(val) = var("WAREHOUSE_POSTGRESQL_MAX_CONNECTIONS") {
            pg.max_connections = parse_env("WAREHOUSE_POSTGRESQL_MAX_CONNECTIONS", &val)?;
        }
        if let Some(val) = var("WAREHOUSE_POSTGRESQL_SSL_MODE") {
            pg.ssl_mode = val;
        }
    }

    if let Some(val) = var("WAREHOUSE_VALIDATION_ENABLED") {
        config.validation.enabled = parse_env("WAREHOUSE_VALIDATION_ENABLED", &val)?;
    }

    // Logging
    if let Some(val) = var("WAREHOUSE_LOGGING_LOCAL_ENABLED") {
        config.logging.local_enabled = parse_env("WAREHOUSE_LOGGING_LOCAL_ENABLED", &val)?;
    }
    if let Some(val) = var("WAREHOUSE_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MEMORY_CONFIG: &str = r#"
database_target = "memory"

[application]
name = "imaging-warehouse"
log_level = "info"

[engine]
mode = "full"
batch_size = 250
"#;

    #[test]
    fn test_substitute_env_vars() {
        std::env::set_var("IW_LOADER_TEST_VAR", "test_value");
        let input = "password = \"${IW_LOADER_TEST_VAR}\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "password = \"test_value\"\n");
        std::env::remove_var("IW_LOADER_TEST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_missing() {
        std::env::remove_var("IW_LOADER_MISSING_VAR");
        let input = "password = \"${IW_LOADER_MISSING_VAR}\"";
        let err = substitute_env_vars(input).unwrap_err();
        assert!(err.to_string().contains("IW_LOADER_MISSING_VAR"));
    }

    #[test]
    fn test_substitute_skips_comments() {
        std::env::remove_var("IW_LOADER_COMMENTED_VAR");
        let input = "# connection_string = \"${IW_LOADER_COMMENTED_VAR}\"";
        assert!(substitute_env_vars(input).is_ok());
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent.toml");
        assert!(matches!(result, Err(WarehouseError::Configuration(_))));
    }

    #[test]
    fn test_load_config_memory_target() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(MEMORY_CONFIG.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.application.name, "imaging-warehouse");
        assert_eq!(config.database_target, DatabaseTarget::Memory);
        assert_eq!(config.engine.mode, RunMode::Full);
        assert_eq!(config.engine.batch_size, 250);
        assert_eq!(config.engine.max_parallel_chunks, 4);
        assert!(config.validation.enabled);
    }

    #[test]
    fn test_parse_config_postgresql_with_substitution() {
        std::env::set_var("IW_LOADER_PG_PASSWORD", "s3cret");
        let text = r#"
database_target = "postgresql"

[application]
name = "imaging-warehouse"

[postgresql]
connection_string = "postgresql://loader:${IW_LOADER_PG_PASSWORD}@db:5432/imaging"
ssl_mode = "require"
"#;
        let config = parse_config(text).unwrap();
        std::env::remove_var("IW_LOADER_PG_PASSWORD");

        let pg = config.postgresql.unwrap();
        assert!(pg.connection_string.expose_secret().contains("s3cret"));
        assert_eq!(pg.max_connections, 10);
    }

    #[test]
    fn test_parse_config_rejects_invalid_values() {
        let text = r#"
database_target = "memory"

[application]
name = "imaging-warehouse"

[engine]
batch_size = 0
"#;
        let err = parse_config(text).unwrap_err();
        assert!(err.to_string().contains("engine.batch_size"));
    }

    #[test]
    fn test_resolve_config_path_prefers_explicit() {
        let path = resolve_config_path(Some(Path::new("custom.toml")));
        assert_eq!(path, PathBuf::from("custom.toml"));
    }
}
