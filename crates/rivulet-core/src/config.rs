//! Configuration schema (rivulet.toml)

use crate::diagnostic::Severity;
use crate::model::Materialization;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// SQL dialect configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectConfig {
    /// BigQuery SQL dialect
    BigQuery,

    /// Snowflake SQL dialect
    Snowflake,

    /// PostgreSQL SQL dialect
    Postgres,

    /// Generic ANSI SQL
    Ansi,
}

impl Default for DialectConfig {
    fn default() -> Self {
        Self::Ansi
    }
}

/// When data tests run relative to materializations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPolicy {
    /// Run every test once all waves have finished
    AfterAll,

    /// Run each wave's tests before the next wave starts; an error-severity
    /// failure blocks the tested model's dependents
    PerWave,
}

impl Default for TestPolicy {
    fn default() -> Self {
        Self::AfterAll
    }
}

/// Severity overrides for specific tests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeverityThreshold {
    /// Map of test id to severity override
    #[serde(default)]
    pub overrides: HashMap<String, Severity>,
}

impl SeverityThreshold {
    /// Get severity for a test id, or the declared default
    pub fn get_severity(&self, test_id: &str, default: Severity) -> Severity {
        self.overrides.get(test_id).copied().unwrap_or(default)
    }

    /// Set severity override for a test
    pub fn set_override(&mut self, test_id: impl Into<String>, severity: Severity) {
        self.overrides.insert(test_id.into(), severity);
    }
}

/// Target the project builds into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Target name (dev, prod, ...)
    #[serde(default = "default_target_name")]
    pub name: String,

    /// Default database for models
    #[serde(default)]
    pub database: Option<String>,

    /// Default schema for models
    #[serde(default = "default_target_schema")]
    pub schema: String,
}

fn default_target_name() -> String {
    "dev".to_string()
}

fn default_target_schema() -> String {
    "public".to_string()
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            name: default_target_name(),
            database: None,
            schema: default_target_schema(),
        }
    }
}

/// Warehouse connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Warehouse type (snowflake, mock)
    #[serde(rename = "type")]
    pub warehouse_type: String,

    /// Connection settings (warehouse-specific)
    #[serde(flatten)]
    pub settings: HashMap<String, String>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            warehouse_type: "snowflake".to_string(),
            settings: HashMap::new(),
        }
    }
}

impl WarehouseConfig {
    /// Look up a setting, expanding `${VAR}` references from the environment.
    /// Falls back to the `env_fallback` variable when the key is absent.
    pub fn setting(&self, key: &str, env_fallback: &str) -> Option<String> {
        match self.settings.get(key) {
            Some(value) => Some(expand_env(value)),
            None => std::env::var(env_fallback).ok(),
        }
    }
}

/// Expand `${NAME}` placeholders with environment variables (missing → empty)
fn expand_env(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find('}') {
            Some(end) => {
                let name = &rest[start + 2..start + 2 + end];
                out.push_str(&std::env::var(name).unwrap_or_default());
                rest = &rest[start + 2 + end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQL dialect (used by the pre-flight syntax check)
    #[serde(default)]
    pub dialect: DialectConfig,

    /// Connection pool size: models of one wave running concurrently
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// When data tests run
    #[serde(default)]
    pub test_policy: TestPolicy,

    /// Materialization for models that do not configure one
    #[serde(default)]
    pub default_materialization: Materialization,

    /// Parse rendered SQL with the configured dialect during pre-flight
    #[serde(default = "default_true")]
    pub validate_sql: bool,

    /// Issue CREATE SCHEMA IF NOT EXISTS for target schemas before running
    #[serde(default)]
    pub create_schemas: bool,

    /// Build target
    #[serde(default)]
    pub target: TargetConfig,

    /// Project variables available through var()
    #[serde(default)]
    pub vars: BTreeMap<String, serde_json::Value>,

    /// Severity overrides for data tests
    #[serde(default)]
    pub severity: SeverityThreshold,

    /// Warehouse connection configuration
    #[serde(default)]
    pub warehouse: Option<WarehouseConfig>,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: std::path::PathBuf,
}

fn default_threads() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dialect: DialectConfig::default(),
            threads: default_threads(),
            test_policy: TestPolicy::default(),
            default_materialization: Materialization::default(),
            validate_sql: true,
            create_schemas: false,
            target: TargetConfig::default(),
            vars: BTreeMap::new(),
            severity: SeverityThreshold::default(),
            warehouse: None,
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut config = Self::from_toml(&contents)?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::InvalidValue("threads must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.dialect, DialectConfig::Ansi);
        assert_eq!(config.threads, 4);
        assert_eq!(config.test_policy, TestPolicy::AfterAll);
        assert_eq!(config.default_materialization, Materialization::View);
        assert!(config.validate_sql);
    }

    #[test]
    fn parse_full_config() {
        let config = Config::from_toml(
            r#"
            dialect = "snowflake"
            threads = 8
            test_policy = "per_wave"
            default_materialization = "table"

            [target]
            name = "prod"
            database = "ANALYTICS"
            schema = "MARTS"

            [vars]
            start_date = "2020-01-01"

            [severity.overrides]
            "not_null_fct_orders_order_key" = "warn"

            [warehouse]
            type = "snowflake"
            account = "xy12345"
            "#,
        )
        .unwrap();

        assert_eq!(config.dialect, DialectConfig::Snowflake);
        assert_eq!(config.threads, 8);
        assert_eq!(config.test_policy, TestPolicy::PerWave);
        assert_eq!(config.target.database.as_deref(), Some("ANALYTICS"));
        assert_eq!(config.vars["start_date"], serde_json::json!("2020-01-01"));
        assert_eq!(
            config.severity.get_severity("not_null_fct_orders_order_key", Severity::Error),
            Severity::Warn
        );

        let warehouse = config.warehouse.unwrap();
        assert_eq!(warehouse.warehouse_type, "snowflake");
        assert_eq!(warehouse.setting("account", "UNSET_FALLBACK").as_deref(), Some("xy12345"));
    }

    #[test]
    fn zero_threads_rejected() {
        let err = Config::from_toml("threads = 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn severity_override() {
        let mut threshold = SeverityThreshold::default();
        threshold.set_override("unique_users_id", Severity::Warn);

        assert_eq!(threshold.get_severity("unique_users_id", Severity::Error), Severity::Warn);
        assert_eq!(threshold.get_severity("unique_orders_id", Severity::Error), Severity::Error);
    }

    #[test]
    fn env_expansion() {
        std::env::set_var("RIVULET_TEST_EXPAND", "secret");
        assert_eq!(expand_env("pw=${RIVULET_TEST_EXPAND}!"), "pw=secret!");
        assert_eq!(expand_env("no placeholders"), "no placeholders");
        assert_eq!(expand_env("dangling ${OPEN"), "dangling ${OPEN");
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed = Config::from_toml(&toml).unwrap();
        assert_eq!(config.dialect, parsed.dialect);
        assert_eq!(config.threads, parsed.threads);
    }
}
