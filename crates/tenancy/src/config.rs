//! Static tenancy configuration.
//!
//! A [`TenancyConfig`] is read once and handed to the
//! [`AdapterFactory`](crate::adapter::AdapterFactory); adapters keep their own
//! copy and never look it up again.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TENANCY_STRATEGY` | schema | `database`, `schema` or `schema_clone` |
//! | `TENANCY_DEFAULT_SCOPE` | public | Schema used when no tenant is active |
//! | `TENANCY_PERSISTENT_SCOPES` | (empty) | Comma-separated schemas always on the search path |
//! | `TENANCY_EXCLUDED_MODELS` | (empty) | Comma-separated tables pinned to the default scope |
//! | `TENANCY_DATABASE` | helios | Default database |
//! | `TENANCY_DATABASE_PREFIX` | (empty) | Prefix for tenant database names |
//! | `TENANCY_DATABASE_SUFFIX` | (empty) | Suffix for tenant database names |
//! | `TENANCY_TEMPLATE_SCHEMA` | default scope | Schema cloned by `schema_clone` |
//! | `TENANCY_BOOKKEEPING_TABLE` | schema_migrations | Table whose rows are copied on clone |
//! | `TENANCY_IDENTIFIER_PATTERN` | `^[A-Za-z_][A-Za-z0-9_-]*$` | Allowed tenant names |
//! | `TENANCY_PG_DUMP` | pg_dump | Dump executable |
//!
//! # Example
//!
//! ```
//! use helios_tenancy::config::{IsolationStrategy, TenancyConfig};
//!
//! let config = TenancyConfig::new()
//!     .with_strategy(IsolationStrategy::SchemaClone)
//!     .with_persistent_scopes(["shared"])
//!     .with_excluded_models(["users"]);
//!
//! assert_eq!(config.default_scope, "public");
//! assert_eq!(config.template_schema(), "public");
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TenancyError, TenancyResult};
use crate::tenant::DEFAULT_IDENTIFIER_PATTERN;

/// How tenants are isolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationStrategy {
    /// One database per tenant.
    Database,
    /// One schema per tenant in a shared database.
    #[default]
    Schema,
    /// One schema per tenant, provisioned by cloning a template schema.
    SchemaClone,
}

impl IsolationStrategy {
    /// Returns `true` if the strategy isolates through the session's search path.
    pub fn uses_search_path(&self) -> bool {
        !matches!(self, IsolationStrategy::Database)
    }
}

impl fmt::Display for IsolationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationStrategy::Database => write!(f, "database"),
            IsolationStrategy::Schema => write!(f, "schema"),
            IsolationStrategy::SchemaClone => write!(f, "schema_clone"),
        }
    }
}

impl FromStr for IsolationStrategy {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "database" => Ok(IsolationStrategy::Database),
            "schema" => Ok(IsolationStrategy::Schema),
            "schema_clone" | "schema-clone" => Ok(IsolationStrategy::SchemaClone),
            other => Err(TenancyError::configuration(format!(
                "unknown isolation strategy '{}'",
                other
            ))),
        }
    }
}

/// Tenancy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// Isolation strategy selector.
    #[serde(default)]
    pub strategy: IsolationStrategy,

    /// Schema used when no tenant is active.
    #[serde(default = "default_scope")]
    pub default_scope: String,

    /// Schemas appended to every resolution order.
    #[serde(default)]
    pub persistent_scopes: Vec<String>,

    /// Tables pinned to the default scope.
    #[serde(default)]
    pub excluded_models: Vec<String>,

    /// Default database. Reset target for the database strategy and the
    /// database the dump tool reads from.
    #[serde(default = "default_database")]
    pub database: String,

    /// Prefix for tenant database names.
    #[serde(default)]
    pub database_prefix: String,

    /// Suffix for tenant database names.
    #[serde(default)]
    pub database_suffix: String,

    /// Schema cloned by the `schema_clone` strategy. Defaults to the default scope.
    #[serde(default)]
    pub template_schema: Option<String>,

    /// Migration bookkeeping table copied on clone.
    #[serde(default = "default_bookkeeping_table")]
    pub bookkeeping_table: String,

    /// Pattern tenant identifiers must match.
    #[serde(default = "default_identifier_pattern")]
    pub identifier_pattern: String,

    /// Dump tool settings.
    #[serde(default)]
    pub dump: DumpConfig,
}

/// Placeholder printed instead of secrets in `Debug` output.
pub(crate) const REDACTED: &str = "[REDACTED]";

/// Settings for the external dump executable.
#[derive(Clone, Serialize, Deserialize)]
pub struct DumpConfig {
    /// Path or name of the dump program.
    #[serde(default = "default_dump_program")]
    pub program: PathBuf,

    /// Host passed as `PGHOST`.
    #[serde(default)]
    pub host: Option<String>,

    /// Port passed as `PGPORT`.
    #[serde(default)]
    pub port: Option<u16>,

    /// User passed as `PGUSER`.
    #[serde(default)]
    pub user: Option<String>,

    /// Password passed as `PGPASSWORD`.
    #[serde(default)]
    pub password: Option<String>,
}

fn default_scope() -> String {
    "public".to_string()
}

fn default_database() -> String {
    "helios".to_string()
}

fn default_bookkeeping_table() -> String {
    "schema_migrations".to_string()
}

fn default_identifier_pattern() -> String {
    DEFAULT_IDENTIFIER_PATTERN.to_string()
}

fn default_dump_program() -> PathBuf {
    PathBuf::from("pg_dump")
}

impl std::fmt::Debug for DumpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpConfig")
            .field("program", &self.program)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .finish()
    }
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            program: default_dump_program(),
            host: None,
            port: None,
            user: None,
            password: None,
        }
    }
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            strategy: IsolationStrategy::default(),
            default_scope: default_scope(),
            persistent_scopes: Vec::new(),
            excluded_models: Vec::new(),
            database: default_database(),
            database_prefix: String::new(),
            database_suffix: String::new(),
            template_schema: None,
            bookkeeping_table: default_bookkeeping_table(),
            identifier_pattern: default_identifier_pattern(),
            dump: DumpConfig::default(),
        }
    }
}

impl TenancyConfig {
    /// Creates a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the isolation strategy.
    pub fn with_strategy(mut self, strategy: IsolationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the default scope.
    pub fn with_default_scope(mut self, scope: impl Into<String>) -> Self {
        self.default_scope = scope.into();
        self
    }

    /// Sets the persistent scopes.
    pub fn with_persistent_scopes<I, T>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.persistent_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the excluded models.
    pub fn with_excluded_models<I, T>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.excluded_models = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the default database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Sets the tenant database prefix and suffix.
    pub fn with_database_affixes(
        mut self,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        self.database_prefix = prefix.into();
        self.database_suffix = suffix.into();
        self
    }

    /// Sets the template schema.
    pub fn with_template_schema(mut self, schema: impl Into<String>) -> Self {
        self.template_schema = Some(schema.into());
        self
    }

    /// Sets the bookkeeping table.
    pub fn with_bookkeeping_table(mut self, table: impl Into<String>) -> Self {
        self.bookkeeping_table = table.into();
        self
    }

    /// Returns the schema cloned by the `schema_clone` strategy.
    pub fn template_schema(&self) -> &str {
        self.template_schema
            .as_deref()
            .unwrap_or(&self.default_scope)
    }

    /// Checks the configuration for values that would make every adapter
    /// operation fail.
    pub fn validate(&self) -> TenancyResult<()> {
        if self.default_scope.trim().is_empty() {
            return Err(TenancyError::configuration("default scope is empty"));
        }
        if self.persistent_scopes.iter().any(|s| s.trim().is_empty()) {
            return Err(TenancyError::configuration("persistent scope name is empty"));
        }
        if self.database.trim().is_empty() {
            return Err(TenancyError::configuration("default database is empty"));
        }
        if self.strategy == IsolationStrategy::SchemaClone
            && self.bookkeeping_table.trim().is_empty()
        {
            return Err(TenancyError::configuration(
                "schema_clone requires a bookkeeping table",
            ));
        }
        Ok(())
    }

    /// Parses a JSON configuration document.
    pub fn from_json_str(json: &str) -> TenancyResult<Self> {
        serde_json::from_str(json).map_err(|e| TenancyError::ConfigurationError {
            message: "failed to parse tenancy configuration".to_string(),
            source: Some(Box::new(e)),
        })
    }

    /// Reads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> TenancyResult<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| TenancyError::ConfigurationError {
                message: format!("failed to read {}", path.display()),
                source: Some(Box::new(e)),
            })?;
        Self::from_json_str(&contents)
    }

    /// Creates a configuration from `TENANCY_*` environment variables.
    pub fn from_env() -> TenancyResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> TenancyResult<Self> {
        let list = |key: &str| -> Vec<String> {
            lookup(key)
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        let strategy = match lookup("TENANCY_STRATEGY") {
            Some(value) => value.parse()?,
            None => IsolationStrategy::default(),
        };

        Ok(Self {
            strategy,
            default_scope: lookup("TENANCY_DEFAULT_SCOPE").unwrap_or_else(default_scope),
            persistent_scopes: list("TENANCY_PERSISTENT_SCOPES"),
            excluded_models: list("TENANCY_EXCLUDED_MODELS"),
            database: lookup("TENANCY_DATABASE").unwrap_or_else(default_database),
            database_prefix: lookup("TENANCY_DATABASE_PREFIX").unwrap_or_default(),
            database_suffix: lookup("TENANCY_DATABASE_SUFFIX").unwrap_or_default(),
            template_schema: lookup("TENANCY_TEMPLATE_SCHEMA"),
            bookkeeping_table: lookup("TENANCY_BOOKKEEPING_TABLE")
                .unwrap_or_else(default_bookkeeping_table),
            identifier_pattern: lookup("TENANCY_IDENTIFIER_PATTERN")
                .unwrap_or_else(default_identifier_pattern),
            dump: DumpConfig {
                program: lookup("TENANCY_PG_DUMP")
                    .map(PathBuf::from)
                    .unwrap_or_else(default_dump_program),
                host: lookup("PGHOST"),
                port: lookup("PGPORT").and_then(|p| p.parse().ok()),
                user: lookup("PGUSER"),
                password: lookup("PGPASSWORD"),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn test_debug_redacts_dump_password() {
        let mut config = TenancyConfig::default();
        config.dump.password = Some("hunter2".to_string());

        let printed = format!("{:?}", config);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("[REDACTED]"));
    }

    #[test]
    fn test_config_defaults() {
        let config = TenancyConfig::default();
        assert_eq!(config.strategy, IsolationStrategy::Schema);
        assert_eq!(config.default_scope, "public");
        assert!(config.persistent_scopes.is_empty());
        assert_eq!(config.database, "helios");
        assert_eq!(config.bookkeeping_table, "schema_migrations");
        assert_eq!(config.dump.program, PathBuf::from("pg_dump"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = TenancyConfig::new()
            .with_strategy(IsolationStrategy::Database)
            .with_default_scope("admin")
            .with_persistent_scopes(["shared", "extensions"])
            .with_database("app")
            .with_database_affixes("t_", "_db")
            .with_template_schema("template_tenant");

        assert_eq!(config.default_scope, "admin");
        assert_eq!(config.persistent_scopes, vec!["shared", "extensions"]);
        assert_eq!(config.database_prefix, "t_");
        assert_eq!(config.database_suffix, "_db");
        assert_eq!(config.template_schema(), "template_tenant");
    }

    #[test]
    fn test_strategy_display_and_parse() {
        for strategy in [
            IsolationStrategy::Database,
            IsolationStrategy::Schema,
            IsolationStrategy::SchemaClone,
        ] {
            assert_eq!(strategy.to_string().parse::<IsolationStrategy>().unwrap(), strategy);
        }
        assert_eq!(
            "Schema-Clone".parse::<IsolationStrategy>().unwrap(),
            IsolationStrategy::SchemaClone
        );
        assert!("sharded".parse::<IsolationStrategy>().is_err());
        assert!(!IsolationStrategy::Database.uses_search_path());
        assert!(IsolationStrategy::SchemaClone.uses_search_path());
    }

    #[test]
    fn test_from_json_str_applies_defaults() {
        let config = TenancyConfig::from_json_str(
            r#"{"strategy": "schema_clone", "persistent_scopes": ["shared"]}"#,
        )
        .unwrap();
        assert_eq!(config.strategy, IsolationStrategy::SchemaClone);
        assert_eq!(config.persistent_scopes, vec!["shared"]);
        assert_eq!(config.default_scope, "public");
        assert_eq!(config.bookkeeping_table, "schema_migrations");
    }

    #[test]
    fn test_from_json_str_rejects_unknown_strategy() {
        let err = TenancyConfig::from_json_str(r#"{"strategy": "sharded"}"#).unwrap_err();
        assert!(matches!(err, TenancyError::ConfigurationError { .. }));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"strategy": "database", "database": "app", "database_prefix": "tenant_"}}"#
        )
        .unwrap();

        let config = TenancyConfig::from_file(file.path()).unwrap();
        assert_eq!(config.strategy, IsolationStrategy::Database);
        assert_eq!(config.database, "app");
        assert_eq!(config.database_prefix, "tenant_");
    }

    #[test]
    fn test_from_missing_file() {
        let err = TenancyConfig::from_file("/nonexistent/tenancy.json").unwrap_err();
        assert!(matches!(err, TenancyError::ConfigurationError { .. }));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TENANCY_STRATEGY", "schema_clone"),
            ("TENANCY_PERSISTENT_SCOPES", "shared, extensions,"),
            ("TENANCY_EXCLUDED_MODELS", "users"),
            ("TENANCY_DATABASE", "app"),
            ("PGPORT", "5433"),
        ]);
        let config = TenancyConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.strategy, IsolationStrategy::SchemaClone);
        assert_eq!(config.persistent_scopes, vec!["shared", "extensions"]);
        assert_eq!(config.excluded_models, vec!["users"]);
        assert_eq!(config.database, "app");
        assert_eq!(config.dump.port, Some(5433));
        assert_eq!(config.default_scope, "public");
    }

    #[test]
    fn test_from_lookup_bad_strategy() {
        let result = TenancyConfig::from_lookup(|k| {
            (k == "TENANCY_STRATEGY").then(|| "sharded".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_empty_scopes() {
        let config = TenancyConfig::new().with_default_scope(" ");
        assert!(config.validate().is_err());

        let config = TenancyConfig::new().with_persistent_scopes([""]);
        assert!(config.validate().is_err());
    }
}
