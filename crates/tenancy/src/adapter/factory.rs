//! Adapter construction from configuration.

use std::sync::Arc;

use super::database::DatabaseAdapter;
use super::schema::SchemaAdapter;
use super::schema_clone::SchemaCloneAdapter;
use super::{AdapterVariant, ConfiguredAdapter, TenantAdapter};
use crate::clone::{PgDump, SchemaCloner, SchemaDumper};
use crate::config::{IsolationStrategy, TenancyConfig};
use crate::error::TenancyResult;
use crate::excluded::ExcludedModels;
use crate::session::TenantSession;
use crate::tenant::IdentifierRules;

/// Builds adapters for one configuration.
///
/// The factory validates the configuration and compiles the identifier
/// rules once; every adapter it builds shares the same configuration,
/// excluded-model registry and dump tool, but owns its own session and
/// context.
///
/// # Example
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// use helios_tenancy::adapter::{AdapterFactory, TenantAdapter};
/// use helios_tenancy::config::{IsolationStrategy, TenancyConfig};
/// use helios_tenancy::session::MemorySession;
///
/// let factory = AdapterFactory::new(
///     TenancyConfig::new().with_strategy(IsolationStrategy::Database),
/// )
/// .unwrap();
///
/// let mut adapter = factory.open(MemorySession::new("helios")).await.unwrap();
/// assert_eq!(adapter.strategy(), IsolationStrategy::Database);
/// assert!(adapter.current_tenant().is_none());
/// # });
/// ```
pub struct AdapterFactory {
    config: Arc<TenancyConfig>,
    rules: IdentifierRules,
    excluded: Arc<ExcludedModels>,
    dumper: Arc<dyn SchemaDumper>,
}

impl std::fmt::Debug for AdapterFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterFactory")
            .field("config", &self.config)
            .field("rules", &self.rules)
            .field("excluded", &self.excluded)
            .finish_non_exhaustive()
    }
}

impl AdapterFactory {
    /// Validates `config` and prepares a factory. The excluded-model
    /// registry is seeded from `config.excluded_models` and the dump tool
    /// defaults to [`PgDump`] with `config.dump`.
    pub fn new(config: TenancyConfig) -> TenancyResult<Self> {
        config.validate()?;
        let rules = IdentifierRules::new(&config.identifier_pattern)?;
        let excluded = Arc::new(ExcludedModels::new(config.excluded_models.iter().cloned()));
        let dumper: Arc<dyn SchemaDumper> = Arc::new(PgDump::new(config.dump.clone()));

        tracing::debug!(strategy = %config.strategy, "tenancy configured");

        Ok(Self {
            config: Arc::new(config),
            rules,
            excluded,
            dumper,
        })
    }

    /// Uses a registry owned by the host instead of the configured list.
    pub fn with_excluded_models(mut self, excluded: Arc<ExcludedModels>) -> Self {
        self.excluded = excluded;
        self
    }

    /// Uses another dump tool.
    pub fn with_dumper(mut self, dumper: Arc<dyn SchemaDumper>) -> Self {
        self.dumper = dumper;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    /// Returns the excluded-model registry handed to schema adapters.
    pub fn excluded_models(&self) -> &Arc<ExcludedModels> {
        &self.excluded
    }

    /// Builds the configured adapter around `session` without touching it.
    pub fn build<S: TenantSession>(&self, session: S) -> TenancyResult<ConfiguredAdapter<S>> {
        let config = Arc::clone(&self.config);
        let rules = self.rules.clone();

        let variant = match config.strategy {
            IsolationStrategy::Database => {
                AdapterVariant::Database(DatabaseAdapter::new(session, config, rules))
            }
            IsolationStrategy::Schema => AdapterVariant::Schema(SchemaAdapter::new(
                session,
                config,
                rules,
                Arc::clone(&self.excluded),
            )),
            IsolationStrategy::SchemaClone => {
                let cloner = SchemaCloner::new(Arc::clone(&self.dumper), &config)?;
                let schema = SchemaAdapter::new(session, config, rules, Arc::clone(&self.excluded));
                AdapterVariant::SchemaClone(SchemaCloneAdapter::new(schema, cloner))
            }
        };

        Ok(ConfiguredAdapter::new(variant))
    }

    /// Builds the configured adapter and resets it, so the session is in
    /// the default context when this returns.
    pub async fn open<S: TenantSession>(&self, session: S) -> TenancyResult<ConfiguredAdapter<S>> {
        let mut adapter = self.build(session)?;
        adapter.reset().await?;
        Ok(adapter)
    }
}

/// Builds the adapter `config.strategy` selects around `session`.
///
/// Shorthand for [`AdapterFactory::new`] followed by
/// [`AdapterFactory::build`]; the adapter still needs a
/// [`reset`](TenantAdapter::reset) before use.
pub fn build_adapter<S: TenantSession>(
    config: TenancyConfig,
    session: S,
) -> TenancyResult<ConfiguredAdapter<S>> {
    AdapterFactory::new(config)?.build(session)
}
