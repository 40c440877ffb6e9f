//! Schema-per-tenant adapter.
//!
//! Each tenant owns one schema in a shared database. Switching pushes a
//! quoted `search_path` built from the [`ConnectionContext`] after checking
//! the catalog, so a missing tenant never leaves the session pointed at a
//! schema that does not exist.
//!
//! # Example
//!
//! ```
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! use helios_tenancy::adapter::{AdapterFactory, TenantAdapter};
//! use helios_tenancy::config::TenancyConfig;
//! use helios_tenancy::session::MemorySession;
//!
//! let factory = AdapterFactory::new(TenancyConfig::new().with_persistent_scopes(["shared"])).unwrap();
//! let mut adapter = factory
//!     .open(MemorySession::new("helios").with_schema("shared"))
//!     .await
//!     .unwrap();
//!
//! adapter.create("acme").await.unwrap();
//! adapter.switch("acme").await.unwrap();
//! assert_eq!(adapter.context().search_path(), "\"acme\", \"shared\"");
//! # });
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use super::TenantAdapter;
use crate::config::{IsolationStrategy, TenancyConfig};
use crate::context::{ConnectionContext, quote_identifier};
use crate::error::{TenancyError, TenancyResult};
use crate::excluded::ExcludedModels;
use crate::session::TenantSession;
use crate::tenant::{IdentifierRules, TenantId};

const SYSTEM_SCHEMA_PREFIX: &str = "pg_";
const INFORMATION_SCHEMA: &str = "information_schema";

/// Adapter isolating tenants by schema.
#[derive(Debug)]
pub struct SchemaAdapter<S> {
    pub(crate) session: S,
    config: Arc<TenancyConfig>,
    rules: IdentifierRules,
    context: ConnectionContext,
    excluded: Arc<ExcludedModels>,
}

impl<S: TenantSession> SchemaAdapter<S> {
    /// Wraps `session`. The excluded-model registry is repointed at the
    /// default scope immediately; the session itself is untouched until the
    /// first switch or reset.
    pub(crate) fn new(
        session: S,
        config: Arc<TenancyConfig>,
        rules: IdentifierRules,
        excluded: Arc<ExcludedModels>,
    ) -> Self {
        let rules = rules
            .with_reserved([
                config.default_scope.clone(),
                config.template_schema().to_string(),
                INFORMATION_SCHEMA.to_string(),
            ])
            .with_reserved(config.persistent_scopes.iter().cloned())
            .with_reserved_prefix(SYSTEM_SCHEMA_PREFIX);
        let context =
            ConnectionContext::new(config.default_scope.clone(), config.persistent_scopes.clone());

        excluded.repoint(&config.default_scope);

        Self {
            session,
            config,
            rules,
            context,
            excluded,
        }
    }

    /// Returns the session.
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Returns the session mutably, for running queries in the active context.
    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Returns the shared excluded-model registry.
    pub fn excluded_models(&self) -> &Arc<ExcludedModels> {
        &self.excluded
    }

    pub(crate) fn validate(&self, raw: &str) -> TenancyResult<TenantId> {
        self.rules.validate(raw)
    }

    /// Pushes the committed context to the session again.
    pub(crate) async fn reapply(&mut self) -> TenancyResult<()> {
        let sql = self.context.set_search_path_sql();
        self.session.execute(&sql).await?;
        tracing::debug!(search_path = %self.context.search_path(), "reapplied search path");
        Ok(())
    }

    fn is_tenant_schema(&self, schema: &str) -> bool {
        schema != self.config.default_scope
            && schema != self.config.template_schema()
            && schema != INFORMATION_SCHEMA
            && !schema.starts_with(SYSTEM_SCHEMA_PREFIX)
            && !self.config.persistent_scopes.iter().any(|s| s == schema)
    }
}

#[async_trait]
impl<S: TenantSession> TenantAdapter for SchemaAdapter<S> {
    fn strategy(&self) -> IsolationStrategy {
        IsolationStrategy::Schema
    }

    fn context(&self) -> &ConnectionContext {
        &self.context
    }

    async fn create(&mut self, tenant: &str) -> TenancyResult<TenantId> {
        let tenant = self.validate(tenant)?;
        let sql = format!("CREATE SCHEMA {}", quote_identifier(tenant.as_str()));

        match self.session.execute(&sql).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                return Err(TenancyError::TenantExists { tenant_id: tenant });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(tenant = %tenant, "created tenant schema");
        Ok(tenant)
    }

    async fn drop_tenant(&mut self, tenant: &str) -> TenancyResult<()> {
        let tenant = self.validate(tenant)?;
        let sql = format!("DROP SCHEMA {} CASCADE", quote_identifier(tenant.as_str()));

        match self.session.execute(&sql).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Err(TenancyError::not_found(&tenant)),
            Err(e) => return Err(e.into()),
        }

        self.context.invalidate(&tenant);
        if self.context.is_stale() {
            tracing::warn!(tenant = %tenant, "dropped the active tenant schema");
        } else {
            tracing::info!(tenant = %tenant, "dropped tenant schema");
        }
        Ok(())
    }

    async fn switch(&mut self, tenant: &str) -> TenancyResult<()> {
        let tenant = self.validate(tenant)?;
        let candidate = self.context.switched_to(tenant.clone());
        let not_found = |tenant: TenantId| TenancyError::TenantNotFound {
            tenant_id: tenant,
            attempted: Some(candidate.search_path()),
        };

        if !self.session.schema_exists(tenant.as_str()).await? {
            return Err(not_found(tenant));
        }

        match self.session.execute(&candidate.set_search_path_sql()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Err(not_found(tenant)),
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(tenant = %tenant, search_path = %candidate.search_path(), "switched tenant");
        self.context = candidate;
        Ok(())
    }

    async fn reset(&mut self) -> TenancyResult<()> {
        let candidate = self.context.reset();

        self.session
            .execute(&candidate.set_search_path_sql())
            .await
            .map_err(|e| TenancyError::ConfigurationError {
                message: format!(
                    "failed to apply default search path {}",
                    candidate.search_path()
                ),
                source: Some(Box::new(e)),
            })?;

        tracing::debug!(search_path = %candidate.search_path(), "reset to default scope");
        self.context = candidate;
        self.excluded.repoint(&self.config.default_scope);
        Ok(())
    }

    async fn exists(&mut self, tenant: &str) -> TenancyResult<bool> {
        let tenant = self.validate(tenant)?;
        Ok(self.session.schema_exists(tenant.as_str()).await?)
    }

    async fn list_tenants(&mut self) -> TenancyResult<Vec<TenantId>> {
        let schemas = self.session.list_schemas().await?;
        Ok(schemas
            .iter()
            .filter(|schema| self.is_tenant_schema(schema))
            .filter_map(|schema| self.rules.validate(schema).ok())
            .collect())
    }
}
