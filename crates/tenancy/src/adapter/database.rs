//! Database-per-tenant adapter.
//!
//! Each tenant owns a database named `{prefix}{tenant}{suffix}`. Switching
//! is a connection-level database selection, so the session's search path is
//! left at the server default inside every tenant database.

use std::sync::Arc;

use async_trait::async_trait;

use super::TenantAdapter;
use crate::config::{IsolationStrategy, TenancyConfig};
use crate::context::{ConnectionContext, quote_identifier};
use crate::error::{TenancyError, TenancyResult};
use crate::session::TenantSession;
use crate::tenant::{IdentifierRules, MAX_IDENTIFIER_LENGTH, TenantId};

/// Databases that always exist on a PostgreSQL server.
const ADMINISTRATIVE_DATABASES: &[&str] = &["postgres", "template0", "template1"];

/// Adapter isolating tenants by database.
#[derive(Debug)]
pub struct DatabaseAdapter<S> {
    session: S,
    config: Arc<TenancyConfig>,
    rules: IdentifierRules,
    context: ConnectionContext,
}

impl<S: TenantSession> DatabaseAdapter<S> {
    pub(crate) fn new(session: S, config: Arc<TenancyConfig>, rules: IdentifierRules) -> Self {
        let context =
            ConnectionContext::new(config.default_scope.clone(), config.persistent_scopes.clone());
        Self {
            session,
            config,
            rules,
            context,
        }
    }

    /// Returns the session.
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Returns the session mutably.
    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Validates a tenant token and returns its database name.
    pub fn database_for(&self, tenant: &str) -> TenancyResult<(TenantId, String)> {
        let tenant = self.rules.validate(tenant)?;
        let name = format!(
            "{}{}{}",
            self.config.database_prefix,
            tenant.as_str(),
            self.config.database_suffix
        );

        let invalid = |reason: String| TenancyError::InvalidIdentifier {
            identifier: tenant.as_str().to_string(),
            reason,
        };
        if name.len() > MAX_IDENTIFIER_LENGTH {
            return Err(invalid(format!(
                "database name '{}' exceeds {} bytes",
                name, MAX_IDENTIFIER_LENGTH
            )));
        }
        if name == self.config.database || ADMINISTRATIVE_DATABASES.contains(&name.as_str()) {
            return Err(invalid(format!("database name '{}' is reserved", name)));
        }

        Ok((tenant, name))
    }

    fn tenant_for_database(&self, database: &str) -> Option<TenantId> {
        if database == self.config.database || ADMINISTRATIVE_DATABASES.contains(&database) {
            return None;
        }
        let token = database
            .strip_prefix(self.config.database_prefix.as_str())?
            .strip_suffix(self.config.database_suffix.as_str())?;
        self.rules.validate(token).ok()
    }
}

#[async_trait]
impl<S: TenantSession> TenantAdapter for DatabaseAdapter<S> {
    fn strategy(&self) -> IsolationStrategy {
        IsolationStrategy::Database
    }

    fn context(&self) -> &ConnectionContext {
        &self.context
    }

    async fn create(&mut self, tenant: &str) -> TenancyResult<TenantId> {
        let (tenant, database) = self.database_for(tenant)?;
        let sql = format!(
            "CREATE DATABASE {} WITH ENCODING 'UTF8'",
            quote_identifier(&database)
        );

        match self.session.execute(&sql).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                return Err(TenancyError::TenantExists { tenant_id: tenant });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(tenant = %tenant, database = %database, "created tenant database");
        Ok(tenant)
    }

    async fn drop_tenant(&mut self, tenant: &str) -> TenancyResult<()> {
        let (tenant, database) = self.database_for(tenant)?;

        if !self.session.database_exists(&database).await? {
            return Err(TenancyError::TenantNotFound {
                tenant_id: tenant,
                attempted: Some(database),
            });
        }

        // a connected session cannot drop its own database
        if self.session.current_database() == database {
            tracing::warn!(tenant = %tenant, "dropping the active tenant database");
            self.reset().await?;
        }

        let sql = format!("DROP DATABASE {}", quote_identifier(&database));
        match self.session.execute(&sql).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Err(TenancyError::not_found(&tenant)),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(tenant = %tenant, database = %database, "dropped tenant database");
        Ok(())
    }

    async fn switch(&mut self, tenant: &str) -> TenancyResult<()> {
        let (tenant, database) = self.database_for(tenant)?;
        let candidate = self.context.switched_to(tenant.clone());

        match self.session.select_database(&database).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                return Err(TenancyError::TenantNotFound {
                    tenant_id: tenant,
                    attempted: Some(database),
                });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(tenant = %tenant, database = %database, "switched tenant");
        self.context = candidate;
        Ok(())
    }

    async fn reset(&mut self) -> TenancyResult<()> {
        let database = self.config.database.clone();
        if self.session.current_database() != database {
            self.session
                .select_database(&database)
                .await
                .map_err(|e| TenancyError::ConfigurationError {
                    message: format!("failed to connect to default database '{}'", database),
                    source: Some(Box::new(e)),
                })?;
        }

        tracing::debug!(database = %database, "reset to default database");
        self.context = self.context.reset();
        Ok(())
    }

    async fn exists(&mut self, tenant: &str) -> TenancyResult<bool> {
        let (_, database) = self.database_for(tenant)?;
        Ok(self.session.database_exists(&database).await?)
    }

    async fn list_tenants(&mut self) -> TenancyResult<Vec<TenantId>> {
        let databases = self.session.list_databases().await?;
        Ok(databases
            .iter()
            .filter_map(|database| self.tenant_for_database(database))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySession;

    fn adapter(config: TenancyConfig) -> DatabaseAdapter<MemorySession> {
        DatabaseAdapter::new(
            MemorySession::new(config.database.clone()),
            Arc::new(config),
            IdentifierRules::default(),
        )
    }

    #[test]
    fn test_database_name_uses_affixes() {
        let adapter = adapter(TenancyConfig::new().with_database_affixes("tenant_", "_db"));
        let (tenant, name) = adapter.database_for("acme").unwrap();
        assert_eq!(tenant.as_str(), "acme");
        assert_eq!(name, "tenant_acme_db");
    }

    #[test]
    fn test_database_name_length_includes_affixes() {
        let adapter = adapter(TenancyConfig::new().with_database_affixes("tenant_", ""));
        let long = "a".repeat(60);
        assert!(matches!(
            adapter.database_for(&long),
            Err(TenancyError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn test_reserved_database_names() {
        let adapter = adapter(TenancyConfig::new());
        for name in ["helios", "postgres", "template1"] {
            assert!(adapter.database_for(name).is_err(), "{} should be reserved", name);
        }
    }

    #[test]
    fn test_tenant_for_database() {
        let adapter = adapter(TenancyConfig::new().with_database_affixes("t_", ""));
        assert_eq!(
            adapter.tenant_for_database("t_acme").map(TenantId::into_inner),
            Some("acme".to_string())
        );
        assert!(adapter.tenant_for_database("acme").is_none());
        assert!(adapter.tenant_for_database("helios").is_none());
    }

    #[tokio::test]
    async fn test_reset_on_default_database_is_a_no_op_for_the_session() {
        let mut adapter = adapter(TenancyConfig::new());
        adapter.reset().await.unwrap();
        assert_eq!(adapter.session().call_count(), 0);
        assert_eq!(adapter.session().current_database(), "helios");
    }
}
