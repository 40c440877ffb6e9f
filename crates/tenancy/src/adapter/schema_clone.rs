//! Schema-per-tenant adapter that seeds new schemas from a template.

use std::sync::Arc;

use async_trait::async_trait;

use super::TenantAdapter;
use super::schema::SchemaAdapter;
use crate::clone::SchemaCloner;
use crate::config::IsolationStrategy;
use crate::context::ConnectionContext;
use crate::error::{TenancyError, TenancyResult};
use crate::excluded::ExcludedModels;
use crate::session::TenantSession;
use crate::tenant::TenantId;

/// [`SchemaAdapter`] plus a [`SchemaCloner`].
///
/// Lifecycle operations behave exactly like the schema adapter's;
/// [`import_schema`](SchemaCloneAdapter::import_schema) fills a created
/// schema with the template's structure and bookkeeping rows.
#[derive(Debug)]
pub struct SchemaCloneAdapter<S> {
    schema: SchemaAdapter<S>,
    cloner: SchemaCloner,
}

impl<S: TenantSession> SchemaCloneAdapter<S> {
    pub(crate) fn new(schema: SchemaAdapter<S>, cloner: SchemaCloner) -> Self {
        Self { schema, cloner }
    }

    /// Returns the session.
    pub fn session(&self) -> &S {
        self.schema.session()
    }

    /// Returns the session mutably.
    pub fn session_mut(&mut self) -> &mut S {
        self.schema.session_mut()
    }

    /// Returns the shared excluded-model registry.
    pub fn excluded_models(&self) -> &Arc<ExcludedModels> {
        self.schema.excluded_models()
    }

    /// Returns the cloner.
    pub fn cloner(&self) -> &SchemaCloner {
        &self.cloner
    }

    pub(crate) fn validate(&self, raw: &str) -> TenancyResult<TenantId> {
        self.schema.validate(raw)
    }

    /// Copies the template schema into `tenant`'s existing schema.
    ///
    /// Not idempotent: running it twice replays the same DDL and fails with
    /// [`TenancyError::ImportFailed`]. A failed import is not rolled back.
    /// The active context is pushed again afterwards whatever the outcome,
    /// since the replayed dump sets its own search path.
    pub async fn import_schema(&mut self, tenant: &str) -> TenancyResult<()> {
        let tenant = self.validate(tenant)?;
        if !self.schema.session.schema_exists(tenant.as_str()).await? {
            return Err(TenancyError::not_found(&tenant));
        }

        let imported = self.cloner.import(&mut self.schema.session, &tenant).await;
        let restored = self.schema.reapply().await;

        if let (Err(_), Err(restore_error)) = (&imported, &restored) {
            tracing::warn!(tenant = %tenant, error = %restore_error, "failed to restore search path after import");
        }
        imported?;
        restored
    }
}

#[async_trait]
impl<S: TenantSession> TenantAdapter for SchemaCloneAdapter<S> {
    fn strategy(&self) -> IsolationStrategy {
        IsolationStrategy::SchemaClone
    }

    fn context(&self) -> &ConnectionContext {
        self.schema.context()
    }

    async fn create(&mut self, tenant: &str) -> TenancyResult<TenantId> {
        self.schema.create(tenant).await
    }

    async fn drop_tenant(&mut self, tenant: &str) -> TenancyResult<()> {
        self.schema.drop_tenant(tenant).await
    }

    async fn switch(&mut self, tenant: &str) -> TenancyResult<()> {
        self.schema.switch(tenant).await
    }

    async fn reset(&mut self) -> TenancyResult<()> {
        self.schema.reset().await
    }

    async fn exists(&mut self, tenant: &str) -> TenancyResult<bool> {
        self.schema.exists(tenant).await
    }

    async fn list_tenants(&mut self) -> TenancyResult<Vec<TenantId>> {
        self.schema.list_tenants().await
    }
}
