//! Tenant adapters.
//!
//! A tenant adapter owns one [`TenantSession`] and one
//! [`ConnectionContext`] and implements the tenant lifecycle for one
//! isolation strategy:
//!
//! | Strategy | Adapter | Storage | Switch |
//! |----------|---------|---------|--------|
//! | `database` | [`DatabaseAdapter`] | one database per tenant | reconnect |
//! | `schema` | [`SchemaAdapter`] | one schema per tenant | `SET search_path` |
//! | `schema_clone` | [`SchemaCloneAdapter`] | schema seeded from a template | `SET search_path` |
//!
//! The [`AdapterFactory`] picks the variant from configuration and returns a
//! [`ConfiguredAdapter`], which adds scoped execution
//! ([`with_tenant`](ConfiguredAdapter::with_tenant)) on top of the shared
//! [`TenantAdapter`] contract.
//!
//! # Lifecycle
//!
//! ```text
//! construct -> reset -> (switch | reset)* ; drop_tenant allowed at any time
//! ```

mod database;
mod factory;
mod schema;
mod schema_clone;

pub use database::DatabaseAdapter;
pub use factory::{AdapterFactory, build_adapter};
pub use schema::SchemaAdapter;
pub use schema_clone::SchemaCloneAdapter;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::IsolationStrategy;
use crate::context::ConnectionContext;
use crate::error::{TenancyError, TenancyResult};
use crate::excluded::ExcludedModels;
use crate::session::TenantSession;
use crate::tenant::TenantId;

/// Tenant lifecycle and context switching for one session.
///
/// All operations validate the raw tenant token before touching the
/// session; an invalid token fails with
/// [`TenancyError::InvalidIdentifier`] and issues no statement.
#[async_trait]
pub trait TenantAdapter: Send {
    /// Returns the isolation strategy this adapter implements.
    fn strategy(&self) -> IsolationStrategy;

    /// Returns the live connection context.
    fn context(&self) -> &ConnectionContext;

    /// Returns the active tenant, or `None` when the default scope is active.
    fn current_tenant(&self) -> Option<&TenantId> {
        self.context().current_tenant()
    }

    /// Provisions storage for `tenant`. Fails with
    /// [`TenancyError::TenantExists`] if the storage is already there. The
    /// active context is not changed.
    async fn create(&mut self, tenant: &str) -> TenancyResult<TenantId>;

    /// Removes `tenant`'s storage. Fails with [`TenancyError::TenantNotFound`]
    /// if it is absent. Dropping the active tenant marks the context stale.
    async fn drop_tenant(&mut self, tenant: &str) -> TenancyResult<()>;

    /// Makes `tenant` active. Either the session fully points at the tenant
    /// afterwards or nothing changed.
    async fn switch(&mut self, tenant: &str) -> TenancyResult<()>;

    /// Restores the default context. Failures are reported as
    /// [`TenancyError::ConfigurationError`]; the session should be discarded.
    async fn reset(&mut self) -> TenancyResult<()>;

    /// Returns `true` if `tenant`'s storage exists.
    async fn exists(&mut self, tenant: &str) -> TenancyResult<bool>;

    /// Lists tenants found in the catalog.
    async fn list_tenants(&mut self) -> TenancyResult<Vec<TenantId>>;
}

/// The concrete adapter chosen from configuration.
#[derive(Debug)]
pub enum AdapterVariant<S> {
    /// One database per tenant.
    Database(DatabaseAdapter<S>),
    /// One schema per tenant.
    Schema(SchemaAdapter<S>),
    /// One schema per tenant, cloned from a template.
    SchemaClone(SchemaCloneAdapter<S>),
}

impl<S: TenantSession> AdapterVariant<S> {
    fn as_adapter(&self) -> &dyn TenantAdapter {
        match self {
            AdapterVariant::Database(adapter) => adapter,
            AdapterVariant::Schema(adapter) => adapter,
            AdapterVariant::SchemaClone(adapter) => adapter,
        }
    }

    fn as_adapter_mut(&mut self) -> &mut dyn TenantAdapter {
        match self {
            AdapterVariant::Database(adapter) => adapter,
            AdapterVariant::Schema(adapter) => adapter,
            AdapterVariant::SchemaClone(adapter) => adapter,
        }
    }

    /// Checks a raw tenant token against the variant's rules without
    /// touching the session.
    pub fn validate(&self, tenant: &str) -> TenancyResult<TenantId> {
        match self {
            AdapterVariant::Database(adapter) => adapter.database_for(tenant).map(|(id, _)| id),
            AdapterVariant::Schema(adapter) => adapter.validate(tenant),
            AdapterVariant::SchemaClone(adapter) => adapter.validate(tenant),
        }
    }

    fn session(&self) -> &S {
        match self {
            AdapterVariant::Database(adapter) => adapter.session(),
            AdapterVariant::Schema(adapter) => adapter.session(),
            AdapterVariant::SchemaClone(adapter) => adapter.session(),
        }
    }

    fn session_mut(&mut self) -> &mut S {
        match self {
            AdapterVariant::Database(adapter) => adapter.session_mut(),
            AdapterVariant::Schema(adapter) => adapter.session_mut(),
            AdapterVariant::SchemaClone(adapter) => adapter.session_mut(),
        }
    }
}

/// Context to return to once a scoped operation ends.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Restore {
    Default,
    Tenant(TenantId),
}

/// An adapter built from configuration.
///
/// Besides forwarding the [`TenantAdapter`] contract to the selected
/// variant, it runs work under a tenant with a guaranteed restore of the
/// previous context. If a scoped future is dropped before it finishes, the
/// restore is recorded and applied before the adapter's next operation.
#[derive(Debug)]
pub struct ConfiguredAdapter<S> {
    inner: AdapterVariant<S>,
    pending_restore: Option<Restore>,
}

impl<S: TenantSession> ConfiguredAdapter<S> {
    pub(crate) fn new(inner: AdapterVariant<S>) -> Self {
        Self {
            inner,
            pending_restore: None,
        }
    }

    /// Returns the selected variant.
    pub fn variant(&self) -> &AdapterVariant<S> {
        &self.inner
    }

    /// Returns the session.
    pub fn session(&self) -> &S {
        self.inner.session()
    }

    /// Returns the session mutably, for running queries in the active context.
    pub fn session_mut(&mut self) -> &mut S {
        self.inner.session_mut()
    }

    /// Returns the excluded-model registry for search-path strategies.
    pub fn excluded_models(&self) -> Option<&Arc<ExcludedModels>> {
        match &self.inner {
            AdapterVariant::Database(_) => None,
            AdapterVariant::Schema(adapter) => Some(adapter.excluded_models()),
            AdapterVariant::SchemaClone(adapter) => Some(adapter.excluded_models()),
        }
    }

    /// Returns `true` if an interrupted scoped operation left a restore
    /// that has not been applied yet.
    pub fn has_pending_restore(&self) -> bool {
        self.pending_restore.is_some()
    }

    /// Copies the template schema into `tenant`'s schema. Only available
    /// with the `schema_clone` strategy.
    pub async fn import_schema(&mut self, tenant: &str) -> TenancyResult<()> {
        self.inner.validate(tenant)?;
        self.settle().await?;
        match &mut self.inner {
            AdapterVariant::SchemaClone(adapter) => adapter.import_schema(tenant).await,
            other => Err(TenancyError::configuration(format!(
                "import_schema requires the schema_clone strategy (configured: {})",
                other.as_adapter().strategy()
            ))),
        }
    }

    /// Creates `tenant` and, with the `schema_clone` strategy, imports the
    /// template into it. An import failure is returned unchanged and the
    /// partially populated schema is left in place.
    pub async fn create_tenant(&mut self, tenant: &str) -> TenancyResult<TenantId> {
        let tenant = self.create(tenant).await?;
        if let AdapterVariant::SchemaClone(adapter) = &mut self.inner {
            adapter.import_schema(tenant.as_str()).await?;
        }
        Ok(tenant)
    }

    /// Runs `op` with `tenant` active, then restores the previous context.
    ///
    /// The restore happens whether `op` succeeds or fails; `op`'s error wins
    /// over a restore error. If `tenant` does not exist, `op` is not run.
    /// The restore is recorded before the switch starts, so dropping the
    /// future at any point leaves it for the next operation to apply.
    ///
    /// ```
    /// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
    /// use helios_tenancy::adapter::{AdapterFactory, TenantAdapter};
    /// use helios_tenancy::config::TenancyConfig;
    /// use helios_tenancy::error::TenancyResult;
    /// use helios_tenancy::session::MemorySession;
    ///
    /// let factory = AdapterFactory::new(TenancyConfig::new()).unwrap();
    /// let mut adapter = factory.open(MemorySession::new("helios")).await.unwrap();
    /// adapter.create("acme").await.unwrap();
    ///
    /// let path = adapter
    ///     .with_tenant("acme", async |session: &mut MemorySession| -> TenancyResult<Vec<String>> {
    ///         Ok(session.search_path().to_vec())
    ///     })
    ///     .await
    ///     .unwrap();
    ///
    /// assert_eq!(path, vec!["acme"]);
    /// assert!(adapter.current_tenant().is_none());
    /// # });
    /// ```
    pub async fn with_tenant<T, F>(&mut self, tenant: &str, op: F) -> TenancyResult<T>
    where
        F: AsyncFnOnce(&mut S) -> TenancyResult<T>,
    {
        self.inner.validate(tenant)?;
        self.settle().await?;
        self.pending_restore = Some(self.restore_point());

        if let Err(e) = self.inner.as_adapter_mut().switch(tenant).await {
            // a failed switch leaves the context untouched
            self.pending_restore = None;
            return Err(e);
        }

        let outcome = op(self.inner.session_mut()).await;
        let restored = self.settle().await;
        finish_scoped(outcome, restored)
    }

    /// Runs `op` under every tenant [`list_tenants`](TenantAdapter::list_tenants)
    /// returns, then restores the previous context. Stops at the first error.
    /// Returns the tenants visited.
    pub async fn for_each_tenant<F>(&mut self, mut op: F) -> TenancyResult<Vec<TenantId>>
    where
        F: AsyncFnMut(&TenantId, &mut S) -> TenancyResult<()>,
    {
        self.settle().await?;
        let tenants = self.inner.as_adapter_mut().list_tenants().await?;
        self.pending_restore = Some(self.restore_point());

        let mut outcome = Ok(());
        for tenant in &tenants {
            outcome = match self.inner.as_adapter_mut().switch(tenant.as_str()).await {
                Ok(()) => op(tenant, self.inner.session_mut()).await,
                Err(e) => Err(e),
            };
            if outcome.is_err() {
                break;
            }
        }

        let restored = self.settle().await;
        finish_scoped(outcome.map(|()| tenants), restored)
    }

    fn restore_point(&self) -> Restore {
        let context = self.inner.as_adapter().context();
        match context.current_tenant() {
            Some(tenant) if !context.is_stale() => Restore::Tenant(tenant.clone()),
            _ => Restore::Default,
        }
    }

    /// Applies a recorded restore, if any. A failed restore stays recorded.
    async fn settle(&mut self) -> TenancyResult<()> {
        let Some(restore) = self.pending_restore.take() else {
            return Ok(());
        };

        let adapter = self.inner.as_adapter_mut();
        let result = match &restore {
            Restore::Default => adapter.reset().await,
            Restore::Tenant(tenant) => match adapter.switch(tenant.as_str()).await {
                Err(TenancyError::TenantNotFound { .. }) => {
                    tracing::warn!(tenant = %tenant, "previous tenant is gone, restoring default scope");
                    adapter.reset().await
                }
                other => other,
            },
        };

        if result.is_err() {
            self.pending_restore = Some(restore);
        }
        result
    }
}

fn finish_scoped<T>(outcome: TenancyResult<T>, restored: TenancyResult<()>) -> TenancyResult<T> {
    match (outcome, restored) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(restore_error)) => {
            tracing::warn!(error = %restore_error, "failed to restore context after scoped operation");
            Err(e)
        }
    }
}

#[async_trait]
impl<S: TenantSession> TenantAdapter for ConfiguredAdapter<S> {
    fn strategy(&self) -> IsolationStrategy {
        self.inner.as_adapter().strategy()
    }

    fn context(&self) -> &ConnectionContext {
        self.inner.as_adapter().context()
    }

    async fn create(&mut self, tenant: &str) -> TenancyResult<TenantId> {
        self.inner.validate(tenant)?;
        self.settle().await?;
        self.inner.as_adapter_mut().create(tenant).await
    }

    async fn drop_tenant(&mut self, tenant: &str) -> TenancyResult<()> {
        self.inner.validate(tenant)?;
        self.settle().await?;
        self.inner.as_adapter_mut().drop_tenant(tenant).await
    }

    async fn switch(&mut self, tenant: &str) -> TenancyResult<()> {
        self.inner.validate(tenant)?;
        self.settle().await?;
        self.inner.as_adapter_mut().switch(tenant).await
    }

    async fn reset(&mut self) -> TenancyResult<()> {
        // an explicit reset supersedes any recorded restore
        self.pending_restore = None;
        self.inner.as_adapter_mut().reset().await
    }

    async fn exists(&mut self, tenant: &str) -> TenancyResult<bool> {
        self.inner.validate(tenant)?;
        self.settle().await?;
        self.inner.as_adapter_mut().exists(tenant).await
    }

    async fn list_tenants(&mut self) -> TenancyResult<Vec<TenantId>> {
        self.settle().await?;
        self.inner.as_adapter_mut().list_tenants().await
    }
}
