//! Template schema cloning.

use std::sync::Arc;

use super::dump::SchemaDumper;
use super::rewrite::DumpRewriter;
use crate::config::TenancyConfig;
use crate::error::{ImportStage, TenancyError, TenancyResult};
use crate::session::TenantSession;
use crate::tenant::TenantId;

/// Copies a template schema's structure and bookkeeping rows into a tenant
/// schema.
///
/// The import runs in four stages (dump structure, apply structure, dump
/// rows, apply rows) and stops at the first failure. Nothing is rolled
/// back: a failed import leaves whatever the earlier stages created, and
/// the caller is expected to drop the tenant and retry.
pub struct SchemaCloner {
    dumper: Arc<dyn SchemaDumper>,
    rewriter: DumpRewriter,
    template: String,
    bookkeeping_table: String,
    database: String,
}

impl std::fmt::Debug for SchemaCloner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCloner")
            .field("template", &self.template)
            .field("bookkeeping_table", &self.bookkeeping_table)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl SchemaCloner {
    /// Creates a cloner for the configured template schema.
    pub fn new(dumper: Arc<dyn SchemaDumper>, config: &TenancyConfig) -> TenancyResult<Self> {
        let template = config.template_schema().to_string();
        Ok(Self {
            rewriter: DumpRewriter::new(&template, &config.default_scope)?,
            dumper,
            template,
            bookkeeping_table: config.bookkeeping_table.clone(),
            database: config.database.clone(),
        })
    }

    /// Returns the template schema name.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Imports the template into `tenant`'s (already created) schema.
    ///
    /// Replaying the dump changes the session's search path; callers must
    /// push their own context again afterwards.
    pub async fn import<S: TenantSession>(
        &self,
        session: &mut S,
        tenant: &TenantId,
    ) -> TenancyResult<()> {
        tracing::info!(tenant = %tenant, template = %self.template, "importing template schema");

        let structure = self
            .dumper
            .dump_structure(&self.template, &self.database)
            .await
            .map_err(|e| import_failed(tenant, ImportStage::DumpStructure, e))?;
        session
            .execute(&self.rewriter.rewrite(&structure, tenant))
            .await
            .map_err(|e| import_failed(tenant, ImportStage::ApplyStructure, e))?;

        let rows = self
            .dumper
            .dump_rows(&self.template, &self.bookkeeping_table, &self.database)
            .await
            .map_err(|e| import_failed(tenant, ImportStage::DumpRows, e))?;
        session
            .execute(&self.rewriter.rewrite(&rows, tenant))
            .await
            .map_err(|e| import_failed(tenant, ImportStage::ApplyRows, e))?;

        tracing::info!(tenant = %tenant, "imported template schema");
        Ok(())
    }
}

fn import_failed<E>(tenant: &TenantId, stage: ImportStage, error: E) -> TenancyError
where
    E: std::error::Error + Send + Sync + 'static,
{
    tracing::warn!(tenant = %tenant, stage = %stage, error = %error, "schema import failed");
    TenancyError::ImportFailed {
        tenant_id: tenant.clone(),
        stage,
        message: error.to_string(),
        source: Some(Box::new(error)),
    }
}
