//! Shared fixtures for the tenancy integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use helios_tenancy::adapter::{AdapterFactory, ConfiguredAdapter};
use helios_tenancy::clone::SchemaDumper;
use helios_tenancy::config::{IsolationStrategy, TenancyConfig};
use helios_tenancy::error::DumpError;
use helios_tenancy::session::MemorySession;

/// Rows of the template's migration bookkeeping table.
pub const TEMPLATE_MIGRATIONS: [&str; 2] = ["('20240101000000')", "('20240215093000')"];

/// What `pg_dump --schema-only` prints for the template schema.
pub const TEMPLATE_STRUCTURE: &str = "\
--
-- PostgreSQL database dump
--

SET statement_timeout = 0;
SET lock_timeout = 0;
SET idle_in_transaction_session_timeout = 0;
SET client_encoding = 'UTF8';
SET standard_conforming_strings = on;
SELECT pg_catalog.set_config('search_path', '', false);
SET check_function_bodies = false;
SET row_security = off;

CREATE TABLE public.schema_migrations (
    version character varying NOT NULL
);

CREATE TABLE public.users (
    id bigint NOT NULL,
    email text
);

CREATE INDEX index_users_on_email ON public.users USING btree (email);

--
-- PostgreSQL database dump complete
--
";

/// What `pg_dump --data-only --inserts` prints for the bookkeeping table.
pub const TEMPLATE_ROWS: &str = "\
SET statement_timeout = 0;
SET lock_timeout = 0;
SELECT pg_catalog.set_config('search_path', '', false);

INSERT INTO public.schema_migrations VALUES ('20240101000000');
INSERT INTO public.schema_migrations VALUES ('20240215093000');
";

/// The configuration of the reference scenario: default scope `public`,
/// persistent scope `shared`.
pub fn scenario_config() -> TenancyConfig {
    TenancyConfig::new()
        .with_persistent_scopes(["shared"])
        .with_excluded_models(["users"])
}

/// A session whose default database holds the template (`public`) and the
/// persistent scope (`shared`).
pub fn scenario_session() -> MemorySession {
    MemorySession::new("helios")
        .with_schema("shared")
        .with_table("public", "schema_migrations", TEMPLATE_MIGRATIONS)
        .with_table("public", "users", Vec::<String>::new())
}

/// Opens a schema adapter on the scenario session.
pub async fn open_schema_adapter() -> ConfiguredAdapter<MemorySession> {
    AdapterFactory::new(scenario_config())
        .expect("valid config")
        .open(scenario_session())
        .await
        .expect("reset succeeds")
}

/// Opens a schema-clone adapter on the scenario session with `dumper`.
pub async fn open_clone_adapter(dumper: Arc<FakeDumper>) -> ConfiguredAdapter<MemorySession> {
    AdapterFactory::new(scenario_config().with_strategy(IsolationStrategy::SchemaClone))
        .expect("valid config")
        .with_dumper(dumper)
        .open(scenario_session())
        .await
        .expect("reset succeeds")
}

/// Opens a database adapter with the given affixes.
pub async fn open_database_adapter(prefix: &str, suffix: &str) -> ConfiguredAdapter<MemorySession> {
    let config = TenancyConfig::new()
        .with_strategy(IsolationStrategy::Database)
        .with_database_affixes(prefix, suffix);
    AdapterFactory::new(config)
        .expect("valid config")
        .open(MemorySession::new("helios"))
        .await
        .expect("reset succeeds")
}

/// Stage at which [`FakeDumper`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Structure,
    Rows,
}

/// Canned dump tool that records every invocation.
#[derive(Debug)]
pub struct FakeDumper {
    structure: String,
    rows: String,
    fail_at: Mutex<Option<FailAt>>,
    calls: Mutex<Vec<String>>,
}

impl Default for FakeDumper {
    fn default() -> Self {
        Self {
            structure: TEMPLATE_STRUCTURE.to_string(),
            rows: TEMPLATE_ROWS.to_string(),
            fail_at: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeDumper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_at(stage: FailAt) -> Arc<Self> {
        let dumper = Self::default();
        *dumper.fail_at.lock() = Some(stage);
        Arc::new(dumper)
    }

    pub fn set_failure(&self, stage: Option<FailAt>) {
        *self.fail_at.lock() = stage;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn check(&self, stage: FailAt) -> Result<(), DumpError> {
        if *self.fail_at.lock() == Some(stage) {
            return Err(DumpError::Failed {
                program: "pg_dump".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "pg_dump: error: connection to server failed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SchemaDumper for FakeDumper {
    async fn dump_structure(&self, schema: &str, database: &str) -> Result<String, DumpError> {
        self.calls
            .lock()
            .push(format!("structure {} {}", schema, database));
        self.check(FailAt::Structure)?;
        Ok(self.structure.clone())
    }

    async fn dump_rows(
        &self,
        schema: &str,
        table: &str,
        database: &str,
    ) -> Result<String, DumpError> {
        self.calls
            .lock()
            .push(format!("rows {} {} {}", schema, table, database));
        self.check(FailAt::Rows)?;
        Ok(self.rows.clone())
    }
}
