//! Helios Tenancy
//!
//! This crate isolates tenants of a PostgreSQL-backed service by giving each
//! tenant its own database or its own schema, and by switching a session's
//! resolution context (`search_path`) so that subsequent queries address the
//! right tenant's data.
//!
//! # Features
//!
//! - **Three isolation strategies**: database-per-tenant, schema-per-tenant,
//!   and schema-per-tenant seeded from a template schema
//! - **Atomic switching**: a session either fully points at the new tenant or
//!   is left untouched
//! - **Scoped execution**: run work under a tenant with a guaranteed restore
//!   of the previous context
//! - **Validated identifiers**: tenant tokens are checked before any
//!   statement is built
//!
//! Enable the PostgreSQL session with a feature flag in `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! helios-tenancy = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! The `testing` feature adds `session::MemorySession`, an in-process
//! catalog fake used by the examples below and by the test suite.
//!
//! # Architecture
//!
//! - [`tenant`] - Tenant identifiers and validation rules
//! - [`context`] - Active tenant and resolution order of a session
//! - [`adapter`] - Tenant lifecycle per isolation strategy
//! - [`clone`] - Template schema dump, rewrite, and replay
//! - [`session`] - Database session abstraction
//! - [`excluded`] - Tables pinned to the default scope
//! - [`config`] - Static configuration
//! - [`error`] - Error types for all operations
//!
//! # Quick Start
//!
//! ```
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! use helios_tenancy::{AdapterFactory, TenancyConfig, TenancyError, TenantAdapter};
//! use helios_tenancy::session::MemorySession;
//!
//! let config = TenancyConfig::new().with_persistent_scopes(["shared"]);
//! let factory = AdapterFactory::new(config).unwrap();
//! let mut adapter = factory
//!     .open(MemorySession::new("helios").with_schema("shared"))
//!     .await
//!     .unwrap();
//!
//! adapter.create("acme").await.unwrap();
//! adapter.switch("acme").await.unwrap();
//! assert_eq!(adapter.context().resolution_order(), vec!["acme", "shared"]);
//!
//! adapter.reset().await.unwrap();
//! assert_eq!(adapter.context().resolution_order(), vec!["public", "shared"]);
//!
//! adapter.drop_tenant("acme").await.unwrap();
//! assert!(matches!(
//!     adapter.switch("acme").await,
//!     Err(TenancyError::TenantNotFound { .. })
//! ));
//! # });
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod adapter;
pub mod clone;
pub mod config;
pub mod context;
pub mod error;
pub mod excluded;
pub mod session;
pub mod tenant;

// Re-export commonly used types at crate root
pub use adapter::{
    AdapterFactory, AdapterVariant, ConfiguredAdapter, DatabaseAdapter, SchemaAdapter,
    SchemaCloneAdapter, TenantAdapter, build_adapter,
};
pub use clone::{PgDump, SchemaCloner, SchemaDumper};
pub use config::{IsolationStrategy, TenancyConfig};
pub use context::ConnectionContext;
pub use error::{ImportStage, SessionError, TenancyError, TenancyResult};
pub use excluded::ExcludedModels;
pub use session::TenantSession;
pub use tenant::TenantId;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
