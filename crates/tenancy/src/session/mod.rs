//! Backing database sessions.
//!
//! Adapters talk to the database through the narrow [`TenantSession`]
//! trait: raw statement execution, catalog existence checks, and
//! connection-level database selection. Errors come back classified as
//! [`SessionError`](crate::error::SessionError) so adapters can tell
//! "already exists" and "not found" apart from real failures.
//!
//! Two implementations ship with the crate:
//!
//! - `PostgresSession` - tokio-postgres connection (feature `postgres`)
//! - `MemorySession` - in-process catalog fake for tests (feature `testing`)

#[cfg(any(test, feature = "testing"))]
mod memory;
#[cfg(feature = "postgres")]
mod postgres;

#[cfg(any(test, feature = "testing"))]
pub use memory::MemorySession;
#[cfg(feature = "postgres")]
pub use postgres::{PostgresSession, PostgresSessionConfig, create_pool};

use async_trait::async_trait;

use crate::error::SessionError;

/// One live database session.
///
/// A session belongs to exactly one adapter. All methods take `&mut self`,
/// so operations on a session are serialized by construction.
#[async_trait]
pub trait TenantSession: Send {
    /// Executes one or more raw statements.
    async fn execute(&mut self, sql: &str) -> Result<(), SessionError>;

    /// Returns `true` if a schema with this exact name exists.
    async fn schema_exists(&mut self, schema: &str) -> Result<bool, SessionError>;

    /// Returns `true` if a database with this exact name exists.
    async fn database_exists(&mut self, database: &str) -> Result<bool, SessionError>;

    /// Lists every schema in the current database.
    async fn list_schemas(&mut self) -> Result<Vec<String>, SessionError>;

    /// Lists every non-template database.
    async fn list_databases(&mut self) -> Result<Vec<String>, SessionError>;

    /// Repoints the session at another database.
    ///
    /// On failure the session must still be connected to the previous
    /// database.
    async fn select_database(&mut self, database: &str) -> Result<(), SessionError>;

    /// Returns the database the session is connected to.
    fn current_database(&self) -> &str;
}
