//! Error types for tenant lifecycle and session operations.
//!
//! [`TenancyError`] is what every adapter operation returns. Backing-store
//! failures arrive as [`SessionError`] values that are already classified by
//! category, so adapters translate them into tenant-level kinds without
//! looking at message text. Dump tool failures are reported as [`DumpError`].

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

use crate::tenant::TenantId;

/// The primary error type for all tenancy operations.
#[derive(Error, Debug)]
pub enum TenancyError {
    /// The tenant's backing schema or database does not exist.
    #[error("tenant not found: {tenant_id}{}", attempted_suffix(.attempted))]
    TenantNotFound {
        tenant_id: TenantId,
        /// The resolution order (or database) the operation tried to apply.
        attempted: Option<String>,
    },

    /// Storage for the tenant already exists.
    #[error("tenant already exists: {tenant_id}")]
    TenantExists { tenant_id: TenantId },

    /// The tenant token failed validation before reaching the backing store.
    #[error("invalid tenant identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    /// A structural clone aborted partway through.
    #[error("schema import for tenant {tenant_id} failed while {stage}: {message}")]
    ImportFailed {
        tenant_id: TenantId,
        stage: ImportStage,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The default context could not be established; the session is unusable.
    #[error("configuration error: {message}")]
    ConfigurationError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Backing-store failure that has no tenant-level meaning.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl TenancyError {
    /// Returns `true` for expected outcomes callers are meant to branch on
    /// (`TenantNotFound`, `TenantExists`).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TenancyError::TenantNotFound { .. } | TenancyError::TenantExists { .. }
        )
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        TenancyError::ConfigurationError {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn not_found(tenant_id: &TenantId) -> Self {
        TenancyError::TenantNotFound {
            tenant_id: tenant_id.clone(),
            attempted: None,
        }
    }
}

fn attempted_suffix(attempted: &Option<String>) -> String {
    attempted
        .as_ref()
        .map(|path| format!(" (attempted: {})", path))
        .unwrap_or_default()
}

/// The step of a structural clone that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    /// Dumping the template schema's DDL.
    DumpStructure,
    /// Replaying the rewritten DDL.
    ApplyStructure,
    /// Dumping the bookkeeping table's rows.
    DumpRows,
    /// Replaying the rewritten row inserts.
    ApplyRows,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportStage::DumpStructure => write!(f, "dumping template structure"),
            ImportStage::ApplyStructure => write!(f, "applying template structure"),
            ImportStage::DumpRows => write!(f, "dumping bookkeeping rows"),
            ImportStage::ApplyRows => write!(f, "applying bookkeeping rows"),
        }
    }
}

/// Classified errors reported by a [`TenantSession`](crate::session::TenantSession).
#[derive(Error, Debug)]
pub enum SessionError {
    /// The catalog object (schema, database, table) already exists.
    #[error("object already exists: {message}")]
    AlreadyExists { message: String },

    /// The catalog object (schema, database, table) does not exist.
    #[error("object not found: {message}")]
    NotFound { message: String },

    /// The connection could not be opened or was lost.
    #[error("connection failed: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Any other statement failure.
    #[error("statement failed: {message}")]
    Statement {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SessionError {
    /// Returns `true` if the store reported an already-existing object.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, SessionError::AlreadyExists { .. })
    }

    /// Returns `true` if the store reported a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SessionError::NotFound { .. })
    }

    pub(crate) fn statement(message: impl Into<String>) -> Self {
        SessionError::Statement {
            message: message.into(),
            source: None,
        }
    }
}

/// Errors from the external dump tool.
#[derive(Error, Debug)]
pub enum DumpError {
    /// The dump program could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The dump program exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    /// The dump output was not valid UTF-8.
    #[error("{program} produced non UTF-8 output")]
    InvalidOutput { program: String },
}

/// Result type alias for tenancy operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for SessionError {
    fn from(err: tokio_postgres::Error) -> Self {
        use tokio_postgres::error::SqlState;

        let message = err.to_string();
        match err.code() {
            Some(code)
                if *code == SqlState::DUPLICATE_SCHEMA
                    || *code == SqlState::DUPLICATE_DATABASE
                    || *code == SqlState::DUPLICATE_TABLE =>
            {
                SessionError::AlreadyExists { message }
            }
            Some(code)
                if *code == SqlState::INVALID_SCHEMA_NAME
                    || *code == SqlState::INVALID_CATALOG_NAME
                    || *code == SqlState::UNDEFINED_OBJECT
                    || *code == SqlState::UNDEFINED_TABLE =>
            {
                SessionError::NotFound { message }
            }
            None if err.is_closed() => SessionError::Connection {
                message,
                source: Some(Box::new(err)),
            },
            _ => SessionError::Statement {
                message,
                source: Some(Box::new(err)),
            },
        }
    }
}
