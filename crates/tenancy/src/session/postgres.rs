//! PostgreSQL session backed by tokio-postgres.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, Object, Pool, Runtime};
use serde::{Deserialize, Serialize};
use tokio_postgres::{Client, NoTls};

use super::TenantSession;
use crate::config::REDACTED;
use crate::error::SessionError;

/// Connection settings for [`PostgresSession`].
#[derive(Clone, Serialize, Deserialize)]
pub struct PostgresSessionConfig {
    /// PostgreSQL host.
    #[serde(default = "default_host")]
    pub host: String,

    /// PostgreSQL port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database the session starts in.
    #[serde(default = "default_dbname")]
    pub dbname: String,

    /// Database user.
    #[serde(default = "default_user")]
    pub user: String,

    /// Database password.
    #[serde(default)]
    pub password: Option<String>,

    /// Maximum number of connections when used through [`create_pool`].
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Debug for PostgresSessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_dbname() -> String {
    "helios".to_string()
}

fn default_user() -> String {
    "helios".to_string()
}

fn default_max_connections() -> usize {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for PostgresSessionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dbname: default_dbname(),
            user: default_user(),
            password: None,
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl PostgresSessionConfig {
    /// Creates a configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `TENANCY_PG_HOST` (default: "localhost")
    /// - `TENANCY_PG_PORT` (default: 5432)
    /// - `TENANCY_PG_DBNAME` (default: "helios")
    /// - `TENANCY_PG_USER` (default: "helios")
    /// - `TENANCY_PG_PASSWORD`
    /// - `TENANCY_PG_MAX_CONNECTIONS` (default: 10)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            host: lookup("TENANCY_PG_HOST").unwrap_or_else(default_host),
            port: lookup("TENANCY_PG_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(default_port),
            dbname: lookup("TENANCY_PG_DBNAME").unwrap_or_else(default_dbname),
            user: lookup("TENANCY_PG_USER").unwrap_or_else(default_user),
            password: lookup("TENANCY_PG_PASSWORD"),
            max_connections: lookup("TENANCY_PG_MAX_CONNECTIONS")
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(default_max_connections),
            ..Default::default()
        }
    }

    fn for_database(&self, database: &str) -> Self {
        Self {
            dbname: database.to_string(),
            ..self.clone()
        }
    }
}

/// Creates a connection pool for the configured database.
///
/// Each checked-out connection should be wrapped in its own
/// [`PostgresSession`] and adapter; a session's search path belongs to the
/// connection, not the pool.
pub fn create_pool(config: &PostgresSessionConfig) -> Result<Pool, SessionError> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.dbname = Some(config.dbname.clone());
    cfg.user = Some(config.user.clone());
    cfg.password = config.password.clone();
    cfg.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));

    let pool = cfg
        .builder(NoTls)
        .map_err(|e| SessionError::Connection {
            message: format!("Failed to create pool builder: {}", e),
            source: None,
        })?
        .max_size(config.max_connections)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| SessionError::Connection {
            message: e.to_string(),
            source: None,
        })?;

    Ok(pool)
}

enum Handle {
    Pooled(Object),
    Direct(Client),
}

/// A [`TenantSession`] over one PostgreSQL connection.
///
/// Switching databases opens a fresh direct connection, so a session that
/// started from a pooled object releases it back to the pool on its first
/// database switch.
pub struct PostgresSession {
    config: PostgresSessionConfig,
    handle: Handle,
}

impl Debug for PostgresSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSession")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.dbname)
            .field(
                "pooled",
                &matches!(self.handle, Handle::Pooled(_)),
            )
            .finish_non_exhaustive()
    }
}

impl PostgresSession {
    /// Opens a direct connection.
    pub async fn connect(config: PostgresSessionConfig) -> Result<Self, SessionError> {
        let client = connect_direct(&config).await?;
        Ok(Self {
            config,
            handle: Handle::Direct(client),
        })
    }

    /// Checks a connection out of `pool`. `config` must describe the same
    /// server the pool connects to; it is used for later database switches.
    pub async fn from_pool(
        pool: &Pool,
        config: PostgresSessionConfig,
    ) -> Result<Self, SessionError> {
        let object = pool.get().await.map_err(|e| SessionError::Connection {
            message: e.to_string(),
            source: Some(Box::new(e)),
        })?;
        Ok(Self {
            config,
            handle: Handle::Pooled(object),
        })
    }

    /// Returns the underlying client for running application queries.
    pub fn client(&self) -> &Client {
        match &self.handle {
            Handle::Pooled(object) => object,
            Handle::Direct(client) => client,
        }
    }
}

async fn connect_direct(config: &PostgresSessionConfig) -> Result<Client, SessionError> {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&config.host)
        .port(config.port)
        .dbname(&config.dbname)
        .user(&config.user)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs));
    if let Some(password) = &config.password {
        pg.password(password);
    }

    let (client, connection) = pg.connect(NoTls).await.map_err(|e| match e.code() {
        // server-side refusals (unknown database, auth) carry a SQLSTATE
        Some(_) => SessionError::from(e),
        None => SessionError::Connection {
            message: e.to_string(),
            source: Some(Box::new(e)),
        },
    })?;

    let database = config.dbname.clone();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(database = %database, error = %e, "postgres connection closed with error");
        }
    });

    Ok(client)
}

#[async_trait]
impl TenantSession for PostgresSession {
    async fn execute(&mut self, sql: &str) -> Result<(), SessionError> {
        self.client().batch_execute(sql).await?;
        Ok(())
    }

    async fn schema_exists(&mut self, schema: &str) -> Result<bool, SessionError> {
        let row = self
            .client()
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM pg_namespace WHERE nspname = $1)",
                &[&schema],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn database_exists(&mut self, database: &str) -> Result<bool, SessionError> {
        let row = self
            .client()
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)",
                &[&database],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn list_schemas(&mut self) -> Result<Vec<String>, SessionError> {
        let rows = self
            .client()
            .query("SELECT nspname FROM pg_namespace ORDER BY nspname", &[])
            .await?;
        rows.iter()
            .map(|row| row.try_get(0).map_err(SessionError::from))
            .collect()
    }

    async fn list_databases(&mut self) -> Result<Vec<String>, SessionError> {
        let rows = self
            .client()
            .query(
                "SELECT datname FROM pg_database WHERE NOT datistemplate ORDER BY datname",
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| row.try_get(0).map_err(SessionError::from))
            .collect()
    }

    async fn select_database(&mut self, database: &str) -> Result<(), SessionError> {
        let config = self.config.for_database(database);
        // the old connection stays in place until the new one is up
        let client = connect_direct(&config).await?;
        tracing::debug!(from = %self.config.dbname, to = %database, "switched database");
        self.config = config;
        self.handle = Handle::Direct(client);
        Ok(())
    }

    fn current_database(&self) -> &str {
        &self.config.dbname
    }
}
