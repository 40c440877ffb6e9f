//! Dump tool capability.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::DumpConfig;
use crate::context::{quote_identifier, quote_qualified};
use crate::error::DumpError;

/// Produces SQL text for a template schema.
///
/// Output is treated as opaque script text; the cloner only rewrites
/// resolution directives and schema-qualified names before replaying it.
#[async_trait]
pub trait SchemaDumper: Send + Sync {
    /// Dumps the DDL of `schema` (no data, no owners, no privileges).
    async fn dump_structure(&self, schema: &str, database: &str) -> Result<String, DumpError>;

    /// Dumps the rows of `schema.table` as `INSERT` statements.
    async fn dump_rows(
        &self,
        schema: &str,
        table: &str,
        database: &str,
    ) -> Result<String, DumpError>;
}

/// [`SchemaDumper`] that runs the `pg_dump` executable.
#[derive(Debug, Clone)]
pub struct PgDump {
    config: DumpConfig,
}

impl PgDump {
    /// Creates a dumper from its settings.
    pub fn new(config: DumpConfig) -> Self {
        Self { config }
    }

    fn structure_args(schema: &str, database: &str) -> Vec<String> {
        vec![
            "--schema-only".to_string(),
            "--no-owner".to_string(),
            "--no-privileges".to_string(),
            format!("--schema={}", quote_identifier(schema)),
            format!("--dbname={}", database),
        ]
    }

    fn rows_args(schema: &str, table: &str, database: &str) -> Vec<String> {
        vec![
            "--data-only".to_string(),
            "--inserts".to_string(),
            "--no-owner".to_string(),
            "--no-privileges".to_string(),
            format!("--table={}", quote_qualified(schema, table)),
            format!("--dbname={}", database),
        ]
    }

    async fn run(&self, args: Vec<String>) -> Result<String, DumpError> {
        let program = self.config.program.display().to_string();

        let mut command = Command::new(&self.config.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(host) = &self.config.host {
            command.env("PGHOST", host);
        }
        if let Some(port) = self.config.port {
            command.env("PGPORT", port.to_string());
        }
        if let Some(user) = &self.config.user {
            command.env("PGUSER", user);
        }
        if let Some(password) = &self.config.password {
            command.env("PGPASSWORD", password);
        }

        tracing::debug!(program = %program, args = ?args, "running dump tool");
        let output = command.output().await.map_err(|source| DumpError::Spawn {
            program: program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(DumpError::Failed {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|_| DumpError::InvalidOutput { program })
    }
}

#[async_trait]
impl SchemaDumper for PgDump {
    async fn dump_structure(&self, schema: &str, database: &str) -> Result<String, DumpError> {
        self.run(Self::structure_args(schema, database)).await
    }

    async fn dump_rows(
        &self,
        schema: &str,
        table: &str,
        database: &str,
    ) -> Result<String, DumpError> {
        self.run(Self::rows_args(schema, table, database)).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_structure_args() {
        assert_eq!(
            PgDump::structure_args("public", "helios"),
            vec![
                "--schema-only",
                "--no-owner",
                "--no-privileges",
                "--schema=\"public\"",
                "--dbname=helios",
            ]
        );
    }

    #[test]
    fn test_rows_args() {
        assert_eq!(
            PgDump::rows_args("public", "schema_migrations", "helios"),
            vec![
                "--data-only",
                "--inserts",
                "--no-owner",
                "--no-privileges",
                "--table=\"public\".\"schema_migrations\"",
                "--dbname=helios",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let dumper = PgDump::new(DumpConfig {
            program: PathBuf::from("/nonexistent/bin/pg_dump"),
            ..Default::default()
        });
        let err = dumper.dump_structure("public", "helios").await.unwrap_err();
        assert!(matches!(err, DumpError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/bin/pg_dump"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_program_reports_status() {
        let dumper = PgDump::new(DumpConfig {
            program: PathBuf::from("false"),
            ..Default::default()
        });
        let err = dumper.dump_rows("public", "t", "helios").await.unwrap_err();
        assert!(matches!(err, DumpError::Failed { .. }));
    }
}
