//! In-memory session for tests (feature `testing`).
//!
//! [`MemorySession`] fakes the slice of a PostgreSQL catalog the adapters
//! touch: databases, schemas, tables with opaque row values, and the session
//! `search_path`. Statements are recognised by a fixed set of patterns
//! (`SET search_path`, `set_config('search_path', ...)`, `CREATE`/`DROP
//! SCHEMA`, `CREATE`/`DROP DATABASE`, `CREATE TABLE`, `INSERT INTO`);
//! anything else is accepted without effect.
//!
//! Like PostgreSQL, setting a search path that names a missing schema is
//! accepted silently; the error only shows up when something resolves
//! through it.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::{Captures, Regex};

use super::TenantSession;
use crate::error::SessionError;

/// A plain or double-quoted identifier.
const NAME: &str = r#"(?:"(?:[^"]|"")+"|[A-Za-z_$][A-Za-z0-9_$]*)"#;

struct StatementPatterns {
    set_search_path: Regex,
    set_config: Regex,
    create_schema: Regex,
    drop_schema: Regex,
    create_database: Regex,
    drop_database: Regex,
    create_table: Regex,
    insert: Regex,
    name: Regex,
}

static PATTERNS: LazyLock<StatementPatterns> = LazyLock::new(|| {
    let compile = |pattern: &str| {
        Regex::new(&pattern.replace("NAME", NAME)).expect("Invalid statement regex")
    };
    StatementPatterns {
        set_search_path: compile(r"(?is)^SET\s+search_path\s*(?:TO\s+|=\s*)(?P<list>.*)$"),
        set_config: compile(r"(?is)set_config\(\s*'search_path'\s*,\s*'(?P<list>[^']*)'"),
        create_schema: compile(
            r"(?is)^CREATE\s+SCHEMA\s+(?P<guard>IF\s+NOT\s+EXISTS\s+)?(?P<name>NAME)\s*$",
        ),
        drop_schema: compile(
            r"(?is)^DROP\s+SCHEMA\s+(?P<guard>IF\s+EXISTS\s+)?(?P<name>NAME)(?P<cascade>\s+CASCADE)?\s*$",
        ),
        create_database: compile(r"(?is)^CREATE\s+DATABASE\s+(?P<name>NAME)(?:\s.*)?$"),
        drop_database: compile(
            r"(?is)^DROP\s+DATABASE\s+(?P<guard>IF\s+EXISTS\s+)?(?P<name>NAME)\s*$",
        ),
        create_table: compile(
            r"(?is)^CREATE\s+TABLE\s+(?P<guard>IF\s+NOT\s+EXISTS\s+)?(?:(?P<schema>NAME)\.)?(?P<table>NAME)\s*\(",
        ),
        insert: compile(
            r"(?is)^INSERT\s+INTO\s+(?:(?P<schema>NAME)\.)?(?P<table>NAME)(?:\s*\([^)]*\))?\s+VALUES\s*(?P<row>.*)$",
        ),
        name: compile("NAME"),
    }
});

#[derive(Debug, Clone, Default)]
struct MemoryDatabase {
    schemas: BTreeMap<String, MemorySchema>,
}

impl MemoryDatabase {
    fn with_public() -> Self {
        let mut db = Self::default();
        db.schemas.insert("public".to_string(), MemorySchema::default());
        db
    }
}

#[derive(Debug, Clone, Default)]
struct MemorySchema {
    tables: BTreeMap<String, Vec<String>>,
}

/// In-process stand-in for a PostgreSQL session.
///
/// # Example
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// use helios_tenancy::session::{MemorySession, TenantSession};
///
/// let mut session = MemorySession::new("helios").with_schema("shared");
/// session.execute("CREATE SCHEMA \"acme\"").await.unwrap();
/// assert!(session.schema_exists("acme").await.unwrap());
/// assert!(session.execute("CREATE SCHEMA \"acme\"").await.unwrap_err().is_already_exists());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct MemorySession {
    databases: BTreeMap<String, MemoryDatabase>,
    current_database: String,
    search_path: Vec<String>,
    executed: Vec<String>,
    calls: usize,
    fail_on: Vec<String>,
}

impl MemorySession {
    /// Creates a session connected to `database`, which gets a `public` schema.
    pub fn new(database: impl Into<String>) -> Self {
        let database = database.into();
        let mut databases = BTreeMap::new();
        databases.insert(database.clone(), MemoryDatabase::with_public());
        Self {
            databases,
            current_database: database,
            search_path: default_search_path(),
            executed: Vec::new(),
            calls: 0,
            fail_on: Vec::new(),
        }
    }

    /// Adds a schema to the current database.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.current_mut().schemas.entry(schema.into()).or_default();
        self
    }

    /// Adds another database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.databases
            .entry(database.into())
            .or_insert_with(MemoryDatabase::with_public);
        self
    }

    /// Adds a table with rows to a schema of the current database, creating
    /// the schema if needed. Rows are stored as the literal text following
    /// `VALUES` in an insert, e.g. `('20240101000000')`.
    pub fn with_table<I, T>(mut self, schema: &str, table: &str, rows: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.current_mut()
            .schemas
            .entry(schema.to_string())
            .or_default()
            .tables
            .insert(table.to_string(), rows.into_iter().map(Into::into).collect());
        self
    }

    /// Makes any statement containing `fragment` fail with a statement error.
    pub fn fail_statements_containing(&mut self, fragment: impl Into<String>) {
        self.fail_on.push(fragment.into());
    }

    /// Clears injected failures.
    pub fn clear_failures(&mut self) {
        self.fail_on.clear();
    }

    /// Returns the session's current search path.
    pub fn search_path(&self) -> &[String] {
        &self.search_path
    }

    /// Returns every statement executed so far, split and trimmed.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Returns the `SET search_path` statements executed so far.
    pub fn search_path_statements(&self) -> Vec<&str> {
        self.executed
            .iter()
            .filter(|s| PATTERNS.set_search_path.is_match(s))
            .map(String::as_str)
            .collect()
    }

    /// Returns how many trait methods have been called.
    pub fn call_count(&self) -> usize {
        self.calls
    }

    /// Returns `true` if the current database has this schema.
    pub fn has_schema(&self, schema: &str) -> bool {
        self.current().schemas.contains_key(schema)
    }

    /// Returns `true` if the database exists.
    pub fn has_database(&self, database: &str) -> bool {
        self.databases.contains_key(database)
    }

    /// Returns the table names of a schema in the current database.
    pub fn tables(&self, schema: &str) -> Vec<String> {
        self.current()
            .schemas
            .get(schema)
            .map(|s| s.tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the rows of `schema.table` in the current database.
    pub fn rows(&self, schema: &str, table: &str) -> Option<&[String]> {
        self.current()
            .schemas
            .get(schema)?
            .tables
            .get(table)
            .map(Vec::as_slice)
    }

    /// Returns the rows of an unqualified table, resolved through the
    /// search path the way a `SELECT * FROM table` would be.
    pub fn select_rows(&self, table: &str) -> Option<&[String]> {
        let schema = self.resolve_table(table)?;
        self.rows(&schema, table)
    }

    fn current(&self) -> &MemoryDatabase {
        self.databases
            .get(&self.current_database)
            .expect("current database is always present")
    }

    fn current_mut(&mut self) -> &mut MemoryDatabase {
        self.databases
            .get_mut(&self.current_database)
            .expect("current database is always present")
    }

    fn resolve_table(&self, table: &str) -> Option<String> {
        let db = self.current();
        self.search_path
            .iter()
            .find(|schema| {
                db.schemas
                    .get(schema.as_str())
                    .is_some_and(|s| s.tables.contains_key(table))
            })
            .cloned()
    }

    fn creation_schema(&self) -> Result<String, SessionError> {
        let db = self.current();
        self.search_path
            .iter()
            .find(|schema| db.schemas.contains_key(schema.as_str()))
            .cloned()
            .ok_or_else(|| SessionError::NotFound {
                message: "no schema has been selected to create in".to_string(),
            })
    }

    fn apply(&mut self, statement: &str) -> Result<(), SessionError> {
        if let Some(fragment) = self.fail_on.iter().find(|f| statement.contains(f.as_str())) {
            return Err(SessionError::statement(format!(
                "injected failure on '{}'",
                fragment
            )));
        }

        let patterns = &*PATTERNS;

        if let Some(caps) = patterns
            .set_search_path
            .captures(statement)
            .or_else(|| patterns.set_config.captures(statement))
        {
            self.search_path = name_list(&caps["list"]);
            return Ok(());
        }

        if let Some(caps) = patterns.create_schema.captures(statement) {
            let name = identifier(&caps["name"]);
            let db = self.current_mut();
            if db.schemas.contains_key(&name) {
                if caps.name("guard").is_some() {
                    return Ok(());
                }
                return Err(SessionError::AlreadyExists {
                    message: format!("schema \"{}\" already exists", name),
                });
            }
            db.schemas.insert(name, MemorySchema::default());
            return Ok(());
        }

        if let Some(caps) = patterns.drop_schema.captures(statement) {
            let name = identifier(&caps["name"]);
            let db = self.current_mut();
            match db.schemas.get(&name) {
                None if caps.name("guard").is_some() => return Ok(()),
                None => {
                    return Err(SessionError::NotFound {
                        message: format!("schema \"{}\" does not exist", name),
                    });
                }
                Some(schema) if !schema.tables.is_empty() && caps.name("cascade").is_none() => {
                    return Err(SessionError::statement(format!(
                        "cannot drop schema {} because other objects depend on it",
                        name
                    )));
                }
                Some(_) => {}
            }
            db.schemas.remove(&name);
            return Ok(());
        }

        if let Some(caps) = patterns.create_database.captures(statement) {
            let name = identifier(&caps["name"]);
            if self.databases.contains_key(&name) {
                return Err(SessionError::AlreadyExists {
                    message: format!("database \"{}\" already exists", name),
                });
            }
            self.databases.insert(name, MemoryDatabase::with_public());
            return Ok(());
        }

        if let Some(caps) = patterns.drop_database.captures(statement) {
            let name = identifier(&caps["name"]);
            if name == self.current_database {
                return Err(SessionError::statement(
                    "cannot drop the currently open database",
                ));
            }
            if self.databases.remove(&name).is_none() && caps.name("guard").is_none() {
                return Err(SessionError::NotFound {
                    message: format!("database \"{}\" does not exist", name),
                });
            }
            return Ok(());
        }

        if let Some(caps) = patterns.create_table.captures(statement) {
            let table = identifier(&caps["table"]);
            let schema = match qualifier(&caps) {
                Some(schema) => schema,
                None => self.creation_schema()?,
            };
            let Some(target) = self.current_mut().schemas.get_mut(&schema) else {
                return Err(SessionError::NotFound {
                    message: format!("schema \"{}\" does not exist", schema),
                });
            };
            if target.tables.contains_key(&table) {
                if caps.name("guard").is_some() {
                    return Ok(());
                }
                return Err(SessionError::AlreadyExists {
                    message: format!("relation \"{}\" already exists", table),
                });
            }
            target.tables.insert(table, Vec::new());
            return Ok(());
        }

        if let Some(caps) = patterns.insert.captures(statement) {
            let table = identifier(&caps["table"]);
            let schema = qualifier(&caps).or_else(|| self.resolve_table(&table));
            let target = match schema {
                Some(schema) => self.current_mut().schemas.get_mut(&schema),
                None => None,
            };
            let rows = target
                .and_then(|schema| schema.tables.get_mut(&table))
                .ok_or_else(|| SessionError::NotFound {
                    message: format!("relation \"{}\" does not exist", table),
                })?;
            rows.push(caps["row"].trim().to_string());
            return Ok(());
        }

        tracing::trace!(statement, "memory session ignoring statement");
        Ok(())
    }
}

#[async_trait]
impl TenantSession for MemorySession {
    async fn execute(&mut self, sql: &str) -> Result<(), SessionError> {
        self.calls += 1;
        for statement in split_statements(sql) {
            self.apply(&statement)?;
            self.executed.push(statement);
        }
        Ok(())
    }

    async fn schema_exists(&mut self, schema: &str) -> Result<bool, SessionError> {
        self.calls += 1;
        Ok(self.has_schema(schema))
    }

    async fn database_exists(&mut self, database: &str) -> Result<bool, SessionError> {
        self.calls += 1;
        Ok(self.has_database(database))
    }

    async fn list_schemas(&mut self) -> Result<Vec<String>, SessionError> {
        self.calls += 1;
        Ok(self.current().schemas.keys().cloned().collect())
    }

    async fn list_databases(&mut self) -> Result<Vec<String>, SessionError> {
        self.calls += 1;
        Ok(self.databases.keys().cloned().collect())
    }

    async fn select_database(&mut self, database: &str) -> Result<(), SessionError> {
        self.calls += 1;
        if !self.databases.contains_key(database) {
            return Err(SessionError::NotFound {
                message: format!("database \"{}\" does not exist", database),
            });
        }
        self.current_database = database.to_string();
        self.search_path = default_search_path();
        Ok(())
    }

    fn current_database(&self) -> &str {
        &self.current_database
    }
}

fn default_search_path() -> Vec<String> {
    vec!["$user".to_string(), "public".to_string()]
}

/// Folds an identifier the way the server does: quoted names keep their
/// case, unquoted names are lower-cased.
fn identifier(raw: &str) -> String {
    match raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        Some(quoted) => quoted.replace("\"\"", "\""),
        None => raw.to_lowercase(),
    }
}

fn qualifier(caps: &Captures<'_>) -> Option<String> {
    caps.name("schema").map(|m| identifier(m.as_str()))
}

fn name_list(list: &str) -> Vec<String> {
    PATTERNS
        .name
        .find_iter(list)
        .map(|m| identifier(m.as_str()))
        .collect()
}

/// Splits a script into statements on lines ending with `;`, skipping blank
/// lines and `--` comments.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(trimmed);
        if trimmed.ends_with(';') {
            statements.push(current.trim_end_matches(';').trim().to_string());
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }
    statements
}
