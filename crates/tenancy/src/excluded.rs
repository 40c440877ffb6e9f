//! Registry of models whose tables always live in the default scope.
//!
//! Hosts hand the registry to the adapter factory (or list the tables in
//! [`TenancyConfig::excluded_models`](crate::config::TenancyConfig)) and read
//! [`ExcludedModels::qualified_name`] when building queries. Schema adapters
//! repoint every entry at the default scope on construction and on reset,
//! since consumers may cache a resolved name before any tenant is selected.

use parking_lot::RwLock;

use crate::context::quote_qualified;

/// A table pinned to the default scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedModel {
    /// Unqualified table name.
    pub table: String,
    /// Fully qualified name, updated by [`ExcludedModels::repoint`].
    pub qualified_name: String,
}

/// Ordered set of excluded models shared between the host and its adapters.
#[derive(Debug, Default)]
pub struct ExcludedModels {
    entries: RwLock<Vec<ExcludedModel>>,
}

impl ExcludedModels {
    /// Creates a registry from table names. Duplicates keep their first position.
    pub fn new<I, T>(tables: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut entries: Vec<ExcludedModel> = Vec::new();
        for table in tables {
            let table = table.into();
            if entries.iter().all(|e| e.table != table) {
                entries.push(ExcludedModel {
                    qualified_name: table.clone(),
                    table,
                });
            }
        }
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Points every entry at `scope`.
    pub fn repoint(&self, scope: &str) {
        let mut entries = self.entries.write();
        for entry in entries.iter_mut() {
            entry.qualified_name = quote_qualified(scope, &entry.table);
        }
        tracing::debug!(scope, count = entries.len(), "repointed excluded models");
    }

    /// Returns the current qualified name for `table`.
    pub fn qualified_name(&self, table: &str) -> Option<String> {
        self.entries
            .read()
            .iter()
            .find(|e| e.table == table)
            .map(|e| e.qualified_name.clone())
    }

    /// Returns a snapshot of all entries in order.
    pub fn entries(&self) -> Vec<ExcludedModel> {
        self.entries.read().clone()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
