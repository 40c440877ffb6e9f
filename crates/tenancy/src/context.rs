//! Connection context: the active tenant and the resolution order a session
//! uses to find unqualified objects.
//!
//! A [`ConnectionContext`] is pure data. It becomes effective only once an
//! adapter pushes its [`set_search_path_sql`](ConnectionContext::set_search_path_sql)
//! to the live session; adapters build a candidate context, push it, and
//! commit it only when the push succeeded.

use crate::tenant::TenantId;

/// The active tenant and resolution order for one database session.
///
/// # Resolution Order
///
/// The order is always `[current_tenant or default_scope] ++ persistent_scopes`,
/// with any persistent scope equal to the head (or repeated) left out:
///
/// ```
/// use helios_tenancy::context::ConnectionContext;
/// use helios_tenancy::tenant::TenantId;
///
/// let ctx = ConnectionContext::new("public", vec!["shared".to_string()]);
/// assert_eq!(ctx.resolution_order(), vec!["public", "shared"]);
///
/// let acme = ctx.switched_to(TenantId::parse("acme").unwrap());
/// assert_eq!(acme.resolution_order(), vec!["acme", "shared"]);
/// assert_eq!(acme.search_path(), "\"acme\", \"shared\"");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    current_tenant: Option<TenantId>,
    default_scope: String,
    persistent_scopes: Vec<String>,
    stale: bool,
}

impl ConnectionContext {
    /// Creates a default context (no tenant selected).
    pub fn new(default_scope: impl Into<String>, persistent_scopes: Vec<String>) -> Self {
        Self {
            current_tenant: None,
            default_scope: default_scope.into(),
            persistent_scopes,
            stale: false,
        }
    }

    /// Returns the active tenant, or `None` when the default scope is active.
    pub fn current_tenant(&self) -> Option<&TenantId> {
        self.current_tenant.as_ref()
    }

    /// Returns the default scope name.
    pub fn default_scope(&self) -> &str {
        &self.default_scope
    }

    /// Returns the persistent scopes.
    pub fn persistent_scopes(&self) -> &[String] {
        &self.persistent_scopes
    }

    /// Returns `true` if the active tenant's storage was dropped while it
    /// was active. Cleared by the next switch or reset.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Returns the first entry of the resolution order.
    pub fn head(&self) -> &str {
        self.current_tenant
            .as_ref()
            .map(TenantId::as_str)
            .unwrap_or(&self.default_scope)
    }

    /// Returns the full resolution order.
    pub fn resolution_order(&self) -> Vec<&str> {
        let mut order = vec![self.head()];
        for scope in &self.persistent_scopes {
            if !order.contains(&scope.as_str()) {
                order.push(scope);
            }
        }
        order
    }

    /// Renders the resolution order as a comma-separated list of quoted
    /// identifiers.
    pub fn search_path(&self) -> String {
        self.resolution_order()
            .into_iter()
            .map(quote_identifier)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Generates the statement that applies this context to a session.
    pub fn set_search_path_sql(&self) -> String {
        format!("SET search_path TO {}", self.search_path())
    }

    /// Returns a copy of this context with `tenant` active.
    pub fn switched_to(&self, tenant: TenantId) -> Self {
        Self {
            current_tenant: Some(tenant),
            default_scope: self.default_scope.clone(),
            persistent_scopes: self.persistent_scopes.clone(),
            stale: false,
        }
    }

    /// Returns a copy of this context with the default scope active.
    pub fn reset(&self) -> Self {
        Self::new(self.default_scope.clone(), self.persistent_scopes.clone())
    }

    /// Marks the context stale if `tenant` is the active tenant.
    pub(crate) fn invalidate(&mut self, tenant: &TenantId) {
        if self.current_tenant.as_ref() == Some(tenant) {
            self.stale = true;
        }
    }
}

/// Quotes a SQL identifier, doubling embedded quotes.
pub fn quote_identifier(id: &str) -> String {
    format!("\"{}\"", id.replace('"', "\"\""))
}

/// Quotes a schema-qualified name.
pub fn quote_qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(name))
}
