//! Identifier validation rules.

use regex::Regex;

use super::id::TenantId;
use crate::error::{TenancyError, TenancyResult};

/// PostgreSQL identifier length limit in bytes.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Default pattern tenant identifiers must match.
pub const DEFAULT_IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_-]*$";

/// Characters that are never accepted, whatever the configured pattern says.
const FORBIDDEN_CHARS: &[char] = &['"', '\'', ';', '\\', '\0'];

/// Validation rules applied to raw tenant tokens before any statement is built.
///
/// Besides the configurable pattern, the rules carry a set of reserved names
/// (the default scope, persistent scopes, administrative databases) that can
/// never be used as tenants, and reserved prefixes such as `pg_`.
#[derive(Debug, Clone)]
pub struct IdentifierRules {
    pattern: Regex,
    max_length: usize,
    reserved: Vec<String>,
    reserved_prefixes: Vec<String>,
}

impl Default for IdentifierRules {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_IDENTIFIER_PATTERN).expect("default pattern is valid"),
            max_length: MAX_IDENTIFIER_LENGTH,
            reserved: Vec::new(),
            reserved_prefixes: Vec::new(),
        }
    }
}

impl IdentifierRules {
    /// Creates rules from a regex pattern.
    pub fn new(pattern: &str) -> TenancyResult<Self> {
        let pattern = Regex::new(pattern).map_err(|e| TenancyError::ConfigurationError {
            message: format!("invalid identifier pattern '{}'", pattern),
            source: Some(Box::new(e)),
        })?;
        Ok(Self {
            pattern,
            ..Default::default()
        })
    }

    /// Adds names that are never valid tenants.
    pub fn with_reserved<I, T>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.reserved.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds prefixes that are never valid for tenants.
    pub fn with_reserved_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reserved_prefixes.push(prefix.into());
        self
    }

    /// Validates a raw token and returns the tenant ID.
    pub fn validate(&self, raw: &str) -> TenancyResult<TenantId> {
        let invalid = |reason: String| TenancyError::InvalidIdentifier {
            identifier: raw.to_string(),
            reason,
        };

        if raw.is_empty() {
            return Err(invalid("identifier is empty".to_string()));
        }
        if let Some(c) = raw.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
            return Err(invalid(format!("contains forbidden character {:?}", c)));
        }
        if raw.len() > self.max_length {
            return Err(invalid(format!(
                "exceeds maximum length of {} bytes",
                self.max_length
            )));
        }
        if !self.pattern.is_match(raw) {
            return Err(invalid(format!(
                "does not match required pattern {}",
                self.pattern.as_str()
            )));
        }
        if self.reserved.iter().any(|name| name == raw) {
            return Err(invalid("name is reserved".to_string()));
        }
        if let Some(prefix) = self
            .reserved_prefixes
            .iter()
            .find(|prefix| raw.starts_with(prefix.as_str()))
        {
            return Err(invalid(format!("prefix '{}' is reserved", prefix)));
        }

        Ok(TenantId::new_unchecked(raw))
    }

    /// Returns the maximum identifier length in bytes.
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}
