//! Tenant identifier type.
//!
//! This module defines [`TenantId`], a validated token that is safe to
//! interpolate (quoted) into schema and database DDL.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::rules::IdentifierRules;
use crate::error::{TenancyError, TenancyResult};

/// A validated tenant identifier.
///
/// A `TenantId` can only be obtained through validation, either with the
/// default [`IdentifierRules`] via [`TenantId::parse`] or through an
/// adapter's configured rules. It never contains quote, backslash, NUL, or
/// statement-terminator characters and fits PostgreSQL's 63-byte identifier
/// limit.
///
/// # Examples
///
/// ```
/// use helios_tenancy::tenant::TenantId;
///
/// let tenant = TenantId::parse("acme").unwrap();
/// assert_eq!(tenant.as_str(), "acme");
///
/// assert!(TenantId::parse("acme\"; DROP SCHEMA public; --").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parses and validates a tenant identifier with the default rules.
    pub fn parse(id: impl AsRef<str>) -> TenancyResult<Self> {
        IdentifierRules::default().validate(id.as_ref())
    }

    /// Wraps a string that has already passed validation.
    pub(crate) fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the ID and returns the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl FromStr for TenantId {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TenantId::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenancyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        TenantId::parse(s)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
