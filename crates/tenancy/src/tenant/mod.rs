//! Tenant identifiers and their validation.
//!
//! Every adapter operation takes a raw tenant token and runs it through
//! [`IdentifierRules`] before any statement is built, so malformed or unsafe
//! names never reach the backing store.
//!
//! # Examples
//!
//! ```
//! use helios_tenancy::tenant::{IdentifierRules, TenantId};
//!
//! let tenant = TenantId::parse("acme").unwrap();
//! assert_eq!(tenant.as_str(), "acme");
//!
//! let rules = IdentifierRules::default().with_reserved(["public"]);
//! assert!(rules.validate("public").is_err());
//! ```

mod id;
mod rules;

pub use id::TenantId;
pub use rules::{DEFAULT_IDENTIFIER_PATTERN, IdentifierRules, MAX_IDENTIFIER_LENGTH};
