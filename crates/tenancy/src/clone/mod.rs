//! Structural cloning of a template schema into tenant schemas.
//!
//! - [`SchemaDumper`] - capability that produces dump text ([`PgDump`] runs `pg_dump`)
//! - [`DumpRewriter`] - retargets dump text at a tenant schema
//! - [`SchemaCloner`] - runs the dump, rewrite, replay sequence

mod cloner;
mod dump;
mod rewrite;

pub use cloner::SchemaCloner;
pub use dump::{PgDump, SchemaDumper};
pub use rewrite::DumpRewriter;
