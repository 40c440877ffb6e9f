//! Dump text rewriting.
//!
//! A schema dump addresses the template schema, either through its own
//! `search_path` directives or through qualified names such as
//! `public.users`. Before replay, [`DumpRewriter`] removes those directives
//! (plus session settings that do not survive replay) and retargets the
//! template's qualified names at the tenant schema. String literals are
//! left alone unless they name a relation: a `'...'::regclass` cast or the
//! first argument of `nextval`, `setval` or `currval`. It then prepends a
//! single `SET search_path TO "<tenant>", "<default>";` line so unqualified
//! objects land in the tenant schema.

use std::borrow::Cow;

use regex::{Captures, Regex};

use crate::context::quote_identifier;
use crate::error::{TenancyError, TenancyResult};
use crate::tenant::TenantId;

/// Session settings pg_dump emits that are dropped before replay.
const DIRECTIVE_PATTERN: &str = r"(?i)^\s*(SET\s+(search_path|lock_timeout|row_security|idle_in_transaction_session_timeout|transaction_timeout)\b|SELECT\s+pg_catalog\.set_config\(\s*'search_path')";

/// A string literal, with the sequence-function call or regclass cast that
/// makes it a relation name.
const LITERAL_PATTERN: &str =
    r"(?P<call>(?i:\b(?:nextval|setval|currval)\(\s*))?(?P<lit>'(?:[^']|'')*')(?P<cast>(?i:::regclass))?";

/// Rewrites dump text for replay into a tenant schema.
#[derive(Debug, Clone)]
pub struct DumpRewriter {
    default_scope: String,
    directive: Regex,
    schema_statement: Regex,
    qualified: Regex,
    literal: Regex,
}

impl DumpRewriter {
    /// Creates a rewriter for dumps of `template`.
    pub fn new(template: &str, default_scope: &str) -> TenancyResult<Self> {
        let name = format!(
            "(?:{}|\"{}\")",
            regex::escape(template),
            regex::escape(&template.replace('"', "\"\""))
        );

        let compile = |pattern: String| {
            Regex::new(&pattern).map_err(|e| TenancyError::ConfigurationError {
                message: format!("cannot build dump rewriter for template '{}'", template),
                source: Some(Box::new(e)),
            })
        };

        Ok(Self {
            default_scope: default_scope.to_string(),
            directive: compile(DIRECTIVE_PATTERN.to_string())?,
            schema_statement: compile(format!(
                r"(?i)^\s*(CREATE\s+SCHEMA(\s+IF\s+NOT\s+EXISTS)?|COMMENT\s+ON\s+SCHEMA|ALTER\s+SCHEMA)\s+{}(\s|;|$)",
                name
            ))?,
            qualified: compile(format!(r#"(^|[^\w".]){}\."#, name))?,
            literal: compile(LITERAL_PATTERN.to_string())?,
        })
    }

    /// Rewrites `dump` for replay into `tenant`'s schema.
    pub fn rewrite(&self, dump: &str, tenant: &TenantId) -> String {
        let target = quote_identifier(tenant.as_str());
        let mut out = format!(
            "SET search_path TO {}, {};\n",
            target,
            quote_identifier(&self.default_scope)
        );

        for line in dump.lines() {
            if self.directive.is_match(line) || self.schema_statement.is_match(line) {
                continue;
            }
            self.retarget_line(line, &target, &mut out);
            out.push('\n');
        }

        out
    }

    fn retarget_line(&self, line: &str, target: &str, out: &mut String) {
        let mut last = 0;
        for caps in self.literal.captures_iter(line) {
            let whole = caps.get_match();
            out.push_str(&self.retarget(&line[last..whole.start()], target));

            let literal = &caps["lit"];
            if caps.name("call").is_some() || caps.name("cast").is_some() {
                let call = caps.name("call").map_or("", |m| m.as_str());
                let cast = caps.name("cast").map_or("", |m| m.as_str());
                out.push_str(call);
                out.push_str(&self.retarget(literal, target));
                out.push_str(cast);
            } else {
                out.push_str(literal);
            }
            last = whole.end();
        }
        out.push_str(&self.retarget(&line[last..], target));
    }

    fn retarget<'a>(&self, text: &'a str, target: &str) -> Cow<'a, str> {
        self.qualified
            .replace_all(text, |caps: &Captures| format!("{}{}.", &caps[1], target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> TenantId {
        TenantId::parse("acme").unwrap()
    }

    #[test]
    fn test_prepends_tenant_search_path() {
        let rewriter = DumpRewriter::new("public", "public").unwrap();
        assert_eq!(
            rewriter.rewrite("CREATE TABLE users (id bigint);", &acme()),
            "SET search_path TO \"acme\", \"public\";\nCREATE TABLE users (id bigint);\n"
        );
    }

    #[test]
    fn test_strips_resolution_and_session_directives() {
        let rewriter = DumpRewriter::new("public", "public").unwrap();
        let dump = "\
SET statement_timeout = 0;
SET lock_timeout = 0;
SET idle_in_transaction_session_timeout = 0;
SET transaction_timeout = 0;
SET client_encoding = 'UTF8';
SELECT pg_catalog.set_config('search_path', '', false);
SET search_path = public, pg_catalog;
SET row_security = off;
CREATE TABLE t (id int);";

        assert_eq!(
            rewriter.rewrite(dump, &acme()),
            "SET search_path TO \"acme\", \"public\";\n\
SET statement_timeout = 0;\n\
SET client_encoding = 'UTF8';\n\
CREATE TABLE t (id int);\n"
        );
    }

    #[test]
    fn test_retargets_qualified_template_names() {
        let rewriter = DumpRewriter::new("public", "public").unwrap();
        let dump = "\
CREATE TABLE public.users (
    id bigint NOT NULL
);
CREATE INDEX users_idx ON public.users USING btree (id);
ALTER TABLE ONLY \"public\".users ADD CONSTRAINT users_pkey PRIMARY KEY (id);
INSERT INTO public.schema_migrations VALUES ('20240101000000');";

        let out = rewriter.rewrite(dump, &acme());
        assert!(out.contains("CREATE TABLE \"acme\".users ("));
        assert!(out.contains("ON \"acme\".users USING btree"));
        assert!(out.contains("ALTER TABLE ONLY \"acme\".users ADD"));
        assert!(out.contains("INSERT INTO \"acme\".schema_migrations VALUES ('20240101000000');"));
        assert!(!out.contains("public.users"));
    }

    #[test]
    fn test_leaves_other_schemas_and_suffixed_names_alone() {
        let rewriter = DumpRewriter::new("public", "public").unwrap();
        let dump = "\
CREATE TABLE shared.plans (id int);
CREATE TABLE my_public.x (id int);
CREATE TABLE public_archive.y (id int);";

        let out = rewriter.rewrite(dump, &acme());
        assert!(out.contains("CREATE TABLE shared.plans"));
        assert!(out.contains("CREATE TABLE my_public.x"));
        assert!(out.contains("CREATE TABLE public_archive.y"));
    }

    #[test]
    fn test_retargets_names_inside_regclass_literals() {
        let rewriter = DumpRewriter::new("public", "public").unwrap();
        let out = rewriter.rewrite(
            "    id bigint DEFAULT nextval('public.users_id_seq'::regclass) NOT NULL",
            &acme(),
        );
        assert!(out.contains("nextval('\"acme\".users_id_seq'::regclass)"));
    }

    #[test]
    fn test_retargets_sequence_function_arguments() {
        let rewriter = DumpRewriter::new("public", "public").unwrap();
        let out = rewriter.rewrite(
            "SELECT pg_catalog.setval('public.users_id_seq', 1, false);",
            &acme(),
        );
        assert!(out.contains("pg_catalog.setval('\"acme\".users_id_seq', 1, false);"));
    }

    #[test]
    fn test_keeps_template_names_in_plain_literals() {
        let rewriter = DumpRewriter::new("public", "public").unwrap();
        let dump = "\
INSERT INTO public.notes VALUES ('public.x', 'it''s public.y');
COMMENT ON TABLE public.users IS 'see public.users';";

        let out = rewriter.rewrite(dump, &acme());
        assert!(out.contains("INSERT INTO \"acme\".notes VALUES ('public.x', 'it''s public.y');"));
        assert!(out.contains("COMMENT ON TABLE \"acme\".users IS 'see public.users';"));
    }

    #[test]
    fn test_drops_template_schema_statements() {
        let rewriter = DumpRewriter::new("tenant_template", "public").unwrap();
        let dump = "\
CREATE SCHEMA tenant_template;
COMMENT ON SCHEMA \"tenant_template\" IS 'template';
ALTER SCHEMA tenant_template OWNER TO helios;
CREATE SCHEMA tenant_template_extra;
CREATE TABLE tenant_template.users (id int);";

        assert_eq!(
            rewriter.rewrite(dump, &acme()),
            "SET search_path TO \"acme\", \"public\";\n\
CREATE SCHEMA tenant_template_extra;\n\
CREATE TABLE \"acme\".users (id int);\n"
        );
    }

    #[test]
    fn test_template_name_is_matched_literally() {
        let rewriter = DumpRewriter::new("a.b", "public").unwrap();
        let out = rewriter.rewrite("CREATE TABLE axb.t (id int);", &acme());
        assert!(out.contains("CREATE TABLE axb.t"));
    }
}
