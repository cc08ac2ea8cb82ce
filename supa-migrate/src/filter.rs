//! Normalizes differ output into migration DDL.
//!
//! The differ reports one [`DiffEntry`] per schema object. Only admissible
//! entries contribute DDL:
//!
//! - the status is not `Identical`,
//! - the DDL is not blank,
//! - the object kind is one the migration format round-trips,
//! - neither the entry's schema nor its source schema is platform-managed,
//! - it does not depend on an extension.

use serde::Deserialize;
use tracing::debug;

use crate::error::MigrateResult;

/// Schemas managed by the platform. Objects in them are never diffed.
pub const INTERNAL_SCHEMAS: &[&str] = &[
    "auth",
    "extensions",
    "graphql",
    "graphql_public",
    "information_schema",
    "net",
    "pgbouncer",
    "pgsodium",
    "pgsodium_masks",
    "pg_catalog",
    "pg_toast",
    "realtime",
    "_realtime",
    "storage",
    "supabase_functions",
    "supabase_migrations",
    "vault",
    "_analytics",
];

/// Advisory header written at the top of every generated migration.
pub const DIFF_HEADER: &str = "\
-- This script was generated by the Schema Diff utility in pgAdmin 4
-- For the circular dependencies, the order in which Schema Diff writes the objects is not very sophisticated
-- and may require manual changes to the script to ensure changes are applied in the correct order.
-- Please report an issue for any failure with the reproduction steps.
";

/// Object kinds whose DDL is carried into migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Extension,
    Function,
    MaterializedView,
    Table,
    TriggerFunction,
    Type,
    View,
}

impl ObjectKind {
    /// Parse a differ `type` tag. Unknown tags yield `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "extension" => Self::Extension,
            "function" => Self::Function,
            "mview" => Self::MaterializedView,
            "table" => Self::Table,
            "trigger_function" => Self::TriggerFunction,
            "type" => Self::Type,
            "view" => Self::View,
            _ => return None,
        })
    }
}

/// A dependency of a diff entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Dependency {
    /// Object kind of the dependency.
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// One record of differ output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DiffEntry {
    /// Object kind tag (`table`, `view`, ...).
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Comparison status (`Identical`, `Different`, `Source Only`, ...).
    #[serde(default)]
    pub status: String,
    /// DDL that moves the target towards the source.
    #[serde(default)]
    pub diff_ddl: Option<String>,
    /// Schema of the object.
    #[serde(default)]
    pub group_name: Option<String>,
    /// Schema of the source object, when it differs.
    #[serde(default)]
    pub source_schema_name: Option<String>,
    /// Objects this entry depends on.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl DiffEntry {
    /// DDL with surrounding whitespace removed.
    pub fn ddl(&self) -> &str {
        self.diff_ddl.as_deref().unwrap_or_default().trim()
    }

    /// Whether this entry contributes DDL, given the internal schemas.
    pub fn is_admissible(&self, internal_schemas: &[String]) -> bool {
        let internal = |schema: &Option<String>| {
            schema
                .as_deref()
                .is_some_and(|s| internal_schemas.iter().any(|i| i == s))
        };

        self.status != "Identical"
            && !self.ddl().is_empty()
            && ObjectKind::from_tag(&self.kind).is_some()
            && !internal(&self.group_name)
            && !internal(&self.source_schema_name)
            && !self.dependencies.iter().any(|d| d.kind == "extension")
    }
}

/// Filters differ output down to migration DDL.
#[derive(Debug, Clone)]
pub struct DiffFilter {
    internal_schemas: Vec<String>,
}

impl Default for DiffFilter {
    fn default() -> Self {
        Self {
            internal_schemas: INTERNAL_SCHEMAS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DiffFilter {
    /// Create a filter with the platform's internal schemas.
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat additional schemas as internal.
    pub fn with_internal_schemas<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.internal_schemas
            .extend(schemas.into_iter().map(Into::into));
        self
    }

    /// Internal schemas in effect.
    pub fn internal_schemas(&self) -> &[String] {
        &self.internal_schemas
    }

    /// Parse differ JSON and keep the DDL of admissible entries, in order.
    pub fn filter(&self, json: &[u8]) -> MigrateResult<Vec<String>> {
        if json.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let entries: Vec<DiffEntry> = serde_json::from_slice(json)?;
        let total = entries.len();

        let ddls: Vec<String> = entries
            .iter()
            .filter(|e| self.is_admissible(e))
            .map(|e| strip_transaction_wrapper(e.ddl()))
            .filter(|ddl| !ddl.is_empty())
            .collect();

        debug!(total, kept = ddls.len(), "Filtered diff entries");
        Ok(ddls)
    }

    /// Admissibility under this filter's internal schemas.
    pub fn is_admissible(&self, entry: &DiffEntry) -> bool {
        entry.is_admissible(&self.internal_schemas)
    }
}

/// Remove a differ-supplied `BEGIN;` ... `END;` wrapper around one entry.
///
/// The wrapper may span lines or sit on one line (`BEGIN; ALTER ...; END;`).
/// The trailing `END;` is only removed together with a leading `BEGIN;`,
/// so PL/pgSQL and `BEGIN ATOMIC` bodies keep their own `END;`.
pub fn strip_transaction_wrapper(ddl: &str) -> String {
    let ddl = ddl.trim();
    let Some(body) = strip_prefix_ignore_case(ddl, "BEGIN;") else {
        return ddl.to_string();
    };

    let body = body.trim();
    match strip_suffix_ignore_case(body, "END;") {
        Some(rest) if rest.is_empty() || rest.ends_with(|c: char| c.is_whitespace() || c == ';') => {
            rest.trim().to_string()
        }
        _ => body.to_string(),
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let split = s.len().checked_sub(suffix.len())?;
    let tail = s.get(split..)?;
    tail.eq_ignore_ascii_case(suffix).then(|| &s[..split])
}

/// Render the migration file contents, or `None` when nothing survived.
///
/// Layout: header, blank line, entries separated by blank lines, trailing
/// newline.
pub fn render_migration(ddls: &[String]) -> Option<String> {
    if ddls.is_empty() {
        return None;
    }
    Some(format!("{}\n{}\n", DIFF_HEADER, ddls.join("\n\n")))
}
