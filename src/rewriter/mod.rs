//! Idempotency rewriting.
//!
//! Each classified statement is rewritten on its own, with no state carried
//! between statements:
//!
//! - `CREATE TABLE/TYPE/SCHEMA` gain `IF NOT EXISTS`
//! - `ALTER TABLE ... ADD CONSTRAINT` is wrapped in a `DO` block that checks
//!   `pg_catalog.pg_constraint` first
//! - meta-commands, comments, blank statements and session `SET`s are dropped
//! - everything else passes through verbatim, with no idempotency guarantee
//!
//! Rewriting is itself idempotent: the output of [`rewrite`], segmented and
//! classified again, rewrites to the same text.

pub mod warnings;

pub use warnings::{RewriteWarning, WarningCollector};

use crate::parser::classify::mentions_add_constraint;
use crate::parser::{ClassifiedStatement, StatementKind};
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

static CREATE_TABLE_KW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*CREATE\s+(?:UNLOGGED\s+)?TABLE(\s+IF\s+NOT\s+EXISTS\b)?").unwrap()
});

static CREATE_TYPE_KW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*CREATE\s+TYPE(\s+IF\s+NOT\s+EXISTS\b)?").unwrap());

static CREATE_SCHEMA_KW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*CREATE\s+SCHEMA(\s+IF\s+NOT\s+EXISTS\b)?").unwrap());

/// How `CREATE TYPE` is made idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TypeGuard {
    /// Insert `IF NOT EXISTS` after `CREATE TYPE`
    #[default]
    Keyword,
    /// Wrap in a `DO` block checking `to_regtype` (PostgreSQL has no
    /// `CREATE TYPE IF NOT EXISTS`)
    Catalog,
}

impl std::str::FromStr for TypeGuard {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyword" => Ok(TypeGuard::Keyword),
            "catalog" => Ok(TypeGuard::Catalog),
            _ => Err(format!(
                "Unknown type guard: {}. Valid options: keyword, catalog",
                s
            )),
        }
    }
}

/// What the constraint guard looks up in `pg_constraint`.
///
/// Constraint names are only unique per table, so `Global` can skip an
/// `ADD CONSTRAINT` because an unrelated table already uses the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintScope {
    /// `conname` and `conrelid` both match: the name exists on the altered table
    #[default]
    Table,
    /// `conname` alone matches: a constraint with this name exists on any
    /// table. This is the plain "constraint named X exists" check.
    Global,
}

impl std::str::FromStr for ConstraintScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(ConstraintScope::Table),
            "global" => Ok(ConstraintScope::Global),
            _ => Err(format!(
                "Unknown constraint scope: {}. Valid options: table, global",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOptions {
    /// `SET` options kept verbatim, lower-case
    pub retained_settings: Vec<String>,
    pub type_guard: TypeGuard,
    pub constraint_scope: ConstraintScope,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            retained_settings: vec!["search_path".to_string()],
            type_guard: TypeGuard::default(),
            constraint_scope: ConstraintScope::default(),
        }
    }
}

impl RewriteOptions {
    fn retains_setting(&self, name: &str) -> bool {
        self.retained_settings
            .iter()
            .any(|s| s.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenStatement {
    pub text: String,
    /// Kept for diagnostics only
    pub source: ClassifiedStatement,
    /// False when `text` is the source text unchanged
    pub rewritten: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MetaCommand,
    Comment,
    Blank,
    SessionSetting,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::MetaCommand => write!(f, "meta-command"),
            DropReason::Comment => write!(f, "comment"),
            DropReason::Blank => write!(f, "blank"),
            DropReason::SessionSetting => write!(f, "session setting"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteAction {
    Keep(RewrittenStatement),
    Drop(DropReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub action: RewriteAction,
    pub warnings: Vec<RewriteWarning>,
}

impl RewriteOutcome {
    fn drop(reason: DropReason) -> Self {
        Self {
            action: RewriteAction::Drop(reason),
            warnings: Vec::new(),
        }
    }

    /// The kept statement, if any.
    pub fn kept(&self) -> Option<&RewrittenStatement> {
        match &self.action {
            RewriteAction::Keep(stmt) => Some(stmt),
            RewriteAction::Drop(_) => None,
        }
    }

    pub fn into_kept(self) -> Option<RewrittenStatement> {
        match self.action {
            RewriteAction::Keep(stmt) => Some(stmt),
            RewriteAction::Drop(_) => None,
        }
    }
}

/// Rewrite one classified statement.
pub fn rewrite(stmt: &ClassifiedStatement, options: &RewriteOptions) -> RewriteOutcome {
    let raw = &stmt.raw;

    match &stmt.kind {
        StatementKind::MetaCommand => return RewriteOutcome::drop(DropReason::MetaCommand),
        StatementKind::Comment => return RewriteOutcome::drop(DropReason::Comment),
        StatementKind::SetCommand { name } if !options.retains_setting(name) => {
            return RewriteOutcome::drop(DropReason::SessionSetting)
        }
        _ => {}
    }

    if is_blank(&raw.text) {
        return RewriteOutcome::drop(DropReason::Blank);
    }

    let mut warnings = Vec::new();
    let text = if raw.terminated {
        raw.text.clone()
    } else {
        warnings.push(RewriteWarning::MissingTerminator {
            statement_index: raw.index,
            line: raw.start_line,
            preview: raw.preview(),
        });
        terminate(&raw.text)
    };

    let new_text = match &stmt.kind {
        StatementKind::CreateTable { .. } => insert_if_not_exists(&text, &CREATE_TABLE_KW_RE),
        StatementKind::CreateSchema { .. } => insert_if_not_exists(&text, &CREATE_SCHEMA_KW_RE),
        StatementKind::CreateType { name } => match options.type_guard {
            TypeGuard::Keyword => insert_if_not_exists(&text, &CREATE_TYPE_KW_RE),
            TypeGuard::Catalog => Some(guard_type(&text, name)),
        },
        StatementKind::AddConstraint { table, constraint } => Some(guard_constraint(
            &text,
            table,
            constraint,
            options.constraint_scope,
        )),
        StatementKind::Other => {
            if mentions_add_constraint(&text) {
                warnings.push(RewriteWarning::DegradedRewrite {
                    statement_index: raw.index,
                    line: raw.start_line,
                    preview: raw.preview(),
                });
            }
            None
        }
        StatementKind::SetCommand { .. } | StatementKind::MetaCommand | StatementKind::Comment => {
            None
        }
    };

    let rewritten = new_text.is_some() || !raw.terminated;
    let text = new_text.unwrap_or(text);
    tracing::debug!(
        index = raw.index,
        line = raw.start_line,
        kind = stmt.kind.label(),
        rewritten,
        "rewrote statement"
    );

    RewriteOutcome {
        action: RewriteAction::Keep(RewrittenStatement {
            text,
            source: stmt.clone(),
            rewritten,
        }),
        warnings,
    }
}

/// Nothing but whitespace and terminators.
fn is_blank(text: &str) -> bool {
    text.chars().all(|c| c.is_whitespace() || c == ';')
}

/// Append a `;` to a statement cut off by end of input. A trailing line
/// comment would swallow it, so it goes on its own line then.
fn terminate(text: &str) -> String {
    let last_line = text.lines().last().unwrap_or("");
    if last_line.contains("--") {
        format!("{text}\n;")
    } else {
        format!("{text};")
    }
}

/// `None` when the statement already carries `IF NOT EXISTS`.
fn insert_if_not_exists(text: &str, keyword_re: &Regex) -> Option<String> {
    let caps = keyword_re.captures(text)?;
    if caps.get(1).is_some() {
        return None;
    }
    let at = caps.get(0)?.end();
    let mut out = String::with_capacity(text.len() + 14);
    out.push_str(&text[..at]);
    out.push_str(" IF NOT EXISTS");
    out.push_str(&text[at..]);
    Some(out)
}

fn guard_constraint(text: &str, table: &str, constraint: &str, scope: ConstraintScope) -> String {
    let name = sql_literal(&fold_identifier(constraint));
    let predicate = match scope {
        ConstraintScope::Table => format!(
            "conname = {} AND conrelid = {}::regclass",
            name,
            sql_literal(table)
        ),
        ConstraintScope::Global => format!("conname = {}", name),
    };
    let condition = format!(
        "NOT EXISTS (\n        SELECT 1 FROM pg_catalog.pg_constraint\n        WHERE {}\n    )",
        predicate
    );
    do_block(text, &condition)
}

fn guard_type(text: &str, name: &str) -> String {
    let condition = format!("to_regtype({}) IS NULL", sql_literal(name));
    do_block(text, &condition)
}

/// Wrap `body` in an anonymous block that runs it only when `condition` holds.
/// `body` is embedded byte-for-byte.
fn do_block(body: &str, condition: &str) -> String {
    let tag = unused_dollar_tag(body);
    format!(
        "DO ${tag}$\nBEGIN\n    IF {condition} THEN\n        {body}\n    END IF;\nEND\n${tag}$;"
    )
}

/// A dollar-quote tag that does not occur in `body`.
fn unused_dollar_tag(body: &str) -> String {
    let mut tag = "guard".to_string();
    let mut n = 0;
    while body.contains(&format!("${tag}$")) {
        n += 1;
        tag = format!("guard_{n}");
    }
    tag
}

/// The name PostgreSQL stores for an identifier as written: quoted names are
/// taken literally, bare names are folded to lower case.
fn fold_identifier(ident: &str) -> String {
    match ident.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        Some(quoted) => quoted.replace("\"\"", "\""),
        None => ident.to_ascii_lowercase(),
    }
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
