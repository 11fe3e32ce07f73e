//! Statement classification.
//!
//! Classification is a pure, prefix based look at the first significant tokens
//! of a statement. It never fails: anything it does not recognise is
//! [`StatementKind::Other`].

use super::{mask_opaque, RawStatement, SegmentUnit};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// One identifier part, bare or double-quoted with `""` escapes.
const IDENT: &str = r#"(?:"(?:[^"]|"")+"|[A-Za-z_\x{80}-\x{10FFFF}][A-Za-z0-9_$\x{80}-\x{10FFFF}]*)"#;

static QUALIFIED_IDENT: Lazy<String> = Lazy::new(|| format!(r"{IDENT}(?:\s*\.\s*{IDENT})*"));

static SET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^SET\s+(?:(?:SESSION|LOCAL)\s+)?("(?:[^"]|"")+"|[^\s=;]+)"#).unwrap()
});

static CREATE_TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^CREATE\s+(?:UNLOGGED\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?({})",
        *QUALIFIED_IDENT
    ))
    .unwrap()
});

static CREATE_TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^CREATE\s+TYPE\s+(?:IF\s+NOT\s+EXISTS\s+)?({})",
        *QUALIFIED_IDENT
    ))
    .unwrap()
});

static CREATE_SCHEMA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^CREATE\s+SCHEMA\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:AUTHORIZATION\s+)?({IDENT})"
    ))
    .unwrap()
});

static ALTER_TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^ALTER\s+TABLE\s+(?:IF\s+EXISTS\s+)?(?:ONLY\s+)?({})",
        *QUALIFIED_IDENT
    ))
    .unwrap()
});

static ADD_CONSTRAINT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)\bADD\s+CONSTRAINT\s+({IDENT})")).unwrap());

static ADD_CONSTRAINT_KEYWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bADD\s+CONSTRAINT\b").unwrap());

static ALTER_TABLE_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^ALTER\s+TABLE\b").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatementKind {
    MetaCommand,
    Comment,
    SetCommand {
        name: String,
    },
    CreateTable {
        name: String,
    },
    CreateType {
        name: String,
    },
    CreateSchema {
        name: String,
    },
    AddConstraint {
        table: String,
        constraint: String,
    },
    Other,
}

impl StatementKind {
    /// Short label used for counts in reports.
    pub fn label(&self) -> &'static str {
        match self {
            StatementKind::MetaCommand => "meta_command",
            StatementKind::Comment => "comment",
            StatementKind::SetCommand { .. } => "set",
            StatementKind::CreateTable { .. } => "create_table",
            StatementKind::CreateType { .. } => "create_type",
            StatementKind::CreateSchema { .. } => "create_schema",
            StatementKind::AddConstraint { .. } => "add_constraint",
            StatementKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedStatement {
    pub raw: RawStatement,
    pub kind: StatementKind,
}

impl ClassifiedStatement {
    pub fn new(raw: RawStatement) -> Self {
        let kind = classify(&raw);
        Self { raw, kind }
    }
}

/// Classify a segmented unit.
pub fn classify(stmt: &RawStatement) -> StatementKind {
    match stmt.unit {
        SegmentUnit::MetaCommand => return StatementKind::MetaCommand,
        SegmentUnit::Comment => return StatementKind::Comment,
        SegmentUnit::Statement => {}
    }
    classify_text(&stmt.text)
}

/// Classify statement text without segmenter context.
pub fn classify_text(text: &str) -> StatementKind {
    let text = text.trim_start();

    if text.starts_with('\\') {
        return StatementKind::MetaCommand;
    }
    if text.starts_with("--") || text.starts_with("/*") {
        return StatementKind::Comment;
    }

    let upper_prefix: String = text
        .chars()
        .take(14)
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if upper_prefix.starts_with("SET") {
        if let Some(caps) = SET_RE.captures(text) {
            return StatementKind::SetCommand {
                name: normalize_setting_name(&caps[1]),
            };
        }
        return StatementKind::Other;
    }

    if upper_prefix.starts_with("CREATE") {
        if let Some(caps) = CREATE_TABLE_RE.captures(text) {
            return StatementKind::CreateTable {
                name: caps[1].to_string(),
            };
        }
        if let Some(caps) = CREATE_TYPE_RE.captures(text) {
            return StatementKind::CreateType {
                name: caps[1].to_string(),
            };
        }
        if let Some(caps) = CREATE_SCHEMA_RE.captures(text) {
            return StatementKind::CreateSchema {
                name: caps[1].to_string(),
            };
        }
        return StatementKind::Other;
    }

    if upper_prefix.starts_with("ALTER") {
        // identifiers survive masking, so captures can be read from it
        let masked = mask_opaque(text);
        if let (Some(table), Some(constraint)) = (
            ALTER_TABLE_RE.captures(&masked),
            ADD_CONSTRAINT_RE.captures(&masked),
        ) {
            return StatementKind::AddConstraint {
                table: table[1].to_string(),
                constraint: constraint[1].to_string(),
            };
        }
    }

    StatementKind::Other
}

/// True for `ALTER TABLE ... ADD CONSTRAINT` text, whether or not a name
/// could be extracted from it. Literals and comments do not count.
pub fn mentions_add_constraint(text: &str) -> bool {
    let text = text.trim_start();
    ALTER_TABLE_PREFIX_RE.is_match(text)
        && ADD_CONSTRAINT_KEYWORD_RE.is_match(text)
        && ADD_CONSTRAINT_KEYWORD_RE.is_match(&mask_opaque(text))
}

/// Setting names are case-insensitive unless quoted.
fn normalize_setting_name(raw: &str) -> String {
    match raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        Some(quoted) => quoted.replace("\"\"", "\""),
        None => raw.to_ascii_lowercase(),
    }
}
