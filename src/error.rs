//! Error types for the staging pipeline.
//!
//! Lexical errors are fatal: continuing past an unterminated quote would shift
//! every later statement boundary. Rewrite problems are not errors, they are
//! reported as [`crate::rewriter::RewriteWarning`]s.

use std::path::PathBuf;
use thiserror::Error;

/// End of input reached while the segmenter was inside an open lexical context.
///
/// `line` and `offset` point at where the context was opened, `statement_index`
/// is the zero-based index of the unit being scanned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unterminated {quote} quote opened at line {line} (byte {offset}, statement #{statement_index})")]
    UnterminatedQuote {
        quote: char,
        line: usize,
        offset: usize,
        statement_index: usize,
    },

    #[error("unterminated dollar-quoted body ${tag}$ opened at line {line} (byte {offset}, statement #{statement_index})")]
    UnterminatedDollarQuote {
        tag: String,
        line: usize,
        offset: usize,
        statement_index: usize,
    },

    #[error("unterminated block comment opened at line {line} (byte {offset}, statement #{statement_index})")]
    UnterminatedComment {
        line: usize,
        offset: usize,
        statement_index: usize,
    },

    #[error("COPY data starting at line {line} (byte {offset}, statement #{statement_index}) has no terminating \\. line")]
    UnterminatedCopyData {
        line: usize,
        offset: usize,
        statement_index: usize,
    },
}

impl LexError {
    /// Line where the unterminated context was opened.
    pub fn line(&self) -> usize {
        match self {
            LexError::UnterminatedQuote { line, .. }
            | LexError::UnterminatedDollarQuote { line, .. }
            | LexError::UnterminatedComment { line, .. }
            | LexError::UnterminatedCopyData { line, .. } => *line,
        }
    }
}

#[derive(Debug, Error)]
pub enum StagerError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("batch count must be at least 1")]
    InvalidBatchCount,

    #[error("invalid config {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("strict mode: {count} warning(s) raised, first: {first}")]
    StrictModeViolation { count: usize, first: String },
}

impl StagerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StagerError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StagerError>;
