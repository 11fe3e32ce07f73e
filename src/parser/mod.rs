//! Lexical segmentation of SQL dump text.
//!
//! The [`Segmenter`] walks the dump once with an explicit [`LexState`] machine
//! and yields one [`RawStatement`] per executable statement, meta-command line
//! or standalone comment. A `;` only ends a statement in [`LexState::Normal`].

pub mod classify;


pub use classify::{classify, ClassifiedStatement, StatementKind};

use crate::error::LexError;
use memchr::{memchr, memchr2, memchr_iter};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static COPY_FROM_STDIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^COPY\s.*\bFROM\s+stdin\b").unwrap());

/// What kind of unit the segmenter emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentUnit {
    Statement,
    /// A `\`-prefixed client directive line (`\connect`, `\restrict`, ...)
    MetaCommand,
    /// A `--` or `/* */` comment standing between statements
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStatement {
    pub text: String,
    /// 1-based line of the first character
    pub start_line: usize,
    /// 1-based line of the last character
    pub end_line: usize,
    /// Byte offset of the first character in the input
    pub offset: usize,
    /// Zero-based position among all emitted units
    pub index: usize,
    pub unit: SegmentUnit,
    /// False only for a trailing statement that hit end of input without `;`
    pub terminated: bool,
}

impl RawStatement {
    /// First line of the statement, shortened for diagnostics.
    pub fn preview(&self) -> String {
        let first = self.text.lines().next().unwrap_or("").trim();
        if first.chars().count() > 80 {
            let cut: String = first.chars().take(77).collect();
            format!("{cut}...")
        } else {
            first.to_string()
        }
    }
}

/// Lexical context of the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexState {
    Normal,
    /// `'...'`, `''` escapes a quote
    InSingleQuote,
    /// `E'...'`, backslash escapes the next byte as well
    InEscapeQuote,
    /// `"..."`, `""` escapes a quote
    InDoubleQuote,
    InLineComment,
    /// `/* ... */`, not nesting
    InBlockComment,
    /// `$tag$ ... $tag$`, the tag may be empty
    InDollarQuote(String),
}

/// Result of feeding one position of input to [`LexState::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// New state, `None` keeps the current one
    pub next: Option<LexState>,
    /// Bytes consumed by this step
    pub consumed: usize,
    /// The consumed `;` terminates the statement
    pub boundary: bool,
}

impl Transition {
    fn stay(consumed: usize) -> Self {
        Self {
            next: None,
            consumed,
            boundary: false,
        }
    }

    fn enter(next: LexState, consumed: usize) -> Self {
        Self {
            next: Some(next),
            consumed,
            boundary: false,
        }
    }

    fn boundary() -> Self {
        Self {
            next: None,
            consumed: 1,
            boundary: true,
        }
    }
}

impl LexState {
    /// The transition table. `input[pos]` must exist.
    pub fn step(&self, input: &[u8], pos: usize) -> Transition {
        let b = input[pos];
        let peek = input.get(pos + 1).copied();

        match (self, b) {
            (LexState::Normal, b';') => Transition::boundary(),
            (LexState::Normal, b'\'') if is_escape_string_prefix(input, pos) => {
                Transition::enter(LexState::InEscapeQuote, 1)
            }
            (LexState::Normal, b'\'') => Transition::enter(LexState::InSingleQuote, 1),
            (LexState::Normal, b'"') => Transition::enter(LexState::InDoubleQuote, 1),
            (LexState::Normal, b'-') if peek == Some(b'-') => {
                Transition::enter(LexState::InLineComment, 2)
            }
            (LexState::Normal, b'/') if peek == Some(b'*') => {
                Transition::enter(LexState::InBlockComment, 2)
            }
            (LexState::Normal, b'$') => match dollar_tag_at(input, pos) {
                Some(tag) => {
                    Transition::enter(LexState::InDollarQuote(tag.to_string()), tag.len() + 2)
                }
                None => Transition::stay(1),
            },

            (LexState::InSingleQuote, b'\'') | (LexState::InEscapeQuote, b'\'')
                if peek == Some(b'\'') =>
            {
                Transition::stay(2)
            }
            (LexState::InSingleQuote, b'\'') | (LexState::InEscapeQuote, b'\'') => {
                Transition::enter(LexState::Normal, 1)
            }
            (LexState::InEscapeQuote, b'\\') => Transition::stay(2),

            (LexState::InDoubleQuote, b'"') if peek == Some(b'"') => Transition::stay(2),
            (LexState::InDoubleQuote, b'"') => Transition::enter(LexState::Normal, 1),

            (LexState::InLineComment, b'\n') => Transition::enter(LexState::Normal, 1),

            (LexState::InBlockComment, b'*') if peek == Some(b'/') => {
                Transition::enter(LexState::Normal, 2)
            }

            (LexState::InDollarQuote(tag), b'$') if closes_dollar_quote(input, pos, tag) => {
                Transition::enter(LexState::Normal, tag.len() + 2)
            }

            _ => Transition::stay(1),
        }
    }

    /// String literals, dollar-quoted bodies and comments. Double-quoted
    /// identifiers are not opaque, they name things.
    fn is_opaque(&self) -> bool {
        !matches!(self, LexState::Normal | LexState::InDoubleQuote)
    }

    /// Next position at or after `pos` where [`step`](Self::step) can do anything
    /// but `stay(1)`. Returns `input.len()` when there is none.
    fn skip_inert(&self, input: &[u8], pos: usize) -> usize {
        let rest = &input[pos..];
        let found = match self {
            LexState::Normal => return pos,
            LexState::InSingleQuote => memchr(b'\'', rest),
            LexState::InEscapeQuote => memchr2(b'\'', b'\\', rest),
            LexState::InDoubleQuote => memchr(b'"', rest),
            LexState::InLineComment => memchr(b'\n', rest),
            LexState::InBlockComment => memchr(b'*', rest),
            LexState::InDollarQuote(_) => memchr(b'$', rest),
        };
        found.map_or(input.len(), |i| pos + i)
    }
}

#[inline]
fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// `E'` / `e'` opens an escape string unless the `E` ends a longer word.
fn is_escape_string_prefix(input: &[u8], quote_pos: usize) -> bool {
    if quote_pos == 0 || !matches!(input[quote_pos - 1], b'E' | b'e') {
        return false;
    }
    quote_pos == 1 || !(is_ident_byte(input[quote_pos - 2]) || input[quote_pos - 2] == b'$')
}

/// Tag of a dollar-quote opener at `pos`, e.g. `""` for `$$` or `"body"` for `$body$`.
fn dollar_tag_at(input: &[u8], pos: usize) -> Option<&str> {
    // `a$b$` is an identifier and `$1` a positional parameter
    if pos > 0 && (is_ident_byte(input[pos - 1]) || input[pos - 1] == b'$') {
        return None;
    }

    let start = pos + 1;
    let mut i = start;
    while i < input.len() {
        let b = input[i];
        if b == b'$' {
            return std::str::from_utf8(&input[start..i]).ok();
        }
        let valid = if i == start {
            b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
        } else {
            is_ident_byte(b)
        };
        if !valid {
            return None;
        }
        i += 1;
    }
    None
}

/// Copy of `text` with every string literal, dollar-quoted body and comment
/// blanked to spaces, delimiters included. Byte offsets and line breaks are
/// unchanged, so matches on the result index straight into `text`.
pub fn mask_opaque(text: &str) -> String {
    let input = text.as_bytes();
    let mut masked = input.to_vec();
    let mut state = LexState::Normal;
    let mut pos = 0;

    while pos < input.len() {
        let next_pos = state.skip_inert(input, pos);
        if state.is_opaque() {
            blank(&mut masked[pos..next_pos]);
        }
        pos = next_pos;
        if pos >= input.len() {
            break;
        }

        let t = state.step(input, pos);
        let after = (pos + t.consumed).min(input.len());
        let next = t.next.unwrap_or_else(|| state.clone());
        if state.is_opaque() || next.is_opaque() {
            blank(&mut masked[pos..after]);
        }
        state = next;
        pos = after;
    }

    // opaque regions start and end on ASCII delimiters, so whole characters
    // are blanked and the bytes stay UTF-8
    String::from_utf8(masked)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn blank(bytes: &mut [u8]) {
    for b in bytes.iter_mut().filter(|b| **b != b'\n') {
        *b = b' ';
    }
}

fn closes_dollar_quote(input: &[u8], pos: usize, tag: &str) -> bool {
    let tag = tag.as_bytes();
    let end = pos + tag.len() + 2;
    end <= input.len() && &input[pos + 1..end - 1] == tag && input[end - 1] == b'$'
}

#[inline]
fn count_newlines(bytes: &[u8]) -> usize {
    memchr_iter(b'\n', bytes).count()
}

/// Lazy, restartable iterator of [`RawStatement`]s over a dump.
///
/// Fused after the first error.
pub struct Segmenter<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    index: usize,
    failed: bool,
}

impl<'a> Segmenter<'a> {
    pub fn new(input: &'a str) -> Self {
        let mut segmenter = Self {
            input,
            pos: 0,
            line: 1,
            index: 0,
            failed: false,
        };
        segmenter.reset();
        segmenter
    }

    /// Restart the scan from the beginning of the input.
    pub fn reset(&mut self) {
        self.pos = if self.input.starts_with('\u{feff}') { 3 } else { 0 };
        self.line = 1;
        self.index = 0;
        self.failed = false;
    }

    /// Segment the whole input, stopping at the first lexical error.
    pub fn collect_all(input: &'a str) -> Result<Vec<RawStatement>, LexError> {
        Segmenter::new(input).collect()
    }

    fn bytes(&self) -> &'a [u8] {
        self.input.as_bytes()
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            if bytes[self.pos] == b'\n' {
                self.line += 1;
            }
            self.pos += 1;
        }
    }

    fn emit(
        &mut self,
        start: usize,
        end: usize,
        start_line: usize,
        unit: SegmentUnit,
        terminated: bool,
    ) -> RawStatement {
        let text = self.input[start..end].trim_end();
        let end_line = start_line + count_newlines(text.as_bytes());
        let index = self.index;
        self.index += 1;
        RawStatement {
            text: text.to_string(),
            start_line,
            end_line,
            offset: start,
            index,
            unit,
            terminated,
        }
    }

    /// Rest of the current line as a single unit.
    fn read_line_unit(&mut self, unit: SegmentUnit) -> RawStatement {
        let start = self.pos;
        let start_line = self.line;
        let end = memchr(b'\n', &self.bytes()[start..])
            .map_or(self.input.len(), |i| start + i);
        self.pos = end;
        self.emit(start, end, start_line, unit, true)
    }

    fn read_block_comment(&mut self) -> Result<RawStatement, LexError> {
        let start = self.pos;
        let start_line = self.line;
        let bytes = self.bytes();
        let mut state = LexState::InBlockComment;
        let mut pos = start + 2;

        while pos < bytes.len() {
            pos = state.skip_inert(bytes, pos);
            if pos >= bytes.len() {
                break;
            }
            let t = state.step(bytes, pos);
            pos = (pos + t.consumed).min(bytes.len());
            if let Some(next) = t.next {
                state = next;
            }
            if state == LexState::Normal {
                self.line += count_newlines(&bytes[start..pos]);
                self.pos = pos;
                return Ok(self.emit(start, pos, start_line, SegmentUnit::Comment, true));
            }
        }

        Err(LexError::UnterminatedComment {
            line: start_line,
            offset: start,
            statement_index: self.index,
        })
    }

    fn read_statement(&mut self) -> Result<RawStatement, LexError> {
        let bytes = self.bytes();
        let start = self.pos;
        let start_line = self.line;

        let mut state = LexState::Normal;
        let mut pos = start;
        let mut line = start_line;
        // where the currently open quote/comment began
        let mut context_offset = start;
        let mut context_line = start_line;

        while pos < bytes.len() {
            let next_pos = state.skip_inert(bytes, pos);
            line += count_newlines(&bytes[pos..next_pos]);
            pos = next_pos;
            if pos >= bytes.len() {
                break;
            }

            let t = state.step(bytes, pos);
            let after = (pos + t.consumed).min(bytes.len());
            if let Some(next) = t.next {
                if next != LexState::Normal {
                    context_offset = pos;
                    context_line = line;
                }
                state = next;
            }
            line += count_newlines(&bytes[pos..after]);
            pos = after;

            if t.boundary {
                self.pos = pos;
                self.line = line;
                let mut end = pos;
                let text = &self.input[start..end];
                if COPY_FROM_STDIN_RE.is_match(text)
                    && COPY_FROM_STDIN_RE.is_match(&mask_opaque(text))
                {
                    end = self.read_copy_data(end, start_line)?;
                }
                return Ok(self.emit(start, end, start_line, SegmentUnit::Statement, true));
            }
        }

        let statement_index = self.index;
        match state {
            LexState::Normal | LexState::InLineComment => {
                self.pos = bytes.len();
                self.line = line;
                Ok(self.emit(
                    start,
                    bytes.len(),
                    start_line,
                    SegmentUnit::Statement,
                    false,
                ))
            }
            LexState::InSingleQuote => Err(LexError::UnterminatedQuote {
                quote: '\'',
                line: context_line,
                offset: context_offset,
                statement_index,
            }),
            LexState::InEscapeQuote => Err(LexError::UnterminatedQuote {
                quote: '\'',
                line: context_line,
                offset: context_offset,
                statement_index,
            }),
            LexState::InDoubleQuote => Err(LexError::UnterminatedQuote {
                quote: '"',
                line: context_line,
                offset: context_offset,
                statement_index,
            }),
            LexState::InBlockComment => Err(LexError::UnterminatedComment {
                line: context_line,
                offset: context_offset,
                statement_index,
            }),
            LexState::InDollarQuote(tag) => Err(LexError::UnterminatedDollarQuote {
                tag,
                line: context_line,
                offset: context_offset,
                statement_index,
            }),
        }
    }

    /// Consume a `COPY ... FROM stdin` data block up to and including its `\.` line.
    /// Returns the end offset of the terminator line.
    fn read_copy_data(
        &mut self,
        statement_end: usize,
        statement_line: usize,
    ) -> Result<usize, LexError> {
        let bytes = self.bytes();
        let unterminated = LexError::UnterminatedCopyData {
            line: self.line + 1,
            offset: statement_end,
            statement_index: self.index,
        };

        // the remainder of the COPY line is not data
        let mut line_start = match memchr(b'\n', &bytes[statement_end..]) {
            Some(i) => statement_end + i + 1,
            None => return Err(unterminated),
        };
        let mut line = self.line + 1;

        while line_start < bytes.len() {
            let line_end =
                memchr(b'\n', &bytes[line_start..]).map_or(bytes.len(), |i| line_start + i);
            let content = &bytes[line_start..line_end];
            let content = content.strip_suffix(b"\r").unwrap_or(content);
            if content == b"\\." {
                self.pos = line_end;
                self.line = line;
                tracing::trace!(
                    statement_line,
                    data_lines = line - statement_line - 1,
                    "consumed COPY data block"
                );
                return Ok(line_end);
            }
            if line_end >= bytes.len() {
                break;
            }
            line_start = line_end + 1;
            line += 1;
        }

        Err(unterminated)
    }
}

impl Iterator for Segmenter<'_> {
    type Item = Result<RawStatement, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        self.skip_whitespace();
        let bytes = self.bytes();
        if self.pos >= bytes.len() {
            return None;
        }

        let result = match (bytes[self.pos], bytes.get(self.pos + 1).copied()) {
            (b'\\', _) => Ok(self.read_line_unit(SegmentUnit::MetaCommand)),
            (b'-', Some(b'-')) => Ok(self.read_line_unit(SegmentUnit::Comment)),
            (b'/', Some(b'*')) => self.read_block_comment(),
            _ => self.read_statement(),
        };

        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(input: &str) -> Vec<String> {
        Segmenter::collect_all(input)
            .unwrap()
            .into_iter()
            .map(|s| s.text)
            .collect()
    }

    #[test]
    fn test_basic_split() {
        assert_eq!(
            texts("CREATE TABLE t1 (id INT); INSERT INTO t1 VALUES (1);"),
            vec!["CREATE TABLE t1 (id INT);", "INSERT INTO t1 VALUES (1);"]
        );
    }

    #[test]
    fn test_semicolon_in_string() {
        assert_eq!(
            texts("INSERT INTO t VALUES ('a;b');"),
            vec!["INSERT INTO t VALUES ('a;b');"]
        );
    }

    #[test]
    fn test_doubled_quote_escape() {
        assert_eq!(
            texts("INSERT INTO t VALUES ('it''s; fine');SELECT 1;"),
            vec!["INSERT INTO t VALUES ('it''s; fine');", "SELECT 1;"]
        );
    }

    #[test]
    fn test_dollar_quoted_body() {
        let sql = "CREATE FUNCTION f() RETURNS void AS $$ BEGIN a := 1; END; $$ LANGUAGE plpgsql;";
        assert_eq!(texts(sql), vec![sql]);
    }

    #[test]
    fn test_line_numbers() {
        let stmts = Segmenter::collect_all("\n\nCREATE TABLE a (\n  id int\n);\nSELECT 1;\n").unwrap();
        assert_eq!(stmts[0].start_line, 3);
        assert_eq!(stmts[0].end_line, 5);
        assert_eq!(stmts[1].start_line, 6);
        assert_eq!(stmts[1].end_line, 6);
    }

    #[test]
    fn test_step_table_boundary_only_in_normal() {
        let input = b";";
        assert!(LexState::Normal.step(input, 0).boundary);
        assert!(!LexState::InSingleQuote.step(input, 0).boundary);
        assert!(!LexState::InDoubleQuote.step(input, 0).boundary);
        assert!(!LexState::InLineComment.step(input, 0).boundary);
        assert!(!LexState::InBlockComment.step(input, 0).boundary);
        assert!(!LexState::InDollarQuote(String::new()).step(input, 0).boundary);
    }

    #[test]
    fn test_step_dollar_tag() {
        let input = b"$fn$ body $fn$";
        let t = LexState::Normal.step(input, 0);
        assert_eq!(t.next, Some(LexState::InDollarQuote("fn".to_string())));
        assert_eq!(t.consumed, 4);

        let state = LexState::InDollarQuote("fn".to_string());
        let t = state.step(input, 10);
        assert_eq!(t.next, Some(LexState::Normal));
        assert_eq!(t.consumed, 4);
    }

    #[test]
    fn test_reset_restarts_scan() {
        let mut seg = Segmenter::new("SELECT 1; SELECT 2;");
        let first: Vec<_> = seg.by_ref().map(|s| s.unwrap().text).collect();
        seg.reset();
        let second: Vec<_> = seg.map(|s| s.unwrap().text).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_unterminated_quote() {
        let err = Segmenter::collect_all("SELECT 1;\nINSERT INTO t VALUES ('oops);\n").unwrap_err();
        assert_eq!(
            err,
            LexError::UnterminatedQuote {
                quote: '\'',
                line: 2,
                offset: 32,
                statement_index: 1,
            }
        );
    }
}
