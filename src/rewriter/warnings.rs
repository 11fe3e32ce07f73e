//! Non-fatal problems found while rewriting.
//!
//! Unlike lexical errors these never stop the pipeline. Every warning is kept
//! (nothing is deduplicated) because each one names a statement a human
//! should look at.

use schemars::JsonSchema;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RewriteWarning {
    /// `ALTER TABLE ... ADD CONSTRAINT` whose constraint name could not be
    /// extracted; passed through without a guard
    DegradedRewrite {
        statement_index: usize,
        line: usize,
        preview: String,
    },
    /// Trailing statement without `;` at end of input
    MissingTerminator {
        statement_index: usize,
        line: usize,
        preview: String,
    },
}

impl RewriteWarning {
    pub fn line(&self) -> usize {
        match self {
            RewriteWarning::DegradedRewrite { line, .. }
            | RewriteWarning::MissingTerminator { line, .. } => *line,
        }
    }
}

impl std::fmt::Display for RewriteWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RewriteWarning::DegradedRewrite {
                statement_index,
                line,
                preview,
            } => write!(
                f,
                "line {} (statement #{}): ADD CONSTRAINT without extractable name left unguarded ({})",
                line, statement_index, preview
            ),
            RewriteWarning::MissingTerminator {
                statement_index,
                line,
                preview,
            } => write!(
                f,
                "line {} (statement #{}): statement not terminated by ';' at end of input ({})",
                line, statement_index, preview
            ),
        }
    }
}

/// Collects warnings during a run
#[derive(Debug, Default)]
pub struct WarningCollector {
    warnings: Vec<RewriteWarning>,
}

impl WarningCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, warning: RewriteWarning) {
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn extend(&mut self, warnings: impl IntoIterator<Item = RewriteWarning>) {
        for warning in warnings {
            self.add(warning);
        }
    }

    pub fn warnings(&self) -> &[RewriteWarning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<RewriteWarning> {
        self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn count(&self) -> usize {
        self.warnings.len()
    }

    pub fn degraded_count(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, RewriteWarning::DegradedRewrite { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn degraded(line: usize) -> RewriteWarning {
        RewriteWarning::DegradedRewrite {
            statement_index: line - 1,
            line,
            preview: "ALTER TABLE t ADD CONSTRAINT".to_string(),
        }
    }

    #[test]
    fn test_identical_warnings_are_all_kept() {
        let mut collector = WarningCollector::new();
        collector.add(degraded(3));
        collector.add(degraded(3));
        assert_eq!(collector.count(), 2);
        assert_eq!(collector.degraded_count(), 2);
    }

    #[test]
    fn test_display_mentions_line() {
        let text = degraded(12).to_string();
        assert!(text.starts_with("line 12 (statement #11)"));
    }
}
