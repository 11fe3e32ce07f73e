//! The staging pipeline: read → segment → classify → rewrite → partition → write.
//!
//! The transformation itself ([`transform_text`]) is pure and works on an
//! in-memory string. [`Stager`] adds file input (with decompression and a
//! progress callback) and writes output only after the whole dump has been
//! transformed successfully.

pub mod compression;

pub use compression::Compression;

use crate::batch::{self, Batch};
use crate::config::StagerConfig;
use crate::error::{LexError, Result, StagerError};
use crate::parser::{ClassifiedStatement, Segmenter};
use crate::progress::ProgressReader;
use crate::rewriter::{
    rewrite, DropReason, RewriteAction, RewriteOptions, RewriteWarning, RewrittenStatement,
    WarningCollector,
};
use crate::writer::{self, BatchWriter};
use ahash::AHashMap;
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Result of running the transformation over a whole dump.
#[derive(Debug, Default)]
pub struct Transformed {
    /// Kept statements, in input order
    pub statements: Vec<RewrittenStatement>,
    /// Units emitted by the segmenter, including dropped ones
    pub units_found: usize,
    pub kind_counts: AHashMap<&'static str, usize>,
    pub dropped: AHashMap<DropReason, usize>,
    pub rewritten: usize,
    pub warnings: WarningCollector,
}

/// Segment, classify and rewrite `input`. Fails on the first lexical error.
pub fn transform_text(
    input: &str,
    options: &RewriteOptions,
) -> std::result::Result<Transformed, LexError> {
    let mut out = Transformed {
        warnings: WarningCollector::new(),
        ..Default::default()
    };

    for raw in Segmenter::new(input) {
        let classified = ClassifiedStatement::new(raw?);
        out.units_found += 1;
        *out.kind_counts.entry(classified.kind.label()).or_insert(0) += 1;

        let outcome = rewrite(&classified, options);
        out.warnings.extend(outcome.warnings);
        match outcome.action {
            RewriteAction::Keep(stmt) => {
                if stmt.rewritten {
                    out.rewritten += 1;
                }
                out.statements.push(stmt);
            }
            RewriteAction::Drop(reason) => {
                tracing::trace!(line = classified.raw.start_line, %reason, "dropped unit");
                *out.dropped.entry(reason).or_insert(0) += 1;
            }
        }
    }

    tracing::info!(
        units = out.units_found,
        kept = out.statements.len(),
        rewritten = out.rewritten,
        warnings = out.warnings.count(),
        "transformed dump"
    );
    Ok(out)
}

/// Summary of one run, printed by the CLI and serialised for `--json`.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct StageStats {
    pub input_file: String,
    /// Size of the decoded dump text
    pub input_bytes: u64,
    /// Statements, meta-commands and comments found by the segmenter
    pub units_found: usize,
    pub statements_written: usize,
    pub statements_rewritten: usize,
    pub dropped: BTreeMap<String, usize>,
    pub kinds: BTreeMap<String, usize>,
    /// Statement count per batch, in batch order; empty outside batch mode
    pub batch_counts: Vec<usize>,
    /// `part_<j>.sql` files in the output directory numbered above the batch
    /// count. They are left in place and would be picked up by a glob.
    pub stale_parts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub dry_run: bool,
    pub warnings: Vec<RewriteWarning>,
}

impl StageStats {
    fn new(input_file: &Path, input_bytes: u64, transformed: &Transformed) -> Self {
        Self {
            input_file: input_file.display().to_string(),
            input_bytes,
            units_found: transformed.units_found,
            statements_written: transformed.statements.len(),
            statements_rewritten: transformed.rewritten,
            dropped: transformed
                .dropped
                .iter()
                .map(|(reason, n)| (reason.to_string(), *n))
                .collect(),
            kinds: transformed
                .kind_counts
                .iter()
                .map(|(kind, n)| (kind.to_string(), *n))
                .collect(),
            batch_counts: Vec::new(),
            stale_parts: Vec::new(),
            output: None,
            dry_run: false,
            warnings: transformed.warnings.warnings().to_vec(),
        }
    }

    pub fn degraded_count(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, RewriteWarning::DegradedRewrite { .. }))
            .count()
    }
}

#[derive(Default)]
struct RunSettings {
    batches: usize,
    options: RewriteOptions,
    dry_run: bool,
    header: bool,
    strict: bool,
    progress_fn: Option<Box<dyn Fn(u64)>>,
}

pub struct Stager {
    input_file: PathBuf,
    settings: RunSettings,
}

impl Stager {
    pub fn new(input_file: PathBuf) -> Self {
        Self {
            input_file,
            settings: RunSettings {
                batches: batch::DEFAULT_BATCH_COUNT,
                ..Default::default()
            },
        }
    }

    pub fn with_config(mut self, config: &StagerConfig) -> Self {
        self.settings.batches = config.batches;
        self.settings.header = config.header;
        self.settings.options = config.rewrite_options();
        self
    }

    pub fn with_batch_count(mut self, batches: usize) -> Self {
        self.settings.batches = batches;
        self
    }

    pub fn with_options(mut self, options: RewriteOptions) -> Self {
        self.settings.options = options;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.settings.dry_run = dry_run;
        self
    }

    pub fn with_header(mut self, header: bool) -> Self {
        self.settings.header = header;
        self
    }

    /// Treat rewrite warnings as fatal.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.settings.strict = strict;
        self
    }

    pub fn with_progress<F: Fn(u64) + 'static>(mut self, f: F) -> Self {
        self.settings.progress_fn = Some(Box::new(f));
        self
    }

    /// Transform the dump and write `part_1.sql ..= part_N.sql` into `output_dir`.
    pub fn stage(mut self, output_dir: &Path) -> Result<StageStats> {
        if self.settings.batches == 0 {
            return Err(StagerError::InvalidBatchCount);
        }

        let (transformed, mut stats) = self.transform()?;
        let batches: Vec<Batch> = batch::partition(transformed.statements, self.settings.batches)?;
        stats.batch_counts = batches.iter().map(Batch::len).collect();
        stats.dry_run = self.settings.dry_run;
        stats.output = Some(output_dir.display().to_string());

        let writer = BatchWriter::new(output_dir.to_path_buf()).with_header(self.settings.header);
        if !self.settings.dry_run {
            let written = writer.write_batches(&batches)?;
            tracing::info!(files = written.len(), dir = %output_dir.display(), "wrote batches");
        }
        stats.stale_parts = writer
            .stale_parts(batches.len())
            .iter()
            .map(|p| p.display().to_string())
            .collect();

        Ok(stats)
    }

    /// Transform the dump into one file, or stdout when `output` is `None`.
    pub fn flatten(mut self, output: Option<&Path>) -> Result<StageStats> {
        let (transformed, mut stats) = self.transform()?;
        stats.dry_run = self.settings.dry_run;
        stats.output = output.map(|p| p.display().to_string());

        if !self.settings.dry_run {
            match output {
                Some(path) => {
                    writer::write_flattened(path, &transformed.statements)?;
                    tracing::info!(path = %path.display(), "wrote flattened dump");
                }
                None => {
                    let stdout = std::io::stdout();
                    writer::write_flattened_to(&mut stdout.lock(), &transformed.statements)
                        .map_err(|e| StagerError::io("<stdout>", e))?;
                }
            }
        }

        Ok(stats)
    }

    /// Transform without writing anything.
    pub fn analyze(mut self) -> Result<StageStats> {
        let (_, mut stats) = self.transform()?;
        stats.dry_run = true;
        Ok(stats)
    }

    fn transform(&mut self) -> Result<(Transformed, StageStats)> {
        let text = self.read_input()?;
        tracing::info!(file = %self.input_file.display(), bytes = text.len(), "read dump");

        let transformed = transform_text(&text, &self.settings.options)?;
        let stats = StageStats::new(&self.input_file, text.len() as u64, &transformed);

        if self.settings.strict && transformed.warnings.has_warnings() {
            let first = transformed.warnings.warnings()[0].to_string();
            return Err(StagerError::StrictModeViolation {
                count: transformed.warnings.count(),
                first,
            });
        }

        Ok((transformed, stats))
    }

    fn read_input(&mut self) -> Result<String> {
        let path = self.input_file.clone();
        let io_err = |e| StagerError::io(&path, e);

        let file = File::open(&path).map_err(io_err)?;
        let compression = Compression::from_path(&path);
        if compression != Compression::None {
            tracing::debug!(%compression, "decompressing input");
        }

        let reader: Box<dyn Read> = if let Some(cb) = self.settings.progress_fn.take() {
            let progress_reader = ProgressReader::new(file, move |bytes| cb(bytes));
            compression.wrap_reader(Box::new(progress_reader)).map_err(io_err)?
        } else {
            compression.wrap_reader(Box::new(file)).map_err(io_err)?
        };

        let mut text = String::new();
        let mut reader = reader;
        reader.read_to_string(&mut text).map_err(io_err)?;
        Ok(text)
    }
}
