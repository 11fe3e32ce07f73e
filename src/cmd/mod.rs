mod analyze;
mod flatten;
mod report;
mod split;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use dump_stager::config::StagerConfig;
use dump_stager::json_schema;
use dump_stager::rewriter::{ConstraintScope, TypeGuard};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "dump-stager")]
#[command(version)]
#[command(about = "Rewrite SQL dumps into idempotent, batched scripts for staged replay", long_about = None)]
pub struct Cli {
    /// Log filter for diagnostics on stderr (RUST_LOG overrides)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Rewrite options shared by every transforming command
#[derive(clap::Args, Clone, Default)]
pub struct RewriteArgs {
    /// YAML config file (batches, retained_settings, type_guard, constraint_scope, header)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// SET options to keep, replacing the configured list (comma-separated)
    #[arg(long)]
    pub keep_settings: Option<String>,

    /// How CREATE TYPE is guarded: keyword, catalog
    #[arg(long)]
    pub type_guard: Option<TypeGuard>,

    /// Constraint guard match: table (name on the altered table), global (name on any table)
    #[arg(long)]
    pub constraint_scope: Option<ConstraintScope>,

    /// Fail instead of warning on degraded rewrites and unterminated statements
    #[arg(long)]
    pub strict: bool,
}

impl RewriteArgs {
    /// Config file values with command-line overrides applied.
    pub fn resolve(&self) -> anyhow::Result<StagerConfig> {
        let mut config = StagerConfig::load_or_default(self.config.as_deref())?;
        if let Some(keep) = &self.keep_settings {
            config.retained_settings = keep
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(guard) = self.type_guard {
            config.type_guard = guard;
        }
        if let Some(scope) = self.constraint_scope {
            config.constraint_scope = scope;
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Rewrite a dump and split it into part_1.sql .. part_N.sql
    Split {
        /// Input SQL dump (supports .gz, .bz2, .xz, .zst compression)
        file: PathBuf,

        /// Output directory for part files
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Number of batches (default 10, or `batches` from the config file)
        #[arg(short = 'n', long)]
        batches: Option<usize>,

        /// Write a header comment at the top of each part file
        #[arg(long)]
        header: bool,

        #[command(flatten)]
        rewrite: RewriteArgs,

        /// Preview without writing files (dry run)
        #[arg(long)]
        dry_run: bool,

        /// Show progress while reading the dump
        #[arg(short, long)]
        progress: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rewrite a dump into a single cleaned file
    Flatten {
        /// Input SQL dump (supports .gz, .bz2, .xz, .zst compression)
        file: PathBuf,

        /// Output SQL file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        rewrite: RewriteArgs,

        /// Preview without writing files (dry run)
        #[arg(long)]
        dry_run: bool,

        /// Show progress while reading the dump
        #[arg(short, long)]
        progress: bool,

        /// Output results as JSON (requires --output or --dry-run)
        #[arg(long)]
        json: bool,
    },

    /// Classify a dump and report what would be rewritten or dropped
    Analyze {
        /// Input SQL dump (supports .gz, .bz2, .xz, .zst compression)
        file: PathBuf,

        #[command(flatten)]
        rewrite: RewriteArgs,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print JSON schemas for --json outputs and the config file
    Schema {
        /// Schema to print (analyze, config, flatten, split); all when omitted
        name: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Split {
            file,
            output,
            batches,
            header,
            rewrite,
            dry_run,
            progress,
            json,
        } => split::run(
            file, output, batches, header, rewrite, dry_run, progress, json,
        ),
        Commands::Flatten {
            file,
            output,
            rewrite,
            dry_run,
            progress,
            json,
        } => flatten::run(file, output, rewrite, dry_run, progress, json),
        Commands::Analyze {
            file,
            rewrite,
            json,
        } => analyze::run(file, rewrite, json),
        Commands::Schema { name } => print_schema(name.as_deref()),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "dump-stager", &mut io::stdout());
            Ok(())
        }
    }
}

fn print_schema(name: Option<&str>) -> anyhow::Result<()> {
    match name {
        Some(name) => {
            let schema = json_schema::get_schema(name).with_context(|| {
                format!(
                    "unknown schema '{}', available: {}",
                    name,
                    json_schema::schema_names().join(", ")
                )
            })?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        None => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json_schema::all_schemas())?
            );
        }
    }
    Ok(())
}

pub(crate) fn ensure_input(file: &Path) -> anyhow::Result<u64> {
    if !file.exists() {
        anyhow::bail!("input file does not exist: {}", file.display());
    }
    Ok(std::fs::metadata(file)?.len())
}

pub(crate) fn byte_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░  ")
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
