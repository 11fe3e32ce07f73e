use dump_stager::batch::part_file_name;
use dump_stager::pipeline::StageStats;
use std::io::Write;
use std::time::Duration;

const WARNING_DISPLAY_LIMIT: usize = 50;

/// Human-readable statistics block shared by all commands.
pub(crate) fn print_stats<W: Write>(
    out: &mut W,
    stats: &StageStats,
    elapsed: Duration,
) -> std::io::Result<()> {
    writeln!(out, "\nStatistics:")?;
    writeln!(
        out,
        "  Input size: {:.2} MB",
        stats.input_bytes as f64 / (1024.0 * 1024.0)
    )?;
    writeln!(out, "  Units found: {}", stats.units_found)?;
    writeln!(out, "  Statements written: {}", stats.statements_written)?;
    writeln!(out, "  Statements rewritten: {}", stats.statements_rewritten)?;

    if !stats.dropped.is_empty() {
        let dropped: Vec<String> = stats
            .dropped
            .iter()
            .map(|(reason, n)| format!("{} {}", n, reason))
            .collect();
        writeln!(out, "  Dropped: {}", dropped.join(", "))?;
    }

    if !stats.warnings.is_empty() {
        writeln!(
            out,
            "  Warnings: {} ({} degraded rewrites)",
            stats.warnings.len(),
            stats.degraded_count()
        )?;
    }

    writeln!(out, "  Elapsed time: {:.3?}", elapsed)?;
    Ok(())
}

pub(crate) fn print_batches<W: Write>(out: &mut W, stats: &StageStats) -> std::io::Result<()> {
    writeln!(out, "\nBatches:")?;
    for (i, count) in stats.batch_counts.iter().enumerate() {
        writeln!(out, "  {:<14} {:>6} statements", part_file_name(i + 1), count)?;
    }
    if !stats.stale_parts.is_empty() {
        writeln!(out, "\nStale parts from an earlier run (not removed):")?;
        for path in &stats.stale_parts {
            writeln!(out, "  {}", path)?;
        }
    }
    Ok(())
}

pub(crate) fn print_kinds<W: Write>(out: &mut W, stats: &StageStats) -> std::io::Result<()> {
    writeln!(out, "\nStatement kinds:")?;
    for (kind, count) in &stats.kinds {
        writeln!(out, "  {:<16} {:>8}", kind, count)?;
    }
    Ok(())
}

pub(crate) fn print_warnings(stats: &StageStats) {
    if stats.warnings.is_empty() {
        return;
    }
    eprintln!("\nRewrite warnings ({}):", stats.warnings.len());
    for warning in stats.warnings.iter().take(WARNING_DISPLAY_LIMIT) {
        eprintln!("  ⚠ {}", warning);
    }
    if stats.warnings.len() > WARNING_DISPLAY_LIMIT {
        eprintln!(
            "  ... ({} more, use --json for the full list)",
            stats.warnings.len() - WARNING_DISPLAY_LIMIT
        );
    }
}

pub(crate) fn print_json(stats: &StageStats) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(stats)?);
    Ok(())
}
