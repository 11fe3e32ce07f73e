use super::report;
use super::RewriteArgs;
use dump_stager::pipeline::{Compression, Stager};
use std::io;
use std::path::PathBuf;
use std::time::Instant;

#[allow(clippy::too_many_arguments)]
pub fn run(
    file: PathBuf,
    output: PathBuf,
    batches: Option<usize>,
    header: bool,
    rewrite: RewriteArgs,
    dry_run: bool,
    progress: bool,
    json: bool,
) -> anyhow::Result<()> {
    let file_size = super::ensure_input(&file)?;
    let mut config = rewrite.resolve()?;
    if let Some(n) = batches {
        if n == 0 {
            anyhow::bail!("--batches must be at least 1");
        }
        config.batches = n;
    }
    config.header |= header;

    if !json {
        let compression = Compression::from_path(&file);
        if compression != Compression::None {
            println!("Detected compression: {}", compression);
        }
        if dry_run {
            println!(
                "Dry run: staging SQL dump: {} ({:.2} MB)",
                file.display(),
                file_size as f64 / (1024.0 * 1024.0)
            );
        } else {
            println!(
                "Staging SQL dump: {} ({:.2} MB)",
                file.display(),
                file_size as f64 / (1024.0 * 1024.0)
            );
            println!("Output directory: {}", output.display());
        }
        println!("Batches: {}", config.batches);
    }

    let mut stager = Stager::new(file)
        .with_config(&config)
        .with_dry_run(dry_run)
        .with_strict(rewrite.strict);

    let start_time = Instant::now();

    let stats = if progress && !json {
        let pb = super::byte_progress_bar(file_size);
        let pb_clone = pb.clone();
        stager = stager.with_progress(move |bytes| pb_clone.set_position(bytes));

        let result = stager.stage(&output);
        pb.finish_and_clear();
        result?
    } else {
        stager.stage(&output)?
    };

    let elapsed = start_time.elapsed();

    if json {
        return report::print_json(&stats);
    }

    if dry_run {
        println!("\n✓ Dry run completed!");
    } else {
        println!("\n✓ Staging completed successfully!");
    }

    let mut stdout = io::stdout().lock();
    report::print_stats(&mut stdout, &stats, elapsed)?;
    report::print_batches(&mut stdout, &stats)?;
    report::print_warnings(&stats);

    Ok(())
}
