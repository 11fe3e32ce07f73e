use super::report;
use super::RewriteArgs;
use dump_stager::pipeline::Stager;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

pub fn run(
    file: PathBuf,
    output: Option<PathBuf>,
    rewrite: RewriteArgs,
    dry_run: bool,
    progress: bool,
    json: bool,
) -> anyhow::Result<()> {
    let file_size = super::ensure_input(&file)?;
    let config = rewrite.resolve()?;

    // SQL goes to stdout when there is no output file, so nothing else may
    let to_stdout = output.is_none() && !dry_run;
    if json && to_stdout {
        anyhow::bail!("--json needs --output or --dry-run, stdout carries the SQL");
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

        let result = stager.flatten(output.as_deref());
        pb.finish_and_clear();
        result?
    } else {
        stager.flatten(output.as_deref())?
    };

    let elapsed = start_time.elapsed();

    if json {
        return report::print_json(&stats);
    }

    if to_stdout {
        report::print_stats(&mut io::stderr().lock(), &stats, elapsed)?;
    } else {
        let mut stdout = io::stdout().lock();
        if let Some(path) = &output {
            if !dry_run {
                println!("✓ Wrote {}", path.display());
            }
        }
        report::print_stats(&mut stdout, &stats, elapsed)?;
    }
    report::print_warnings(&stats);

    Ok(())
}
