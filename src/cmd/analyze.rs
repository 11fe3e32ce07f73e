use super::report;
use super::RewriteArgs;
use dump_stager::pipeline::Stager;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

pub fn run(file: PathBuf, rewrite: RewriteArgs, json: bool) -> anyhow::Result<()> {
    let file_size = super::ensure_input(&file)?;
    let config = rewrite.resolve()?;

    if !json {
        println!(
            "Analyzing SQL dump: {} ({:.2} MB)",
            file.display(),
            file_size as f64 / (1024.0 * 1024.0)
        );
    }

    let start_time = Instant::now();
    let stats = Stager::new(file)
        .with_config(&config)
        .with_strict(rewrite.strict)
        .analyze()?;
    let elapsed = start_time.elapsed();

    if json {
        return report::print_json(&stats);
    }

    let mut stdout = io::stdout().lock();
    report::print_kinds(&mut stdout, &stats)?;
    report::print_stats(&mut stdout, &stats, elapsed)?;
    report::print_warnings(&stats);

    Ok(())
}
