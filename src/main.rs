mod cmd;

use clap::Parser;
use cmd::Cli;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = dump_stager::logging::init_logging(&cli.log_level) {
        eprintln!("{e}");
        std::process::exit(2);
    }

    if let Err(e) = cmd::run(cli) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
