use std::process::ExitCode;

use clap::Parser;

use loadspin::coordinator::{self, NumCpus};
use loadspin::{logging, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("Could not set up logging: {e}");
    }

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };

    let stop = match coordinator::stop_signal_for(config.strategy) {
        Ok(stop) => stop,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(e.exit_code());
        }
    };

    let on_interrupt = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        on_interrupt.set();
    }) {
        tracing::warn!("Ctrl+C will not stop the load gracefully: {e}");
    }

    #[cfg(unix)]
    let keys = match loadspin::watcher::TerminalKeys::stdin() {
        Ok(keys) => keys,
        Err(e) => {
            let e = loadspin::LoadError::Terminal(e);
            eprintln!("Error: {e}");
            return ExitCode::from(e.exit_code());
        }
    };
    #[cfg(not(unix))]
    let keys = |_: char| Ok::<_, std::io::Error>(false);

    match coordinator::run(&config, &NumCpus, keys, stop) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
