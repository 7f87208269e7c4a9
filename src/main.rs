//! sfmlog entry point.

use sfmlog::cli::{run_cli, CliError};
use sfmlog::style::Style;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run_cli() {
        Ok(()) => {}
        Err(CliError::Transpile(error)) => {
            eprintln!("{}", error.render_traceback());
            std::process::exit(2);
        }
        Err(CliError::Other(message)) => {
            eprintln!("{}: {}", Style::bold_red("Error"), message);
            std::process::exit(2);
        }
    }
}
