use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = iqtap::cli::Cli::parse();
    match iqtap::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ iqtap::AppError::Engine(_)) => {
            iqtap::error!("{e}");
            ExitCode::from(1)
        }
        Err(e) => {
            iqtap::error!("{e}");
            ExitCode::from(2)
        }
    }
}
