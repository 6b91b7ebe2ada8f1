mod cli;

use crate::cli::Cli;
use clap::Parser;
use shardstrap::EXIT_STEP_FAILED;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    cli::init_tracing(cli.log_format);

    match cli::run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(EXIT_STEP_FAILED)
        }
    }
}
