use std::process::ExitCode;

use clap::Parser;
use mindctrl_cli::{cli::Cli, commands, logging};

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	match commands::dispatch(cli).await {
		Ok(code) => code,
		Err(err) => {
			eprintln!("error: {err:#}");
			ExitCode::FAILURE
		}
	}
}
