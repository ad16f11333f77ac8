use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use mindctrl_protocol::Status;
use mindctrl_runtime::{FileConfig, MqttConnector, RpcClient};

use super::{client_options, server_name, stored};
use crate::cli::StatusArgs;

fn describe(status: Option<Status>) -> &'static str {
	status.map_or("unknown", Status::as_str)
}

/// Prints `alive`, `dead` or `unknown`.
pub(super) async fn run(file: &FileConfig, args: StatusArgs) -> Result<ExitCode> {
	let stored = stored(file)?;
	let options = client_options(&args.bus, stored.as_ref())?;
	let server = server_name(args.server, stored.as_ref())?;

	let client = RpcClient::connect(&MqttConnector::default(), options)
		.await
		.context("failed to connect to the broker")?;
	let status = client.server_status(&server, Duration::from_secs(args.wait)).await?;
	let _ = client.close().await;

	println!("{}", describe(status));
	Ok(ExitCode::SUCCESS)
}
