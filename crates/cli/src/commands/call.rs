use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use mindctrl_protocol::Params;
use mindctrl_runtime::{FileConfig, MqttConnector, RpcClient};
use serde_json::Value;

use super::{client_options, server_name, stored};
use crate::cli::CallArgs;

fn parse_params(raw: &str) -> Result<Params> {
	match serde_json::from_str(raw).context("--params is not valid JSON")? {
		Value::Object(params) => Ok(params),
		other => bail!("--params must be a JSON object, got {other}"),
	}
}

/// Prints the procedure output as JSON. Exits non-zero on an error output.
pub(super) async fn run(file: &FileConfig, args: CallArgs) -> Result<ExitCode> {
	let params = parse_params(&args.params)?;
	let stored = stored(file)?;
	let options = client_options(&args.bus, stored.as_ref())?;
	let server = server_name(args.server, stored.as_ref())?;

	let client = RpcClient::connect(&MqttConnector::default(), options)
		.await
		.context("failed to connect to the broker")?;
	let output = client
		.call(&server, &args.method, params, Duration::from_secs(args.timeout))
		.await
		.with_context(|| format!("calling {} on {server}", args.method))?;
	let _ = client.close().await;

	println!("{}", serde_json::to_string_pretty(&output.to_value())?);
	Ok(if output.is_success() {
		ExitCode::SUCCESS
	} else {
		ExitCode::FAILURE
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn params_must_be_an_object() {
		assert_eq!(parse_params("{}").unwrap(), Params::new());
		assert_eq!(parse_params(r#"{"tabId": 3}"#).unwrap()["tabId"], 3);
		assert!(parse_params("[1]").unwrap_err().to_string().contains("JSON object"));
		assert!(parse_params("{").is_err());
	}
}
