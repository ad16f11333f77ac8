//! Command implementations.

mod call;
mod config;
mod serve;
mod status;

use std::process::ExitCode;

use anyhow::{Context, Result};
use mindctrl_runtime::{ClientOptions, FileConfig, ServerConfig};

use crate::cli::{BusArgs, Cli, Commands};

pub async fn dispatch(cli: Cli) -> Result<ExitCode> {
	let file = match cli.config {
		Some(path) => FileConfig::new(path),
		None => FileConfig::standard(),
	};

	match cli.command {
		Commands::Serve(args) => serve::run(&file, args).await,
		Commands::Call(args) => call::run(&file, args).await,
		Commands::Status(args) => status::run(&file, args).await,
		Commands::Config { action } => config::run(&file, action),
	}
}

/// Stored configuration, if any, with a readable error on a broken file.
fn stored(file: &FileConfig) -> Result<Option<ServerConfig>> {
	file.read()
		.with_context(|| format!("failed to read {}", file.path().display()))
}

/// Client options from flags, falling back to the stored configuration.
fn client_options(bus: &BusArgs, stored: Option<&ServerConfig>) -> Result<ClientOptions> {
	let url = bus
		.url
		.clone()
		.or_else(|| stored.map(|config| config.url.clone()))
		.context("no broker URL; pass --url or run `mindctrl config set`")?;
	mindctrl_runtime::config::validate_url(&url)?;

	let username = bus.username.clone().or_else(|| stored.and_then(|config| config.username.clone()));
	let password = bus.password.clone().or_else(|| stored.and_then(|config| config.password.clone()));
	Ok(ClientOptions::new(url)
		.credentials(username, password)
		.namespace(bus.namespace.as_str()))
}

/// Target server name from a flag, falling back to the stored name.
fn server_name(flag: Option<String>, stored: Option<&ServerConfig>) -> Result<String> {
	flag.or_else(|| stored.map(|config| config.name.clone()))
		.context("no server name; pass --server or run `mindctrl config set`")
}
