use std::process::ExitCode;

use anyhow::{Context, Result};
use mindctrl_runtime::{FileConfig, ServerConfig};
use serde_json::json;

use super::stored;
use crate::cli::ConfigAction;

/// JSON view of a configuration with the password masked.
fn redacted(config: &ServerConfig) -> serde_json::Value {
	json!({
		"url": config.url,
		"name": config.name,
		"username": config.username,
		"password": config.password.as_ref().map(|_| "<redacted>"),
	})
}

pub(super) fn run(file: &FileConfig, action: ConfigAction) -> Result<ExitCode> {
	match action {
		ConfigAction::Show => {
			eprintln!("{}", file.path().display());
			match stored(file)? {
				Some(config) => println!("{}", serde_json::to_string_pretty(&redacted(&config))?),
				None => println!("null"),
			}
		}
		ConfigAction::Set {
			url,
			name,
			username,
			password,
		} => {
			let mut config = ServerConfig::new(url, name);
			config.username = username;
			config.password = password;
			config.validate()?;
			file.write(&config)
				.with_context(|| format!("failed to write {}", file.path().display()))?;
			eprintln!("saved {}", file.path().display());
		}
	}
	Ok(ExitCode::SUCCESS)
}
