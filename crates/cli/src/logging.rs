//! Stderr logging for the `mindctrl` binary.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Default filter for a `-v` count.
///
/// 0 keeps errors only and silences the MQTT client, 1 shows lifecycle and
/// host action lines, 2 or more enables debug everywhere.
pub fn default_filter(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "error,rumqttc=off",
		1 => "info,rumqttc=warn",
		_ => "debug",
	}
}

/// Installs the subscriber. `RUST_LOG` takes precedence over `verbosity`.
pub fn init_logging(verbosity: u8) {
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr.with_max_level(tracing::Level::TRACE))
		.with_target(true)
		.compact()
		.init();
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn verbosity_levels() {
		assert_eq!(default_filter(0), "error,rumqttc=off");
		assert_eq!(default_filter(1), "info,rumqttc=warn");
		assert_eq!(default_filter(5), "debug");
		for level in 0..3 {
			assert!(EnvFilter::try_new(default_filter(level)).is_ok());
		}
	}
}
