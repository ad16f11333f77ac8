//! Error types for the mindctrl runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the bus, configuration and client layers.
///
/// None of these ever reach a remote client: procedure failures travel as
/// [`Output`](mindctrl_protocol::Output) values instead.
#[derive(Debug, Error)]
pub enum Error {
	/// Configuration is present but unusable.
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),

	/// The bus rejected or failed an operation.
	#[error("Bus error: {0}")]
	Bus(String),

	/// The bus connection is closed.
	#[error("Bus connection closed")]
	Closed,

	/// Timeout waiting for an operation.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// The server task is no longer running.
	#[error("Server task has shut down")]
	ServerGone,

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_))
	}
}

impl From<rumqttc::ClientError> for Error {
	fn from(err: rumqttc::ClientError) -> Self {
		Error::Bus(err.to_string())
	}
}
