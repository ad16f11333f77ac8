//! Host-side failures reported by capability implementations.

use thiserror::Error;

/// Failure of a host capability call.
///
/// Procedures surface these to clients as execution errors carrying the
/// display text, so messages are written for the remote caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
	/// The referenced object does not exist (any more).
	#[error("{0}")]
	NotFound(String),

	/// The host refused the action.
	#[error("{0}")]
	Rejected(String),

	/// The host cannot perform this kind of action at all.
	#[error("unsupported: {0}")]
	Unsupported(String),

	/// The host went away.
	#[error("host closed")]
	Closed,
}

impl HostError {
	pub fn unknown_tab(id: u64) -> Self {
		HostError::NotFound(format!("unknown tab id {id}"))
	}

	pub fn unknown_window(id: u64) -> Self {
		HostError::NotFound(format!("unknown window id {id}"))
	}

	pub fn unknown_download(id: u64) -> Self {
		HostError::NotFound(format!("unknown download id {id}"))
	}
}

pub type Result<T> = std::result::Result<T, HostError>;
