//! Publish/subscribe bus abstraction.
//!
//! The server and the RPC client only see [`BusConnector`] and [`BusClient`].
//! A connector hands back a client handle plus an event stream; connection
//! progress is reported on the stream, never by the `connect` call itself.
//! Once [`BusEvent::Closed`] has been delivered the connection is finished
//! and no reconnect is attempted.

mod memory;
mod mqtt;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use memory::MemoryBroker;
pub use mqtt::MqttConnector;

use crate::error::Result;

/// Progress of a bus connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
	/// The broker accepted the connection.
	Connected,
	/// A message arrived on a subscribed topic.
	Message { topic: String, payload: Vec<u8> },
	/// The connection ended (refused, lost or closed on request).
	Closed { reason: Option<String> },
}

/// Message the broker publishes on behalf of a client that vanishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
	pub topic: String,
	pub payload: Vec<u8>,
	pub retain: bool,
}

/// Parameters of a single connection attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions {
	pub url: String,
	pub client_id: String,
	pub username: Option<String>,
	pub password: Option<String>,
	pub connect_timeout: Duration,
	/// Zero disables keep-alive pings.
	pub keep_alive: Duration,
	pub clean_session: bool,
	pub will: Option<Will>,
}

impl fmt::Debug for ConnectOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectOptions")
			.field("url", &self.url)
			.field("client_id", &self.client_id)
			.field("username", &self.username)
			.field("password", &self.password.as_ref().map(|_| "<redacted>"))
			.field("connect_timeout", &self.connect_timeout)
			.field("keep_alive", &self.keep_alive)
			.field("clean_session", &self.clean_session)
			.field("will", &self.will)
			.finish()
	}
}

impl ConnectOptions {
	pub fn new(url: impl Into<String>, client_id: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			client_id: client_id.into(),
			username: None,
			password: None,
			connect_timeout: Duration::from_secs(10),
			keep_alive: Duration::ZERO,
			clean_session: true,
			will: None,
		}
	}

	/// Sets credentials; an empty username leaves the connection anonymous.
	pub fn credentials(mut self, username: Option<&str>, password: Option<&str>) -> Self {
		match username.filter(|name| !name.is_empty()) {
			Some(name) => {
				self.username = Some(name.to_string());
				self.password = Some(password.unwrap_or_default().to_string());
			}
			None => {
				self.username = None;
				self.password = None;
			}
		}
		self
	}

	pub fn connect_timeout(mut self, timeout: Duration) -> Self {
		self.connect_timeout = timeout;
		self
	}

	pub fn will(mut self, will: Will) -> Self {
		self.will = Some(will);
		self
	}
}

/// Live connection: a handle for outbound operations and the event stream.
pub struct BusConnection {
	pub client: Arc<dyn BusClient>,
	pub events: mpsc::UnboundedReceiver<BusEvent>,
}

impl fmt::Debug for BusConnection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BusConnection").finish_non_exhaustive()
	}
}

/// Opens bus connections.
#[async_trait]
pub trait BusConnector: Send + Sync {
	/// Starts connecting. Fails only when the options are unusable; refusal by
	/// the broker arrives later as [`BusEvent::Closed`].
	async fn connect(&self, options: ConnectOptions) -> Result<BusConnection>;
}

/// Outbound half of a connection. All publishes are at-most-once.
#[async_trait]
pub trait BusClient: Send + Sync {
	async fn subscribe(&self, topic: &str) -> Result<()>;

	async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()>;

	/// Closes the connection cleanly; the last will is not published.
	async fn disconnect(&self) -> Result<()>;
}

/// Returns `true` if `topic` matches the MQTT subscription `filter`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
	let mut filter_levels = filter.split('/');
	let mut topic_levels = topic.split('/');
	loop {
		match (filter_levels.next(), topic_levels.next()) {
			(Some("#"), _) => return true,
			(Some("+"), Some(_)) => {}
			(Some(expected), Some(actual)) if expected == actual => {}
			(None, None) => return true,
			_ => return false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_topic_matches() {
		assert!(topic_matches("mindctrl/servers/s1", "mindctrl/servers/s1"));
		assert!(!topic_matches("mindctrl/servers/s1", "mindctrl/servers/s2"));
		assert!(topic_matches("mindctrl/statuses/+", "mindctrl/statuses/s1"));
		assert!(!topic_matches("mindctrl/statuses/+", "mindctrl/statuses/s1/x"));
		assert!(topic_matches("mindctrl/#", "mindctrl/clients/c1"));
		assert!(!topic_matches("mindctrl/servers", "mindctrl/servers/s1"));
	}

	#[test]
	fn test_credentials_skip_empty_username() {
		let options = ConnectOptions::new("mqtt://localhost:1883", "c").credentials(Some(""), Some("pw"));
		assert_eq!(options.username, None);
		assert_eq!(options.password, None);

		let options = ConnectOptions::new("mqtt://localhost:1883", "c").credentials(Some("alice"), None);
		assert_eq!(options.username.as_deref(), Some("alice"));
		assert_eq!(options.password.as_deref(), Some(""));
	}

	#[test]
	fn test_debug_redacts_password() {
		let options = ConnectOptions::new("mqtt://localhost:1883", "c").credentials(Some("alice"), Some("hunter2"));
		let rendered = format!("{options:?}");
		assert!(!rendered.contains("hunter2"));
		assert!(rendered.contains("<redacted>"));
	}
}
