//! Topic naming and liveness markers.

use std::fmt;

/// Namespace prefix used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "mindctrl";

/// Builds the topics a server and its clients talk on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
	namespace: String,
}

impl Default for Topics {
	fn default() -> Self {
		Self::new(DEFAULT_NAMESPACE)
	}
}

impl Topics {
	pub fn new(namespace: impl Into<String>) -> Self {
		Self {
			namespace: namespace.into(),
		}
	}

	pub fn namespace(&self) -> &str {
		&self.namespace
	}

	/// Inbound request topic of a server.
	pub fn server(&self, name: &str) -> String {
		format!("{}/servers/{name}", self.namespace)
	}

	/// Retained liveness topic of a server.
	pub fn status(&self, name: &str) -> String {
		format!("{}/statuses/{name}", self.namespace)
	}

	/// Reply topic of a client.
	pub fn client(&self, client: &str) -> String {
		format!("{}/clients/{client}", self.namespace)
	}

	/// Returns the server name if `topic` is a status topic in this namespace.
	pub fn status_server<'a>(&self, topic: &'a str) -> Option<&'a str> {
		topic
			.strip_prefix(self.namespace.as_str())?
			.strip_prefix("/statuses/")
			.filter(|name| !name.is_empty())
	}
}

/// Liveness marker published (retained) on a status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
	Alive,
	Dead,
}

impl Status {
	pub fn as_str(self) -> &'static str {
		match self {
			Status::Alive => "alive",
			Status::Dead => "dead",
		}
	}

	pub fn payload(self) -> &'static [u8] {
		self.as_str().as_bytes()
	}

	/// Parses a status payload; anything but the two literals is `None`.
	pub fn from_payload(payload: &[u8]) -> Option<Self> {
		match payload {
			b"alive" => Some(Status::Alive),
			b"dead" => Some(Status::Dead),
			_ => None,
		}
	}
}

impl fmt::Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_topics() {
		let topics = Topics::default();
		assert_eq!(topics.server("s1"), "mindctrl/servers/s1");
		assert_eq!(topics.status("s1"), "mindctrl/statuses/s1");
		assert_eq!(topics.client("c1"), "mindctrl/clients/c1");
	}

	#[test]
	fn test_status_server() {
		let topics = Topics::new("lab");
		assert_eq!(topics.status_server("lab/statuses/desk"), Some("desk"));
		assert_eq!(topics.status_server("lab/statuses/"), None);
		assert_eq!(topics.status_server("mindctrl/statuses/desk"), None);
		assert_eq!(topics.status_server("lab/servers/desk"), None);
	}

	#[test]
	fn test_status_payloads() {
		assert_eq!(Status::from_payload(b"alive"), Some(Status::Alive));
		assert_eq!(Status::from_payload(b"dead"), Some(Status::Dead));
		assert_eq!(Status::from_payload(b"Alive"), None);
		assert_eq!(Status::Dead.payload(), b"dead");
	}
}
